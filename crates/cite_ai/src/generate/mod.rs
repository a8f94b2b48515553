//! Prompt in, structured answer out.
//!
//! `generate` pulls pieces on the calling thread. `stream_generate` moves the
//! backend onto a producer thread and hands pieces over a bounded channel;
//! the returned iterator owns the accumulator and turns pieces into events.

use std::any::Any;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use cite_core::domain::Source;
use cite_core::error::{codes, AppError};
use cite_core::prompt::format_prompt;
use cite_core::response::{GenerationResult, StopReason};
use cite_core::stream::{StreamAccumulator, StreamEvent};
use sha2::{Digest, Sha256};

use crate::config::GenerationConfig;
use crate::guardrails::unknown_source_ids;
use crate::llm::{PieceSource, SamplingConfig};
use crate::observe::{now_rfc3339_utc, GenerationCompleted, GenerationObserver, TracingObserver};

type PieceMessage = Result<String, AppError>;

pub struct GenerationEngine {
    source: Arc<dyn PieceSource>,
    config: GenerationConfig,
    observer: Arc<dyn GenerationObserver>,
}

impl GenerationEngine {
    pub fn new(source: Arc<dyn PieceSource>, config: GenerationConfig) -> Result<Self, AppError> {
        config.validate()?;
        Ok(Self {
            source,
            config,
            observer: Arc::new(TracingObserver),
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn GenerationObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    pub fn observer(&self) -> &dyn GenerationObserver {
        self.observer.as_ref()
    }

    /// Run one request to completion on the calling thread.
    pub fn generate(&self, query: &str, sources: Vec<Source>) -> Result<GenerationResult, AppError> {
        let prompt = format_prompt(query, &sources);
        let mut run = GenerationRun::new(&prompt, sources, &self.config, self.observer.clone());

        let pieces = self
            .source
            .pieces(&prompt, &self.config.sampling())
            .map_err(|e| run.fail(e))?;
        for piece in pieces {
            let piece = piece.map_err(|e| run.fail(e))?;
            if let Some(StreamEvent::Finished(result)) = run.accept(&piece) {
                return Ok(*result);
            }
        }
        run.exhausted().ok_or_else(|| {
            run.fail(AppError::new(
                codes::AI_GENERATION_FAILED,
                "Generation ended without a result",
            ))
        })
    }

    /// Start one request on a producer thread.
    ///
    /// The returned stream yields safe-display updates and then exactly one
    /// `Finished` event, or a single error. Dropping it stops the producer at
    /// its next hand-off.
    pub fn stream_generate(
        &self,
        query: &str,
        sources: Vec<Source>,
    ) -> Result<GenerationStream, AppError> {
        let prompt = format_prompt(query, &sources);
        let run = GenerationRun::new(&prompt, sources, &self.config, self.observer.clone());

        let (tx, rx) = mpsc::sync_channel(self.config.channel_capacity);
        let source = Arc::clone(&self.source);
        let sampling = self.config.sampling();
        let max_pieces = self.config.max_tokens;
        let producer = thread::Builder::new()
            .name("cite-generate".to_string())
            .spawn(move || produce(source.as_ref(), &prompt, &sampling, max_pieces, &tx))
            .map_err(|e| {
                AppError::new(codes::AI_STREAM_FAILED, "Failed to start generation thread")
                    .with_details(e.to_string())
            })?;

        Ok(GenerationStream {
            run,
            pieces: Some(rx),
            producer: Some(producer),
        })
    }
}

/// Pull pieces until the backend runs dry, fails, the cap is reached, or
/// nobody is listening.
///
/// The consumer stops at the same cap, so the backend is never asked for a
/// piece past `max_pieces` however large the channel is.
fn produce(
    source: &dyn PieceSource,
    prompt: &str,
    sampling: &SamplingConfig,
    max_pieces: usize,
    tx: &SyncSender<PieceMessage>,
) {
    let pieces = match source.pieces(prompt, sampling) {
        Ok(pieces) => pieces,
        Err(e) => {
            let _ = tx.send(Err(e));
            return;
        }
    };
    for piece in pieces.take(max_pieces) {
        let failed = piece.is_err();
        if tx.send(piece).is_err() {
            tracing::debug!("consumer gone, producer stopping");
            return;
        }
        if failed {
            return;
        }
    }
}

/// Consumer half of a streamed request.
pub struct GenerationStream {
    run: GenerationRun,
    /// `None` once the stream has produced its terminal item.
    pieces: Option<Receiver<PieceMessage>>,
    /// Joined when the channel disconnects, to tell a normal end from a panic.
    /// Left detached when the consumer stops first.
    producer: Option<JoinHandle<()>>,
}

impl GenerationStream {
    pub fn is_finished(&self) -> bool {
        self.pieces.is_none()
    }

    fn close(&mut self) {
        self.pieces = None;
        self.producer = None;
    }

    /// The producer hung up: either the backend ran dry or the thread died.
    fn disconnected(&mut self) -> Option<Result<StreamEvent, AppError>> {
        let producer = self.producer.take();
        self.close();
        if let Some(Err(panic)) = producer.map(JoinHandle::join) {
            let err = AppError::new(codes::AI_GENERATION_FAILED, "Generation thread panicked")
                .with_details(panic_message(panic.as_ref()))
                .with_retryable(true);
            return Some(Err(self.run.fail(err)));
        }
        let result = self.run.exhausted()?;
        Some(Ok(StreamEvent::Finished(Box::new(result))))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl Iterator for GenerationStream {
    type Item = Result<StreamEvent, AppError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let message = self.pieces.as_ref()?.recv();
            match message {
                Ok(Ok(piece)) => match self.run.accept(&piece) {
                    Some(event @ StreamEvent::Finished(_)) => {
                        self.close();
                        return Some(Ok(event));
                    }
                    Some(event) => return Some(Ok(event)),
                    None => continue,
                },
                Ok(Err(e)) => {
                    self.close();
                    return Some(Err(self.run.fail(e)));
                }
                Err(_) => return self.disconnected(),
            }
        }
    }
}

/// Per-request bookkeeping shared by both entry points.
struct GenerationRun {
    accumulator: StreamAccumulator,
    observer: Arc<dyn GenerationObserver>,
    prompt_sha256: String,
    started: Instant,
    prefilled: bool,
}

impl GenerationRun {
    fn new(
        prompt: &str,
        sources: Vec<Source>,
        config: &GenerationConfig,
        observer: Arc<dyn GenerationObserver>,
    ) -> Self {
        Self {
            accumulator: StreamAccumulator::new(sources, config.max_tokens),
            observer,
            prompt_sha256: hex::encode(Sha256::digest(prompt.as_bytes())),
            started: Instant::now(),
            prefilled: false,
        }
    }

    fn accept(&mut self, piece: &str) -> Option<StreamEvent> {
        if !self.prefilled {
            self.prefilled = true;
            self.observer.prefill_finished(self.started.elapsed());
        }
        let event = self.accumulator.push(piece);
        if let Some(StreamEvent::Finished(result)) = &event {
            self.completed(result);
        }
        event
    }

    fn exhausted(&mut self) -> Option<GenerationResult> {
        let result = self.accumulator.finish(StopReason::Exhausted)?;
        self.completed(&result);
        Some(result)
    }

    fn completed(&self, result: &GenerationResult) {
        let unknown = unknown_source_ids(result);
        if !unknown.is_empty() {
            tracing::warn!(source_ids = ?unknown, "answer cites unknown sources");
        }
        let event = GenerationCompleted {
            prompt_sha256: self.prompt_sha256.clone(),
            pieces: self.accumulator.pieces(),
            stop_reason: result.stop_reason,
            generation_ms: self.started.elapsed().as_millis() as u64,
            citations: result.citations.as_ref().map_or(0, Vec::len),
            unknown_source_ids: unknown,
            completed_at: now_rfc3339_utc(),
        };
        self.observer.generation_completed(&event);
    }

    fn fail(&self, err: AppError) -> AppError {
        let err = if err.code == codes::AI_GENERATION_FAILED {
            err
        } else {
            let details = match &err.details {
                Some(details) => format!("{err}: {details}"),
                None => err.to_string(),
            };
            AppError::new(codes::AI_GENERATION_FAILED, "Generation failed")
                .with_details(details)
                .with_retryable(err.retryable)
        };
        tracing::warn!(error = %err, details = ?err.details, "backend failure");
        self.observer.generation_failed(&err);
        err
    }
}
