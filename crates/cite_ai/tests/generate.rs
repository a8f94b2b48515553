use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cite_ai::config::GenerationConfig;
use cite_ai::generate::GenerationEngine;
use cite_ai::llm::{PieceSource, PieceStream, SamplingConfig};
use cite_ai::observe::{GenerationCompleted, GenerationObserver, MetricsObserver};
use cite_core::domain::Source;
use cite_core::error::AppError;
use cite_core::response::StopReason;
use cite_core::sections::SectionName;
use cite_core::stream::StreamEvent;
use pretty_assertions::assert_eq;

const RESPONSE: &str = "reasoning<|answer_start|>It is blue. <ref name=\"<|source_id|>1\">sky color</ref>.<|answer_end|><|end_of_text|>";

struct ScriptedSource {
    pieces: Vec<Result<String, AppError>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedSource {
    fn chars(text: &str) -> Self {
        Self::new(text.chars().map(|c| Ok(c.to_string())).collect())
    }

    fn new(pieces: Vec<Result<String, AppError>>) -> Self {
        Self {
            pieces,
            prompts: Mutex::new(Vec::new()),
        }
    }
}

impl PieceSource for ScriptedSource {
    fn pieces(&self, prompt: &str, _sampling: &SamplingConfig) -> Result<PieceStream, AppError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(Box::new(self.pieces.clone().into_iter()))
    }
}

struct FailingSource;

impl PieceSource for FailingSource {
    fn pieces(&self, _prompt: &str, _sampling: &SamplingConfig) -> Result<PieceStream, AppError> {
        Err(AppError::backend("Model crashed", "exit=137"))
    }
}

/// Emits pieces forever and records when its iterator is dropped.
struct EndlessSource {
    pulled: Arc<AtomicUsize>,
    dropped: Arc<AtomicBool>,
}

struct EndlessPieces {
    pulled: Arc<AtomicUsize>,
    dropped: Arc<AtomicBool>,
}

impl Iterator for EndlessPieces {
    type Item = Result<String, AppError>;

    fn next(&mut self) -> Option<Self::Item> {
        let n = self.pulled.fetch_add(1, Ordering::SeqCst);
        if n == 0 {
            return Some(Ok("<|answer_start|>".to_string()));
        }
        Some(Ok("word ".to_string()))
    }
}

impl Drop for EndlessPieces {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

impl PieceSource for EndlessSource {
    fn pieces(&self, _prompt: &str, _sampling: &SamplingConfig) -> Result<PieceStream, AppError> {
        Ok(Box::new(EndlessPieces {
            pulled: Arc::clone(&self.pulled),
            dropped: Arc::clone(&self.dropped),
        }))
    }
}

#[derive(Default)]
struct RecordingObserver {
    completed: Mutex<Vec<GenerationCompleted>>,
    failed: Mutex<Vec<AppError>>,
}

impl GenerationObserver for RecordingObserver {
    fn generation_completed(&self, event: &GenerationCompleted) {
        self.completed.lock().unwrap().push(event.clone());
    }

    fn generation_failed(&self, error: &AppError) {
        self.failed.lock().unwrap().push(error.clone());
    }
}

fn sources() -> Vec<Source> {
    vec![Source {
        id: 1,
        text: "The sky appears blue because of Rayleigh scattering.".to_string(),
        metadata: Default::default(),
    }]
}

fn engine(source: impl PieceSource + 'static, config: GenerationConfig) -> GenerationEngine {
    GenerationEngine::new(Arc::new(source), config).expect("engine")
}

#[test]
fn generate_produces_sections_and_citations() {
    let source = Arc::new(ScriptedSource::chars(RESPONSE));
    let engine = GenerationEngine::new(source.clone(), GenerationConfig::default()).expect("engine");

    let result = engine
        .generate("Why is the sky blue?", sources())
        .expect("generate");

    assert_eq!(result.stop_reason, StopReason::EndOfText);
    assert_eq!(result.reasoning, "reasoning");
    assert_eq!(
        result.sections.answer(),
        Some("It is blue. <ref name=\"<|source_id|>1\">sky color</ref>.")
    );
    assert_eq!(
        result.clean_answer.as_deref(),
        Some("It is blue. [1].\n\n**Citations**\n[1] \"sky color\" [Source 1]\n")
    );
    let citations = result.citations.expect("citations");
    assert_eq!(citations.len(), 1);
    assert_eq!(citations[0].supported_text, "It is blue.");
    assert_eq!(result.sources, sources());

    let prompts = source.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].starts_with("<|query_start|>Why is the sky blue?<|query_end|>"));
}

#[test]
fn generate_without_answer_has_no_citations() {
    let engine = engine(
        ScriptedSource::chars("just thinking out loud<|end_of_text|>"),
        GenerationConfig::default(),
    );
    let result = engine.generate("q", sources()).expect("generate");

    assert_eq!(result.clean_answer, None);
    assert_eq!(result.citations, None);
    assert_eq!(
        result.sections.get(SectionName::FullText),
        Some("just thinking out loud")
    );
}

#[test]
fn generate_stops_at_piece_cap() {
    let config = GenerationConfig {
        max_tokens: 5,
        ..GenerationConfig::default()
    };
    let engine = engine(ScriptedSource::chars(RESPONSE), config);
    let result = engine.generate("q", sources()).expect("generate");

    assert_eq!(result.stop_reason, StopReason::PieceCap);
    assert_eq!(result.raw_response, "reaso");
}

#[test]
fn generate_reports_exhausted_backend() {
    let engine = engine(
        ScriptedSource::chars("<|answer_start|>short"),
        GenerationConfig::default(),
    );
    let result = engine.generate("q", sources()).expect("generate");

    assert_eq!(result.stop_reason, StopReason::Exhausted);
    assert_eq!(result.sections.answer(), None);
}

#[test]
fn generate_wraps_backend_failure() {
    let observer = Arc::new(RecordingObserver::default());
    let engine = engine(FailingSource, GenerationConfig::default()).with_observer(observer.clone());

    let err = engine.generate("q", sources()).unwrap_err();
    assert_eq!(err.code, "AI_GENERATION_FAILED");
    assert!(err.retryable);
    assert!(err.details.unwrap_or_default().contains("Model crashed"));
    assert_eq!(observer.failed.lock().unwrap().len(), 1);
    assert!(observer.completed.lock().unwrap().is_empty());
}

#[test]
fn engine_rejects_invalid_config() {
    let config = GenerationConfig {
        max_tokens: 0,
        ..GenerationConfig::default()
    };
    let err = GenerationEngine::new(Arc::new(FailingSource), config)
        .err()
        .expect("invalid config");
    assert_eq!(err.code, "CONFIG_INVALID");
}

#[test]
fn stream_ends_with_exactly_one_result() {
    let observer = Arc::new(RecordingObserver::default());
    let engine = engine(ScriptedSource::chars(RESPONSE), GenerationConfig::default())
        .with_observer(observer.clone());

    let events: Vec<StreamEvent> = engine
        .stream_generate("q", sources())
        .expect("stream")
        .collect::<Result<_, _>>()
        .expect("events");

    let finished: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, StreamEvent::Finished(_)))
        .collect();
    assert_eq!(finished.len(), 1);
    let Some(StreamEvent::Finished(result)) = events.last() else {
        panic!("last event must be the result");
    };
    assert_eq!(result.stop_reason, StopReason::EndOfText);
    assert_eq!(result.reasoning, "reasoning");
    assert_eq!(result.sources, sources());

    let mut last_len = 0;
    for event in &events {
        if let StreamEvent::Display(display) = event {
            assert!(display.text.len() >= last_len);
            last_len = display.text.len();
            assert_eq!(
                display.text.matches("<ref").count(),
                display.text.matches("</ref>").count()
            );
        }
    }
    assert_eq!(last_len, "It is blue. <ref name=\"<|source_id|>1\">sky color</ref>.".len());

    let completed = observer.completed.lock().unwrap();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].citations, 1);
    assert_eq!(completed[0].prompt_sha256.len(), 64);
    assert!(completed[0].unknown_source_ids.is_empty());
}

#[test]
fn stream_shows_placeholder_while_citation_is_open() {
    let engine = engine(ScriptedSource::chars(RESPONSE), GenerationConfig::default());
    let pending: Vec<String> = engine
        .stream_generate("q", sources())
        .expect("stream")
        .filter_map(|e| match e {
            Ok(StreamEvent::Display(d)) if d.pending_reference => Some(d.render()),
            _ => None,
        })
        .collect();

    assert!(!pending.is_empty());
    for rendered in pending {
        assert_eq!(rendered, "It is blue. [generating reference…]");
    }
}

#[test]
fn stream_yields_single_error_on_failure() {
    let engine = engine(FailingSource, GenerationConfig::default());
    let items: Vec<_> = engine.stream_generate("q", sources()).expect("stream").collect();

    assert_eq!(items.len(), 1);
    let err = items.into_iter().next().unwrap().unwrap_err();
    assert_eq!(err.code, "AI_GENERATION_FAILED");
}

#[test]
fn stream_error_mid_generation_is_terminal() {
    let engine = engine(
        ScriptedSource::new(vec![
            Ok("<|answer_start|>".to_string()),
            Ok("Hello".to_string()),
            Err(AppError::backend("Stream broke", "eof")),
            Ok(" never seen".to_string()),
        ]),
        GenerationConfig::default(),
    );
    let items: Vec<_> = engine.stream_generate("q", sources()).expect("stream").collect();

    let last = items.last().expect("items");
    assert!(last.is_err());
    assert_eq!(items.iter().filter(|i| i.is_err()).count(), 1);
    assert!(items
        .iter()
        .all(|i| !matches!(i, Ok(StreamEvent::Finished(_)))));
}

#[test]
fn dropping_stream_stops_producer() {
    let pulled = Arc::new(AtomicUsize::new(0));
    let dropped = Arc::new(AtomicBool::new(false));
    let config = GenerationConfig {
        channel_capacity: 1,
        ..GenerationConfig::default()
    };
    let engine = engine(
        EndlessSource {
            pulled: pulled.clone(),
            dropped: dropped.clone(),
        },
        config,
    );

    let mut stream = engine.stream_generate("q", sources()).expect("stream");
    let first = stream.next().expect("event").expect("ok");
    assert!(matches!(first, StreamEvent::Display(_)));
    drop(stream);

    let deadline = Instant::now() + Duration::from_secs(5);
    while !dropped.load(Ordering::SeqCst) {
        assert!(Instant::now() < deadline, "producer kept generating");
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(pulled.load(Ordering::SeqCst) < GenerationConfig::default().max_tokens);
}

#[test]
fn stream_never_pulls_past_piece_cap() {
    let pulled = Arc::new(AtomicUsize::new(0));
    let dropped = Arc::new(AtomicBool::new(false));
    let config = GenerationConfig {
        max_tokens: 10,
        ..GenerationConfig::default()
    };
    assert!(config.channel_capacity > config.max_tokens);
    let engine = engine(
        EndlessSource {
            pulled: pulled.clone(),
            dropped: dropped.clone(),
        },
        config,
    );

    let stream = engine.stream_generate("q", sources()).expect("stream");
    // Give the producer time to fill the channel before anything is read.
    std::thread::sleep(Duration::from_millis(200));
    let events: Vec<_> = stream.collect::<Result<Vec<_>, _>>().expect("events");
    let Some(StreamEvent::Finished(result)) = events.last() else {
        panic!("expected a result");
    };
    assert_eq!(result.stop_reason, StopReason::PieceCap);

    let deadline = Instant::now() + Duration::from_secs(5);
    while !dropped.load(Ordering::SeqCst) {
        assert!(Instant::now() < deadline, "producer kept generating");
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(pulled.load(Ordering::SeqCst), 10);
}

/// Backend whose piece iterator panics on the third pull.
struct PanickingSource;

impl PieceSource for PanickingSource {
    fn pieces(&self, _prompt: &str, _sampling: &SamplingConfig) -> Result<PieceStream, AppError> {
        let mut pulls = 0;
        Ok(Box::new(std::iter::from_fn(move || {
            pulls += 1;
            match pulls {
                1 => Some(Ok("<|answer_start|>".to_string())),
                2 => Some(Ok("Partial".to_string())),
                _ => panic!("backend crashed"),
            }
        })))
    }
}

#[test]
fn stream_reports_backend_panic_as_failure() {
    let observer = Arc::new(RecordingObserver::default());
    let engine = engine(PanickingSource, GenerationConfig::default()).with_observer(observer.clone());

    let items: Vec<_> = engine.stream_generate("q", sources()).expect("stream").collect();

    let err = items.last().expect("items").clone().unwrap_err();
    assert_eq!(err.code, "AI_GENERATION_FAILED");
    assert!(err.details.unwrap_or_default().contains("backend crashed"));
    assert_eq!(items.iter().filter(|i| i.is_err()).count(), 1);
    assert!(items
        .iter()
        .all(|i| !matches!(i, Ok(StreamEvent::Finished(_)))));
    assert_eq!(observer.failed.lock().unwrap().len(), 1);
    assert!(observer.completed.lock().unwrap().is_empty());
}

#[test]
fn metrics_observer_accumulates_requests() {
    let metrics = Arc::new(MetricsObserver::new());
    let engine = engine(ScriptedSource::chars(RESPONSE), GenerationConfig::default())
        .with_observer(metrics.clone());

    engine.generate("q", sources()).expect("first");
    engine.generate("q", sources()).expect("second");

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.requests, 2);
    assert_eq!(snapshot.failures, 0);
    assert_eq!(snapshot.citations, 2);
    // The piece completing the sentinel is not counted.
    let pieces_per_run = RESPONSE.chars().count() - 1;
    assert_eq!(snapshot.pieces, 2 * pieces_per_run);
}

#[test]
fn unknown_citations_are_reported_not_removed() {
    let observer = Arc::new(RecordingObserver::default());
    let engine = engine(
        ScriptedSource::chars(
            "<|answer_start|>Yes. <ref name=\"<|source_id|>9\">made up</ref><|answer_end|><|end_of_text|>",
        ),
        GenerationConfig::default(),
    )
    .with_observer(observer.clone());

    let result = engine.generate("q", sources()).expect("generate");
    assert_eq!(result.citations.expect("citations")[0].source_id, "9");
    assert_eq!(
        observer.completed.lock().unwrap()[0].unknown_source_ids,
        vec!["9".to_string()]
    );
}
