//! Observability hooks injected into the generation engine.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use cite_core::error::AppError;
use cite_core::response::StopReason;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Emitted once per successful generation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationCompleted {
    pub prompt_sha256: String,
    pub pieces: usize,
    pub stop_reason: StopReason,
    pub generation_ms: u64,
    pub citations: usize,
    /// Cited ids that match no source shown to the model.
    pub unknown_source_ids: Vec<String>,
    pub completed_at: String, // RFC3339
}

pub trait GenerationObserver: Send + Sync {
    fn retrieval_finished(&self, _elapsed: Duration, _hits: usize) {}
    /// Time from request start to the first piece.
    fn prefill_finished(&self, _elapsed: Duration) {}
    fn generation_completed(&self, _event: &GenerationCompleted) {}
    fn generation_failed(&self, _error: &AppError) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl GenerationObserver for NoopObserver {}

/// Writes every hook as a log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl GenerationObserver for TracingObserver {
    fn retrieval_finished(&self, elapsed: Duration, hits: usize) {
        tracing::info!(elapsed_ms = elapsed.as_millis() as u64, hits, "retrieval finished");
    }

    fn prefill_finished(&self, elapsed: Duration) {
        tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "prefill finished");
    }

    fn generation_completed(&self, event: &GenerationCompleted) {
        tracing::info!(
            pieces = event.pieces,
            stop_reason = ?event.stop_reason,
            generation_ms = event.generation_ms,
            citations = event.citations,
            prompt_sha256 = %event.prompt_sha256,
            "generation completed"
        );
    }

    fn generation_failed(&self, error: &AppError) {
        tracing::debug!(code = %error.code, retryable = error.retryable, "generation failed");
    }
}

/// Cumulative counters across requests.
#[derive(Debug, Default)]
pub struct MetricsObserver {
    requests: AtomicUsize,
    failures: AtomicUsize,
    pieces: AtomicUsize,
    citations: AtomicUsize,
    unknown_citations: AtomicUsize,
    retrieval_ms: AtomicU64,
    prefill_ms: AtomicU64,
    generation_ms: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub requests: usize,
    pub failures: usize,
    pub pieces: usize,
    pub citations: usize,
    pub unknown_citations: usize,
    pub retrieval_ms: u64,
    pub prefill_ms: u64,
    pub generation_ms: u64,
}

impl MetricsObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            pieces: self.pieces.load(Ordering::Relaxed),
            citations: self.citations.load(Ordering::Relaxed),
            unknown_citations: self.unknown_citations.load(Ordering::Relaxed),
            retrieval_ms: self.retrieval_ms.load(Ordering::Relaxed),
            prefill_ms: self.prefill_ms.load(Ordering::Relaxed),
            generation_ms: self.generation_ms.load(Ordering::Relaxed),
        }
    }
}

impl GenerationObserver for MetricsObserver {
    fn retrieval_finished(&self, elapsed: Duration, _hits: usize) {
        self.retrieval_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    fn prefill_finished(&self, elapsed: Duration) {
        self.prefill_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    fn generation_completed(&self, event: &GenerationCompleted) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.pieces.fetch_add(event.pieces, Ordering::Relaxed);
        self.citations.fetch_add(event.citations, Ordering::Relaxed);
        self.unknown_citations
            .fetch_add(event.unknown_source_ids.len(), Ordering::Relaxed);
        self.generation_ms
            .fetch_add(event.generation_ms, Ordering::Relaxed);
    }

    fn generation_failed(&self, _error: &AppError) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.failures.fetch_add(1, Ordering::Relaxed);
    }
}

pub(crate) fn now_rfc3339_utc() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}
