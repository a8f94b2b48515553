use std::sync::Arc;
use std::time::Instant;

use cite_core::domain::Source;
use cite_core::error::AppError;
use cite_core::response::GenerationResult;

use crate::generate::{GenerationEngine, GenerationStream};
use crate::retrieve::{retrieve_sources, Retriever};

/// Retrieval followed by generation, one question at a time.
pub struct Assistant {
    retriever: Arc<dyn Retriever>,
    engine: GenerationEngine,
}

impl Assistant {
    pub fn new(retriever: Arc<dyn Retriever>, engine: GenerationEngine) -> Self {
        Self { retriever, engine }
    }

    pub fn engine(&self) -> &GenerationEngine {
        &self.engine
    }

    /// Fetch and number the passages a question will be answered from.
    pub fn retrieve(&self, query: &str) -> Result<Vec<Source>, AppError> {
        let started = Instant::now();
        let sources = retrieve_sources(
            self.retriever.as_ref(),
            query,
            self.engine.config().search_limit,
        )?;
        self.engine
            .observer()
            .retrieval_finished(started.elapsed(), sources.len());
        Ok(sources)
    }

    pub fn ask(&self, query: &str) -> Result<GenerationResult, AppError> {
        let sources = self.retrieve(query)?;
        self.engine.generate(query, sources)
    }

    pub fn ask_stream(&self, query: &str) -> Result<GenerationStream, AppError> {
        let sources = self.retrieve(query)?;
        self.engine.stream_generate(query, sources)
    }
}
