use std::fs;
use std::path::Path;

use cite_core::domain::{number_sources, Metadata, Source};
use cite_core::error::{codes, AppError};
use serde::{Deserialize, Serialize};

/// One passage returned by the search store, in relevance order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Full-text search store. Ranking and deduplication are its business.
pub trait Retriever: Send + Sync {
    fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, AppError>;
}

/// Search and number the hits positionally, as the prompt will show them.
pub fn retrieve_sources(
    retriever: &dyn Retriever,
    query: &str,
    limit: usize,
) -> Result<Vec<Source>, AppError> {
    let q = query.trim();
    if q.is_empty() {
        return Err(AppError::new(
            codes::AI_RETRIEVAL_FAILED,
            "Query must not be empty",
        ));
    }

    let mut hits = retriever.search(q, limit)?;
    hits.truncate(limit);
    Ok(sources_from_hits(hits))
}

/// Number hits 1.. in the order given.
pub fn sources_from_hits(hits: Vec<SearchHit>) -> Vec<Source> {
    number_sources(hits.into_iter().map(|h| (h.text, h.metadata)))
}

/// Serves a fixed list of hits regardless of the query, e.g. passages
/// exported from a search run.
#[derive(Debug, Clone, Default)]
pub struct PresetRetriever {
    hits: Vec<SearchHit>,
}

impl PresetRetriever {
    pub fn new(hits: Vec<SearchHit>) -> Self {
        Self { hits }
    }

    /// Load a JSON array of `{ "text": ..., "metadata": {...} }` objects.
    pub fn from_json_file(path: &Path) -> Result<Self, AppError> {
        let raw = fs::read_to_string(path).map_err(|e| {
            AppError::new(codes::AI_RETRIEVAL_FAILED, "Failed to read passages file")
                .with_details(format!("path={}; err={e}", path.display()))
        })?;
        let hits: Vec<SearchHit> = serde_json::from_str(&raw).map_err(|e| {
            AppError::new(codes::AI_RETRIEVAL_FAILED, "Failed to parse passages file")
                .with_details(format!("path={}; err={e}", path.display()))
        })?;
        Ok(Self::new(hits))
    }
}

impl Retriever for PresetRetriever {
    fn search(&self, _query: &str, limit: usize) -> Result<Vec<SearchHit>, AppError> {
        Ok(self.hits.iter().take(limit).cloned().collect())
    }
}
