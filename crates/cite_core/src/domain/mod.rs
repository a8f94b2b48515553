use serde::{Deserialize, Serialize};

/// Free-form passage metadata as handed over by the retrieval store.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// A retrieved passage shown to the model.
///
/// `id` is the 1-based position the passage occupies in the prompt; the
/// model cites passages by that number.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Source {
    pub id: u32,
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Assign positional ids to passages in the order they were retrieved.
pub fn number_sources<I>(passages: I) -> Vec<Source>
where
    I: IntoIterator<Item = (String, Metadata)>,
{
    passages
        .into_iter()
        .zip(1u32..)
        .map(|((text, metadata), id)| Source { id, text, metadata })
        .collect()
}

/// One inline citation found in an answer.
///
/// `number` follows order of appearance in the answer and restarts at 1 on
/// every extraction. Several records may name the same `source_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CitationRecord {
    pub number: u32,
    pub source_id: String,
    pub cited_text: String,
    pub supported_text: String,
}

impl CitationRecord {
    /// Whether the cited id names one of `sources`.
    pub fn refers_to_any(&self, sources: &[Source]) -> bool {
        self.source_id
            .parse::<u32>()
            .map(|id| sources.iter().any(|s| s.id == id))
            .unwrap_or(false)
    }
}
