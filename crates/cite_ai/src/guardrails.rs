use cite_core::domain::{CitationRecord, Source};
use cite_core::response::GenerationResult;

/// Citations naming a source id that was never shown to the model.
///
/// These are likely hallucinated. They are reported, not removed: the
/// caller decides how to flag them.
pub fn unknown_source_citations<'a>(
    citations: &'a [CitationRecord],
    sources: &[Source],
) -> Vec<&'a CitationRecord> {
    citations
        .iter()
        .filter(|c| !c.refers_to_any(sources))
        .collect()
}

/// Distinct unknown source ids cited in a result, in first-cited order.
pub fn unknown_source_ids(result: &GenerationResult) -> Vec<String> {
    let Some(citations) = result.citations.as_deref() else {
        return Vec::new();
    };
    let mut out: Vec<String> = Vec::new();
    for c in unknown_source_citations(citations, &result.sources) {
        if !out.contains(&c.source_id) {
            out.push(c.source_id.clone());
        }
    }
    out
}
