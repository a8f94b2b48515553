use serde::{Deserialize, Serialize};

use crate::citations::extract_citations;
use crate::domain::{CitationRecord, Source};
use crate::sections::{extract_sections, ParsedSections};

/// Why generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model emitted its end-of-output sentinel.
    EndOfText,
    /// The caller's piece cap was reached.
    PieceCap,
    /// The backend ran out of pieces.
    Exhausted,
}

/// Fully processed outcome of one generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub raw_response: String,
    /// Everything the model produced before the answer section.
    pub reasoning: String,
    pub sections: ParsedSections,
    /// Answer with `[n]` references and a citations listing; present only
    /// when an answer section was extracted.
    pub clean_answer: Option<String>,
    pub citations: Option<Vec<CitationRecord>>,
    pub sources: Vec<Source>,
    pub stop_reason: StopReason,
}

/// Run section and citation extraction over a complete response.
pub fn process_response(
    raw_response: &str,
    reasoning: &str,
    sources: Vec<Source>,
    stop_reason: StopReason,
) -> GenerationResult {
    let raw_response = raw_response.trim();
    let sections = extract_sections(raw_response);

    let (clean_answer, citations) = match sections.answer() {
        Some(answer) => {
            let cited = extract_citations(answer, &sources);
            (Some(cited.with_listing()), Some(cited.citations))
        }
        None => (None, None),
    };

    GenerationResult {
        raw_response: raw_response.to_string(),
        reasoning: reasoning.trim().to_string(),
        sections,
        clean_answer,
        citations,
        sources,
        stop_reason,
    }
}
