//! Marker vocabulary of the structured-output protocol and a lexer over it.
//!
//! Markers are literal substrings. The lexer splits a text into plain-text
//! spans and marker tokens so extractors can apply "first open, first close"
//! matching over a token list instead of re-scanning raw text per section.

mod lexer;

pub use lexer::{lex, Lexeme, Token};

/// Opening of an inline citation tag: `<ref name="<|source_id|>N">text</ref>`.
pub const CITATION_OPEN: &str = "<ref";
pub const CITATION_HEAD: &str = "<ref name=\"";
pub const CITATION_CLOSE: &str = "</ref>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Marker {
    QueryStart,
    QueryEnd,
    SourceStart,
    SourceId,
    SourceEnd,
    LanguageStart,
    LanguageEnd,
    QueryReportStart,
    QueryReportEnd,
    SourceAnalysisStart,
    SourceAnalysisEnd,
    DraftStart,
    DraftEnd,
    AnswerStart,
    AnswerEnd,
    EndOfText,
}

impl Marker {
    pub const ALL: [Marker; 16] = [
        Marker::QueryStart,
        Marker::QueryEnd,
        Marker::SourceStart,
        Marker::SourceId,
        Marker::SourceEnd,
        Marker::LanguageStart,
        Marker::LanguageEnd,
        Marker::QueryReportStart,
        Marker::QueryReportEnd,
        Marker::SourceAnalysisStart,
        Marker::SourceAnalysisEnd,
        Marker::DraftStart,
        Marker::DraftEnd,
        Marker::AnswerStart,
        Marker::AnswerEnd,
        Marker::EndOfText,
    ];

    pub const fn literal(self) -> &'static str {
        match self {
            Marker::QueryStart => "<|query_start|>",
            Marker::QueryEnd => "<|query_end|>",
            Marker::SourceStart => "<|source_start|>",
            Marker::SourceId => "<|source_id|>",
            Marker::SourceEnd => "<|source_end|>",
            Marker::LanguageStart => "<|language_start|>",
            Marker::LanguageEnd => "<|language_end|>",
            Marker::QueryReportStart => "<|query_report_start|>",
            Marker::QueryReportEnd => "<|query_report_end|>",
            Marker::SourceAnalysisStart => "<|source_analysis_start|>",
            Marker::SourceAnalysisEnd => "<|source_analysis_end|>",
            Marker::DraftStart => "<|draft_start|>",
            Marker::DraftEnd => "<|draft_end|>",
            Marker::AnswerStart => "<|answer_start|>",
            Marker::AnswerEnd => "<|answer_end|>",
            Marker::EndOfText => "<|end_of_text|>",
        }
    }

    /// The marker whose literal starts `text`, if any.
    ///
    /// Every literal ends with `|>` and contains no other `|>`, so at most
    /// one marker can match at a given position.
    pub fn at_start_of(text: &str) -> Option<Marker> {
        Marker::ALL
            .into_iter()
            .find(|m| text.starts_with(m.literal()))
    }
}

/// Byte offset of the first `needle` in `hay` at or after `from`.
///
/// Works on bytes so `from` need not be a char boundary; every needle used
/// here is ASCII starting with `<`, so a hit is always a char boundary.
pub(crate) fn find_from(hay: &str, needle: &str, from: usize) -> Option<usize> {
    let bytes = hay.as_bytes();
    if from >= bytes.len() {
        return None;
    }
    bytes[from..]
        .windows(needle.len())
        .position(|w| w == needle.as_bytes())
        .map(|p| p + from)
}

/// Length of the longest suffix of `text` that is a proper prefix of `needle`.
pub(crate) fn partial_suffix_len(text: &str, needle: &str) -> usize {
    let bytes = text.as_bytes();
    let needle = needle.as_bytes();
    (1..needle.len())
        .rev()
        .find(|&k| bytes.ends_with(&needle[..k]))
        .unwrap_or(0)
}
