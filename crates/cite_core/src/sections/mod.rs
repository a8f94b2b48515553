use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::protocol::{lex, Lexeme, Marker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionName {
    /// Preamble ending at `<|language_end|>`.
    Language,
    QueryReport,
    SourceAnalysis,
    Draft,
    Answer,
    /// The whole response, used only when no marker matched at all.
    FullText,
}

impl SectionName {
    /// Sections delimited by their own start/end marker pair.
    pub const DELIMITED: [SectionName; 4] = [
        SectionName::QueryReport,
        SectionName::SourceAnalysis,
        SectionName::Draft,
        SectionName::Answer,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SectionName::Language => "language",
            SectionName::QueryReport => "query_report",
            SectionName::SourceAnalysis => "source_analysis",
            SectionName::Draft => "draft",
            SectionName::Answer => "answer",
            SectionName::FullText => "full_text",
        }
    }

    fn markers(self) -> Option<(Marker, Marker)> {
        match self {
            SectionName::QueryReport => Some((Marker::QueryReportStart, Marker::QueryReportEnd)),
            SectionName::SourceAnalysis => {
                Some((Marker::SourceAnalysisStart, Marker::SourceAnalysisEnd))
            }
            SectionName::Draft => Some((Marker::DraftStart, Marker::DraftEnd)),
            SectionName::Answer => Some((Marker::AnswerStart, Marker::AnswerEnd)),
            SectionName::Language | SectionName::FullText => None,
        }
    }
}

/// Extracted sections keyed by name. Absent sections are simply missing;
/// callers check presence rather than relying on defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParsedSections(BTreeMap<SectionName, String>);

impl ParsedSections {
    pub fn get(&self, name: SectionName) -> Option<&str> {
        self.0.get(&name).map(String::as_str)
    }

    pub fn contains(&self, name: SectionName) -> bool {
        self.0.contains_key(&name)
    }

    pub fn answer(&self) -> Option<&str> {
        self.get(SectionName::Answer)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SectionName, &str)> {
        self.0.iter().map(|(k, v)| (*k, v.as_str()))
    }

    fn insert(&mut self, name: SectionName, value: impl Into<String>) {
        self.0.insert(name, value.into());
    }
}

/// Split a model response into its named sections.
///
/// Never fails: unterminated sections are omitted, and a response with no
/// recognizable section at all comes back whole under `full_text`.
pub fn extract_sections(text: &str) -> ParsedSections {
    let lexemes = lex(text);
    let mut sections = ParsedSections::default();

    if let Some(end) = first_marker(&lexemes, Marker::LanguageEnd, 0) {
        sections.insert(SectionName::Language, text[..lexemes[end].start].trim());
    }

    for name in SectionName::DELIMITED {
        let Some((open, close)) = name.markers() else {
            continue;
        };
        let Some(i) = first_marker(&lexemes, open, 0) else {
            continue;
        };
        if let Some(j) = first_marker(&lexemes, close, i + 1) {
            let span = &text[lexemes[i].end..lexemes[j].start];
            sections.insert(name, span.trim());
        }
    }

    if sections.is_empty() {
        sections.insert(SectionName::FullText, text);
    }

    tracing::debug!(
        sections = ?sections.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(),
        "extracted sections"
    );
    sections
}

fn first_marker(lexemes: &[Lexeme<'_>], marker: Marker, from: usize) -> Option<usize> {
    lexemes
        .iter()
        .enumerate()
        .skip(from)
        .find(|(_, l)| l.is(marker))
        .map(|(i, _)| i)
}
