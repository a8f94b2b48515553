use std::fmt::Write;

use serde::{Deserialize, Serialize};

use crate::domain::{CitationRecord, Source};
use crate::protocol::{Marker, CITATION_CLOSE, CITATION_HEAD};

/// How far back `supported_text` reaches when no sentence boundary exists.
pub const SUPPORT_WINDOW_CHARS: usize = 150;

const SENTENCE_BOUNDARIES: [&str; 4] = [". ", "! ", "? ", "\n"];

/// An answer with its citation tags replaced by `[n]` references.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitedAnswer {
    pub clean_text: String,
    pub citations: Vec<CitationRecord>,
}

impl CitedAnswer {
    /// Clean text followed by a readable citations listing, or the clean
    /// text alone when nothing was cited.
    pub fn with_listing(&self) -> String {
        if self.citations.is_empty() {
            return self.clean_text.clone();
        }
        let mut out = self.clean_text.clone();
        out.push_str("\n\n**Citations**\n");
        for c in &self.citations {
            let _ = writeln!(out, "[{}] \"{}\" [Source {}]", c.number, c.cited_text, c.source_id);
        }
        out
    }
}

/// A well-formed citation tag found in a text, with byte offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TagMatch<'a> {
    start: usize,
    end: usize,
    source_id: &'a str,
    cited_text: &'a str,
}

/// Replace every well-formed citation tag in `answer` with `[n]` and
/// record what each one cited.
///
/// Malformed tags are left in place and do not consume a number, so the
/// numbers are always `1..=N`. Unknown source ids are recorded as-is.
pub fn extract_citations(answer: &str, sources: &[Source]) -> CitedAnswer {
    let mut working = answer.to_string();
    let mut citations: Vec<CitationRecord> = Vec::new();
    let mut from = 0usize;

    while let Some(tag) = find_citation_tag(&working, from) {
        let number = citations.len() as u32 + 1;
        let record = CitationRecord {
            number,
            source_id: tag.source_id.to_string(),
            cited_text: tag.cited_text.to_string(),
            supported_text: supported_text(&working[..tag.start]),
        };
        let (start, end) = (tag.start, tag.end);

        let reference = format!("[{number}]");
        working.replace_range(start..end, &reference);
        // A tag starting before `start` could not match earlier and still
        // cannot: the text after it is unchanged apart from this reference.
        from = start + reference.len();
        citations.push(record);
    }

    if citations.is_empty() {
        return CitedAnswer {
            clean_text: answer.to_string(),
            citations,
        };
    }

    let unknown = citations.iter().filter(|c| !c.refers_to_any(sources)).count();
    tracing::debug!(citations = citations.len(), unknown, "extracted citations");
    CitedAnswer {
        clean_text: working,
        citations,
    }
}

/// `text` with every well-formed citation tag shown as its `[n]` reference.
///
/// Numbering matches [`extract_citations`]; nothing is recorded or logged,
/// so this is cheap enough to run on every streamed update.
pub fn number_citation_tags(text: &str) -> String {
    let mut working = text.to_string();
    let mut number = 0u32;
    let mut from = 0usize;
    while let Some(tag) = find_citation_tag(&working, from) {
        number += 1;
        let (start, end) = (tag.start, tag.end);
        let reference = format!("[{number}]");
        working.replace_range(start..end, &reference);
        from = start + reference.len();
    }
    working
}

/// Leftmost well-formed tag at or after `from`.
fn find_citation_tag(text: &str, from: usize) -> Option<TagMatch<'_>> {
    let mut pos = from;
    while let Some(rel) = text.get(pos..)?.find(CITATION_HEAD) {
        let start = pos + rel;
        if let Some(tag) = match_tag_at(text, start) {
            return Some(tag);
        }
        pos = start + 1;
    }
    None
}

/// `<ref name="` [`<|source_id|>`] digits `">` text-without-newline `</ref>`,
/// taking the shortest text.
fn match_tag_at(text: &str, start: usize) -> Option<TagMatch<'_>> {
    let mut pos = start + CITATION_HEAD.len();
    if text[pos..].starts_with(Marker::SourceId.literal()) {
        pos += Marker::SourceId.literal().len();
    }

    let digits = text[pos..].bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let source_id = &text[pos..pos + digits];
    pos += digits;

    if !text[pos..].starts_with("\">") {
        return None;
    }
    pos += 2;

    let rest = &text[pos..];
    let line = &rest[..rest.find('\n').unwrap_or(rest.len())];
    let close = line.find(CITATION_CLOSE)?;

    Some(TagMatch {
        start,
        end: pos + close + CITATION_CLOSE.len(),
        source_id,
        cited_text: &rest[..close],
    })
}

/// Best-effort sentence the citation supports: the text between the
/// nearest preceding sentence boundary and the tag.
///
/// Trailing whitespace before the tag is ignored when looking for the
/// boundary, so a tag placed right after "blue. " supports "… blue."
/// rather than nothing.
fn supported_text(before: &str) -> String {
    let before = before.trim_end();
    let boundary = SENTENCE_BOUNDARIES
        .iter()
        .filter_map(|b| before.rfind(b).map(|i| i + b.len()))
        .max();

    match boundary {
        Some(after) => before[after..].trim().to_string(),
        None => {
            let window_start = before
                .char_indices()
                .rev()
                .nth(SUPPORT_WINDOW_CHARS - 1)
                .map(|(i, _)| i)
                .unwrap_or(0);
            before[window_start..].trim().to_string()
        }
    }
}
