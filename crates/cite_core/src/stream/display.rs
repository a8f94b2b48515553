use crate::protocol::{find_from, partial_suffix_len, Marker, CITATION_CLOSE, CITATION_OPEN};

/// Incremental guard deciding how much of a growing answer is safe to show.
///
/// Tracks whether a citation tag is currently open so each new piece is
/// scanned once instead of rescanning the whole answer. The safe end only
/// ever moves forward.
#[derive(Debug, Default)]
pub(crate) struct DisplayTracker {
    /// End of the safe prefix.
    safe_end: usize,
    /// Start of a `<ref` that has not been closed yet.
    open_at: Option<usize>,
    /// Where the next search resumes.
    cursor: usize,
    /// `<|answer_end|>` was reached; nothing after it is ever shown.
    closed: bool,
}

impl DisplayTracker {
    pub(crate) fn pending_reference(&self) -> bool {
        self.open_at.is_some()
    }

    /// Advance over `answer` (which only grows between calls) and return
    /// the new safe end.
    pub(crate) fn advance(&mut self, answer: &str) -> usize {
        while !self.closed {
            if let Some(open) = self.open_at {
                match find_from(answer, CITATION_CLOSE, self.cursor) {
                    Some(at) => {
                        self.safe_end = at + CITATION_CLOSE.len();
                        self.cursor = self.safe_end;
                        self.open_at = None;
                    }
                    None => {
                        let rescan = answer.len().saturating_sub(CITATION_CLOSE.len() - 1);
                        self.cursor = rescan.max(open);
                        break;
                    }
                }
                continue;
            }

            let tag = find_from(answer, CITATION_OPEN, self.cursor);
            let end = find_from(answer, Marker::AnswerEnd.literal(), self.cursor);
            match (tag, end) {
                (_, Some(end)) if tag.map_or(true, |t| end < t) => {
                    self.safe_end = end;
                    self.closed = true;
                }
                (Some(tag), _) => {
                    self.safe_end = tag;
                    self.open_at = Some(tag);
                    self.cursor = tag + CITATION_OPEN.len();
                }
                _ => {
                    let held = held_back(answer);
                    self.safe_end = self.safe_end.max(answer.len() - held);
                    self.cursor = self.safe_end;
                    break;
                }
            }
        }
        self.safe_end
    }
}

/// Bytes at the end of `answer` that might be the start of a citation tag
/// or a protocol marker still being generated.
fn held_back(answer: &str) -> usize {
    Marker::ALL
        .iter()
        .map(|m| m.literal())
        .chain(std::iter::once(CITATION_OPEN))
        .map(|needle| partial_suffix_len(answer, needle))
        .max()
        .unwrap_or(0)
}
