//! Piece-by-piece accumulation of a streamed model response.

mod display;

use serde::{Deserialize, Serialize};

use crate::citations::number_citation_tags;
use crate::domain::Source;
use crate::protocol::{find_from, Marker};
use crate::response::{process_response, GenerationResult, StopReason};
use display::DisplayTracker;

/// Shown in place of a citation the model is still writing.
pub const REFERENCE_PLACEHOLDER: &str = "[generating reference…]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    /// Nothing received yet.
    Prefill,
    /// Receiving pieces before the answer section.
    Reasoning,
    /// Receiving the answer section.
    Answer,
    /// Terminal; further pieces are ignored.
    Done,
}

/// The part of the in-progress answer that can be shown right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafeDisplay {
    /// Raw answer prefix; any citation tags in it are complete.
    pub text: String,
    /// A citation tag is open after `text`.
    pub pending_reference: bool,
}

impl SafeDisplay {
    /// `text` with completed citation tags shown as `[n]`.
    pub fn readable_text(&self) -> String {
        number_citation_tags(&self.text)
    }

    /// What a reader should see right now: the readable text, plus the
    /// placeholder while a citation is still being written.
    pub fn render(&self) -> String {
        let mut out = self.readable_text();
        if self.pending_reference {
            out.push_str(REFERENCE_PLACEHOLDER);
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    /// The safe display changed.
    Display(SafeDisplay),
    /// Generation ended; always the last event of a stream.
    Finished(Box<GenerationResult>),
}

/// Owns the response buffer of one in-flight request.
///
/// The buffer only grows. Once the answer marker shows up, everything
/// before it is frozen as reasoning and the rest is the live answer.
#[derive(Debug)]
pub struct StreamAccumulator {
    sources: Vec<Source>,
    max_pieces: usize,
    buffer: String,
    state: StreamState,
    pieces: usize,
    /// Where the next search for `<|answer_start|>` resumes.
    marker_scan: usize,
    /// Offset of the answer-start marker and of the answer text after it.
    answer_marker: Option<(usize, usize)>,
    display: DisplayTracker,
    last_display: Option<(usize, bool)>,
    stop_reason: Option<StopReason>,
}

impl StreamAccumulator {
    pub fn new(sources: Vec<Source>, max_pieces: usize) -> Self {
        Self {
            sources,
            max_pieces,
            buffer: String::new(),
            state: StreamState::Prefill,
            pieces: 0,
            marker_scan: 0,
            answer_marker: None,
            display: DisplayTracker::default(),
            last_display: None,
            stop_reason: None,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Pieces accepted so far. The sentinel is not counted.
    pub fn pieces(&self) -> usize {
        self.pieces
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    /// Append one piece.
    ///
    /// Returns `Finished` when this piece ended generation (sentinel or
    /// piece cap), `Display` when the safe display changed, `None`
    /// otherwise. Pieces after completion are ignored.
    pub fn push(&mut self, piece: &str) -> Option<StreamEvent> {
        if self.state == StreamState::Done {
            tracing::debug!(piece_len = piece.len(), "ignoring piece after completion");
            return None;
        }
        if self.state == StreamState::Prefill {
            self.state = StreamState::Reasoning;
        }

        let sentinel = Marker::EndOfText.literal();
        let scan_from = self.buffer.len().saturating_sub(sentinel.len() - 1);
        self.buffer.push_str(piece);
        if let Some(at) = find_from(&self.buffer, sentinel, scan_from) {
            self.buffer.truncate(at);
            if self.state == StreamState::Reasoning {
                self.look_for_answer();
            }
            return self.finish(StopReason::EndOfText).map(Box::new).map(StreamEvent::Finished);
        }
        self.pieces += 1;

        if self.state == StreamState::Reasoning {
            self.look_for_answer();
        }

        if self.pieces >= self.max_pieces {
            tracing::info!(pieces = self.pieces, "piece cap reached, stopping generation");
            return self.finish(StopReason::PieceCap).map(Box::new).map(StreamEvent::Finished);
        }

        if self.state == StreamState::Answer {
            return self.refresh_display().map(StreamEvent::Display);
        }
        None
    }

    /// End the stream and process the whole buffer. Returns `None` if the
    /// stream had already finished.
    pub fn finish(&mut self, reason: StopReason) -> Option<GenerationResult> {
        if self.state == StreamState::Done {
            return None;
        }
        self.state = StreamState::Done;
        self.stop_reason = Some(reason);

        let reasoning = match self.answer_marker {
            Some((marker_at, _)) => &self.buffer[..marker_at],
            None => self.buffer.as_str(),
        };
        tracing::debug!(
            pieces = self.pieces,
            stop_reason = ?reason,
            buffer_len = self.buffer.len(),
            "stream finished"
        );
        Some(process_response(
            &self.buffer,
            reasoning,
            std::mem::take(&mut self.sources),
            reason,
        ))
    }

    fn look_for_answer(&mut self) {
        let marker = Marker::AnswerStart.literal();
        match find_from(&self.buffer, marker, self.marker_scan) {
            Some(at) => {
                self.answer_marker = Some((at, at + marker.len()));
                self.state = StreamState::Answer;
                tracing::debug!(reasoning_len = at, "answer section started");
            }
            None => {
                self.marker_scan = self.buffer.len().saturating_sub(marker.len() - 1);
            }
        }
    }

    fn refresh_display(&mut self) -> Option<SafeDisplay> {
        let (_, answer_at) = self.answer_marker?;
        let answer = &self.buffer[answer_at..];
        let end = self.display.advance(answer);
        let pending = self.display.pending_reference();

        if self.last_display == Some((end, pending)) {
            return None;
        }
        self.last_display = Some((end, pending));
        Some(SafeDisplay {
            text: answer[..end].to_string(),
            pending_reference: pending,
        })
    }
}
