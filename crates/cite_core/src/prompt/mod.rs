use std::fmt::Write;

use crate::domain::Source;
use crate::protocol::{lex, Marker, Token};

/// Build the exact prompt the model is trained against.
///
/// Sources are numbered by position (1-based), regardless of any id they
/// already carry, and are never reordered or filtered.
pub fn format_prompt(query: &str, sources: &[Source]) -> String {
    let body: usize = sources.iter().map(|s| s.text.len() + 48).sum();
    let mut prompt = String::with_capacity(query.len() + body + 64);

    prompt.push_str(Marker::QueryStart.literal());
    prompt.push_str(query);
    prompt.push_str(Marker::QueryEnd.literal());
    prompt.push('\n');

    for (idx, source) in sources.iter().enumerate() {
        // Writing into a String cannot fail.
        let _ = writeln!(
            prompt,
            "{}{}{} {}{}",
            Marker::SourceStart.literal(),
            Marker::SourceId.literal(),
            idx + 1,
            source.text,
            Marker::SourceEnd.literal(),
        );
    }

    prompt.push_str(Marker::LanguageStart.literal());
    prompt.push('\n');

    tracing::debug!(
        prompt_len = prompt.len(),
        sources = sources.len(),
        "formatted prompt"
    );
    prompt
}

/// Recover `(number, text)` for each source block of a formatted prompt,
/// in prompt order.
pub fn prompt_sources(prompt: &str) -> Vec<(u32, &str)> {
    let lexemes = lex(prompt);
    let mut out = Vec::new();
    for window in lexemes.windows(4) {
        let [open, id, body, close] = window else {
            continue;
        };
        if !(open.is(Marker::SourceStart) && id.is(Marker::SourceId) && close.is(Marker::SourceEnd)) {
            continue;
        }
        let Token::Text(body) = body.token else {
            continue;
        };
        let (number, text) = body.split_once(' ').unwrap_or((body, ""));
        if let Ok(number) = number.parse::<u32>() {
            out.push((number, text));
        }
    }
    out
}
