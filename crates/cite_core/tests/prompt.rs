use cite_core::domain::{Metadata, Source};
use cite_core::prompt::{format_prompt, prompt_sources};
use pretty_assertions::assert_eq;

fn source(id: u32, text: &str) -> Source {
    Source {
        id,
        text: text.to_string(),
        metadata: Metadata::new(),
    }
}

#[test]
fn formats_query_sources_and_start_marker() {
    let prompt = format_prompt(
        "Why is the sky blue?",
        &[source(1, "Rayleigh scattering."), source(2, "Blue light scatters more.")],
    );
    assert_eq!(
        prompt,
        "<|query_start|>Why is the sky blue?<|query_end|>\n\
         <|source_start|><|source_id|>1 Rayleigh scattering.<|source_end|>\n\
         <|source_start|><|source_id|>2 Blue light scatters more.<|source_end|>\n\
         <|language_start|>\n"
    );
}

#[test]
fn numbering_is_positional_not_taken_from_ids() {
    let sources = vec![source(9, "nine"), source(7, "seven"), source(3, "three")];
    let prompt = format_prompt("q", &sources);
    assert_eq!(
        prompt_sources(&prompt),
        vec![(1, "nine"), (2, "seven"), (3, "three")]
    );
}

#[test]
fn prompt_round_trip_preserves_source_order() {
    let texts: Vec<String> = (0..12).map(|i| format!("passage number {i} with words")).collect();
    let sources: Vec<Source> = texts.iter().map(|t| source(0, t)).collect();
    let prompt = format_prompt("order?", &sources);

    let recovered = prompt_sources(&prompt);
    assert_eq!(recovered.len(), texts.len());
    for (pos, (number, text)) in recovered.into_iter().enumerate() {
        assert_eq!(number as usize, pos + 1);
        assert_eq!(text, texts[pos]);
    }
}

#[test]
fn no_sources_still_ends_with_start_marker() {
    assert_eq!(
        format_prompt("q", &[]),
        "<|query_start|>q<|query_end|>\n<|language_start|>\n"
    );
}
