use super::Marker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'a> {
    Text(&'a str),
    Marker(Marker),
}

/// A token plus the byte span it covers in the lexed text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lexeme<'a> {
    pub token: Token<'a>,
    pub start: usize,
    pub end: usize,
}

impl Lexeme<'_> {
    pub fn is(&self, marker: Marker) -> bool {
        self.token == Token::Marker(marker)
    }
}

/// Split `text` into text spans and protocol markers.
///
/// Anything that looks like `<|...|>` but is not in the vocabulary stays
/// plain text. Concatenating the spans reproduces the input.
pub fn lex(text: &str) -> Vec<Lexeme<'_>> {
    let mut out = Vec::new();
    let mut text_start = 0usize;
    let mut pos = 0usize;

    while let Some(rel) = text[pos..].find("<|") {
        let at = pos + rel;
        match Marker::at_start_of(&text[at..]) {
            Some(marker) => {
                if text_start < at {
                    out.push(Lexeme {
                        token: Token::Text(&text[text_start..at]),
                        start: text_start,
                        end: at,
                    });
                }
                let end = at + marker.literal().len();
                out.push(Lexeme {
                    token: Token::Marker(marker),
                    start: at,
                    end,
                });
                text_start = end;
                pos = end;
            }
            // "<|" is two ASCII bytes, skipping it keeps `pos` on a boundary.
            None => pos = at + 2,
        }
    }

    if text_start < text.len() {
        out.push(Lexeme {
            token: Token::Text(&text[text_start..]),
            start: text_start,
            end: text.len(),
        });
    }
    out
}
