use std::sync::Arc;

use cite_core::error::AppError;

use super::{PieceSource, PieceStream, SamplingConfig, TokenBackend};

/// Adapts a [`TokenBackend`] into a [`PieceSource`]: one detokenize call
/// per generated token.
///
/// Bytes that are not valid UTF-8 on their own (e.g. half of a multi-byte
/// character) become U+FFFD instead of failing the request.
pub struct TokenPieces<B> {
    backend: Arc<B>,
}

impl<B> TokenPieces<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }
}

impl<B: TokenBackend + 'static> PieceSource for TokenPieces<B> {
    fn pieces(&self, prompt: &str, sampling: &SamplingConfig) -> Result<PieceStream, AppError> {
        let tokens = self.backend.tokenize(prompt)?;
        tracing::debug!(prompt_tokens = tokens.len(), "tokenized prompt");

        let generated = self.backend.generate_stream(tokens, sampling)?;
        let backend = Arc::clone(&self.backend);
        Ok(Box::new(generated.map(move |token| {
            let bytes = backend.detokenize(&[token?])?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        })))
    }
}
