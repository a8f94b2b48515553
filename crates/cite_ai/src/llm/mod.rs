use cite_core::error::AppError;
use serde::{Deserialize, Serialize};

/// Sampling parameters forwarded to the inference backend.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    pub temperature: f32,
    pub top_p: f32,
    pub repetition_penalty: f32,
    /// Start from a fresh context instead of reusing the previous one.
    pub reset_context: bool,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            top_p: 0.95,
            repetition_penalty: 1.0,
            reset_context: true,
        }
    }
}

/// Decoded text pieces, in generation order. The caller stops pulling
/// whenever it likes; dropping the iterator must stop generation.
pub type PieceStream = Box<dyn Iterator<Item = Result<String, AppError>> + Send>;

/// Anything that turns a prompt into a stream of text pieces.
pub trait PieceSource: Send + Sync {
    fn pieces(&self, prompt: &str, sampling: &SamplingConfig) -> Result<PieceStream, AppError>;
}

pub type TokenStream = Box<dyn Iterator<Item = Result<u32, AppError>> + Send>;

/// Token-level primitives of a local inference runtime.
///
/// The piece cap is enforced by the caller, never by the backend.
pub trait TokenBackend: Send + Sync {
    fn tokenize(&self, text: &str) -> Result<Vec<u32>, AppError>;
    fn generate_stream(
        &self,
        tokens: Vec<u32>,
        sampling: &SamplingConfig,
    ) -> Result<TokenStream, AppError>;
    fn detokenize(&self, tokens: &[u32]) -> Result<Vec<u8>, AppError>;
}

pub mod ollama_llm;
pub mod token_pieces;
