use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes shared by the engine and its collaborators.
pub mod codes {
    pub const CONFIG_READ_FAILED: &str = "CONFIG_READ_FAILED";
    pub const CONFIG_PARSE_FAILED: &str = "CONFIG_PARSE_FAILED";
    pub const CONFIG_INVALID: &str = "CONFIG_INVALID";
    pub const AI_REMOTE_NOT_ALLOWED: &str = "AI_REMOTE_NOT_ALLOWED";
    pub const AI_OLLAMA_UNHEALTHY: &str = "AI_OLLAMA_UNHEALTHY";
    pub const AI_OLLAMA_UNREACHABLE: &str = "AI_OLLAMA_UNREACHABLE";
    pub const AI_BACKEND_FAILED: &str = "AI_BACKEND_FAILED";
    pub const AI_RETRIEVAL_FAILED: &str = "AI_RETRIEVAL_FAILED";
    pub const AI_GENERATION_FAILED: &str = "AI_GENERATION_FAILED";
    pub const AI_STREAM_FAILED: &str = "AI_STREAM_FAILED";
    pub const INTERNAL_SERIALIZE_FAILED: &str = "INTERNAL_SERIALIZE_FAILED";
}

/// Structured error returned by every fallible operation in the workspace.
///
/// Parsing model output never produces one of these; only collaborators
/// (backend, retrieval, configuration) do.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppError {
    pub code: String,
    pub message: String,
    pub details: Option<String>,
    pub retryable: bool,
}

impl AppError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            retryable: false,
        }
    }

    /// Backend invocation failure. Transport-level, so the caller may retry.
    pub fn backend(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self::new(codes::AI_BACKEND_FAILED, message)
            .with_details(details)
            .with_retryable(true)
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}
