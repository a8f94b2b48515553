use std::fs;
use std::path::Path;
use std::time::Duration;

use cite_core::error::{codes, AppError};
use serde::{Deserialize, Serialize};

use crate::llm::SamplingConfig;

/// Settings for one assistant instance. Every field has a default, so a
/// config file only needs the values it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub model: String,
    pub ollama_base_url: String,
    /// Pieces accepted before generation is cut off.
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
    pub repetition_penalty: f32,
    pub reset_context: bool,
    /// Passages requested from the retriever per question.
    pub search_limit: usize,
    /// Capacity of the producer/consumer hand-off channel when streaming.
    pub channel_capacity: usize,
    pub request_timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: "pleias-rag".to_string(),
            ollama_base_url: "http://127.0.0.1:11434".to_string(),
            max_tokens: 2048,
            temperature: 0.0,
            top_p: 0.95,
            repetition_penalty: 1.0,
            reset_context: true,
            search_limit: 3,
            channel_capacity: 64,
            request_timeout_secs: 300,
        }
    }
}

impl GenerationConfig {
    /// Read a JSON config file and validate it.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let raw = fs::read_to_string(path).map_err(|e| {
            AppError::new(codes::CONFIG_READ_FAILED, "Failed to read config file")
                .with_details(format!("path={}; err={e}", path.display()))
        })?;
        let config: GenerationConfig = serde_json::from_str(&raw).map_err(|e| {
            AppError::new(codes::CONFIG_PARSE_FAILED, "Failed to parse config file")
                .with_details(format!("path={}; err={e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let invalid = |field: &str, value: String| -> Result<(), AppError> {
            Err(AppError::new(codes::CONFIG_INVALID, format!("Invalid value for {field}"))
                .with_details(format!("{field}={value}")))
        };

        if self.max_tokens == 0 {
            return invalid("max_tokens", self.max_tokens.to_string());
        }
        if self.channel_capacity == 0 {
            return invalid("channel_capacity", self.channel_capacity.to_string());
        }
        if self.search_limit == 0 {
            return invalid("search_limit", self.search_limit.to_string());
        }
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return invalid("temperature", self.temperature.to_string());
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return invalid("top_p", self.top_p.to_string());
        }
        if !self.repetition_penalty.is_finite() || self.repetition_penalty <= 0.0 {
            return invalid("repetition_penalty", self.repetition_penalty.to_string());
        }
        Ok(())
    }

    pub fn sampling(&self) -> SamplingConfig {
        SamplingConfig {
            temperature: self.temperature,
            top_p: self.top_p,
            repetition_penalty: self.repetition_penalty,
            reset_context: self.reset_context,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
