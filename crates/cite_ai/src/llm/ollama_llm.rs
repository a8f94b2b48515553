use std::io::{BufRead, BufReader, Lines};
use std::time::Duration;

use cite_core::error::{codes, AppError};
use serde::{Deserialize, Serialize};

use super::{PieceSource, PieceStream, SamplingConfig};
use crate::ollama::OllamaClient;

/// Streams raw completions from a local Ollama server.
///
/// The prompt is sent with `raw: true` so the protocol markers reach the
/// model untouched by any chat template.
#[derive(Debug, Clone)]
pub struct OllamaLlm {
    client: OllamaClient,
    model: String,
    timeout: Duration,
}

impl OllamaLlm {
    pub fn new(client: OllamaClient, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            model: model.into(),
            timeout,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    raw: bool,
    stream: bool,
    options: GenerateOptions,
}

/// `reset_context` has no Ollama equivalent: a raw request without a
/// `context` field always starts fresh, so the flag is not forwarded.
#[derive(Debug, Clone, Serialize)]
struct GenerateOptions {
    temperature: f32,
    top_p: f32,
    repeat_penalty: f32,
}

#[derive(Debug, Clone, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

impl PieceSource for OllamaLlm {
    fn pieces(&self, prompt: &str, sampling: &SamplingConfig) -> Result<PieceStream, AppError> {
        let url = format!("{}/api/generate", self.client.base_url());
        let req = GenerateRequest {
            model: &self.model,
            prompt,
            raw: true,
            stream: true,
            options: GenerateOptions {
                temperature: sampling.temperature,
                top_p: sampling.top_p,
                repeat_penalty: sampling.repetition_penalty,
            },
        };

        let resp = ureq::post(&url)
            .timeout(self.timeout)
            .send_json(serde_json::to_value(req).map_err(|e| {
                AppError::new(codes::AI_BACKEND_FAILED, "Failed to encode generate request")
                    .with_details(e.to_string())
            })?);

        match resp {
            Ok(r) if r.status() == 200 => Ok(Box::new(NdjsonPieces::new(BufReader::new(
                r.into_reader(),
            )))),
            Ok(r) => Err(
                AppError::new(codes::AI_BACKEND_FAILED, "Generate request failed")
                    .with_details(format!("status={}", r.status())),
            ),
            Err(e) => Err(AppError::backend(
                "Failed to call generate endpoint",
                e.to_string(),
            )),
        }
    }
}

/// Pieces from Ollama's newline-delimited JSON stream.
struct NdjsonPieces<R> {
    lines: Lines<R>,
    done: bool,
}

impl<R: BufRead> NdjsonPieces<R> {
    fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            done: false,
        }
    }

    fn fail(&mut self, message: &str, details: String) -> Option<Result<String, AppError>> {
        self.done = true;
        Some(Err(AppError::backend(message, details)))
    }
}

impl<R: BufRead> Iterator for NdjsonPieces<R> {
    type Item = Result<String, AppError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return self.fail("Generate stream broke", e.to_string()),
            };
            if line.trim().is_empty() {
                continue;
            }
            let chunk: GenerateChunk = match serde_json::from_str(&line) {
                Ok(chunk) => chunk,
                Err(e) => return self.fail("Failed to decode generate chunk", e.to_string()),
            };
            if let Some(err) = chunk.error {
                return self.fail("Ollama reported a generation error", err);
            }
            if chunk.done {
                self.done = true;
                if chunk.response.is_empty() {
                    return None;
                }
            }
            return Some(Ok(chunk.response));
        }
        None
    }
}
