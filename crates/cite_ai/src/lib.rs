pub mod assistant;
pub mod config;
pub mod generate;
pub mod guardrails;
pub mod llm;
pub mod observe;
pub mod ollama;
pub mod retrieve;
