use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use cite_ai::assistant::Assistant;
use cite_ai::config::GenerationConfig;
use cite_ai::generate::GenerationEngine;
use cite_ai::guardrails::unknown_source_ids;
use cite_ai::llm::ollama_llm::OllamaLlm;
use cite_ai::ollama::OllamaClient;
use cite_ai::retrieve::PresetRetriever;
use cite_core::error::{codes, AppError};
use cite_core::response::GenerationResult;
use cite_core::stream::{SafeDisplay, StreamEvent};
use clap::Parser;

/// Answer a question from retrieved passages, citing them inline.
#[derive(Debug, Parser)]
#[command(name = "citebot", version)]
struct Args {
    /// The question to answer.
    question: String,

    /// JSON array of `{ "text", "metadata" }` passages in relevance order.
    #[arg(long)]
    sources: PathBuf,

    /// JSON generation config; missing fields use defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Verbose logging.
    #[arg(long)]
    debug: bool,

    /// Wait for the full answer instead of streaming it.
    #[arg(long)]
    no_stream: bool,

    /// Print the final result as JSON.
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.debug);

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(code = %e.code, retryable = e.retryable, "request failed");
            eprintln!("{e}");
            if let Some(details) = &e.details {
                eprintln!("  {details}");
            }
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn run(args: &Args) -> Result<(), AppError> {
    let config = match &args.config {
        Some(path) => GenerationConfig::load(path)?,
        None => GenerationConfig::default(),
    };

    let client = OllamaClient::new(&config.ollama_base_url)?;
    client.health_check()?;
    let llm = OllamaLlm::new(client, config.model.clone(), config.request_timeout());
    let engine = GenerationEngine::new(Arc::new(llm), config)?;
    let retriever = PresetRetriever::from_json_file(&args.sources)?;
    let assistant = Assistant::new(Arc::new(retriever), engine);

    let result = if args.no_stream {
        assistant.ask(&args.question)?
    } else {
        stream_answer(&assistant, &args.question)?
    };

    if args.json {
        let out = serde_json::to_string_pretty(&result).map_err(|e| {
            AppError::new(codes::INTERNAL_SERIALIZE_FAILED, "Failed to serialize result")
                .with_details(e.to_string())
        })?;
        println!("{out}");
    } else {
        print_result(&result, !args.no_stream);
    }
    Ok(())
}

/// Echo the safe part of the answer as it grows; return the final result.
fn stream_answer(assistant: &Assistant, question: &str) -> Result<GenerationResult, AppError> {
    let mut stdout = std::io::stdout();
    let mut live = LiveAnswer::default();
    for event in assistant.ask_stream(question)? {
        match event? {
            StreamEvent::Display(display) => {
                live.show(&mut stdout, &display).map_err(terminal_error)?;
            }
            StreamEvent::Finished(result) => {
                live.finish(&mut stdout).map_err(terminal_error)?;
                return Ok(*result);
            }
        }
    }
    Err(AppError::new(
        codes::AI_STREAM_FAILED,
        "Stream ended without a result",
    ))
}

fn terminal_error(e: io::Error) -> AppError {
    AppError::new(codes::AI_STREAM_FAILED, "Failed to write to terminal").with_details(e.to_string())
}

/// In-place terminal view of a streamed answer.
///
/// Only the tail that changed is rewritten: the readable text only grows,
/// so in practice that is the reference placeholder being replaced.
#[derive(Debug, Default)]
struct LiveAnswer {
    shown: String,
}

impl LiveAnswer {
    fn show(&mut self, out: &mut impl Write, display: &SafeDisplay) -> io::Result<()> {
        let rendered = display.render();
        let common = common_prefix_len(&self.shown, &rendered);

        let stale = self.shown[common..].chars().count();
        if stale > 0 {
            let back = "\u{8}".repeat(stale);
            write!(out, "{back}{}{back}", " ".repeat(stale))?;
        }
        write!(out, "{}", &rendered[common..])?;
        out.flush()?;
        self.shown = rendered;
        Ok(())
    }

    fn finish(&mut self, out: &mut impl Write) -> io::Result<()> {
        if !self.shown.is_empty() {
            writeln!(out, "\n")?;
        }
        out.flush()
    }
}

/// Byte length of the longest common prefix, on a char boundary of both.
fn common_prefix_len(a: &str, b: &str) -> usize {
    a.char_indices()
        .zip(b.chars())
        .take_while(|((_, x), y)| x == y)
        .last()
        .map_or(0, |((i, x), _)| i + x.len_utf8())
}

fn print_result(result: &GenerationResult, streamed: bool) {
    match &result.clean_answer {
        Some(_) if streamed => {
            if let Some(citations) = result.citations.as_deref().filter(|c| !c.is_empty()) {
                println!("**Citations**");
                for c in citations {
                    println!("[{}] \"{}\" [Source {}]", c.number, c.cited_text, c.source_id);
                }
            }
        }
        Some(answer) => println!("{answer}"),
        None => {
            println!("(no answer section; raw response follows)");
            println!("{}", result.raw_response);
        }
    }

    println!("\n**Sources**");
    for s in &result.sources {
        let preview: String = s.text.chars().take(80).collect();
        println!("[{}] {preview}", s.id);
    }

    for id in unknown_source_ids(result) {
        println!("warning: cited source {id} was not among the retrieved passages");
    }
}
