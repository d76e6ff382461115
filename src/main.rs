//! chat-cli - A minimal streaming terminal chat client.
//!
//! Sends each message, with the conversation so far, to a Groq-hosted model
//! and prints the reply as it streams in.

mod config;
mod console;
mod error;
mod llm;
mod protocol;
mod repl;

use anyhow::{Context, Result};
use clap::Parser;
use config::SessionConfig;
use std::io;
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chat-cli")]
#[command(author, version, about = "A CLI chat application using Groq")]
#[command(long_about = "Chat with a Groq-hosted model from the terminal.\n\n\
Requires GROQ_API_KEY. Pick a model with GROQ_MODEL \
(llama-instant, llama-70b, mixtral).\n\n\
Type 'exit' to quit, 'clear' to clear the screen, 'paste' for multiline input.")]
struct Cli {
    /// Print timing and throughput after each reply
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let mut stdout = io::stdout();
    repl::start(
        SessionConfig::from_env(cli.verbose),
        llm::openai::OpenAIBackend::new,
        BufReader::new(tokio::io::stdin()),
        &mut stdout,
    )
    .await
    .context("Chat session failed")
}

/// Log to stderr so diagnostics never interleave with the chat on stdout.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("chat_cli=warn,reqwest=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}
