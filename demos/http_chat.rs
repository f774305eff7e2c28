//! Talk to the server configured for the Codex CLI over HTTP.
//!
//! Reads `~/.codex/config.toml` (or `$CODEX_HOME`) and `auth.json`:
//!
//! ```bash
//! cargo run --example http_chat -- "What is the capital of France?"
//! ```

use codex_provider::{
    CallOptions, CodexConfig, CodexProvider, CodexProviderOptions, LanguageModel, Prompt, Provider,
    StreamPart,
};
use futures_util::StreamExt;
use std::io::Write;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let options = CodexProviderOptions::new();
    let config = CodexConfig::load(&options)?;
    println!(
        "Using provider `{}` with model `{}` ({:?} API)",
        config.provider_id, config.model, config.wire_api
    );
    println!(
        "  API key: {}",
        if config.api_key.is_some() { "Set" } else { "Not set" }
    );

    let question = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "What is the capital of France?".to_string());
    let model = CodexProvider::new(options).language_model(None)?;

    let prompt = Prompt::system("You are a helpful assistant that responds concisely.")
        .with_user(question);
    let mut stream = model.do_stream(CallOptions::new(prompt)).await?;

    let mut stdout = std::io::stdout();
    while let Some(part) = stream.next().await {
        match part {
            StreamPart::TextDelta { delta, .. } => {
                print!("{delta}");
                stdout.flush()?;
            }
            StreamPart::Error { error } => eprintln!("\nError: {error}"),
            StreamPart::Finish { finish_reason, .. } => {
                println!("\n\nFinish: {finish_reason:?}");
            }
            _ => {}
        }
    }
    Ok(())
}
