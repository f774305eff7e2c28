//! Ask the local `codex` CLI a question and print the aggregated answer.
//!
//! Requires `codex` on `PATH` (or `CODEX_PATH`) and a logged-in Codex CLI:
//!
//! ```bash
//! RUST_LOG=codex_provider=debug cargo run --example exec_chat -- "What does this repo do?"
//! ```

use codex_provider::{
    CallOptions, CodexExecProvider, ExecSettings, LanguageModel, Prompt, Provider,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let question = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "Summarize the files in the current directory.".to_string());

    let mut settings = ExecSettings::new().include_reasoning(true);
    if let Ok(path) = std::env::var("CODEX_PATH") {
        settings = settings.codex_path(path);
    }
    let provider = CodexExecProvider::new(settings);
    let model = provider.language_model(std::env::var("CODEX_MODEL").ok().as_deref())?;

    let prompt = Prompt::system("Answer briefly. Do not modify any files.").with_user(question);
    let result = model.do_generate(CallOptions::new(prompt)).await?;

    for warning in &result.warnings {
        println!("Warning: {warning:?}");
    }
    println!("{}", result.text());
    println!("\nFinish: {:?}", result.finish_reason);
    println!("Usage: {:?}", result.usage);
    Ok(())
}
