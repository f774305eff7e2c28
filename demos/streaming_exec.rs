//! Stream a `codex exec` run part by part. Ctrl-C aborts the run.
//!
//! ```bash
//! cargo run --example streaming_exec -- "Explain src/lib.rs"
//! ```

use codex_provider::{CallOptions, CodexExecProvider, ExecSettings, LanguageModel, StreamPart};
use futures_util::StreamExt;
use std::io::Write;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let question = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "Say hello in three languages.".to_string());

    let abort = CancellationToken::new();
    let on_ctrl_c = abort.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let model = CodexExecProvider::new(ExecSettings::new().include_reasoning(true)).model(None);
    let mut stream = model
        .do_stream(CallOptions::new(question).abort_signal(abort))
        .await?;

    let mut stdout = std::io::stdout();
    while let Some(part) = stream.next().await {
        match part {
            StreamPart::StreamStart { warnings } if !warnings.is_empty() => {
                println!("Warnings: {warnings:?}");
            }
            StreamPart::ReasoningStart { .. } => println!("[reasoning]"),
            StreamPart::ReasoningEnd { .. } | StreamPart::TextEnd { .. } => println!(),
            StreamPart::TextStart { .. } => println!("[answer]"),
            StreamPart::TextDelta { delta, .. } | StreamPart::ReasoningDelta { delta, .. } => {
                print!("{delta}");
                stdout.flush()?;
            }
            StreamPart::Error { error } => eprintln!("Error: {error}"),
            StreamPart::Finish {
                usage,
                finish_reason,
            } => {
                println!("Finish: {finish_reason:?}");
                println!("Usage: {usage:?}");
            }
            _ => {}
        }
    }
    Ok(())
}
