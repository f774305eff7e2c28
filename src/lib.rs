//! Language model providers backed by the Codex CLI.
//!
//! Two backends share one model abstraction:
//!
//! - [`CodexExecProvider`] runs `codex exec --json` as a subprocess per call,
//!   feeds it the flattened conversation on stdin and turns its JSONL events
//!   into results or live stream parts.
//! - [`CodexProvider`] reads the Codex CLI configuration (`~/.codex`) and talks
//!   to the configured OpenAI-compatible server over HTTP.

pub mod accumulator;
pub mod config;
pub mod error;
pub mod factory;
pub mod line_stream;
pub mod provider;
pub mod providers;
pub mod response;
pub mod sse_stream;
pub mod types;

// Re-export core types for easy usage
pub use accumulator::*;
pub use config::{CodexConfig, CodexProviderOptions, ModelServerOverride, ServerConfig, WireApi};
pub use error::{Error, Result};
pub use factory::CodexProvider;
pub use provider::{LanguageModel, Provider};
pub use providers::exec::{EmptyPromptFallback, ExecSettings};
pub use providers::{CodexExecProvider, ExecLanguageModel, OpenAICompatibleModel};
pub use response::*;
pub use sse_stream::SseEvent;
pub use types::*;
