//! OpenAI-compatible HTTP backend, speaking either Chat Completions or the Responses API.

pub mod client;
pub mod instructions;
pub mod types;

pub use client::OpenAICompatibleModel;
pub use instructions::{with_responses_instructions, ResponsesInstructions, DEFAULT_INSTRUCTIONS};
