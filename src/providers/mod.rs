//! Provider implementations.

pub mod exec;
pub mod openai;

// Re-export commonly used provider types
pub use exec::{CodexExecProvider, ExecLanguageModel, ExecSettings};
pub use openai::{OpenAICompatibleModel, ResponsesInstructions};
