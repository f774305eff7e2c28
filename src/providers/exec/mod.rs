//! Language model backed by the local `codex exec` command.
//!
//! Each call spawns one `codex exec --json` process, writes the flattened
//! conversation to its stdin and reads newline-delimited JSON events from its
//! stdout while it runs.

pub mod bridge;
pub mod events;
pub mod model;
pub mod prompt;

pub use bridge::{build_args, run_exec, ExecOutcome, Invocation};
pub use events::{normalize_usage, ExecEvent, ExecItem};
pub use model::{CodexExecProvider, ExecLanguageModel};
pub use prompt::{serialize_prompt, EmptyPromptFallback, SerializedPrompt};

use std::collections::HashMap;

/// Default provider name reported by exec models.
pub const DEFAULT_PROVIDER_NAME: &str = "codex-exec";

/// Settings shared by every model an exec provider creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecSettings {
    /// Provider name reported by models. Defaults to `codex-exec`.
    pub name: Option<String>,
    /// Executable to run. Defaults to `codex` on `PATH`.
    pub codex_path: String,
    /// Extra arguments appended after the built-in ones.
    pub args: Vec<String>,
    /// Environment overrides for the subprocess.
    pub env: HashMap<String, String>,
    /// Pass `--skip-git-repo-check`. On by default.
    pub skip_git_repo_check: bool,
    /// Surface `reasoning` items alongside the answer.
    pub include_reasoning: bool,
    pub empty_prompt_fallback: EmptyPromptFallback,
}

impl Default for ExecSettings {
    fn default() -> Self {
        Self {
            name: None,
            codex_path: "codex".to_string(),
            args: Vec::new(),
            env: HashMap::new(),
            skip_git_repo_check: true,
            include_reasoning: false,
            empty_prompt_fallback: EmptyPromptFallback::default(),
        }
    }
}

impl ExecSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn codex_path(mut self, path: impl Into<String>) -> Self {
        self.codex_path = path.into();
        self
    }

    pub fn args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn skip_git_repo_check(mut self, skip: bool) -> Self {
        self.skip_git_repo_check = skip;
        self
    }

    pub fn include_reasoning(mut self, include: bool) -> Self {
        self.include_reasoning = include;
        self
    }

    pub fn empty_prompt_fallback(mut self, fallback: EmptyPromptFallback) -> Self {
        self.empty_prompt_fallback = fallback;
        self
    }

    /// Provider name reported by models.
    pub fn provider_name(&self) -> &str {
        self.name.as_deref().unwrap_or(DEFAULT_PROVIDER_NAME)
    }
}
