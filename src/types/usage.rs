use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Input token accounting. `None` means the source did not report the field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputTokens {
    pub total: Option<u64>,
    pub no_cache: Option<u64>,
    pub cache_read: Option<u64>,
    pub cache_write: Option<u64>,
}

/// Output token accounting. `None` means the source did not report the field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputTokens {
    pub total: Option<u64>,
    pub text: Option<u64>,
    pub reasoning: Option<u64>,
}

/// Token usage information.
///
/// The default value has every field absent, which is distinct from a
/// reported usage of zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: InputTokens,
    pub output_tokens: OutputTokens,
    /// Counters exactly as the backend reported them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

impl Usage {
    /// True when no field was reported.
    pub fn is_absent(&self) -> bool {
        *self == Usage::default()
    }
}

/// Normalized category of why generation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishCategory {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
    Error,
    Other,
}

/// Reason why generation finished: a unified category plus the backend's own cause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishReason {
    pub unified: FinishCategory,
    pub raw: Option<String>,
}

impl FinishReason {
    pub fn new(unified: FinishCategory, raw: impl Into<String>) -> Self {
        Self {
            unified,
            raw: Some(raw.into()),
        }
    }

    pub fn stop(raw: impl Into<String>) -> Self {
        Self::new(FinishCategory::Stop, raw)
    }

    pub fn error(raw: impl Into<String>) -> Self {
        Self::new(FinishCategory::Error, raw)
    }

    /// No terminal signal was observed.
    pub fn unknown() -> Self {
        Self {
            unified: FinishCategory::Other,
            raw: None,
        }
    }

    pub fn empty_prompt() -> Self {
        Self::new(FinishCategory::Other, "empty-prompt")
    }

    pub fn is_error(&self) -> bool {
        self.unified == FinishCategory::Error
    }
}

impl Default for FinishReason {
    fn default() -> Self {
        Self::unknown()
    }
}
