use crate::types::{InputTokens, OutputTokens, Usage};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A role/content pair in either request format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: String,
    pub content: String,
}

/// Chat Completions request.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    pub stream: bool,
    pub stream_options: StreamOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamOptions {
    pub include_usage: bool,
}

/// Responses API request.
#[derive(Debug, Clone, Serialize)]
pub struct ResponsesRequest {
    pub model: String,
    pub input: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    pub stream: bool,
    pub store: bool,
}

/// One Chat Completions stream chunk.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatChunk {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
    pub usage: Option<ChatUsage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    #[serde(default)]
    pub delta: ChatDelta,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatDelta {
    pub content: Option<String>,
    /// Emitted by several OpenAI-compatible servers for thinking models.
    pub reasoning_content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatUsage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub prompt_tokens_details: Option<PromptTokensDetails>,
    pub completion_tokens_details: Option<CompletionTokensDetails>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PromptTokensDetails {
    pub cached_tokens: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionTokensDetails {
    pub reasoning_tokens: Option<u64>,
}

/// One Responses API stream event.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponsesStreamEvent {
    pub r#type: String,
    pub delta: Option<String>,
    pub response: Option<ResponsesResponse>,
    /// Set on top-level `error` events.
    pub message: Option<String>,
    pub code: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponsesResponse {
    pub status: Option<String>,
    pub usage: Option<ResponsesUsage>,
    pub incomplete_details: Option<IncompleteDetails>,
    pub error: Option<ErrorDetails>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncompleteDetails {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponsesUsage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub input_tokens_details: Option<PromptTokensDetails>,
    pub output_tokens_details: Option<CompletionTokensDetails>,
}

/// Error body returned with a non-success status.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    pub error: ErrorDetails,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorDetails {
    pub message: String,
    pub r#type: Option<String>,
    pub code: Option<String>,
}

/// Split token counters into the normalized shape.
///
/// Non-cached input and text output are derived only when both operands are known.
fn usage_from_counts(
    input: Option<u64>,
    cached: Option<u64>,
    output: Option<u64>,
    reasoning: Option<u64>,
    raw: Value,
) -> Usage {
    Usage {
        input_tokens: InputTokens {
            total: input,
            no_cache: input.zip(cached).map(|(i, c)| i.saturating_sub(c)),
            cache_read: cached,
            cache_write: None,
        },
        output_tokens: OutputTokens {
            total: output,
            text: match (output, reasoning) {
                (Some(o), Some(r)) => Some(o.saturating_sub(r)),
                (Some(o), None) => Some(o),
                _ => None,
            },
            reasoning,
        },
        raw: Some(raw),
    }
}

impl ChatUsage {
    pub fn normalize(&self, raw: Value) -> Usage {
        usage_from_counts(
            self.prompt_tokens,
            self.prompt_tokens_details.as_ref().and_then(|d| d.cached_tokens),
            self.completion_tokens,
            self.completion_tokens_details
                .as_ref()
                .and_then(|d| d.reasoning_tokens),
            raw,
        )
    }
}

impl ResponsesUsage {
    pub fn normalize(&self, raw: Value) -> Usage {
        usage_from_counts(
            self.input_tokens,
            self.input_tokens_details.as_ref().and_then(|d| d.cached_tokens),
            self.output_tokens,
            self.output_tokens_details
                .as_ref()
                .and_then(|d| d.reasoning_tokens),
            raw,
        )
    }
}
