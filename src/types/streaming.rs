//! Types for streaming responses.

use crate::types::{FinishReason, Usage};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Non-fatal notice attached to a result or to the start of a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Warning {
    /// A call setting the backend cannot honor.
    UnsupportedSetting {
        setting: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
    Other { message: String },
}

impl Warning {
    pub fn other(message: impl Into<String>) -> Self {
        Warning::Other {
            message: message.into(),
        }
    }

    pub fn unsupported_setting(setting: impl Into<String>) -> Self {
        Warning::UnsupportedSetting {
            setting: setting.into(),
            details: None,
        }
    }
}

/// Parts emitted by a live generation stream.
///
/// A well-formed stream starts with exactly one `StreamStart`, ends with
/// exactly one `Finish`, and every `*Delta` on a channel is preceded by that
/// channel's `*Start` and followed by its `*End`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamPart {
    StreamStart { warnings: Vec<Warning> },
    TextStart { id: String },
    TextDelta { id: String, delta: String },
    TextEnd { id: String },
    ReasoningStart { id: String },
    ReasoningDelta { id: String, delta: String },
    ReasoningEnd { id: String },
    /// A backend event forwarded verbatim.
    #[serde(rename_all = "camelCase")]
    Raw { raw_value: Value },
    Error { error: String },
    #[serde(rename_all = "camelCase")]
    Finish {
        usage: Usage,
        finish_reason: FinishReason,
    },
}

impl StreamPart {
    pub fn error(error: impl Into<String>) -> Self {
        StreamPart::Error {
            error: error.into(),
        }
    }

    /// True for the terminal part of a stream.
    pub fn is_finish(&self) -> bool {
        matches!(self, StreamPart::Finish { .. })
    }
}
