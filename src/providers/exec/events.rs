//! Events emitted by `codex exec --json`, one JSON object per stdout line.

use crate::types::{InputTokens, OutputTokens, Usage};
use serde_json::{json, Value};

/// A completed item carried by an `item.completed` event.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecItem {
    AgentMessage { text: Option<String> },
    Reasoning { text: Option<String> },
    /// Command executions, file changes, and anything else.
    Other { kind: Option<String> },
}

impl ExecItem {
    fn from_value(item: Option<&Value>) -> Self {
        let kind = item.and_then(|item| item.get("type")).and_then(Value::as_str);
        let text = item
            .and_then(|item| item.get("text"))
            .and_then(Value::as_str)
            .map(str::to_string);
        match kind {
            Some("agent_message") => ExecItem::AgentMessage { text },
            Some("reasoning") => ExecItem::Reasoning { text },
            other => ExecItem::Other {
                kind: other.map(str::to_string),
            },
        }
    }
}

/// One decoded line of subprocess output.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecEvent {
    ItemCompleted { item: ExecItem, raw: Value },
    TurnCompleted { usage: Option<Value>, raw: Value },
    /// A line that was not valid JSON. Produced locally, never by codex.
    ParseError { line: String },
    /// Any other event type, passed through untouched.
    Unknown { raw: Value },
}

impl ExecEvent {
    /// Decode one output line. Blank lines yield no event.
    pub fn decode_line(line: &str) -> Option<Self> {
        if line.trim().is_empty() {
            return None;
        }
        let value = match serde_json::from_str::<Value>(line) {
            Ok(value) => value,
            Err(_) => {
                return Some(ExecEvent::ParseError {
                    line: line.to_string(),
                })
            }
        };

        let event = match value.get("type").and_then(Value::as_str) {
            Some("item.completed") => ExecEvent::ItemCompleted {
                item: ExecItem::from_value(value.get("item")),
                raw: value,
            },
            Some("turn.completed") => ExecEvent::TurnCompleted {
                usage: value.get("usage").filter(|usage| usage.is_object()).cloned(),
                raw: value,
            },
            _ => ExecEvent::Unknown { raw: value },
        };
        Some(event)
    }

    /// The event as JSON, for raw-chunk passthrough.
    pub fn raw_value(&self) -> Value {
        match self {
            ExecEvent::ItemCompleted { raw, .. }
            | ExecEvent::TurnCompleted { raw, .. }
            | ExecEvent::Unknown { raw } => raw.clone(),
            ExecEvent::ParseError { line } => json!({ "type": "parse.error", "raw": line }),
        }
    }

    /// Text of an `agent_message` item, when non-empty.
    pub fn agent_text(&self) -> Option<&str> {
        match self {
            ExecEvent::ItemCompleted {
                item: ExecItem::AgentMessage { text: Some(text) },
                ..
            } if !text.is_empty() => Some(text),
            _ => None,
        }
    }

    /// Text of a `reasoning` item, when non-empty.
    pub fn reasoning_text(&self) -> Option<&str> {
        match self {
            ExecEvent::ItemCompleted {
                item: ExecItem::Reasoning { text: Some(text) },
                ..
            } if !text.is_empty() => Some(text),
            _ => None,
        }
    }
}

/// Normalize codex turn counters.
///
/// Only `input_tokens`, `cached_input_tokens` and `output_tokens` are
/// reported, so the remaining fields stay absent rather than zero.
pub fn normalize_usage(raw: Option<&Value>) -> Usage {
    let Some(raw) = raw else {
        return Usage::default();
    };
    let counter = |name: &str| raw.get(name).and_then(Value::as_u64);
    let output = counter("output_tokens");

    Usage {
        input_tokens: InputTokens {
            total: counter("input_tokens"),
            no_cache: None,
            cache_read: counter("cached_input_tokens"),
            cache_write: None,
        },
        output_tokens: OutputTokens {
            total: output,
            text: output,
            reasoning: None,
        },
        raw: Some(raw.clone()),
    }
}
