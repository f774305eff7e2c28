//! Flattening a conversation into the text fed to `codex exec` on stdin.

use crate::types::{ContentPart, MessageContent, Prompt, Warning};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const EMPTY_PLACEHOLDER: &str = "User:\n[empty prompt]";
const EMPTY_SERIALIZE_FAILED: &str = "User:\n[empty prompt: failed to serialize prompt]";

/// What to send when a conversation has no usable text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptyPromptFallback {
    /// Send a literal `[empty prompt]` marker.
    #[default]
    Placeholder,
    /// Send the conversation itself as pretty-printed JSON.
    Json,
    /// Fail the call with [`crate::Error::EmptyPrompt`].
    Error,
    /// Skip the subprocess and return an empty answer.
    Skip,
}

impl EmptyPromptFallback {
    /// Name as written in settings.
    pub fn as_str(self) -> &'static str {
        match self {
            EmptyPromptFallback::Placeholder => "placeholder",
            EmptyPromptFallback::Json => "json",
            EmptyPromptFallback::Error => "error",
            EmptyPromptFallback::Skip => "skip",
        }
    }
}

/// Serializer output. An empty `text` means the caller must short-circuit.
#[derive(Debug, Clone, PartialEq)]
pub struct SerializedPrompt {
    pub text: String,
    pub warnings: Vec<Warning>,
}

impl SerializedPrompt {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Render a conversation as `Label:\n<text>` blocks separated by blank lines.
///
/// System messages stay in place. Messages without any text are dropped.
pub fn serialize_prompt(prompt: &Prompt, fallback: EmptyPromptFallback) -> SerializedPrompt {
    let blocks: Vec<String> = prompt
        .messages()
        .iter()
        .filter_map(|message| {
            let text = extract_text(&message.content);
            if text.is_empty() {
                return None;
            }
            Some(format!("{}:\n{}", message.role.label(), text))
        })
        .collect();

    let text = blocks.join("\n\n").trim().to_string();
    if !text.is_empty() {
        return SerializedPrompt {
            text,
            warnings: Vec::new(),
        };
    }

    let text = match fallback {
        EmptyPromptFallback::Placeholder => EMPTY_PLACEHOLDER.to_string(),
        EmptyPromptFallback::Json => serde_json::to_string_pretty(prompt)
            .unwrap_or_else(|_| EMPTY_SERIALIZE_FAILED.to_string()),
        EmptyPromptFallback::Error | EmptyPromptFallback::Skip => String::new(),
    };
    let warnings = match fallback {
        EmptyPromptFallback::Placeholder | EmptyPromptFallback::Json => vec![Warning::other(
            format!(
                "Prompt has no text content; sent {} fallback instead.",
                fallback.as_str()
            ),
        )],
        _ => Vec::new(),
    };
    SerializedPrompt { text, warnings }
}

/// Text of one message's content, trimmed.
pub fn extract_text(content: &MessageContent) -> String {
    match content {
        MessageContent::Text(text) => text.trim().to_string(),
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(part_text)
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string(),
    }
}

fn part_text(part: &ContentPart) -> Option<String> {
    match part {
        ContentPart::Text { text } | ContentPart::Reasoning { text } => {
            (!text.is_empty()).then(|| text.clone())
        }
        ContentPart::ToolResult { output, .. } => {
            Some(serde_json::to_string(output).unwrap_or_else(|_| output.to_string()))
        }
        ContentPart::ToolCall {
            tool_name, input, ..
        } => Some(match serde_json::to_string(input) {
            Ok(json) => format!("[tool:{tool_name}] {json}"),
            Err(_) => format!("[tool:{tool_name}]"),
        }),
        ContentPart::Image { .. } => Some("[image]".to_string()),
        ContentPart::File { filename, .. } => Some(match filename {
            Some(name) => format!("[file {name}]"),
            None => "[file]".to_string(),
        }),
        ContentPart::Unknown(value) => value.get("text").and_then(Value::as_str).map(str::to_string),
    }
}
