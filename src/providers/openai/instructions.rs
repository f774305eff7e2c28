//! Responses API `instructions` derived from the conversation.
//!
//! Some Responses backends reject requests without top-level instructions.
//! [`ResponsesInstructions`] fills them in from the system messages before
//! every call.

use crate::provider::LanguageModel;
use crate::{CallOptions, GenerateResult, Result, Role, StreamResponse};
use serde_json::Value;

pub const DEFAULT_INSTRUCTIONS: &str = "You are a helpful assistant.";

/// Ensure `provider_options.openai.instructions` is a non-empty string.
///
/// An existing value is kept. Otherwise the text parts of all system messages
/// are used, joined by newlines, falling back to [`DEFAULT_INSTRUCTIONS`].
/// Other options in the `openai` namespace are preserved.
pub fn with_responses_instructions(options: CallOptions) -> CallOptions {
    if options
        .provider_option_str("openai", "instructions")
        .is_some_and(|existing| !existing.is_empty())
    {
        return options;
    }

    let instructions =
        system_instructions(&options).unwrap_or_else(|| DEFAULT_INSTRUCTIONS.to_string());
    options.provider_option("openai", "instructions", Value::String(instructions))
}

fn system_instructions(options: &CallOptions) -> Option<String> {
    let texts: Vec<String> = options
        .prompt
        .messages()
        .iter()
        .filter(|message| message.role == Role::System)
        .map(|message| message.plain_text())
        .filter(|text| !text.trim().is_empty())
        .collect();
    (!texts.is_empty()).then(|| texts.join("\n"))
}

/// Wraps a Responses model so every call carries instructions.
#[derive(Debug, Clone)]
pub struct ResponsesInstructions<M> {
    inner: M,
}

impl<M> ResponsesInstructions<M> {
    pub fn new(inner: M) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> M {
        self.inner
    }
}

#[async_trait::async_trait]
impl<M: LanguageModel> LanguageModel for ResponsesInstructions<M> {
    fn provider(&self) -> &str {
        self.inner.provider()
    }

    fn model_id(&self) -> Option<&str> {
        self.inner.model_id()
    }

    async fn do_generate(&self, options: CallOptions) -> Result<GenerateResult> {
        self.inner
            .do_generate(with_responses_instructions(options))
            .await
    }

    async fn do_stream(&self, options: CallOptions) -> Result<StreamResponse> {
        self.inner.do_stream(with_responses_instructions(options)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ContentPart, Message, Prompt};
    use serde_json::json;

    fn instructions(options: &CallOptions) -> Option<&str> {
        options.provider_option_str("openai", "instructions")
    }

    #[test]
    fn test_default_instructions() {
        let options = with_responses_instructions(CallOptions::new("hi"));
        assert_eq!(instructions(&options), Some(DEFAULT_INSTRUCTIONS));
    }

    #[test]
    fn test_system_messages_become_instructions() {
        let prompt = Prompt::system("Be terse.")
            .with_user("hi")
            .with_message(Message::with_parts(
                Role::System,
                vec![
                    ContentPart::text("Use "),
                    ContentPart::reasoning("ignored"),
                    ContentPart::text("metric units."),
                ],
            ))
            .with_system("   ");
        let options = with_responses_instructions(CallOptions::new(prompt));
        assert_eq!(
            instructions(&options),
            Some("Be terse.\nUse metric units.")
        );
    }

    #[test]
    fn test_existing_instructions_are_kept() {
        let options = CallOptions::new(Prompt::system("ignored"))
            .provider_option("openai", "instructions", json!("Keep me."))
            .provider_option("openai", "reasoningEffort", json!("high"));
        let options = with_responses_instructions(options);
        assert_eq!(instructions(&options), Some("Keep me."));
    }

    #[test]
    fn test_blank_instructions_are_replaced_and_siblings_kept() {
        let options = CallOptions::new(Prompt::system("Rules"))
            .provider_option("openai", "instructions", json!(""))
            .provider_option("openai", "reasoningEffort", json!("high"))
            .provider_option("other", "flag", json!(true));
        let options = with_responses_instructions(options);

        assert_eq!(instructions(&options), Some("Rules"));
        assert_eq!(options.provider_options["openai"]["reasoningEffort"], "high");
        assert_eq!(options.provider_options["other"]["flag"], true);
    }

    #[test]
    fn test_non_string_instructions_are_replaced() {
        let options = CallOptions::new("hi").provider_option("openai", "instructions", json!(42));
        let options = with_responses_instructions(options);
        assert_eq!(instructions(&options), Some(DEFAULT_INSTRUCTIONS));
    }
}
