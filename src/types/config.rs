use super::prompt::Prompt;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Provider-namespaced free-form options, e.g. `{"openai": {"instructions": "..."}}`.
pub type ProviderOptions = HashMap<String, Map<String, Value>>;

/// Call-scoped options for one generation.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub prompt: Prompt,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub stop_sequences: Option<Vec<String>>,
    /// Forward every backend event as a raw stream part.
    pub include_raw_chunks: bool,
    /// Cancels the call; for the exec backend this requests process termination.
    pub abort_signal: Option<CancellationToken>,
    pub provider_options: ProviderOptions,
}

impl CallOptions {
    pub fn new(prompt: impl Into<Prompt>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = Some(max_output_tokens);
        self
    }

    pub fn top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn stop_sequences(mut self, stop: Vec<String>) -> Self {
        self.stop_sequences = Some(stop);
        self
    }

    pub fn include_raw_chunks(mut self, include: bool) -> Self {
        self.include_raw_chunks = include;
        self
    }

    pub fn abort_signal(mut self, token: CancellationToken) -> Self {
        self.abort_signal = Some(token);
        self
    }

    /// Set one option under a provider namespace.
    pub fn provider_option(
        mut self,
        provider: impl Into<String>,
        key: impl Into<String>,
        value: Value,
    ) -> Self {
        self.provider_options
            .entry(provider.into())
            .or_default()
            .insert(key.into(), value);
        self
    }

    /// Look up a string option under a provider namespace.
    pub fn provider_option_str(&self, provider: &str, key: &str) -> Option<&str> {
        self.provider_options
            .get(provider)
            .and_then(|options| options.get(key))
            .and_then(Value::as_str)
    }
}
