use super::types::{
    ApiError, ChatChunk, ChatRequest, ResponsesRequest, ResponsesStreamEvent, StreamOptions,
    WireMessage,
};
use crate::config::WireApi;
use crate::provider::LanguageModel;
use crate::providers::exec::prompt::extract_text;
use crate::sse_stream::SseStreamExt;
use crate::{
    CallOptions, Error, FinishCategory, FinishReason, GenerateResult, Result, Role, StreamPart,
    StreamResponse, Usage, Warning,
};
use futures::channel::mpsc;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

const TEXT_ID: &str = "txt-0";
const REASONING_ID: &str = "reasoning-0";

/// A model served over an OpenAI-compatible HTTP API.
#[derive(Debug, Clone)]
pub struct OpenAICompatibleModel {
    client: Client,
    provider: String,
    model_id: String,
    base_url: String,
    api_key: Option<String>,
    headers: BTreeMap<String, String>,
    wire_api: WireApi,
}

impl OpenAICompatibleModel {
    /// Create a new model. `base_url` may carry query parameters.
    pub fn new(
        provider: impl Into<String>,
        model_id: impl Into<String>,
        base_url: impl Into<String>,
        wire_api: WireApi,
    ) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(600)).build()?;

        Ok(Self {
            client,
            provider: provider.into(),
            model_id: model_id.into(),
            base_url: base_url.into(),
            api_key: None,
            headers: BTreeMap::new(),
            wire_api,
        })
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn wire_api(&self) -> WireApi {
        self.wire_api
    }

    /// Endpoint URL for the wire API, keeping any query on the base URL.
    pub fn endpoint(&self) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)?;
        let segments: &[&str] = match self.wire_api {
            WireApi::Chat => &["chat", "completions"],
            WireApi::Responses => &["responses"],
        };
        url.path_segments_mut()
            .map_err(|_| Error::config(format!("Base URL cannot be a base: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn wire_messages(options: &CallOptions) -> Vec<WireMessage> {
        options
            .prompt
            .messages()
            .iter()
            .filter_map(|message| {
                let content = extract_text(&message.content);
                if content.is_empty() {
                    return None;
                }
                // Tool results carry no call id here, so they are relayed as user input
                let role = match message.role {
                    Role::System => "system",
                    Role::User | Role::Tool => "user",
                    Role::Assistant => "assistant",
                };
                Some(WireMessage {
                    role: role.to_string(),
                    content,
                })
            })
            .collect()
    }

    /// Build the JSON request body plus warnings for settings that were dropped.
    fn request_body(&self, options: &CallOptions) -> Result<(Value, Vec<Warning>)> {
        let messages = Self::wire_messages(options);
        let mut warnings = Vec::new();

        let body = match self.wire_api {
            WireApi::Chat => serde_json::to_value(ChatRequest {
                model: self.model_id.clone(),
                messages,
                stream: true,
                stream_options: StreamOptions {
                    include_usage: true,
                },
                temperature: options.temperature,
                max_tokens: options.max_output_tokens,
                top_p: options.top_p,
                stop: options.stop_sequences.clone(),
            })?,
            WireApi::Responses => {
                if options.stop_sequences.is_some() {
                    warnings.push(Warning::unsupported_setting("stopSequences"));
                }
                serde_json::to_value(ResponsesRequest {
                    model: self.model_id.clone(),
                    input: messages,
                    instructions: options
                        .provider_option_str("openai", "instructions")
                        .map(str::to_string),
                    temperature: options.temperature,
                    max_output_tokens: options.max_output_tokens,
                    top_p: options.top_p,
                    stream: true,
                    store: false,
                })?
            }
        };
        Ok((body, warnings))
    }
}

#[async_trait::async_trait]
impl LanguageModel for OpenAICompatibleModel {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn model_id(&self) -> Option<&str> {
        Some(&self.model_id)
    }

    /// Generate a completion (internally always streams).
    async fn do_generate(&self, options: CallOptions) -> Result<GenerateResult> {
        self.do_stream(options).await?.buffer().await
    }

    async fn do_stream(&self, options: CallOptions) -> Result<StreamResponse> {
        let (body, warnings) = self.request_body(&options)?;
        let endpoint = self.endpoint()?;
        debug!(provider = %self.provider, model = %self.model_id, url = %endpoint, "sending request");

        let mut request = self.client.post(endpoint).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await?;
            let message = serde_json::from_str::<ApiError>(&error_text)
                .map(|e| e.error.message)
                .unwrap_or(error_text);
            return Err(Error::provider(
                &self.provider,
                format!("API error ({status}): {message}"),
            ));
        }

        let cancel = match &options.abort_signal {
            Some(signal) => signal.child_token(),
            None => CancellationToken::new(),
        };
        let (tx, rx) = mpsc::unbounded();
        let _ = tx.unbounded_send(StreamPart::StreamStart { warnings });

        let mut mapper = StreamMapper::new(self.wire_api, options.include_raw_chunks);
        let token = cancel.clone();
        tokio::spawn(async move {
            let mut events = Box::pin(response.bytes_stream()).sse_events();
            loop {
                let event = tokio::select! {
                    event = events.next() => event,
                    _ = token.cancelled() => {
                        debug!("request cancelled");
                        break;
                    }
                };
                let parts = match event {
                    Some(Ok(event)) if event.is_done() => break,
                    Some(Ok(event)) => mapper.on_data(&event.data),
                    Some(Err(e)) => {
                        warn!(error = %e, "response stream failed");
                        mapper.on_transport_error(&e)
                    }
                    None => break,
                };
                for part in parts {
                    let _ = tx.unbounded_send(part);
                }
            }
            for part in mapper.finish() {
                let _ = tx.unbounded_send(part);
            }
        });

        Ok(StreamResponse::from_stream(rx).cancel_on_drop(cancel))
    }
}

/// Maps SSE payloads of either wire API to stream parts.
#[derive(Debug)]
struct StreamMapper {
    wire_api: WireApi,
    include_raw_chunks: bool,
    text_open: bool,
    reasoning_open: bool,
    finish_reason: FinishReason,
    usage: Usage,
}

impl StreamMapper {
    fn new(wire_api: WireApi, include_raw_chunks: bool) -> Self {
        Self {
            wire_api,
            include_raw_chunks,
            text_open: false,
            reasoning_open: false,
            finish_reason: FinishReason::unknown(),
            usage: Usage::default(),
        }
    }

    fn on_data(&mut self, data: &str) -> Vec<StreamPart> {
        let mut parts = Vec::new();
        let value: Value = match serde_json::from_str(data) {
            Ok(value) => value,
            Err(e) => {
                parts.push(StreamPart::error(format!("Failed to parse stream chunk: {e}")));
                self.finish_reason = FinishReason::error("parse.error");
                return parts;
            }
        };
        if self.include_raw_chunks {
            parts.push(StreamPart::Raw {
                raw_value: value.clone(),
            });
        }

        match self.wire_api {
            WireApi::Chat => self.on_chat_chunk(value, &mut parts),
            WireApi::Responses => self.on_responses_event(value, &mut parts),
        }
        parts
    }

    fn on_chat_chunk(&mut self, value: Value, parts: &mut Vec<StreamPart>) {
        let chunk: ChatChunk = match serde_json::from_value(value.clone()) {
            Ok(chunk) => chunk,
            Err(e) => {
                debug!(error = %e, "skipping unrecognized chat chunk");
                return;
            }
        };
        for choice in &chunk.choices {
            if let Some(reasoning) = choice.delta.reasoning_content.as_deref() {
                self.reasoning_delta(reasoning, parts);
            }
            if let Some(text) = choice.delta.content.as_deref() {
                self.text_delta(text, parts);
            }
            if let Some(reason) = &choice.finish_reason {
                self.finish_reason = chat_finish_reason(reason);
            }
        }
        if let Some(usage) = &chunk.usage {
            let raw = value.get("usage").cloned().unwrap_or(Value::Null);
            self.usage = usage.normalize(raw);
        }
    }

    fn on_responses_event(&mut self, value: Value, parts: &mut Vec<StreamPart>) {
        let event: ResponsesStreamEvent = match serde_json::from_value(value.clone()) {
            Ok(event) => event,
            Err(e) => {
                debug!(error = %e, "skipping unrecognized responses event");
                return;
            }
        };
        let usage_raw = || {
            value
                .get("response")
                .and_then(|r| r.get("usage"))
                .cloned()
                .unwrap_or(Value::Null)
        };

        match event.r#type.as_str() {
            "response.output_text.delta" => {
                if let Some(delta) = event.delta.as_deref() {
                    self.text_delta(delta, parts);
                }
            }
            "response.reasoning_summary_text.delta" | "response.reasoning_text.delta" => {
                if let Some(delta) = event.delta.as_deref() {
                    self.reasoning_delta(delta, parts);
                }
            }
            "response.completed" | "response.incomplete" => {
                let response = event.response.as_ref();
                if let Some(usage) = response.and_then(|r| r.usage.as_ref()) {
                    self.usage = usage.normalize(usage_raw());
                }
                let incomplete = response
                    .and_then(|r| r.incomplete_details.as_ref())
                    .and_then(|d| d.reason.clone());
                self.finish_reason = match incomplete {
                    Some(reason) if reason == "max_output_tokens" => {
                        FinishReason::new(FinishCategory::Length, reason)
                    }
                    Some(reason) if reason == "content_filter" => {
                        FinishReason::new(FinishCategory::ContentFilter, reason)
                    }
                    Some(reason) => FinishReason::new(FinishCategory::Other, reason),
                    None => FinishReason::stop("completed"),
                };
            }
            "response.failed" => {
                let response = event.response.as_ref();
                if let Some(usage) = response.and_then(|r| r.usage.as_ref()) {
                    self.usage = usage.normalize(usage_raw());
                }
                let message = response
                    .and_then(|r| r.error.as_ref())
                    .map(|e| e.message.clone())
                    .unwrap_or_else(|| "Response failed".to_string());
                parts.push(StreamPart::error(message));
                self.finish_reason = FinishReason::error("failed");
            }
            "error" => {
                let message = event
                    .message
                    .clone()
                    .unwrap_or_else(|| "Unknown stream error".to_string());
                parts.push(StreamPart::error(message));
                self.finish_reason = FinishReason::error(event.code.as_deref().unwrap_or("error"));
            }
            _ => {}
        }
    }

    fn on_transport_error(&mut self, error: &Error) -> Vec<StreamPart> {
        self.finish_reason = FinishReason::error("stream");
        vec![StreamPart::error(error.to_string())]
    }

    fn text_delta(&mut self, delta: &str, parts: &mut Vec<StreamPart>) {
        if delta.is_empty() {
            return;
        }
        if !self.text_open {
            self.text_open = true;
            parts.push(StreamPart::TextStart {
                id: TEXT_ID.to_string(),
            });
        }
        parts.push(StreamPart::TextDelta {
            id: TEXT_ID.to_string(),
            delta: delta.to_string(),
        });
    }

    fn reasoning_delta(&mut self, delta: &str, parts: &mut Vec<StreamPart>) {
        if delta.is_empty() {
            return;
        }
        if !self.reasoning_open {
            self.reasoning_open = true;
            parts.push(StreamPart::ReasoningStart {
                id: REASONING_ID.to_string(),
            });
        }
        parts.push(StreamPart::ReasoningDelta {
            id: REASONING_ID.to_string(),
            delta: delta.to_string(),
        });
    }

    /// Close open channels and emit the terminal part.
    fn finish(&mut self) -> Vec<StreamPart> {
        let mut parts = Vec::new();
        if std::mem::take(&mut self.reasoning_open) {
            parts.push(StreamPart::ReasoningEnd {
                id: REASONING_ID.to_string(),
            });
        }
        if std::mem::take(&mut self.text_open) {
            parts.push(StreamPart::TextEnd {
                id: TEXT_ID.to_string(),
            });
        }
        parts.push(StreamPart::Finish {
            usage: std::mem::take(&mut self.usage),
            finish_reason: std::mem::take(&mut self.finish_reason),
        });
        parts
    }
}

fn chat_finish_reason(reason: &str) -> FinishReason {
    let unified = match reason {
        "stop" => FinishCategory::Stop,
        "length" => FinishCategory::Length,
        "content_filter" => FinishCategory::ContentFilter,
        "tool_calls" | "function_call" => FinishCategory::ToolCalls,
        _ => FinishCategory::Other,
    };
    FinishReason::new(unified, reason)
}
