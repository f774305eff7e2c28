use super::bridge::{run_exec, ExecOutcome, Invocation};
use super::events::{normalize_usage, ExecEvent};
use super::prompt::{serialize_prompt, EmptyPromptFallback};
use super::ExecSettings;
use crate::provider::{LanguageModel, Provider};
use crate::{
    CallOptions, Error, FinishReason, GenerateResult, Result, StreamPart, StreamResponse, Usage,
    Warning,
};
use futures::channel::mpsc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const EMPTY_PROMPT_WARNING: &str = "Empty prompt; skipping codex exec.";
const PARSE_ERROR_MESSAGE: &str = "Failed to parse codex JSONL output";
const REASONING_MARKER: &str = "\n\n[Reasoning]\n";
const TEXT_ID: &str = "text-1";
const REASONING_ID: &str = "reasoning-1";

/// A language model that runs `codex exec` once per call.
#[derive(Debug, Clone)]
pub struct ExecLanguageModel {
    provider: String,
    model_id: Option<String>,
    settings: Arc<ExecSettings>,
}

/// Process input plus the warnings to report for it.
struct PreparedCall {
    input: String,
    warnings: Vec<Warning>,
}

impl ExecLanguageModel {
    pub fn new(settings: ExecSettings, model_id: Option<String>) -> Self {
        Self::with_shared_settings(Arc::new(settings), model_id)
    }

    fn with_shared_settings(settings: Arc<ExecSettings>, model_id: Option<String>) -> Self {
        Self {
            provider: settings.provider_name().to_string(),
            model_id,
            settings,
        }
    }

    pub fn settings(&self) -> &ExecSettings {
        &self.settings
    }

    fn prepare(&self, options: &CallOptions) -> Result<PreparedCall> {
        let fallback = self.settings.empty_prompt_fallback;
        let serialized = serialize_prompt(&options.prompt, fallback);
        if serialized.is_empty() && fallback == EmptyPromptFallback::Error {
            return Err(Error::EmptyPrompt);
        }

        let mut warnings = unsupported_settings(options);
        warnings.extend(serialized.warnings);
        if serialized.text.is_empty() {
            warnings.push(Warning::other(EMPTY_PROMPT_WARNING));
        }
        Ok(PreparedCall {
            input: serialized.text,
            warnings,
        })
    }

    fn invocation(&self, input: String) -> Invocation {
        Invocation::new(&self.settings, self.model_id.as_deref(), input)
    }
}

#[async_trait::async_trait]
impl LanguageModel for ExecLanguageModel {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn model_id(&self) -> Option<&str> {
        self.model_id.as_deref()
    }

    async fn do_generate(&self, options: CallOptions) -> Result<GenerateResult> {
        let PreparedCall { input, warnings } = self.prepare(&options)?;
        if input.is_empty() {
            return Ok(GenerateResult::from_text(
                "",
                FinishReason::empty_prompt(),
                Usage::default(),
                warnings,
            ));
        }

        let include_reasoning = self.settings.include_reasoning;
        let mut text = String::new();
        let mut turn = TurnState::default();
        let outcome = run_exec(
            &self.invocation(input),
            options.abort_signal.as_ref(),
            |event| {
                if let Some(message) = event.agent_text() {
                    text.push_str(message);
                }
                if include_reasoning {
                    if let Some(reasoning) = event.reasoning_text() {
                        text.push_str(REASONING_MARKER);
                        text.push_str(reasoning);
                    }
                }
                turn.observe(&event);
            },
            |chunk| debug!(stderr = %chunk.trim_end(), "codex stderr"),
        )
        .await?;
        turn.settle(&outcome);

        Ok(GenerateResult::from_text(
            text,
            turn.finish_reason,
            turn.usage,
            warnings,
        ))
    }

    async fn do_stream(&self, options: CallOptions) -> Result<StreamResponse> {
        let PreparedCall { input, warnings } = self.prepare(&options)?;
        let (tx, rx) = mpsc::unbounded();
        let _ = tx.unbounded_send(StreamPart::StreamStart { warnings });

        if input.is_empty() {
            let _ = tx.unbounded_send(StreamPart::Finish {
                usage: Usage::default(),
                finish_reason: FinishReason::empty_prompt(),
            });
            return Ok(StreamResponse::from_stream(rx));
        }

        // Dropping the response cancels this token, and with it the process
        let cancel = match &options.abort_signal {
            Some(signal) => signal.child_token(),
            None => CancellationToken::new(),
        };
        let invocation = self.invocation(input);
        let emitter = StreamEmitter::new(
            tx,
            options.include_raw_chunks,
            self.settings.include_reasoning,
        );
        tokio::spawn(pump_stream(invocation, cancel.clone(), emitter));

        Ok(StreamResponse::from_stream(rx).cancel_on_drop(cancel))
    }
}

async fn pump_stream(invocation: Invocation, cancel: CancellationToken, mut emitter: StreamEmitter) {
    let outcome = run_exec(
        &invocation,
        Some(&cancel),
        |event| emitter.on_event(event),
        |chunk| debug!(stderr = %chunk.trim_end(), "codex stderr"),
    )
    .await;
    emitter.finish(outcome);
}

/// Usage and finish reason as observed so far in one call.
#[derive(Debug, Default)]
struct TurnState {
    usage: Usage,
    finish_reason: FinishReason,
}

impl TurnState {
    fn observe(&mut self, event: &ExecEvent) {
        match event {
            ExecEvent::TurnCompleted { usage, .. } => {
                self.usage = normalize_usage(usage.as_ref());
                self.finish_reason = FinishReason::stop("turn.completed");
            }
            ExecEvent::ParseError { .. } => {
                self.finish_reason = FinishReason::error("parse.error");
            }
            _ => {}
        }
    }

    /// Stderr output and a failed exit are independent error triggers.
    fn settle(&mut self, outcome: &ExecOutcome) {
        if !outcome.stderr.is_empty() {
            self.finish_reason = FinishReason::error("stderr");
        }
        if !outcome.success() {
            self.finish_reason = FinishReason::error(outcome.failure_cause());
        }
    }
}

/// Turns exec events into stream parts for one call.
struct StreamEmitter {
    tx: mpsc::UnboundedSender<StreamPart>,
    include_raw_chunks: bool,
    include_reasoning: bool,
    text_started: bool,
    reasoning_started: bool,
    turn: TurnState,
}

impl StreamEmitter {
    fn new(
        tx: mpsc::UnboundedSender<StreamPart>,
        include_raw_chunks: bool,
        include_reasoning: bool,
    ) -> Self {
        Self {
            tx,
            include_raw_chunks,
            include_reasoning,
            text_started: false,
            reasoning_started: false,
            turn: TurnState::default(),
        }
    }

    fn send(&self, part: StreamPart) {
        // The consumer may have gone away; the process is cancelled separately.
        let _ = self.tx.unbounded_send(part);
    }

    fn on_event(&mut self, event: ExecEvent) {
        if self.include_raw_chunks {
            self.send(StreamPart::Raw {
                raw_value: event.raw_value(),
            });
        }

        if let Some(text) = event.agent_text() {
            if !self.text_started {
                self.send(StreamPart::TextStart {
                    id: TEXT_ID.to_string(),
                });
                self.text_started = true;
            }
            self.send(StreamPart::TextDelta {
                id: TEXT_ID.to_string(),
                delta: text.to_string(),
            });
        }

        if self.include_reasoning {
            if let Some(text) = event.reasoning_text() {
                if !self.reasoning_started {
                    self.send(StreamPart::ReasoningStart {
                        id: REASONING_ID.to_string(),
                    });
                    self.reasoning_started = true;
                }
                self.send(StreamPart::ReasoningDelta {
                    id: REASONING_ID.to_string(),
                    delta: text.to_string(),
                });
            }
        }

        if matches!(event, ExecEvent::ParseError { .. }) {
            self.send(StreamPart::error(PARSE_ERROR_MESSAGE));
        }
        self.turn.observe(&event);
    }

    /// Emit the closing parts. Consumes the emitter, which closes the stream.
    fn finish(mut self, outcome: Result<ExecOutcome>) {
        match outcome {
            Ok(outcome) => {
                if !outcome.stderr.is_empty() {
                    self.send(StreamPart::error(outcome.stderr.trim()));
                }
                self.turn.settle(&outcome);
            }
            Err(e) => {
                let cause = match e {
                    Error::Spawn { .. } => "spawn",
                    _ => "io",
                };
                self.send(StreamPart::error(e.to_string()));
                self.turn.finish_reason = FinishReason::error(cause);
            }
        }

        if self.reasoning_started {
            self.send(StreamPart::ReasoningEnd {
                id: REASONING_ID.to_string(),
            });
        }
        if self.text_started {
            self.send(StreamPart::TextEnd {
                id: TEXT_ID.to_string(),
            });
        }
        let usage = std::mem::take(&mut self.turn.usage);
        let finish_reason = std::mem::take(&mut self.turn.finish_reason);
        self.send(StreamPart::Finish {
            usage,
            finish_reason,
        });
    }
}

/// Sampling settings have no `codex exec` flag.
fn unsupported_settings(options: &CallOptions) -> Vec<Warning> {
    let mut warnings = Vec::new();
    let mut flag = |set: bool, setting: &str| {
        if set {
            warnings.push(Warning::UnsupportedSetting {
                setting: setting.to_string(),
                details: Some("codex exec does not accept sampling settings".to_string()),
            });
        }
    };
    flag(options.temperature.is_some(), "temperature");
    flag(options.max_output_tokens.is_some(), "maxOutputTokens");
    flag(options.top_p.is_some(), "topP");
    flag(options.stop_sequences.is_some(), "stopSequences");
    warnings
}

/// Provider handing out [`ExecLanguageModel`]s that share one set of settings.
#[derive(Debug, Clone, Default)]
pub struct CodexExecProvider {
    settings: Arc<ExecSettings>,
}

impl CodexExecProvider {
    pub fn new(settings: ExecSettings) -> Self {
        Self {
            settings: Arc::new(settings),
        }
    }

    /// Create a concretely typed model.
    pub fn model(&self, model_id: Option<&str>) -> ExecLanguageModel {
        ExecLanguageModel::with_shared_settings(
            Arc::clone(&self.settings),
            model_id.map(str::to_string),
        )
    }
}

impl Provider for CodexExecProvider {
    fn name(&self) -> &str {
        self.settings.provider_name()
    }

    fn language_model(&self, model_id: Option<&str>) -> Result<Box<dyn LanguageModel>> {
        Ok(Box::new(self.model(model_id)))
    }

    fn image_model(&self, _model_id: Option<&str>) -> Result<Box<dyn LanguageModel>> {
        Err(Error::unsupported(format!(
            "{} does not support images",
            self.name()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FinishCategory, Prompt};
    use futures_util::StreamExt;

    fn decode(line: &str) -> ExecEvent {
        ExecEvent::decode_line(line).unwrap()
    }

    fn outcome(exit_code: Option<i32>, signal: Option<&str>, stderr: &str) -> ExecOutcome {
        ExecOutcome {
            exit_code,
            signal: signal.map(str::to_string),
            stderr: stderr.to_string(),
        }
    }

    fn unspawnable() -> ExecSettings {
        ExecSettings::default().codex_path("/nonexistent/codex-for-tests")
    }

    #[test]
    fn test_turn_state_transitions() {
        let mut turn = TurnState::default();
        assert_eq!(turn.finish_reason, FinishReason::unknown());

        turn.observe(&decode("garbage"));
        assert_eq!(turn.finish_reason, FinishReason::error("parse.error"));

        turn.observe(&decode(
            r#"{"type":"turn.completed","usage":{"input_tokens":3,"output_tokens":1}}"#,
        ));
        assert_eq!(turn.finish_reason, FinishReason::stop("turn.completed"));
        assert_eq!(turn.usage.input_tokens.total, Some(3));
    }

    #[test]
    fn test_settle_dual_error_triggers() {
        let mut turn = TurnState::default();
        turn.settle(&outcome(Some(0), None, "warning: something\n"));
        assert_eq!(turn.finish_reason, FinishReason::error("stderr"));

        let mut turn = TurnState::default();
        turn.observe(&decode(r#"{"type":"turn.completed","usage":{}}"#));
        turn.settle(&outcome(Some(1), None, ""));
        assert_eq!(turn.finish_reason, FinishReason::error("1"));

        let mut turn = TurnState::default();
        turn.settle(&outcome(None, Some("SIGTERM"), "bye"));
        assert_eq!(turn.finish_reason, FinishReason::error("SIGTERM"));

        let mut turn = TurnState::default();
        turn.settle(&outcome(Some(0), None, ""));
        assert_eq!(turn.finish_reason, FinishReason::unknown());
    }

    #[tokio::test]
    async fn test_emitter_part_order() {
        let (tx, rx) = mpsc::unbounded();
        let mut emitter = StreamEmitter::new(tx, false, true);
        emitter.on_event(decode(
            r#"{"type":"item.completed","item":{"type":"reasoning","text":"hmm"}}"#,
        ));
        emitter.on_event(decode(
            r#"{"type":"item.completed","item":{"type":"agent_message","text":"a"}}"#,
        ));
        emitter.on_event(decode("{broken"));
        emitter.on_event(decode(
            r#"{"type":"item.completed","item":{"type":"agent_message","text":"b"}}"#,
        ));
        emitter.finish(Ok(outcome(Some(0), None, "")));

        let parts: Vec<StreamPart> = rx.collect().await;
        let text = |delta: &str| StreamPart::TextDelta {
            id: TEXT_ID.to_string(),
            delta: delta.to_string(),
        };
        assert_eq!(
            parts,
            vec![
                StreamPart::ReasoningStart {
                    id: REASONING_ID.to_string()
                },
                StreamPart::ReasoningDelta {
                    id: REASONING_ID.to_string(),
                    delta: "hmm".to_string()
                },
                StreamPart::TextStart {
                    id: TEXT_ID.to_string()
                },
                text("a"),
                StreamPart::error(PARSE_ERROR_MESSAGE),
                text("b"),
                StreamPart::ReasoningEnd {
                    id: REASONING_ID.to_string()
                },
                StreamPart::TextEnd {
                    id: TEXT_ID.to_string()
                },
                StreamPart::Finish {
                    usage: Usage::default(),
                    finish_reason: FinishReason::error("parse.error"),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_emitter_raw_and_reasoning_disabled() {
        let (tx, rx) = mpsc::unbounded();
        let mut emitter = StreamEmitter::new(tx, true, false);
        emitter.on_event(decode(
            r#"{"type":"item.completed","item":{"type":"reasoning","text":"hidden"}}"#,
        ));
        emitter.finish(Ok(outcome(Some(2), None, "oops\n")));

        let parts: Vec<StreamPart> = rx.collect().await;
        assert_eq!(parts.len(), 3);
        assert!(matches!(parts[0], StreamPart::Raw { .. }));
        assert_eq!(parts[1], StreamPart::error("oops"));
        assert_eq!(
            parts[2],
            StreamPart::Finish {
                usage: Usage::default(),
                finish_reason: FinishReason::error("2"),
            }
        );
    }

    #[tokio::test]
    async fn test_emitter_read_failure_after_completion() {
        let (tx, rx) = mpsc::unbounded();
        let mut emitter = StreamEmitter::new(tx, false, false);
        emitter.on_event(decode(
            r#"{"type":"item.completed","item":{"type":"agent_message","text":"partial"}}"#,
        ));
        emitter.on_event(decode(r#"{"type":"turn.completed","usage":{}}"#));
        emitter.finish(Err(Error::streaming("Stream error: pipe broke")));

        let parts: Vec<StreamPart> = rx.collect().await;
        assert_eq!(parts.len(), 5);
        assert_eq!(
            parts[2],
            StreamPart::error("Streaming error: Stream error: pipe broke")
        );
        assert_eq!(
            parts[3],
            StreamPart::TextEnd {
                id: TEXT_ID.to_string()
            }
        );
        match &parts[4] {
            StreamPart::Finish { finish_reason, .. } => {
                assert_eq!(*finish_reason, FinishReason::error("io"));
            }
            other => panic!("Expected finish, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_prompt_generate_skips_process() {
        let model = ExecLanguageModel::new(
            unspawnable().empty_prompt_fallback(EmptyPromptFallback::Skip),
            None,
        );
        let result = model
            .do_generate(CallOptions::new(Prompt::user("   ")))
            .await
            .unwrap();

        assert_eq!(result.text(), "");
        assert_eq!(result.finish_reason, FinishReason::empty_prompt());
        assert!(result.usage.is_absent());
        assert_eq!(result.warnings, vec![Warning::other(EMPTY_PROMPT_WARNING)]);
    }

    #[tokio::test]
    async fn test_empty_prompt_stream_skips_process() {
        let model = ExecLanguageModel::new(
            unspawnable().empty_prompt_fallback(EmptyPromptFallback::Skip),
            Some("gpt-5-codex".to_string()),
        );
        let parts = model
            .do_stream(CallOptions::new(Prompt::new()))
            .await
            .unwrap()
            .collect_parts()
            .await;

        assert_eq!(
            parts,
            vec![
                StreamPart::StreamStart {
                    warnings: vec![Warning::other(EMPTY_PROMPT_WARNING)]
                },
                StreamPart::Finish {
                    usage: Usage::default(),
                    finish_reason: FinishReason::empty_prompt(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_prompt_error_policy_raises() {
        let model = ExecLanguageModel::new(
            unspawnable().empty_prompt_fallback(EmptyPromptFallback::Error),
            None,
        );
        let err = model
            .do_generate(CallOptions::new(Prompt::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EmptyPrompt));

        let err = model
            .do_stream(CallOptions::new(Prompt::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EmptyPrompt));
    }

    #[tokio::test]
    async fn test_spawn_failure_in_stream() {
        let model = ExecLanguageModel::new(unspawnable(), None);
        let parts = model
            .do_stream(CallOptions::new("hi").temperature(0.2))
            .await
            .unwrap()
            .collect_parts()
            .await;

        match &parts[0] {
            StreamPart::StreamStart { warnings } => {
                assert_eq!(warnings.len(), 1);
                assert!(matches!(
                    &warnings[0],
                    Warning::UnsupportedSetting { setting, .. } if setting == "temperature"
                ));
            }
            other => panic!("Expected stream start, got {other:?}"),
        }
        assert!(matches!(parts[1], StreamPart::Error { .. }));
        match parts.last() {
            Some(StreamPart::Finish { finish_reason, .. }) => {
                assert_eq!(finish_reason.unified, FinishCategory::Error);
                assert_eq!(finish_reason.raw.as_deref(), Some("spawn"));
            }
            other => panic!("Expected finish, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_spawn_failure_in_generate() {
        let model = ExecLanguageModel::new(unspawnable(), None);
        let err = model.do_generate(CallOptions::new("hi")).await.unwrap_err();
        assert!(matches!(err, Error::Spawn { .. }));
    }

    #[test]
    fn test_provider_models() {
        let provider = CodexExecProvider::new(ExecSettings::default().name("local-codex"));
        let model = provider.language_model(Some("o4-mini")).unwrap();
        assert_eq!(model.provider(), "local-codex");
        assert_eq!(model.model_id(), Some("o4-mini"));

        assert!(matches!(provider.image_model(None), Err(Error::Unsupported(_))));
        assert!(matches!(provider.embedding_model(None), Err(Error::Unsupported(_))));

        let default_provider = CodexExecProvider::default();
        assert_eq!(default_provider.name(), "codex-exec");
        assert_eq!(default_provider.model(None).model_id(), None);
    }
}
