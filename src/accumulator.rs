//! Delta accumulation logic for streaming responses.

use crate::types::{FinishReason, StreamPart, Usage, Warning};
use crate::{Content, Error, GenerateResult, Result};

/// Accumulates stream parts into a complete result.
#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    /// Ordered output items (text and reasoning runs).
    content: Vec<Content>,
    warnings: Vec<Warning>,
    /// Error parts seen so far, in order.
    errors: Vec<String>,
    finish_reason: Option<FinishReason>,
    usage: Option<Usage>,
}

impl ResponseAccumulator {
    /// Create a new response accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Process a stream part and update the accumulation.
    pub fn process_part(&mut self, part: StreamPart) {
        match part {
            StreamPart::StreamStart { warnings } => self.warnings.extend(warnings),
            StreamPart::TextStart { .. } => self.content.push(Content::Text {
                text: String::new(),
            }),
            StreamPart::ReasoningStart { .. } => self.content.push(Content::Reasoning {
                text: String::new(),
            }),
            StreamPart::TextDelta { delta, .. } => match self.content.last_mut() {
                Some(Content::Text { text }) => text.push_str(&delta),
                // Deltas interleaved with another channel open a new run
                _ => self.content.push(Content::Text { text: delta }),
            },
            StreamPart::ReasoningDelta { delta, .. } => match self.content.last_mut() {
                Some(Content::Reasoning { text }) => text.push_str(&delta),
                _ => self.content.push(Content::Reasoning { text: delta }),
            },
            StreamPart::TextEnd { .. } | StreamPart::ReasoningEnd { .. } => {}
            StreamPart::Raw { .. } => {}
            StreamPart::Error { error } => self.errors.push(error),
            StreamPart::Finish {
                usage,
                finish_reason,
            } => {
                self.finish_reason = Some(finish_reason);
                self.usage = Some(usage);
            }
        }
    }

    /// Finalize and return the complete result.
    ///
    /// A stream that reported errors but never finished is an error; one that
    /// simply ended early finishes with an unknown reason.
    pub fn finalize(self) -> Result<GenerateResult> {
        let content: Vec<Content> = self
            .content
            .into_iter()
            .filter(|item| match item {
                Content::Text { text } | Content::Reasoning { text } => !text.is_empty(),
            })
            .collect();

        let finish_reason = match self.finish_reason {
            Some(reason) => reason,
            None => {
                if let Some(error) = self.errors.into_iter().next() {
                    return Err(Error::streaming(error));
                }
                FinishReason::unknown()
            }
        };

        Ok(GenerateResult {
            content,
            finish_reason,
            usage: self.usage.unwrap_or_default(),
            warnings: self.warnings,
        })
    }

    /// Get the current accumulated text.
    /// This is a convenience method for accessing content during streaming.
    pub fn current_text(&self) -> String {
        let mut out = String::new();
        for item in &self.content {
            if let Content::Text { text } = item {
                out.push_str(text);
            }
        }
        out
    }

    /// Error messages received so far.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FinishCategory;

    fn delta(text: &str) -> StreamPart {
        StreamPart::TextDelta {
            id: "text-1".to_string(),
            delta: text.to_string(),
        }
    }

    #[test]
    fn test_text_accumulation() {
        let mut accumulator = ResponseAccumulator::new();

        // Deltas without a start still accumulate
        accumulator.process_part(delta("Hello "));
        assert_eq!(accumulator.current_text(), "Hello ");

        accumulator.process_part(delta("world!"));
        assert_eq!(accumulator.current_text(), "Hello world!");
    }

    #[test]
    fn test_interleaved_channels_keep_order() {
        let mut accumulator = ResponseAccumulator::new();
        accumulator.process_part(StreamPart::ReasoningStart {
            id: "reasoning-1".to_string(),
        });
        accumulator.process_part(StreamPart::ReasoningDelta {
            id: "reasoning-1".to_string(),
            delta: "think".to_string(),
        });
        accumulator.process_part(StreamPart::TextStart {
            id: "text-1".to_string(),
        });
        accumulator.process_part(delta("answer"));
        accumulator.process_part(StreamPart::ReasoningDelta {
            id: "reasoning-1".to_string(),
            delta: "more".to_string(),
        });

        let result = accumulator.finalize().unwrap();
        assert_eq!(
            result.content,
            vec![
                Content::Reasoning {
                    text: "think".to_string()
                },
                Content::Text {
                    text: "answer".to_string()
                },
                Content::Reasoning {
                    text: "more".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_finalization() {
        let mut accumulator = ResponseAccumulator::new();
        accumulator.process_part(StreamPart::StreamStart {
            warnings: vec![Warning::other("heads up")],
        });
        accumulator.process_part(delta("Test response"));
        accumulator.process_part(StreamPart::Finish {
            finish_reason: FinishReason::stop("stop"),
            usage: Usage::default(),
        });

        let complete = accumulator.finalize().unwrap();
        assert_eq!(complete.text(), "Test response");
        assert_eq!(complete.finish_reason.unified, FinishCategory::Stop);
        assert_eq!(complete.warnings, vec![Warning::other("heads up")]);
    }

    #[test]
    fn test_errors_without_finish_fail() {
        let mut accumulator = ResponseAccumulator::new();
        accumulator.process_part(StreamPart::error("connection reset"));
        assert_eq!(accumulator.errors(), ["connection reset".to_string()]);

        let err = accumulator.finalize().unwrap_err();
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn test_errors_with_finish_report_reason() {
        let mut accumulator = ResponseAccumulator::new();
        accumulator.process_part(StreamPart::error("bad line"));
        accumulator.process_part(StreamPart::Finish {
            finish_reason: FinishReason::error("parse.error"),
            usage: Usage::default(),
        });

        let result = accumulator.finalize().unwrap();
        assert!(result.finish_reason.is_error());
        assert!(result.usage.is_absent());
    }
}
