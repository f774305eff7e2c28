//! Response handling for generations.

use crate::accumulator::ResponseAccumulator;
use crate::{FinishReason, Result, StreamPart, Usage, Warning};
use futures_util::stream::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio_util::sync::{CancellationToken, DropGuard};

/// An item in the generated output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Content {
    Text { text: String },
    Reasoning { text: String },
}

/// The aggregated result of one generation.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateResult {
    /// Ordered output items.
    pub content: Vec<Content>,
    pub finish_reason: FinishReason,
    pub usage: Usage,
    pub warnings: Vec<Warning>,
}

impl GenerateResult {
    /// A result carrying a single text item.
    pub fn from_text(
        text: impl Into<String>,
        finish_reason: FinishReason,
        usage: Usage,
        warnings: Vec<Warning>,
    ) -> Self {
        Self {
            content: vec![Content::Text { text: text.into() }],
            finish_reason,
            usage,
            warnings,
        }
    }

    /// Get all text content concatenated together.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|item| match item {
                Content::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// Get all reasoning content concatenated together.
    pub fn reasoning(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .content
            .iter()
            .filter_map(|item| match item {
                Content::Reasoning { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(""))
        }
    }
}

/// Handle over a live, single-pass stream of [`StreamPart`]s.
///
/// The handle is itself a [`Stream`]. When it was created with
/// [`StreamResponse::cancel_on_drop`], dropping it before the stream closes
/// cancels the underlying call.
pub struct StreamResponse {
    stream: Pin<Box<dyn Stream<Item = StreamPart> + Send>>,
    _cancel_guard: Option<DropGuard>,
}

impl StreamResponse {
    /// Create a new response from a stream of parts.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = StreamPart> + Send + 'static,
    {
        Self {
            stream: Box::pin(stream),
            _cancel_guard: None,
        }
    }

    /// Cancel `token` when this handle is dropped.
    pub fn cancel_on_drop(mut self, token: CancellationToken) -> Self {
        self._cancel_guard = Some(token.drop_guard());
        self
    }

    /// Buffer the entire response by consuming the stream.
    pub async fn buffer(self) -> Result<GenerateResult> {
        use futures_util::StreamExt;

        let mut accumulator = ResponseAccumulator::new();
        let mut stream = self;
        while let Some(part) = stream.next().await {
            let done = part.is_finish();
            accumulator.process_part(part);
            if done {
                break;
            }
        }
        accumulator.finalize()
    }

    /// Get just the text content (convenience method).
    pub async fn text(self) -> Result<String> {
        Ok(self.buffer().await?.text())
    }

    /// Drain every part into a vector.
    pub async fn collect_parts(self) -> Vec<StreamPart> {
        use futures_util::StreamExt;
        self.collect().await
    }
}

impl Stream for StreamResponse {
    type Item = StreamPart;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.stream.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for StreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResponse")
            .field("cancel_on_drop", &self._cancel_guard.is_some())
            .finish_non_exhaustive()
    }
}
