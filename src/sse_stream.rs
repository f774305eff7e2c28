//! Stream adapter for parsing SSE (Server-Sent Events) from byte chunks.

use crate::line_stream::LineStream;
use crate::Error;
use futures_util::{Stream, StreamExt};
use std::pin::Pin;
use std::task::{ready, Context, Poll};

/// A Server-Sent Events (SSE) event.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event_type: Option<String>,
    pub data: String,
}

impl SseEvent {
    /// Check if this is a "done" event (used by OpenAI to signal end of stream).
    pub fn is_done(&self) -> bool {
        self.data.trim() == "[DONE]"
    }
}

/// Field state for the event currently being assembled.
#[derive(Debug, Default)]
struct PendingEvent {
    event_type: Option<String>,
    data_lines: Vec<String>,
}

impl PendingEvent {
    fn take(&mut self) -> Option<SseEvent> {
        let pending = std::mem::take(self);
        if pending.data_lines.is_empty() {
            return None;
        }
        Some(SseEvent {
            event_type: pending.event_type,
            data: pending.data_lines.join("\n"),
        })
    }

    fn apply(&mut self, line: &str) {
        // Comments start with ':'
        if line.starts_with(':') {
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event_type = Some(value.to_string()),
            "data" => self.data_lines.push(value.to_string()),
            _ => {}
        }
    }
}

/// A stream adapter that parses SSE events from a byte stream.
/// Events end at a blank line; a final event without one is still yielded.
pub struct SseStream<S> {
    lines: LineStream<S>,
    pending: PendingEvent,
    done: bool,
}

impl<S> SseStream<S> {
    pub fn new(stream: S) -> Self {
        Self {
            lines: LineStream::new(stream),
            pending: PendingEvent::default(),
            done: false,
        }
    }
}

impl<S, B, E> Stream for SseStream<S>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Item = Result<SseEvent, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if self.done {
                return Poll::Ready(None);
            }
            match ready!(self.lines.poll_next_unpin(cx)) {
                Some(Ok(line)) => {
                    let line = line.trim_end_matches('\r');
                    if line.is_empty() {
                        if let Some(event) = self.pending.take() {
                            return Poll::Ready(Some(Ok(event)));
                        }
                    } else {
                        self.pending.apply(line);
                    }
                }
                Some(Err(e)) => return Poll::Ready(Some(Err(e))),
                None => {
                    self.done = true;
                    return Poll::Ready(self.pending.take().map(Ok));
                }
            }
        }
    }
}

/// Extension trait to add SSE parsing to byte streams.
pub trait SseStreamExt: Stream {
    /// Parse this byte stream as SSE events.
    fn sse_events(self) -> SseStream<Self>
    where
        Self: Sized,
    {
        SseStream::new(self)
    }
}

impl<S: Stream> SseStreamExt for S {}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn byte_stream(
        chunks: &[&'static str],
    ) -> impl Stream<Item = Result<bytes::Bytes, std::io::Error>> + Unpin {
        stream::iter(
            chunks
                .iter()
                .map(|chunk| Ok(bytes::Bytes::from_static(chunk.as_bytes())))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn test_sse_stream_split_events() {
        let mut events = byte_stream(&["data: Hel", "lo World\n\ndata: ", "Second\n\n"]).sse_events();

        assert_eq!(events.next().await.unwrap().unwrap().data, "Hello World");
        assert_eq!(events.next().await.unwrap().unwrap().data, "Second");
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn test_sse_stream_multiline_and_type() {
        let mut events =
            byte_stream(&["event: response.completed\r\ndata: Line 1\r\ndata: Line 2\r\n\r\n"])
                .sse_events();

        let event = events.next().await.unwrap().unwrap();
        assert_eq!(event.event_type.as_deref(), Some("response.completed"));
        assert_eq!(event.data, "Line 1\nLine 2");
    }

    #[tokio::test]
    async fn test_sse_stream_skips_comments() {
        let mut events = byte_stream(&[": keep-alive\n\ndata: x\n\n"]).sse_events();
        assert_eq!(events.next().await.unwrap().unwrap().data, "x");
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn test_sse_stream_ends_without_final_newline() {
        let mut events = byte_stream(&["data: First event\n\n", "data: [DONE]"]).sse_events();

        assert_eq!(events.next().await.unwrap().unwrap().data, "First event");
        let last = events.next().await.unwrap().unwrap();
        assert!(last.is_done());
        assert!(events.next().await.is_none());
    }
}
