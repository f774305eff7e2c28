//! Newline framing for byte streams whose chunk boundaries carry no meaning.

use crate::Error;
use futures_util::{Stream, StreamExt};
use memchr::memchr;
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

/// Splits incoming bytes into `\n`-terminated lines.
///
/// Bytes are buffered raw, so a UTF-8 sequence split across two chunks is
/// decoded only once the whole line is present. Lines are returned without
/// their terminating newline.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(pos) = memchr(b'\n', &self.buffer[start..]) {
            let end = start + pos;
            lines.push(String::from_utf8_lossy(&self.buffer[start..end]).into_owned());
            start = end + 1;
        }

        if start > 0 {
            self.buffer.drain(..start);
        }
        lines
    }

    /// Take whatever is left once input has ended.
    ///
    /// Returns `None` when the remainder is empty or only whitespace.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let text = String::from_utf8_lossy(&rest);
        if text.trim().is_empty() {
            None
        } else {
            Some(text.into_owned())
        }
    }

    /// Number of bytes waiting for a newline.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

/// A stream adapter that yields complete lines from a byte stream.
/// An unterminated final line is yielded when the inner stream ends.
pub struct LineStream<S> {
    inner: S,
    buffer: LineBuffer,
    lines: VecDeque<String>,
    finished: bool,
}

impl<S> LineStream<S> {
    pub fn new(stream: S) -> Self {
        Self {
            inner: stream,
            buffer: LineBuffer::new(),
            lines: VecDeque::new(),
            finished: false,
        }
    }
}

impl<S, B, E> Stream for LineStream<S>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Item = Result<String, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(line) = self.lines.pop_front() {
                return Poll::Ready(Some(Ok(line)));
            }
            if self.finished {
                return Poll::Ready(None);
            }

            match ready!(self.inner.poll_next_unpin(cx)) {
                Some(Ok(chunk)) => {
                    let lines = self.buffer.push(chunk.as_ref());
                    self.lines.extend(lines);
                }
                Some(Err(e)) => {
                    let e: Box<dyn std::error::Error + Send + Sync> = e.into();
                    return Poll::Ready(Some(Err(Error::streaming(format!("Stream error: {e}")))));
                }
                None => {
                    self.finished = true;
                    if let Some(rest) = self.buffer.finish() {
                        self.lines.push_back(rest);
                    }
                }
            }
        }
    }
}

/// Extension trait to add line framing to byte streams.
pub trait LineStreamExt: Stream {
    fn lines(self) -> LineStream<Self>
    where
        Self: Sized,
    {
        LineStream::new(self)
    }
}

impl<S: Stream> LineStreamExt for S {}
