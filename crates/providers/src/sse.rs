//! Shared SSE plumbing for all provider adapters.
//!
//! Every adapter receives a `reqwest::Response`, buffers body chunks, splits
//! on the `\n\n` event delimiter, extracts `data:` payloads, and hands each
//! payload to a dialect-specific parser producing stream events. The
//! buffering and delimiting live here; only the payload parsing differs.

use crate::util::from_reqwest;
use sb_domain::error::Result;
use sb_domain::stream::{BoxStream, StreamEvent};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event buffer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Accumulates raw SSE bytes and yields complete `data:` payloads.
///
/// A trailing partial event stays buffered until more bytes arrive or the
/// body closes, at which point [`SseBuffer::close`] drains it.
#[derive(Default)]
pub(crate) struct SseBuffer {
    buf: String,
}

impl SseBuffer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append a body chunk and return every completed `data:` payload.
    pub(crate) fn feed(&mut self, chunk: &str) -> Vec<String> {
        self.buf.push_str(chunk);
        self.drain_complete()
    }

    /// Treat whatever remains as a final event block and drain it.
    pub(crate) fn close(&mut self) -> Vec<String> {
        if self.buf.trim().is_empty() {
            self.buf.clear();
            return Vec::new();
        }
        self.buf.push_str("\n\n");
        self.drain_complete()
    }

    fn drain_complete(&mut self) -> Vec<String> {
        let mut payloads = Vec::new();
        while let Some(pos) = self.buf.find("\n\n") {
            let block: String = self.buf.drain(..pos).collect();
            self.buf.drain(..2);

            for line in block.lines() {
                if let Some(data) = line.trim().strip_prefix("data:") {
                    let data = data.trim();
                    if !data.is_empty() {
                        payloads.push(data.to_owned());
                    }
                }
            }
        }
        payloads
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response → event stream
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Build a [`BoxStream`] from an SSE response and a dialect parser.
///
/// The parser is `FnMut` because some dialects carry assembly state across
/// payloads (anthropic-style tool-call blocks). The stream flushes the
/// trailing partial event when the body closes and guarantees a terminal
/// `Done` even when the dialect never produced one.
pub(crate) fn event_stream<F>(
    response: reqwest::Response,
    mut parse_payload: F,
) -> BoxStream<'static, Result<StreamEvent>>
where
    F: FnMut(&str) -> Vec<Result<StreamEvent>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = SseBuffer::new();
        let mut done_seen = false;

        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    for payload in buffer.feed(&String::from_utf8_lossy(&bytes)) {
                        for event in parse_payload(&payload) {
                            done_seen |= matches!(&event, Ok(StreamEvent::Done { .. }));
                            yield event;
                        }
                    }
                }
                Ok(None) => {
                    for payload in buffer.close() {
                        for event in parse_payload(&payload) {
                            done_seen |= matches!(&event, Ok(StreamEvent::Done { .. }));
                            yield event;
                        }
                    }
                    break;
                }
                Err(e) => {
                    yield Err(from_reqwest(e));
                    break;
                }
            }
        }

        if !done_seen {
            yield Ok(StreamEvent::Done {
                usage: None,
                stop_reason: Some("stop".into()),
            });
        }
    };

    Box::pin(stream)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
