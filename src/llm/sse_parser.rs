// ABOUTME: Shared SSE (Server-Sent Events) line-buffering parser for upstream model streams
// ABOUTME: Handles partial lines and split UTF-8 across TCP boundaries plus idle timeouts
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # SSE Stream Parser
//!
//! A shared line-buffering parser for Server-Sent Events used by every adapter.
//!
//! 1. **Multiple events per TCP chunk**: all events in a `bytes_stream()` chunk
//!    are emitted, not just the first.
//! 2. **Partial lines across TCP boundaries**: bytes are buffered until a full
//!    line arrives, and only complete lines are decoded as UTF-8, so multibyte
//!    characters split between chunks survive intact.
//! 3. **Event blocks**: `data:` lines accumulate until the blank line that
//!    closes the block and are joined with `\n`; the block's `event:` name is
//!    handed to the frame parser together with the joined payload.
//!
//! ## Usage
//!
//! Each adapter supplies a `parse_frame` closure that turns one event into a
//! [`FrameOutcome`]. Framing, idle timeouts, and end-of-stream handling live here.
//!
//! ```text
//! let stream = create_sse_stream(
//!     response.bytes_stream(),
//!     |event, data| { /* manufacturer-specific JSON */ },
//!     "Anthropic",
//!     Duration::from_secs(120),
//! );
//! ```

use std::collections::VecDeque;
use std::mem;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::unfold;
use futures_util::{Stream, StreamExt};
use tokio::time::timeout;
use tracing::debug;

use super::{LlmChunk, LlmChunkStream};
use crate::errors::AppError;

/// A parsed SSE event from the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// One event block's payload with its `event:` name, if any
    Message {
        /// Value of the last `event:` field in this block
        event: Option<String>,
        /// `data:` lines of the block joined with `\n`
        data: String,
    },
    /// The `[DONE]` termination signal
    Done,
}

/// What a frame parser decided about one SSE event
#[derive(Debug)]
pub enum FrameOutcome {
    /// Output for the caller
    Chunk(LlmChunk),
    /// Metadata or an empty delta
    Skip,
    /// Upstream signalled successful completion
    End,
    /// Upstream reported an error; the stream terminates after it
    Fail(AppError),
}

/// Line-buffering SSE parser that handles partial lines across TCP chunk boundaries
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    /// Bytes not yet terminated by a newline
    buffer: Vec<u8>,
    /// Event name for the block currently being read
    event: Option<String>,
    /// `data:` lines of the block currently being read
    data: Vec<String>,
}

impl SseLineBuffer {
    /// Create a new empty line buffer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes from a TCP chunk into the buffer, returning any complete SSE events
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(newline_pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let rest = self.buffer.split_off(newline_pos + 1);
            let line_bytes = mem::replace(&mut self.buffer, rest);
            let line = String::from_utf8_lossy(&line_bytes);
            if let Some(event) = self.parse_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Flush the trailing line and any unterminated block as a final event
    pub fn flush(&mut self) -> Vec<SseEvent> {
        let remaining = mem::take(&mut self.buffer);
        let line = String::from_utf8_lossy(&remaining).into_owned();
        let mut events: Vec<SseEvent> = self.parse_line(&line).into_iter().collect();
        events.extend(self.dispatch());
        events
    }

    fn parse_line(&mut self, line: &str) -> Option<SseEvent> {
        let trimmed = line.trim_end_matches(['\r', '\n']);

        // Blank line closes the event block
        if trimmed.trim().is_empty() {
            return self.dispatch();
        }

        if let Some(name) = trimmed.strip_prefix("event:") {
            self.event = Some(name.trim().to_owned());
        } else if let Some(value) = trimmed.strip_prefix("data:") {
            self.data
                .push(value.strip_prefix(' ').unwrap_or(value).to_owned());
        }
        // id:, retry:, and ':' comments are ignored
        None
    }

    /// Emit the accumulated block and reset for the next one
    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = mem::take(&mut self.data).join("\n");
        match data.trim() {
            "" => None,
            "[DONE]" => Some(SseEvent::Done),
            _ => Some(SseEvent::Message { event, data }),
        }
    }
}

/// Create a properly-buffered chunk stream from a raw byte stream
///
/// # Arguments
///
/// * `byte_stream` - Raw bytes from `response.bytes_stream()`
/// * `parse_frame` - Turns `(event name, data)` into a [`FrameOutcome`]
/// * `service` - Upstream name used in error messages
/// * `idle_timeout` - Longest allowed wait for the next TCP chunk
///
/// The stream yields chunks until the parser reports [`FrameOutcome::End`].
/// A byte stream that closes before that point, a read error, an idle
/// timeout, or a [`FrameOutcome::Fail`] yields exactly one error and ends.
pub fn create_sse_stream<S, F>(
    byte_stream: S,
    parse_frame: F,
    service: &'static str,
    idle_timeout: Duration,
) -> LlmChunkStream
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
    F: Fn(Option<&str>, &str) -> FrameOutcome + Send + 'static,
{
    let state = SseStreamState {
        parser: SseLineBuffer::new(),
        pending: VecDeque::new(),
        finished: false,
    };
    let byte_stream: BoxedByteStream = Box::pin(byte_stream);

    let stream = unfold(
        (byte_stream, state, parse_frame),
        move |(mut byte_stream, mut state, parse_frame)| async move {
            loop {
                // Drain pending events first (multiple SSE events per TCP chunk)
                if let Some(item) = state.pending.pop_front() {
                    return Some((item, (byte_stream, state, parse_frame)));
                }

                if state.finished {
                    return None;
                }

                match timeout(idle_timeout, byte_stream.next()).await {
                    Ok(Some(Ok(bytes))) => {
                        let events = state.parser.feed(&bytes);
                        state.apply(events, &parse_frame);
                    }
                    Ok(Some(Err(e))) => {
                        state.fail(if e.is_timeout() {
                            AppError::external_timeout(service, format!("Stream read timed out: {e}"))
                        } else {
                            AppError::external_service(service, format!("Stream read error: {e}"))
                        });
                    }
                    Ok(None) => {
                        let events = state.parser.flush();
                        state.apply(events, &parse_frame);
                        if !state.finished {
                            state.fail(AppError::external_service(
                                service,
                                "stream ended before completion",
                            ));
                        }
                    }
                    Err(_) => {
                        debug!(service, ?idle_timeout, "Upstream stream went idle");
                        state.fail(AppError::external_timeout(
                            service,
                            format!("no data received for {}s", idle_timeout.as_secs()),
                        ));
                    }
                }
            }
        },
    );

    Box::pin(stream)
}

type BoxedByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

/// Internal state for the SSE stream unfold
struct SseStreamState {
    parser: SseLineBuffer,
    pending: VecDeque<Result<LlmChunk, AppError>>,
    finished: bool,
}

impl SseStreamState {
    fn apply<F>(&mut self, events: Vec<SseEvent>, parse_frame: &F)
    where
        F: Fn(Option<&str>, &str) -> FrameOutcome,
    {
        for event in events {
            if self.finished {
                return;
            }
            let outcome = match event {
                SseEvent::Message { event, data } => parse_frame(event.as_deref(), &data),
                SseEvent::Done => FrameOutcome::End,
            };
            match outcome {
                FrameOutcome::Chunk(chunk) if chunk.content.is_empty() => {}
                FrameOutcome::Chunk(chunk) => self.pending.push_back(Ok(chunk)),
                FrameOutcome::Skip => {}
                FrameOutcome::End => self.finished = true,
                FrameOutcome::Fail(error) => self.fail(error),
            }
        }
    }

    fn fail(&mut self, error: AppError) {
        self.pending.push_back(Err(error));
        self.finished = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;
    use crate::llm::ChunkKind;
    use futures_util::stream;

    fn message(event: Option<&str>, data: &str) -> SseEvent {
        SseEvent::Message {
            event: event.map(str::to_owned),
            data: data.to_owned(),
        }
    }

    fn text_frames(event: Option<&str>, data: &str) -> FrameOutcome {
        match (event, data) {
            (_, "stop") => FrameOutcome::End,
            (_, "boom") => FrameOutcome::Fail(AppError::external_service("Test", "boom")),
            (Some("thinking"), d) => FrameOutcome::Chunk(LlmChunk::thinking(d)),
            (_, d) => FrameOutcome::Chunk(LlmChunk::text(d)),
        }
    }

    fn byte_stream(
        chunks: Vec<&'static [u8]>,
    ) -> impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static {
        stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from_static(c))))
    }

    #[test]
    fn test_multiple_events_in_one_chunk() {
        let mut buffer = SseLineBuffer::new();
        let events = buffer.feed(b"data: one\n\ndata: two\n\n");
        assert_eq!(events, vec![message(None, "one"), message(None, "two")]);
    }

    #[test]
    fn test_partial_line_across_chunks() {
        let mut buffer = SseLineBuffer::new();
        assert!(buffer.feed(b"data: {\"a\":").is_empty());
        assert_eq!(buffer.feed(b"1}\n\n"), vec![message(None, "{\"a\":1}")]);
    }

    #[test]
    fn test_multibyte_character_split_across_chunks() {
        let bytes = "data: héllo\n\n".as_bytes();
        // Split inside the two-byte 'é'
        let split = bytes.iter().position(|b| *b == 0xC3).unwrap() + 1;
        let mut buffer = SseLineBuffer::new();
        assert!(buffer.feed(&bytes[..split]).is_empty());
        assert_eq!(buffer.feed(&bytes[split..]), vec![message(None, "héllo")]);
    }

    #[test]
    fn test_event_name_scoped_to_block() {
        let mut buffer = SseLineBuffer::new();
        let events = buffer.feed(b"event: delta\r\ndata: a\r\n\r\ndata: b\n\n");
        assert_eq!(events, vec![message(Some("delta"), "a"), message(None, "b")]);
    }

    #[test]
    fn test_done_and_comments() {
        let mut buffer = SseLineBuffer::new();
        let events = buffer.feed(b": ping\nid: 7\ndata: [DONE]\n\n");
        assert_eq!(events, vec![SseEvent::Done]);
    }

    #[test]
    fn test_multiline_data_joined_until_blank_line() {
        let mut buffer = SseLineBuffer::new();
        assert!(buffer
            .feed(b"event: delta\ndata: {\"a\":\ndata:  1}\n")
            .is_empty());
        assert_eq!(
            buffer.feed(b"\ndata: next\n\n"),
            vec![message(Some("delta"), "{\"a\":\n 1}"), message(None, "next")]
        );
    }

    #[test]
    fn test_flush_emits_unterminated_block() {
        let mut buffer = SseLineBuffer::new();
        assert!(buffer.feed(b"data: one\ndata: two\n").is_empty());
        assert_eq!(buffer.flush(), vec![message(None, "one\ntwo")]);
    }

    #[test]
    fn test_flush_emits_trailing_line() {
        let mut buffer = SseLineBuffer::new();
        assert!(buffer.feed(b"data: tail").is_empty());
        assert_eq!(buffer.flush(), vec![message(None, "tail")]);
        assert!(buffer.flush().is_empty());
    }

    #[tokio::test]
    async fn test_stream_yields_chunks_until_end() {
        let bytes = byte_stream(vec![
            b"event: thinking\ndata: hmm\n\n",
            b"data: Hi\n\ndata: \n\ndata: stop\n\ndata: ignored\n\n",
        ]);
        let chunks: Vec<_> = create_sse_stream(bytes, text_frames, "Test", Duration::from_secs(5))
            .collect()
            .await;

        assert_eq!(chunks.len(), 2);
        let first = chunks[0].as_ref().unwrap();
        assert_eq!(first.kind, ChunkKind::Thinking);
        assert_eq!(first.content, "hmm");
        assert_eq!(chunks[1].as_ref().unwrap().content, "Hi");
    }

    #[tokio::test]
    async fn test_stream_without_terminal_event_fails() {
        let bytes = byte_stream(vec![b"data: partial\n\n"]);
        let items: Vec<_> = create_sse_stream(bytes, text_frames, "Test", Duration::from_secs(5))
            .collect()
            .await;

        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        let err = items[1].as_ref().unwrap_err();
        assert_eq!(err.code, ErrorCode::ExternalServiceError);
        assert!(err.message.contains("stream ended before completion"));
    }

    #[tokio::test]
    async fn test_stream_stops_after_failure() {
        let bytes = byte_stream(vec![b"data: a\n\ndata: boom\n\ndata: b\n\n"]);
        let items: Vec<_> = create_sse_stream(bytes, text_frames, "Test", Duration::from_secs(5))
            .collect()
            .await;

        assert_eq!(items.len(), 2);
        assert!(items[1].is_err());
    }

    #[tokio::test]
    async fn test_idle_timeout_yields_timeout_error() {
        let bytes = byte_stream(vec![b"data: Par\n\n"]).chain(stream::pending());
        let items: Vec<_> =
            create_sse_stream(bytes, text_frames, "Test", Duration::from_millis(50))
                .collect()
                .await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap().content, "Par");
        let err = items[1].as_ref().unwrap_err();
        assert_eq!(err.code, ErrorCode::ExternalServiceTimeout);
    }
}
