//! Line-delimited stream decoding.
//!
//! Providers stream either Server-Sent-Events (`data: <json>` lines ending in
//! a `[DONE]` sentinel) or newline-delimited JSON. Both are decoded here into
//! [`StreamEvent`]s; each adapter only supplies a per-frame decoder.
//!
//! Decoding is best-effort: a frame that fails to parse is logged and
//! skipped. Cancellation is checked before every line.

use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;
use std::time::Instant;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::error::LlmError;
use crate::provider::{ChatStream, StreamEvent};
use crate::types::{ChatChunk, ChatResponse, ResponseStatus, TokenUsage};

/// Framing used by a streaming endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    /// `data: <payload>` lines terminated by `data: [DONE]`.
    ServerSentEvents,
    /// One JSON document per line.
    NdJson,
}

/// What a single decoded frame contributes to the response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameDelta {
    pub content: Option<String>,
    pub reasoning: Option<String>,
    pub model: Option<String>,
    pub usage: Option<TokenUsage>,
    pub finish_reason: Option<String>,
    /// The provider marked this frame as its last.
    pub done: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Line Splitting
// ─────────────────────────────────────────────────────────────────────────────

/// Longest partial line held while waiting for its newline.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Byte buffer that yields complete lines.
///
/// Splitting happens on raw bytes so multi-byte characters that straddle a
/// network chunk boundary are decoded intact.
#[derive(Debug, Default)]
struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn next_line(&mut self) -> Option<String> {
        let end = self.buf.iter().position(|b| *b == b'\n')?;
        let line: Vec<u8> = self.buf.drain(..=end).collect();
        Some(decode_line(&line[..end]))
    }

    /// The unterminated tail has outgrown [`MAX_LINE_BYTES`].
    fn overflowed(&self) -> bool {
        self.buf.len() > MAX_LINE_BYTES && !self.buf.contains(&b'\n')
    }

    fn take_remainder(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.buf);
        Some(decode_line(&line))
    }
}

fn decode_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim_end_matches('\r').to_string()
}

enum Frame<'a> {
    Payload(&'a str),
    Terminate,
    Skip,
}

fn classify(format: FrameFormat, line: &str) -> Frame<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Frame::Skip;
    }
    match format {
        FrameFormat::NdJson => Frame::Payload(line),
        FrameFormat::ServerSentEvents => match line.strip_prefix("data:") {
            Some(data) => {
                let data = data.trim_start();
                if data == "[DONE]" {
                    Frame::Terminate
                } else {
                    Frame::Payload(data)
                }
            }
            // Comments (`:`) and `event:`/`id:`/`retry:` fields carry no content.
            None => Frame::Skip,
        },
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Accumulation
// ─────────────────────────────────────────────────────────────────────────────

/// Folds frame deltas into the terminal response.
///
/// The terminal content is exactly the concatenation of emitted chunk contents.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    content: String,
    reasoning: String,
    model: String,
    usage: Option<TokenUsage>,
    finish_reason: Option<String>,
    frames: usize,
}

impl StreamAccumulator {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    /// Apply a delta, returning the chunk to emit if it carried text.
    pub fn apply(&mut self, delta: FrameDelta) -> Option<ChatChunk> {
        self.frames += 1;
        if let Some(model) = delta.model.filter(|m| !m.is_empty()) {
            self.model = model;
        }
        if delta.usage.is_some() {
            self.usage = delta.usage;
        }
        if delta.finish_reason.is_some() {
            self.finish_reason = delta.finish_reason;
        }

        let content = delta.content.unwrap_or_default();
        let reasoning = delta.reasoning.filter(|r| !r.is_empty());
        if content.is_empty() && reasoning.is_none() {
            return None;
        }

        self.content.push_str(&content);
        if let Some(ref r) = reasoning {
            self.reasoning.push_str(r);
        }
        Some(ChatChunk {
            content,
            reasoning,
            is_final: delta.done,
        })
    }

    /// Content accumulated so far.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Number of frames applied.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Build the terminal response, draining the accumulator.
    pub fn finish(
        &mut self,
        status: ResponseStatus,
        error: Option<String>,
        started: Instant,
    ) -> ChatResponse {
        let reasoning = std::mem::take(&mut self.reasoning);
        ChatResponse {
            status,
            content: std::mem::take(&mut self.content),
            reasoning: (!reasoning.is_empty()).then_some(reasoning),
            model: self.model.clone(),
            usage: self.usage.take(),
            error,
            response_time: started.elapsed(),
            finish_reason: self.finish_reason.take(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stream Decoding
// ─────────────────────────────────────────────────────────────────────────────

struct DecodeState<S, D> {
    bytes: Pin<Box<S>>,
    lines: LineBuffer,
    format: FrameFormat,
    decode: D,
    acc: StreamAccumulator,
    cancel: CancellationToken,
    started: Instant,
    provider: String,
    pending: VecDeque<StreamEvent>,
    finished: bool,
}

impl<S, D> DecodeState<S, D>
where
    D: Fn(&str) -> serde_json::Result<FrameDelta>,
{
    fn handle_line(&mut self, line: &str) {
        match classify(self.format, line) {
            Frame::Skip => {}
            Frame::Terminate => self.finish(ResponseStatus::Success, None),
            Frame::Payload(data) => match (self.decode)(data) {
                Ok(delta) => {
                    let done = delta.done;
                    if let Some(chunk) = self.acc.apply(delta) {
                        self.pending.push_back(StreamEvent::Chunk(chunk));
                    }
                    if done {
                        self.finish(ResponseStatus::Success, None);
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        provider = %self.provider,
                        error = %e,
                        "Skipping malformed stream frame"
                    );
                }
            },
        }
    }

    fn finish(&mut self, status: ResponseStatus, error: Option<String>) {
        let response = self.acc.finish(status, error, self.started);
        tracing::debug!(
            provider = %self.provider,
            status = ?response.status,
            content_len = response.content.len(),
            elapsed_ms = response.response_time.as_millis() as u64,
            "Stream finished"
        );
        self.pending.push_back(StreamEvent::Done(response));
        self.finished = true;
    }

    fn finish_cancelled(&mut self) {
        self.finish(
            ResponseStatus::Cancelled,
            Some(LlmError::Cancelled.to_string()),
        );
    }
}

/// Decode a byte stream of frames into a [`ChatStream`].
///
/// `model` seeds the response model until a frame reports one; `started`
/// is when the request was sent, for the response time.
pub fn decode_stream<S, E, D>(
    bytes: S,
    format: FrameFormat,
    decode: D,
    cancel: CancellationToken,
    model: impl Into<String>,
    provider: impl Into<String>,
    started: Instant,
) -> ChatStream
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
    D: Fn(&str) -> serde_json::Result<FrameDelta> + Send + 'static,
{
    let state = DecodeState {
        bytes: Box::pin(bytes),
        lines: LineBuffer::default(),
        format,
        decode,
        acc: StreamAccumulator::new(model),
        cancel,
        started,
        provider: provider.into(),
        pending: VecDeque::new(),
        finished: false,
    };

    Box::pin(futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((event, state));
            }
            if state.finished {
                return None;
            }
            if state.cancel.is_cancelled() {
                state.finish_cancelled();
                continue;
            }
            if let Some(line) = state.lines.next_line() {
                state.handle_line(&line);
                continue;
            }

            // Need more data
            let cancel = state.cancel.clone();
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                next = state.bytes.next() => Some(next),
            };

            match next {
                None => state.finish_cancelled(),
                Some(Some(Ok(bytes))) => {
                    state.lines.push(&bytes);
                    if state.lines.overflowed() {
                        tracing::warn!(provider = %state.provider, "Stream line too long, aborting");
                        state.finish(
                            ResponseStatus::Failed,
                            Some(
                                LlmError::backend(format!(
                                    "stream line exceeded {MAX_LINE_BYTES} bytes without a newline"
                                ))
                                .to_string(),
                            ),
                        );
                    }
                }
                Some(Some(Err(e))) => {
                    state.finish(
                        ResponseStatus::Failed,
                        Some(LlmError::network(e.to_string()).to_string()),
                    );
                }
                Some(None) => {
                    if let Some(line) = state.lines.take_remainder() {
                        state.handle_line(&line);
                    }
                    if !state.finished {
                        if state.acc.frames() == 0 {
                            state.finish(
                                ResponseStatus::Failed,
                                Some("stream closed before any frame was received".to_string()),
                            );
                        } else {
                            state.finish(ResponseStatus::Success, None);
                        }
                    }
                }
            }
        }
    }))
}
