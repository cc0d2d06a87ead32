//! The provider contract and the plumbing shared by every adapter.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  ModelProvider trait                         │
//! │  - chat()        -> ChatResponse             │
//! │  - chat_stream() -> Stream<StreamEvent>      │
//! │  - list_models() / test_connection()         │
//! └──────────────────────────────────────────────┘
//!                      │
//!      ┌───────────┬───┴───────┬───────────┐
//!      ▼           ▼           ▼           ▼
//!  ┌────────┐  ┌────────┐  ┌────────┐  ┌───────┐
//!  │DeepSeek│  │ Zhipu  │  │ Ollama │  │  MCP  │
//!  └────────┘  └────────┘  └────────┘  └───────┘
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::ProviderConfiguration;
use crate::error::{LlmError, Result};
use crate::types::{ChatChunk, ChatRequest, ChatResponse, ConnectionTest, ModelInfo};

// ─────────────────────────────────────────────────────────────────────────────
// Provider Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Broad category of a provider backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Hosted chat API reached over HTTPS.
    CloudApi,
    /// Inference server running on the user's machine.
    LocalInference,
    /// Tool-invocation protocol session (MCP).
    ToolProtocol,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::CloudApi => "cloud-api",
            Self::LocalInference => "local-inference",
            Self::ToolProtocol => "tool-protocol",
        };
        f.write_str(label)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

/// Notifications a provider publishes to its subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    /// The provider accepted a new configuration.
    ConfigurationChanged { provider: String },
    /// A persistent connection came up or went down.
    ConnectionStatusChanged { provider: String, connected: bool },
}

/// Capacity of each provider's event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Broadcast fan-out for [`ProviderEvent`]s.
#[derive(Debug, Clone)]
pub struct EventHub {
    sender: broadcast::Sender<ProviderEvent>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: ProviderEvent) {
        let _ = self.sender.send(event);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Streaming Types
// ─────────────────────────────────────────────────────────────────────────────

/// Items yielded by a streaming chat call.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// An incremental delta.
    Chunk(ChatChunk),
    /// The terminal response. Always the last item.
    Done(ChatResponse),
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done(_))
    }
}

/// A lazy, finite stream of chunks ending in exactly one [`StreamEvent::Done`].
pub type ChatStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send + 'static>>;

/// A stream that emits `response.content` as one chunk, then the response.
///
/// Failed and cancelled responses with no content produce only the terminal event.
pub fn single_response_stream(response: ChatResponse) -> ChatStream {
    let mut events = Vec::with_capacity(2);
    if !response.content.is_empty() || response.reasoning.is_some() {
        events.push(StreamEvent::Chunk(ChatChunk {
            content: response.content.clone(),
            reasoning: response.reasoning.clone(),
            is_final: true,
        }));
    }
    events.push(StreamEvent::Done(response));
    Box::pin(futures::stream::iter(events))
}

/// Drive a stream to completion, handing each chunk to `on_chunk` as it arrives.
///
/// A stream that ends without a terminal event yields a failed response.
pub async fn collect_stream<F>(mut stream: ChatStream, mut on_chunk: F) -> ChatResponse
where
    F: FnMut(&ChatChunk),
{
    while let Some(event) = stream.next().await {
        match event {
            StreamEvent::Chunk(chunk) => on_chunk(&chunk),
            StreamEvent::Done(response) => return response,
        }
    }
    ChatResponse::failure("stream ended without a terminal response")
}

// ─────────────────────────────────────────────────────────────────────────────
// Provider Traits
// ─────────────────────────────────────────────────────────────────────────────

/// A pluggable chat backend.
///
/// Chat operations never return errors: transport, protocol, and validation
/// failures all come back as a [`ChatResponse`] whose status is not success.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Unique registry name of this provider.
    fn name(&self) -> &str;

    /// Category of backend.
    fn kind(&self) -> ProviderKind;

    /// Whether the provider can currently accept requests.
    fn is_available(&self) -> bool;

    /// Model used when a request does not name one.
    fn default_model(&self) -> String;

    /// Execute a chat request and return the full response.
    async fn chat(&self, request: ChatRequest, cancel: &CancellationToken) -> ChatResponse;

    /// Execute a chat request as a stream of chunks.
    async fn chat_stream(&self, request: ChatRequest, cancel: CancellationToken) -> ChatStream;

    /// Models this provider can serve.
    async fn list_models(&self) -> Result<Vec<ModelInfo>>;

    /// Probe the backend and report latency.
    async fn test_connection(&self) -> ConnectionTest;

    /// Subscribe to configuration and connection notifications.
    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent>;

    /// Release transport resources. Calling it twice is a no-op.
    async fn shutdown(&self);
}

/// A provider whose configuration can be replaced at runtime.
#[async_trait]
pub trait ConfigurableProvider: ModelProvider {
    type Config: ProviderConfiguration;

    /// Validate and apply `config`. Returns false (keeping the old config)
    /// when validation fails.
    async fn initialize(&self, config: Self::Config) -> bool;

    /// Snapshot of the active configuration.
    fn configuration(&self) -> Self::Config;
}

/// A provider that can be shared across tasks.
pub type SharedProvider = Arc<dyn ModelProvider>;

// ─────────────────────────────────────────────────────────────────────────────
// Shared Call Plumbing
// ─────────────────────────────────────────────────────────────────────────────

/// Execute an async operation with exponential backoff retry.
///
/// Retries only on transient errors. Non-retryable errors, including
/// cancellation, are returned immediately.
pub async fn with_retry<F, Fut, T>(
    max_retries: u32,
    initial_backoff: Duration,
    provider: &str,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = initial_backoff;
    let mut attempt = 0;

    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_retryable() || attempt >= max_retries => return Err(e),
            Err(e) => {
                attempt += 1;
                tracing::warn!(
                    provider = provider,
                    attempt = attempt,
                    max_retries = max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Request failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }
    }
}

/// Race `fut` against cancellation.
pub async fn run_cancellable<T, Fut>(cancel: &CancellationToken, fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(LlmError::Cancelled),
        result = fut => result,
    }
}

/// Turn the outcome of an adapter call into the response handed to callers.
pub fn finish_response(
    provider: &str,
    result: Result<ChatResponse>,
    started: Instant,
) -> ChatResponse {
    let elapsed = started.elapsed();
    match result {
        Ok(response) => {
            tracing::debug!(
                provider = provider,
                model = %response.model,
                elapsed_ms = elapsed.as_millis() as u64,
                "Chat completed"
            );
            response.with_response_time(elapsed)
        }
        Err(e) => {
            if e.is_cancelled() {
                tracing::debug!(provider = provider, "Chat cancelled");
            } else {
                tracing::warn!(provider = provider, error = %e, "Chat failed");
            }
            ChatResponse::from_error(&e).with_response_time(elapsed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_recovers_from_transient_errors() {
        let calls = AtomicU32::new(0);
        let result = with_retry(3, Duration::from_millis(10), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(LlmError::network("reset"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_gives_up() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(2, Duration::from_millis(10), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(LlmError::Timeout("slow".into())) }
        })
        .await;

        assert!(matches!(result, Err(LlmError::Timeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_skips_permanent_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(5, Duration::from_millis(10), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(LlmError::Auth("bad key".into())) }
        })
        .await;

        assert!(matches!(result, Err(LlmError::Auth(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_cancellable() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<()> = run_cancellable(&cancel, futures::future::pending()).await;
        assert_eq!(result, Err(LlmError::Cancelled));
    }

    #[tokio::test]
    async fn test_single_response_stream() {
        let stream = single_response_stream(ChatResponse::success("whole reply", "m"));
        let mut seen = String::new();
        let response = collect_stream(stream, |chunk| seen.push_str(&chunk.content)).await;
        assert_eq!(seen, "whole reply");
        assert_eq!(response.content, seen);
    }

    #[tokio::test]
    async fn test_single_response_stream_failure_has_no_chunks() {
        let events: Vec<_> = single_response_stream(ChatResponse::failure("down"))
            .collect()
            .await;
        assert_eq!(events.len(), 1);
        assert!(events[0].is_terminal());
    }

    #[tokio::test]
    async fn test_collect_stream_without_terminal() {
        let stream: ChatStream = Box::pin(futures::stream::iter(vec![StreamEvent::Chunk(
            ChatChunk::content("partial"),
        )]));
        let response = collect_stream(stream, |_| {}).await;
        assert!(!response.is_success());
    }

    #[test]
    fn test_event_hub_without_subscribers() {
        let hub = EventHub::new();
        hub.emit(ProviderEvent::ConfigurationChanged {
            provider: "x".into(),
        });
        let mut rx = hub.subscribe();
        hub.emit(ProviderEvent::ConnectionStatusChanged {
            provider: "x".into(),
            connected: true,
        });
        assert!(matches!(
            rx.try_recv(),
            Ok(ProviderEvent::ConnectionStatusChanged { connected: true, .. })
        ));
    }
}
