//! Scriptable provider for tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::error::{LlmError, Result};
use crate::provider::{
    ChatStream, EventHub, ModelProvider, ProviderEvent, ProviderKind, StreamEvent,
    single_response_stream,
};
use crate::types::{ChatChunk, ChatRequest, ChatResponse, ConnectionTest, ModelInfo, TokenUsage};

#[derive(Debug, Clone)]
enum Behavior {
    Reply(String),
    Fail(String),
}

/// A provider whose answers are fixed up front.
///
/// Replies queued with [`push_reply`](Self::push_reply) are served first, in
/// order; after that every call falls back to the base behavior.
#[derive(Debug)]
pub struct MockProvider {
    name: String,
    kind: ProviderKind,
    behavior: Behavior,
    latency: Duration,
    available: AtomicBool,
    queued: Mutex<VecDeque<ChatResponse>>,
    stream_frames: Option<Vec<String>>,
    models: Vec<ModelInfo>,
    list_error: Option<String>,
    request_log: Mutex<Vec<ChatRequest>>,
    shutdowns: AtomicUsize,
    events: EventHub,
}

impl MockProvider {
    fn build(name: impl Into<String>, behavior: Behavior) -> Self {
        let name = name.into();
        Self {
            models: vec![ModelInfo::new("mock-model", name.clone())],
            name,
            kind: ProviderKind::LocalInference,
            behavior,
            latency: Duration::ZERO,
            available: AtomicBool::new(true),
            queued: Mutex::new(VecDeque::new()),
            stream_frames: None,
            list_error: None,
            request_log: Mutex::new(Vec::new()),
            shutdowns: AtomicUsize::new(0),
            events: EventHub::new(),
        }
    }

    /// Always answers `reply` after sleeping `latency`.
    pub fn succeeding(name: impl Into<String>, latency: Duration, reply: impl Into<String>) -> Self {
        Self {
            latency,
            ..Self::build(name, Behavior::Reply(reply.into()))
        }
    }

    /// Always fails with `error`.
    pub fn failing(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self::build(name, Behavior::Fail(error.into()))
    }

    /// Reports itself unavailable.
    pub fn unavailable(name: impl Into<String>) -> Self {
        let provider = Self::build(name, Behavior::Reply(String::new()));
        provider.available.store(false, Ordering::SeqCst);
        provider
    }

    pub fn with_kind(mut self, kind: ProviderKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_models(mut self, ids: &[&str]) -> Self {
        self.models = ids.iter().map(|id| ModelInfo::new(*id, self.name.clone())).collect();
        self
    }

    /// Make `list_models` fail.
    pub fn with_list_error(mut self, error: impl Into<String>) -> Self {
        self.list_error = Some(error.into());
        self
    }

    /// Stream these content fragments instead of the whole reply.
    pub fn with_stream_frames(mut self, frames: &[&str]) -> Self {
        self.stream_frames = Some(frames.iter().map(|f| f.to_string()).collect());
        self
    }

    /// Serve `response` for the next call before falling back.
    pub fn push_reply(&self, response: ChatResponse) {
        self.queued.lock().unwrap().push_back(response);
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Publish an event as if the provider's state changed.
    pub fn emit(&self, event: ProviderEvent) {
        self.events.emit(event);
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.request_log.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.request_log.lock().unwrap().len()
    }

    /// How many times `shutdown` was called.
    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    fn next_response(&self, request: &ChatRequest) -> ChatResponse {
        self.request_log.lock().unwrap().push(request.clone());
        if let Some(response) = self.queued.lock().unwrap().pop_front() {
            return response;
        }
        match &self.behavior {
            Behavior::Reply(text) => ChatResponse::success(
                text.clone(),
                request.resolved_model("mock-model"),
            )
            .with_usage(Some(TokenUsage::new(10, 20))),
            Behavior::Fail(error) => ChatResponse::failure(error.clone()),
        }
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn default_model(&self) -> String {
        "mock-model".to_string()
    }

    async fn chat(&self, request: ChatRequest, cancel: &CancellationToken) -> ChatResponse {
        let started = Instant::now();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return ChatResponse::cancelled().with_response_time(started.elapsed());
            }
            _ = tokio::time::sleep(self.latency) => {}
        }
        let response = self.next_response(&request);
        let elapsed = started.elapsed().max(self.latency);
        response.with_response_time(elapsed)
    }

    async fn chat_stream(&self, request: ChatRequest, cancel: CancellationToken) -> ChatStream {
        let frames = self.stream_frames.clone();
        let response = self.chat(request, &cancel).await;
        let Some(frames) = frames.filter(|_| response.is_success()) else {
            return single_response_stream(response);
        };

        let mut events: Vec<StreamEvent> = frames
            .iter()
            .map(|f| StreamEvent::Chunk(ChatChunk::content(f.clone())))
            .collect();
        let content = frames.concat();
        events.push(StreamEvent::Done(ChatResponse {
            content,
            ..response
        }));
        Box::pin(futures::stream::iter(events))
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        match &self.list_error {
            Some(error) => Err(LlmError::backend(error.clone())),
            None => Ok(self.models.clone()),
        }
    }

    async fn test_connection(&self) -> ConnectionTest {
        if self.is_available() {
            ConnectionTest::passed(self.latency, Some(self.models.len()))
        } else {
            ConnectionTest::failed(Duration::ZERO, "mock provider unavailable")
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }

    async fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}
