//! Chat provider that samples completions through an MCP server.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use inkwell_llm::{
    ChatRequest, ChatResponse, ChatRole, ChatStream, ConfigurableProvider, ConnectionTest,
    EventHub, LlmError, ModelInfo, ModelProvider, ProviderConfiguration, ProviderEvent,
    ProviderKind, finish_response, run_cancellable, single_response_stream,
};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::McpConfiguration;
use crate::protocol::{CreateMessageParams, ModelHint, ModelPreferences, SamplingMessage};
use crate::session::McpSession;

/// Map a chat request onto `sampling/createMessage` parameters.
///
/// System messages are joined into the system prompt; the requested model
/// becomes a preference hint.
pub fn sampling_params(request: &ChatRequest, config: &McpConfiguration) -> CreateMessageParams {
    let mut system = Vec::new();
    let mut messages = Vec::new();
    for message in &request.messages {
        match message.role {
            ChatRole::System => system.push(message.content.as_str()),
            ChatRole::User => messages.push(SamplingMessage::text("user", &message.content)),
            ChatRole::Assistant => {
                messages.push(SamplingMessage::text("assistant", &message.content))
            }
        }
    }

    CreateMessageParams {
        messages,
        model_preferences: Some(ModelPreferences {
            hints: vec![ModelHint {
                name: request.resolved_model(&config.default_model),
            }],
            ..Default::default()
        }),
        system_prompt: (!system.is_empty()).then(|| system.join("\n\n")),
        temperature: request.temperature,
        max_tokens: request.max_tokens.unwrap_or(config.max_tokens),
        stop_sequences: request.stop.clone(),
    }
}

/// MCP-backed chat provider.
pub struct McpProvider {
    name: String,
    session: RwLock<Arc<McpSession>>,
    events: EventHub,
    closed: AtomicBool,
}

impl McpProvider {
    /// Create a provider named `"mcp"`.
    pub fn new(config: McpConfiguration) -> Self {
        Self::with_name("mcp", config)
    }

    pub fn with_name(name: impl Into<String>, config: McpConfiguration) -> Self {
        let name = name.into();
        let events = EventHub::new();
        let session = McpSession::with_events(name.clone(), config, events.clone());
        Self {
            name,
            session: RwLock::new(Arc::new(session)),
            events,
            closed: AtomicBool::new(false),
        }
    }

    /// The session currently backing this provider.
    pub fn session(&self) -> Arc<McpSession> {
        Arc::clone(&self.session.read())
    }

    async fn ready_session(&self) -> inkwell_llm::Result<Arc<McpSession>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LlmError::unavailable(format!(
                "provider '{}' has been shut down",
                self.name
            )));
        }
        let session = self.session();
        session.ensure_ready().await?;
        Ok(session)
    }

    async fn complete(&self, request: ChatRequest) -> inkwell_llm::Result<ChatResponse> {
        request.validate()?;
        let session = self.ready_session().await?;
        let params = sampling_params(&request, session.config());
        let result = session.create_message(params).await?;

        let text = result.content.as_text().unwrap_or_default().to_string();
        Ok(ChatResponse::success(text, result.model).with_finish_reason(result.stop_reason))
    }
}

#[async_trait]
impl ModelProvider for McpProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::ToolProtocol
    }

    fn is_available(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.session().config().is_valid()
    }

    fn default_model(&self) -> String {
        self.session().config().default_model.clone()
    }

    async fn chat(&self, request: ChatRequest, cancel: &CancellationToken) -> ChatResponse {
        let started = Instant::now();
        let result = run_cancellable(cancel, self.complete(request)).await;
        finish_response(&self.name, result, started)
    }

    async fn chat_stream(&self, request: ChatRequest, cancel: CancellationToken) -> ChatStream {
        single_response_stream(self.chat(request, &cancel).await)
    }

    async fn list_models(&self) -> inkwell_llm::Result<Vec<ModelInfo>> {
        let session = self.ready_session().await?;
        if session.info().capabilities.lists_models() {
            let models = session.list_models().await?;
            return Ok(models
                .into_iter()
                .map(|m| ModelInfo::new(m.id, &self.name))
                .collect());
        }
        Ok(vec![ModelInfo::new(
            session.config().default_model.clone(),
            &self.name,
        )])
    }

    async fn test_connection(&self) -> ConnectionTest {
        let started = Instant::now();
        let probe = async {
            let session = self.ready_session().await?;
            session.ping().await?;
            Ok::<_, LlmError>(())
        };
        match probe.await {
            Ok(()) => ConnectionTest::passed(started.elapsed(), None),
            Err(e) => ConnectionTest::failed(started.elapsed(), e.to_string()),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }

    async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.session().disconnect().await;
        tracing::info!(provider = %self.name, "Provider shut down");
    }
}

#[async_trait]
impl ConfigurableProvider for McpProvider {
    type Config = McpConfiguration;

    async fn initialize(&self, config: McpConfiguration) -> bool {
        let errors = config.validate();
        if !errors.is_empty() {
            tracing::warn!(
                provider = %self.name,
                errors = ?errors,
                "Rejected invalid provider configuration"
            );
            return false;
        }

        let replacement = Arc::new(McpSession::with_events(
            self.name.clone(),
            config,
            self.events.clone(),
        ));
        let previous = std::mem::replace(&mut *self.session.write(), replacement);
        previous.disconnect().await;

        tracing::info!(provider = %self.name, "Provider configuration updated");
        self.events.emit(ProviderEvent::ConfigurationChanged {
            provider: self.name.clone(),
        });
        true
    }

    fn configuration(&self) -> McpConfiguration {
        self.session().config().clone()
    }
}
