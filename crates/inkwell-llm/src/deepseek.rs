//! DeepSeek chat API adapter.
//!
//! Speaks the OpenAI-compatible `/chat/completions` dialect. The reasoner
//! models return their chain of thought in `reasoning_content`, surfaced here
//! as [`ChatResponse::reasoning`] and [`ChatChunk::reasoning`](crate::types::ChatChunk).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::compat::{CompatEndpoint, CompatRequest, SamplingDefaults};
use crate::config::{ProviderConfiguration, ValidationErrors};
use crate::error::{LlmError, Result};
use crate::http::{HttpCore, HttpSettings, validate_http};
use crate::provider::{
    ChatStream, ConfigurableProvider, ModelProvider, ProviderEvent, ProviderKind,
    finish_response, run_cancellable, single_response_stream,
};
use crate::types::{ChatRequest, ChatResponse, ConnectionTest, ModelInfo};

/// Default DeepSeek API base URL.
pub const DEFAULT_DEEPSEEK_BASE: &str = "https://api.deepseek.com";

/// Environment variable consulted for the API key.
pub const DEEPSEEK_API_KEY_ENV: &str = "DEEPSEEK_API_KEY";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for the DeepSeek provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeepSeekConfig {
    pub api_key: String,
    pub base_url: String,
    pub default_model: String,
    pub connect_timeout_secs: u64,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    /// Sampling temperature, 0.0 to 2.0.
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: Option<f32>,
    /// Whether callers should prefer streaming for this provider.
    pub stream: bool,
}

impl Default for DeepSeekConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_DEEPSEEK_BASE.to_string(),
            default_model: "deepseek-chat".to_string(),
            connect_timeout_secs: 10,
            timeout_secs: 120,
            max_retries: 3,
            retry_backoff_ms: 500,
            temperature: 0.7,
            max_tokens: 4096,
            top_p: None,
            stream: true,
        }
    }
}

impl DeepSeekConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    /// Create config with the key from `DEEPSEEK_API_KEY`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var(DEEPSEEK_API_KEY_ENV).map_err(|_| {
            LlmError::Config(format!("{} environment variable not set", DEEPSEEK_API_KEY_ENV))
        })?;
        Ok(Self::new(api_key))
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs();
        self
    }

    fn sampling(&self) -> SamplingDefaults {
        SamplingDefaults {
            model: self.default_model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_p: self.top_p,
        }
    }
}

impl ProviderConfiguration for DeepSeekConfig {
    fn validate(&self) -> Vec<String> {
        let mut errors = ValidationErrors::new();
        errors.require_non_empty("api_key", &self.api_key);
        errors.require_non_empty("default_model", &self.default_model);
        validate_http(
            &mut errors,
            &self.base_url,
            self.connect_timeout_secs,
            self.timeout_secs,
            self.max_retries,
        );
        errors.require_range("temperature", self.temperature, 0.0, 2.0);
        errors.require_range("max_tokens", self.max_tokens, 1, 8192);
        if let Some(top_p) = self.top_p {
            errors.require_range("top_p", top_p, 0.0, 1.0);
        }
        errors.into_vec()
    }
}

impl HttpSettings for DeepSeekConfig {
    fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Provider
// ─────────────────────────────────────────────────────────────────────────────

/// DeepSeek chat provider.
pub struct DeepSeekProvider {
    core: HttpCore<DeepSeekConfig>,
}

impl DeepSeekProvider {
    /// Create a provider named `"deepseek"`.
    pub fn new(config: DeepSeekConfig) -> Result<Self> {
        Self::with_name("deepseek", config)
    }

    /// Create a provider registered under a custom name.
    pub fn with_name(name: impl Into<String>, config: DeepSeekConfig) -> Result<Self> {
        Ok(Self {
            core: HttpCore::new(name, config)?,
        })
    }

    fn endpoint<'a>(
        &'a self,
        config: &'a DeepSeekConfig,
        client: &'a reqwest::Client,
    ) -> CompatEndpoint<'a> {
        CompatEndpoint {
            provider: self.core.name(),
            client,
            base_url: &config.base_url,
            api_key: &config.api_key,
            max_retries: config.max_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse> {
        request.validate()?;
        let (config, client) = self.core.ready()?;
        let body = CompatRequest::build(&request, &config.sampling(), false);
        self.endpoint(&config, &client).complete(&body).await
    }

    async fn open_stream(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
        started: Instant,
    ) -> Result<ChatStream> {
        request.validate()?;
        let (config, client) = self.core.ready()?;
        let body = CompatRequest::build(&request, &config.sampling(), true);
        self.endpoint(&config, &client)
            .open_stream(&body, cancel, started)
            .await
    }
}

#[async_trait]
impl ModelProvider for DeepSeekProvider {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::CloudApi
    }

    fn is_available(&self) -> bool {
        self.core.is_available()
    }

    fn default_model(&self) -> String {
        self.core.config().default_model
    }

    async fn chat(&self, request: ChatRequest, cancel: &CancellationToken) -> ChatResponse {
        let started = Instant::now();
        let result = run_cancellable(cancel, self.complete(request)).await;
        finish_response(self.name(), result, started)
    }

    async fn chat_stream(&self, request: ChatRequest, cancel: CancellationToken) -> ChatStream {
        let started = Instant::now();
        let opened = run_cancellable(&cancel, self.open_stream(request, cancel.clone(), started));
        match opened.await {
            Ok(stream) => stream,
            Err(e) => single_response_stream(finish_response(self.name(), Err(e), started)),
        }
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let (config, client) = self.core.ready()?;
        self.endpoint(&config, &client).list_models().await
    }

    async fn test_connection(&self) -> ConnectionTest {
        let started = Instant::now();
        match self.list_models().await {
            Ok(models) => ConnectionTest::passed(started.elapsed(), Some(models.len())),
            Err(e) => ConnectionTest::failed(started.elapsed(), e.to_string()),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.core.events().subscribe()
    }

    async fn shutdown(&self) {
        self.core.close();
    }
}

#[async_trait]
impl ConfigurableProvider for DeepSeekProvider {
    type Config = DeepSeekConfig;

    async fn initialize(&self, config: DeepSeekConfig) -> bool {
        self.core.replace(config)
    }

    fn configuration(&self) -> DeepSeekConfig {
        self.core.config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::collect_stream;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> DeepSeekProvider {
        let config = DeepSeekConfig::new("sk-test")
            .with_base_url(server.uri())
            .with_max_retries(0);
        DeepSeekProvider::new(config).unwrap()
    }

    #[test]
    fn test_default_config_requires_key() {
        let errors = DeepSeekConfig::default().validate();
        assert_eq!(errors, vec!["api_key is required".to_string()]);
        assert!(DeepSeekConfig::new("sk").is_valid());
    }

    #[test]
    fn test_temperature_bounds() {
        assert!(DeepSeekConfig::new("sk").with_temperature(2.0).is_valid());
        let errors = DeepSeekConfig::new("sk").with_temperature(2.1).validate();
        assert!(errors[0].contains("temperature"));
    }

    #[test]
    fn test_unavailable_without_key() {
        let provider = DeepSeekProvider::new(DeepSeekConfig::default()).unwrap();
        assert!(!provider.is_available());
        assert_eq!(provider.kind(), ProviderKind::CloudApi);
        assert_eq!(provider.default_model(), "deepseek-chat");
    }

    #[tokio::test]
    async fn test_chat_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "deepseek-chat",
                "stream": false
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "deepseek-chat",
                "choices": [{"message": {"role": "assistant", "content": "第一章"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 8, "completion_tokens": 3, "total_tokens": 11}
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let response = provider
            .chat(ChatRequest::from_prompt("开篇"), &CancellationToken::new())
            .await;

        assert!(response.is_success(), "{:?}", response.error);
        assert_eq!(response.content, "第一章");
        assert_eq!(response.usage.map(|u| u.total_tokens), Some(11));
    }

    #[tokio::test]
    async fn test_chat_http_error_becomes_failed_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": {"message": "invalid api key"}
            })))
            .mount(&server)
            .await;

        let response = provider_for(&server)
            .chat(ChatRequest::from_prompt("hi"), &CancellationToken::new())
            .await;

        assert!(!response.is_success());
        assert!(response.error_message().contains("invalid api key"));
    }

    #[tokio::test]
    async fn test_chat_rejects_empty_messages() {
        let server = MockServer::start().await;
        let response = provider_for(&server)
            .chat(ChatRequest::default(), &CancellationToken::new())
            .await;
        assert!(!response.is_success());
        assert!(response.error_message().contains("at least one message"));
    }

    #[tokio::test]
    async fn test_chat_unreachable_server() {
        let config = DeepSeekConfig::new("sk")
            .with_base_url("http://127.0.0.1:1")
            .with_max_retries(0);
        let provider = DeepSeekProvider::new(config).unwrap();
        let response = provider
            .chat(ChatRequest::from_prompt("hi"), &CancellationToken::new())
            .await;
        assert!(!response.is_success());
        assert!(response.error.is_some());
    }

    #[tokio::test]
    async fn test_stream_with_reasoning() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"model\":\"deepseek-reasoner\",\"choices\":[{\"delta\":{\"reasoning_content\":\"plan\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\", world\"}}]}\n\n",
            "data: {broken\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}],\"usage\":{\"prompt_tokens\":2,\"completion_tokens\":3,\"total_tokens\":5}}\n\n",
            "data: [DONE]\n\n"
        );
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(serde_json::json!({"stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let stream = provider_for(&server)
            .chat_stream(ChatRequest::from_prompt("hi"), CancellationToken::new())
            .await;

        let mut content = String::new();
        let response = collect_stream(stream, |c| content.push_str(&c.content)).await;

        assert!(response.is_success());
        assert_eq!(content, "Hello, world");
        assert_eq!(response.content, content);
        assert_eq!(response.reasoning.as_deref(), Some("plan"));
        assert_eq!(response.model, "deepseek-reasoner");
        assert_eq!(response.usage.map(|u| u.total_tokens), Some(5));
    }

    #[tokio::test]
    async fn test_stream_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let stream = provider_for(&server)
            .chat_stream(ChatRequest::from_prompt("hi"), CancellationToken::new())
            .await;
        let response = collect_stream(stream, |_| panic!("no chunks expected")).await;
        assert!(!response.is_success());
        assert!(response.error_message().contains("overloaded"));
    }

    #[tokio::test]
    async fn test_list_models_and_connection() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "object": "list",
                "data": [{"id": "deepseek-chat"}, {"id": "deepseek-reasoner"}]
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let models = provider.list_models().await.unwrap();
        assert_eq!(models.len(), 2);
        assert_eq!(models[1].id, "deepseek-reasoner");
        assert_eq!(models[0].provider, "deepseek");

        let test = provider.test_connection().await;
        assert!(test.success);
        assert_eq!(test.models_available, Some(2));
    }

    #[tokio::test]
    async fn test_initialize_rejects_invalid_config() {
        let provider = DeepSeekProvider::new(DeepSeekConfig::new("sk")).unwrap();
        let mut events = provider.subscribe();

        assert!(!provider.initialize(DeepSeekConfig::default()).await);
        assert_eq!(provider.configuration().api_key, "sk");

        assert!(provider.initialize(DeepSeekConfig::new("sk-2")).await);
        assert_eq!(provider.configuration().api_key, "sk-2");
        assert_eq!(
            events.try_recv().unwrap(),
            ProviderEvent::ConfigurationChanged {
                provider: "deepseek".into()
            }
        );
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let provider = DeepSeekProvider::new(DeepSeekConfig::new("sk")).unwrap();
        assert!(provider.is_available());
        provider.shutdown().await;
        provider.shutdown().await;
        assert!(!provider.is_available());

        let response = provider
            .chat(ChatRequest::from_prompt("hi"), &CancellationToken::new())
            .await;
        assert!(response.error_message().contains("shut down"));
    }
}
