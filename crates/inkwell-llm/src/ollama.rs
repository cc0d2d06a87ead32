//! Ollama local inference adapter.
//!
//! Talks to the native `/api/chat` endpoint, which streams newline-delimited
//! JSON. Reasoning models report their chain of thought in a separate
//! `thinking` field next to `content`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::{ProviderConfiguration, ValidationErrors};
use crate::error::{LlmError, Result};
use crate::frames::{FrameDelta, FrameFormat, decode_stream};
use crate::http::{HttpCore, HttpSettings, validate_http};
use crate::provider::{
    ChatStream, ConfigurableProvider, ModelProvider, ProviderEvent, ProviderKind,
    finish_response, run_cancellable, single_response_stream, with_retry,
};
use crate::types::{ChatMessage, ChatRequest, ChatResponse, ConnectionTest, ModelInfo, TokenUsage};

/// Default Ollama server address.
pub const DEFAULT_OLLAMA_BASE: &str = "http://localhost:11434";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for a local Ollama server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub base_url: String,
    pub default_model: String,
    pub connect_timeout_secs: u64,
    /// Local models can be slow to load; this bounds the whole request.
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub temperature: f32,
    /// Maps to Ollama's `num_predict`.
    pub max_tokens: u32,
    pub top_p: Option<f32>,
    pub stream: bool,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OLLAMA_BASE.to_string(),
            default_model: "qwen2.5:7b".to_string(),
            connect_timeout_secs: 5,
            timeout_secs: 300,
            max_retries: 1,
            retry_backoff_ms: 250,
            temperature: 0.7,
            max_tokens: 2048,
            top_p: None,
            stream: true,
        }
    }
}

impl OllamaConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
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
}

impl ProviderConfiguration for OllamaConfig {
    fn validate(&self) -> Vec<String> {
        let mut errors = ValidationErrors::new();
        errors.require_non_empty("default_model", &self.default_model);
        validate_http(
            &mut errors,
            &self.base_url,
            self.connect_timeout_secs,
            self.timeout_secs,
            self.max_retries,
        );
        errors.require_range("temperature", self.temperature, 0.0, 2.0);
        errors.require_range("max_tokens", self.max_tokens, 1, 32768);
        if let Some(top_p) = self.top_p {
            errors.require_range("top_p", top_p, 0.0, 1.0);
        }
        errors.into_vec()
    }
}

impl HttpSettings for OllamaConfig {
    fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: String,
    messages: &'a [ChatMessage],
    stream: bool,
    options: OllamaOptions<'a>,
}

#[derive(Debug, Serialize)]
struct OllamaOptions<'a> {
    temperature: f32,
    num_predict: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "no_stop_sequences")]
    stop: &'a [String],
}

impl<'a> OllamaChatRequest<'a> {
    fn build(request: &'a ChatRequest, config: &OllamaConfig, stream: bool) -> Self {
        Self {
            model: request.resolved_model(&config.default_model),
            messages: &request.messages,
            stream,
            options: OllamaOptions {
                temperature: request.temperature.unwrap_or(config.temperature),
                num_predict: request.max_tokens.unwrap_or(config.max_tokens),
                top_p: request.top_p.or(config.top_p),
                frequency_penalty: request.frequency_penalty,
                presence_penalty: request.presence_penalty,
                stop: &request.stop,
            },
        }
    }
}

fn no_stop_sequences(stop: &&[String]) -> bool {
    stop.is_empty()
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

impl OllamaChatResponse {
    fn usage(&self) -> Option<TokenUsage> {
        match (self.prompt_eval_count, self.eval_count) {
            (None, None) => None,
            (p, c) => Some(TokenUsage::new(p.unwrap_or(0), c.unwrap_or(0))),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    thinking: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaTags {
    #[serde(default)]
    models: Vec<OllamaTag>,
}

#[derive(Debug, Deserialize)]
struct OllamaTag {
    name: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    modified_at: Option<String>,
}

fn decode_frame(line: &str) -> serde_json::Result<FrameDelta> {
    let frame: OllamaChatResponse = serde_json::from_str(line)?;
    let usage = if frame.done { frame.usage() } else { None };
    let message = frame.message.unwrap_or_default();
    Ok(FrameDelta {
        content: Some(message.content),
        reasoning: message.thinking,
        model: frame.model,
        usage,
        finish_reason: frame.done_reason,
        done: frame.done,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Provider
// ─────────────────────────────────────────────────────────────────────────────

/// Ollama chat provider.
pub struct OllamaProvider {
    core: HttpCore<OllamaConfig>,
}

impl OllamaProvider {
    /// Create a provider named `"ollama"`.
    pub fn new(config: OllamaConfig) -> Result<Self> {
        Self::with_name("ollama", config)
    }

    pub fn with_name(name: impl Into<String>, config: OllamaConfig) -> Result<Self> {
        Ok(Self {
            core: HttpCore::new(name, config)?,
        })
    }

    fn url(config: &OllamaConfig, path: &str) -> String {
        format!("{}/{}", config.base_url.trim_end_matches('/'), path)
    }

    async fn check(response: Response) -> Result<Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(LlmError::from_status(status, &body))
    }

    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse> {
        request.validate()?;
        let (config, client) = self.core.ready()?;
        let body = OllamaChatRequest::build(&request, &config, false);
        let url = Self::url(&config, "api/chat");

        tracing::debug!(
            provider = self.name(),
            model = %body.model,
            messages = body.messages.len(),
            "Sending chat request"
        );

        let backoff = Duration::from_millis(config.retry_backoff_ms);
        with_retry(config.max_retries, backoff, self.name(), || async {
            let response = client.post(&url).json(&body).send().await?;
            let parsed: OllamaChatResponse = Self::check(response).await?.json().await?;
            let usage = parsed.usage();
            let message = parsed.message.unwrap_or_default();
            Ok(ChatResponse::success(
                message.content,
                parsed.model.unwrap_or_else(|| body.model.clone()),
            )
            .with_reasoning(message.thinking)
            .with_usage(usage)
            .with_finish_reason(parsed.done_reason))
        })
        .await
    }

    async fn open_stream(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
        started: Instant,
    ) -> Result<ChatStream> {
        request.validate()?;
        let (config, client) = self.core.ready()?;
        let body = OllamaChatRequest::build(&request, &config, true);

        let response = client
            .post(Self::url(&config, "api/chat"))
            .json(&body)
            .send()
            .await?;
        let response = Self::check(response).await?;

        Ok(decode_stream(
            response.bytes_stream(),
            FrameFormat::NdJson,
            decode_frame,
            cancel,
            body.model.clone(),
            self.name(),
            started,
        ))
    }

    async fn tags(&self, config: &OllamaConfig, client: &Client) -> Result<Vec<ModelInfo>> {
        let response = client.get(Self::url(config, "api/tags")).send().await?;
        let tags: OllamaTags = Self::check(response).await?.json().await?;
        Ok(tags
            .models
            .into_iter()
            .map(|tag| ModelInfo {
                id: tag.name,
                provider: self.name().to_string(),
                size: tag.size,
                modified_at: tag.modified_at,
            })
            .collect())
    }
}

#[async_trait]
impl ModelProvider for OllamaProvider {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::LocalInference
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
        self.tags(&config, &client).await
    }

    async fn test_connection(&self) -> ConnectionTest {
        let started = Instant::now();
        match self.list_models().await {
            Ok(models) => {
                let default_model = self.default_model();
                if !models.iter().any(|m| m.id == default_model) {
                    tracing::warn!(
                        provider = self.name(),
                        model = %default_model,
                        "Default model is not pulled on this server"
                    );
                }
                ConnectionTest::passed(started.elapsed(), Some(models.len()))
            }
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
impl ConfigurableProvider for OllamaProvider {
    type Config = OllamaConfig;

    async fn initialize(&self, config: OllamaConfig) -> bool {
        self.core.replace(config)
    }

    fn configuration(&self) -> OllamaConfig {
        self.core.config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::collect_stream;
    use crate::types::ResponseStatus;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> OllamaProvider {
        let config = OllamaConfig::new(server.uri())
            .with_model("llama3")
            .with_max_retries(0);
        OllamaProvider::new(config).unwrap()
    }

    #[test]
    fn test_default_config_is_valid_without_key() {
        assert!(OllamaConfig::default().is_valid());
    }

    #[test]
    fn test_options_mapping() {
        let request = ChatRequest::from_prompt("hi").with_max_tokens(64).with_stop("\n\n");
        let body = OllamaChatRequest::build(&request, &OllamaConfig::default(), true);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["options"]["num_predict"], 64);
        assert_eq!(json["options"]["stop"], serde_json::json!(["\n\n"]));
        assert_eq!(json["stream"], true);
        assert_eq!(json["model"], "qwen2.5:7b");
    }

    #[tokio::test]
    async fn test_chat_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(serde_json::json!({"model": "llama3", "stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "llama3",
                "message": {"role": "assistant", "content": "Hi there", "thinking": "greet"},
                "done": true,
                "done_reason": "stop",
                "prompt_eval_count": 4,
                "eval_count": 2
            })))
            .mount(&server)
            .await;

        let response = provider_for(&server)
            .chat(ChatRequest::from_prompt("hello"), &CancellationToken::new())
            .await;
        assert!(response.is_success(), "{:?}", response.error);
        assert_eq!(response.content, "Hi there");
        assert_eq!(response.reasoning.as_deref(), Some("greet"));
        assert_eq!(response.usage, Some(TokenUsage::new(4, 2)));
    }

    #[tokio::test]
    async fn test_model_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(serde_json::json!({"error": "model 'llama3' not found"})),
            )
            .mount(&server)
            .await;

        let response = provider_for(&server)
            .chat(ChatRequest::from_prompt("hello"), &CancellationToken::new())
            .await;
        assert_eq!(response.status, ResponseStatus::Failed);
        assert!(response.error_message().contains("not found"));
    }

    #[tokio::test]
    async fn test_ndjson_stream() {
        let server = MockServer::start().await;
        let body = concat!(
            "{\"model\":\"llama3\",\"message\":{\"content\":\"\",\"thinking\":\"hmm\"},\"done\":false}\n",
            "{\"model\":\"llama3\",\"message\":{\"content\":\"Hel\"},\"done\":false}\n",
            "{\"model\":\"llama3\",\"message\":{\"content\":\"lo\"},\"done\":false}\n",
            "{\"model\":\"llama3\",\"message\":{\"content\":\"\"},\"done\":true,\"prompt_eval_count\":3,\"eval_count\":2}\n"
        );
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
            .mount(&server)
            .await;

        let stream = provider_for(&server)
            .chat_stream(ChatRequest::from_prompt("x"), CancellationToken::new())
            .await;
        let mut contents = Vec::new();
        let response = collect_stream(stream, |c| contents.push(c.content.clone())).await;

        assert!(response.is_success());
        assert_eq!(contents, vec!["", "Hel", "lo"]);
        assert_eq!(response.content, "Hello");
        assert_eq!(response.reasoning.as_deref(), Some("hmm"));
        assert_eq!(response.usage.map(|u| u.total_tokens), Some(5));
    }

    #[tokio::test]
    async fn test_list_models_from_tags() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "models": [
                    {"name": "llama3", "size": 4661224676u64, "modified_at": "2024-05-01T10:00:00Z"},
                    {"name": "qwen2.5:7b"}
                ]
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let models = provider.list_models().await.unwrap();
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].size, Some(4661224676));
        assert_eq!(models[0].provider, "ollama");

        let test = provider.test_connection().await;
        assert!(test.success);
        assert_eq!(test.models_available, Some(2));
    }

    #[tokio::test]
    async fn test_server_down() {
        let config = OllamaConfig::new("http://127.0.0.1:1").with_max_retries(0);
        let provider = OllamaProvider::new(config).unwrap();
        assert!(!provider.test_connection().await.success);
    }
}
