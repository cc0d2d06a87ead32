//! Zhipu (BigModel GLM) chat API adapter.
//!
//! The v4 API is OpenAI-compatible apart from its tighter sampling bounds
//! (temperature and top_p both within [0, 1]) and the lack of a model
//! listing endpoint, so the catalogue below is static.

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

/// Default Zhipu API base URL.
pub const DEFAULT_ZHIPU_BASE: &str = "https://open.bigmodel.cn/api/paas/v4";

/// Environment variable consulted for the API key.
pub const ZHIPU_API_KEY_ENV: &str = "ZHIPU_API_KEY";

/// Chat models offered by the v4 API.
const ZHIPU_MODELS: &[&str] = &["glm-4-plus", "glm-4-air", "glm-4-flash", "glm-z1-air"];

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for the Zhipu provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZhipuConfig {
    pub api_key: String,
    pub base_url: String,
    pub default_model: String,
    pub connect_timeout_secs: u64,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    /// Sampling temperature, 0.0 to 1.0.
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: Option<f32>,
    pub stream: bool,
}

impl Default for ZhipuConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_ZHIPU_BASE.to_string(),
            default_model: "glm-4-flash".to_string(),
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

impl ZhipuConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    /// Create config with the key from `ZHIPU_API_KEY`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var(ZHIPU_API_KEY_ENV).map_err(|_| {
            LlmError::Config(format!("{} environment variable not set", ZHIPU_API_KEY_ENV))
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

    fn sampling(&self) -> SamplingDefaults {
        SamplingDefaults {
            model: self.default_model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_p: self.top_p,
        }
    }
}

impl ProviderConfiguration for ZhipuConfig {
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
        errors.require_range("temperature", self.temperature, 0.0, 1.0);
        errors.require_range("max_tokens", self.max_tokens, 1, 8192);
        if let Some(top_p) = self.top_p {
            if top_p <= 0.0 {
                errors.push("top_p must be greater than 0");
            }
            errors.require_range("top_p", top_p, 0.0, 1.0);
        }
        errors.into_vec()
    }
}

impl HttpSettings for ZhipuConfig {
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

/// Zhipu GLM chat provider.
pub struct ZhipuProvider {
    core: HttpCore<ZhipuConfig>,
}

impl ZhipuProvider {
    /// Create a provider named `"zhipu"`.
    pub fn new(config: ZhipuConfig) -> Result<Self> {
        Self::with_name("zhipu", config)
    }

    pub fn with_name(name: impl Into<String>, config: ZhipuConfig) -> Result<Self> {
        Ok(Self {
            core: HttpCore::new(name, config)?,
        })
    }

    fn endpoint<'a>(
        &'a self,
        config: &'a ZhipuConfig,
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
impl ModelProvider for ZhipuProvider {
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
        let (config, _) = self.core.ready()?;
        let mut models: Vec<ModelInfo> = ZHIPU_MODELS
            .iter()
            .map(|id| ModelInfo::new(*id, self.name()))
            .collect();
        if !ZHIPU_MODELS.contains(&config.default_model.as_str()) {
            models.push(ModelInfo::new(config.default_model, self.name()));
        }
        Ok(models)
    }

    async fn test_connection(&self) -> ConnectionTest {
        let started = Instant::now();
        let probe = ChatRequest::from_prompt("ping").with_max_tokens(1);
        match self.complete(probe).await {
            Ok(_) | Err(LlmError::RateLimit(_)) => {
                let models = self.list_models().await.ok().map(|m| m.len());
                ConnectionTest::passed(started.elapsed(), models)
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
impl ConfigurableProvider for ZhipuProvider {
    type Config = ZhipuConfig;

    async fn initialize(&self, config: ZhipuConfig) -> bool {
        self.core.replace(config)
    }

    fn configuration(&self) -> ZhipuConfig {
        self.core.config()
    }
}
