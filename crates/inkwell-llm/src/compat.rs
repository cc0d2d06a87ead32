//! OpenAI-compatible chat wire format.
//!
//! DeepSeek and Zhipu both speak the `/chat/completions` dialect with a
//! `reasoning_content` side-channel next to `content`. This module owns the
//! request/response schema and the HTTP exchange; the adapters own their
//! configuration and defaults.

use std::time::{Duration, Instant};

use reqwest::{Client, Response, header};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{LlmError, Result};
use crate::frames::{FrameDelta, FrameFormat, decode_stream};
use crate::provider::{ChatStream, with_retry};
use crate::types::{ChatMessage, ChatRequest, ChatResponse, ModelInfo, TokenUsage};

/// Provider defaults applied to unset request fields.
#[derive(Debug, Clone)]
pub(crate) struct SamplingDefaults {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: Option<f32>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub(crate) struct CompatRequest<'a> {
    pub model: String,
    pub messages: &'a [ChatMessage],
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "is_empty_slice")]
    pub stop: &'a [String],
    pub stream: bool,
}

impl<'a> CompatRequest<'a> {
    pub fn build(request: &'a ChatRequest, defaults: &SamplingDefaults, stream: bool) -> Self {
        Self {
            model: request.resolved_model(&defaults.model),
            messages: &request.messages,
            temperature: request.temperature.unwrap_or(defaults.temperature),
            max_tokens: request.max_tokens.unwrap_or(defaults.max_tokens),
            top_p: request.top_p.or(defaults.top_p),
            frequency_penalty: request.frequency_penalty,
            presence_penalty: request.presence_penalty,
            stop: &request.stop,
            stream,
        }
    }
}

fn is_empty_slice(items: &&[String]) -> bool {
    items.is_empty()
}

#[derive(Debug, Deserialize)]
struct CompatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<CompatChoice>,
    #[serde(default)]
    usage: Option<CompatUsage>,
}

#[derive(Debug, Deserialize)]
struct CompatChoice {
    #[serde(default)]
    message: Option<CompatMessage>,
    #[serde(default)]
    delta: Option<CompatMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CompatMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

impl From<CompatUsage> for TokenUsage {
    fn from(usage: CompatUsage) -> Self {
        let total = if usage.total_tokens > 0 {
            usage.total_tokens
        } else {
            usage.prompt_tokens.saturating_add(usage.completion_tokens)
        };
        TokenUsage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: total,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CompatModelList {
    #[serde(default)]
    data: Vec<CompatModel>,
}

#[derive(Debug, Deserialize)]
struct CompatModel {
    id: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Decoding
// ─────────────────────────────────────────────────────────────────────────────

/// Parse a non-streaming completion body.
pub(crate) fn parse_response(body: &str, fallback_model: &str) -> Result<ChatResponse> {
    let parsed: CompatResponse = serde_json::from_str(body)?;
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::backend("response contained no choices"))?;
    let message = choice.message.unwrap_or_default();

    Ok(ChatResponse::success(
        message.content.unwrap_or_default(),
        parsed.model.unwrap_or_else(|| fallback_model.to_string()),
    )
    .with_reasoning(message.reasoning_content)
    .with_usage(parsed.usage.map(Into::into))
    .with_finish_reason(choice.finish_reason))
}

/// Decode one SSE `data:` payload.
pub(crate) fn decode_frame(data: &str) -> serde_json::Result<FrameDelta> {
    let chunk: CompatResponse = serde_json::from_str(data)?;
    let mut delta = FrameDelta {
        model: chunk.model,
        usage: chunk.usage.map(Into::into),
        ..Default::default()
    };
    if let Some(choice) = chunk.choices.into_iter().next() {
        if let Some(d) = choice.delta.or(choice.message) {
            delta.content = d.content;
            delta.reasoning = d.reasoning_content;
        }
        delta.finish_reason = choice.finish_reason;
    }
    Ok(delta)
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Exchange
// ─────────────────────────────────────────────────────────────────────────────

/// One OpenAI-compatible endpoint, borrowed from an adapter's live state.
pub(crate) struct CompatEndpoint<'a> {
    pub provider: &'a str,
    pub client: &'a Client,
    pub base_url: &'a str,
    pub api_key: &'a str,
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl CompatEndpoint<'_> {
    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, format!("Bearer {}", self.api_key))
    }

    async fn check(response: Response) -> Result<Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(LlmError::from_status(status, &body))
    }

    /// Send a non-streaming completion with retries.
    pub async fn complete(&self, body: &CompatRequest<'_>) -> Result<ChatResponse> {
        tracing::debug!(
            provider = self.provider,
            model = %body.model,
            messages = body.messages.len(),
            "Sending chat completion"
        );

        with_retry(self.max_retries, self.retry_backoff, self.provider, || async {
            let response = self
                .authorize(self.client.post(self.url("chat/completions")))
                .json(body)
                .send()
                .await?;
            let text = Self::check(response).await?.text().await?;
            parse_response(&text, &body.model)
        })
        .await
    }

    /// Open a streaming completion. Only the headers are awaited here.
    pub async fn open_stream(
        &self,
        body: &CompatRequest<'_>,
        cancel: CancellationToken,
        started: Instant,
    ) -> Result<ChatStream> {
        tracing::debug!(
            provider = self.provider,
            model = %body.model,
            messages = body.messages.len(),
            "Opening chat stream"
        );

        let response = self
            .authorize(self.client.post(self.url("chat/completions")))
            .header(header::ACCEPT, "text/event-stream")
            .json(body)
            .send()
            .await?;
        let response = Self::check(response).await?;

        Ok(decode_stream(
            response.bytes_stream(),
            FrameFormat::ServerSentEvents,
            decode_frame,
            cancel,
            body.model.clone(),
            self.provider,
            started,
        ))
    }

    /// `GET /models`.
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let response = self
            .authorize(self.client.get(self.url("models")))
            .send()
            .await?;
        let list: CompatModelList = Self::check(response).await?.json().await?;
        Ok(list
            .data
            .into_iter()
            .map(|m| ModelInfo::new(m.id, self.provider))
            .collect())
    }
}
