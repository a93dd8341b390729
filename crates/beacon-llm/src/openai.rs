//! OpenAI-compatible chat-completions client.
//!
//! Non-streaming: one POST to `{base_url}/chat/completions`, one reply.

use std::time::Duration;

use async_trait::async_trait;
use beacon_core::retry::parse_retry_after_header;
use beacon_settings::LlmSettings;
use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::LlmError;
use crate::model::{ChatModel, ChatTurn};

/// Delay assumed when a 429 carries no usable `Retry-After`.
const DEFAULT_RETRY_AFTER_MS: u64 = 1000;

/// Client configuration.
#[derive(Clone)]
pub struct OpenAiConfig {
    /// Bearer token. Calls fail with [`LlmError::Auth`] when absent.
    pub api_key: Option<String>,
    /// API base URL without the trailing path.
    pub base_url: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Reply length cap.
    pub max_tokens: u32,
    /// Nucleus sampling.
    pub top_p: f32,
    /// Whole-request timeout.
    pub request_timeout: Duration,
}

impl From<&LlmSettings> for OpenAiConfig {
    fn from(settings: &LlmSettings) -> Self {
        Self {
            api_key: settings.api_key.clone(),
            base_url: settings.base_url.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            top_p: settings.top_p,
            request_timeout: Duration::from_millis(settings.request_timeout_ms),
        }
    }
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self::from(&LlmSettings::default())
    }
}

impl std::fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("base_url", &self.base_url)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("top_p", &self.top_p)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────────────────────────

/// [`ChatModel`] backed by an OpenAI-compatible HTTP API.
pub struct OpenAiChatModel {
    config: OpenAiConfig,
    client: reqwest::Client,
}

impl OpenAiChatModel {
    /// Create a client.
    pub fn new(config: OpenAiConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &OpenAiConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    fn build_request<'a>(&self, model: &'a str, turns: &'a [ChatTurn]) -> CompletionRequest<'a> {
        CompletionRequest {
            model,
            messages: turns
                .iter()
                .map(|t| WireMessage {
                    role: t.role.as_str(),
                    content: &t.content,
                })
                .collect(),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            top_p: self.config.top_p,
        }
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn complete(&self, model: &str, turns: &[ChatTurn]) -> Result<String, LlmError> {
        let Some(api_key) = self.config.api_key.as_deref() else {
            return Err(LlmError::Auth {
                message: "OPENAI_API_KEY is not set".into(),
            });
        };

        debug!(model, turn_count = turns.len(), "requesting chat completion");
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(api_key)
            .timeout(self.config.request_timeout)
            .json(&self.build_request(model, turns))
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after_header);
            let body = response.text().await.unwrap_or_default();
            let err = classify_status(status, &body, retry_after);
            warn!(status = status.as_u16(), category = err.category(), "chat completion failed");
            return Err(err);
        }

        let body = response
            .text()
            .await
            .map_err(|e| self.map_transport_error(e))?;
        let parsed: CompletionResponse = serde_json::from_str(&body)?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        debug!(reply_len = content.len(), "chat completion received");
        Ok(content)
    }
}

impl OpenAiChatModel {
    #[allow(clippy::cast_possible_truncation)]
    fn map_transport_error(&self, error: reqwest::Error) -> LlmError {
        if error.is_timeout() {
            LlmError::Timeout {
                timeout_ms: self.config.request_timeout.as_millis() as u64,
            }
        } else {
            LlmError::Http(error)
        }
    }
}

fn classify_status(status: StatusCode, body: &str, retry_after_ms: Option<u64>) -> LlmError {
    let message = parse_api_error(body, status.as_u16());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::Auth { message },
        StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimited {
            retry_after_ms: retry_after_ms.unwrap_or(DEFAULT_RETRY_AFTER_MS),
            message,
        },
        _ => LlmError::Api {
            status: status.as_u16(),
            message,
        },
    }
}

/// Pull `error.message` out of an error body, or fall back to the raw text.
fn parse_api_error(body: &str, status: u16) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|json| json["error"]["message"].as_str().map(String::from))
        .unwrap_or_else(|| format!("HTTP {status}: {body}"))
}
