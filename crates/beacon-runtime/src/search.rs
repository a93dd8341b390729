//! Outbound search dispatch.
//!
//! A dispatch only gets the request accepted; results always come back
//! later over the result channel, keyed by correlation id.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use beacon_channel::{ChannelError, ConnectionManager};
use beacon_core::retry::parse_retry_after_header;
use beacon_core::{ConversationId, CorrelationId};
use beacon_llm::ChatTurn;
use beacon_settings::SearchSettings;
use reqwest::header::RETRY_AFTER;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::SearchDispatchError;

/// Retry delay assumed for a 429 without a usable `Retry-After`.
const DEFAULT_RETRY_AFTER_MS: u64 = 1000;

/// What gets sent to the search worker.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    /// Join key for the eventual result.
    pub correlation_id: CorrelationId,
    /// The user's message.
    pub query: String,
    /// Remote conversation handle, once the endpoint has issued one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    /// Prior turns.
    pub context: Vec<ChatTurn>,
}

/// Acknowledgment from the endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SearchAck {
    /// Conversation handle carried by the acknowledgment, if any.
    pub conversation_id: Option<ConversationId>,
}

/// Gets a search request accepted by the out-of-process worker.
#[async_trait]
pub trait SearchDispatch: Send + Sync {
    /// Send `request`. Must not wait for results.
    async fn dispatch(&self, request: &SearchRequest) -> Result<SearchAck, SearchDispatchError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct AckBody {
    #[serde(default, alias = "conversationId")]
    conversation_id: Option<String>,
}

/// POSTs requests to an HTTP endpoint that answers 202 and delivers results
/// over the result channel.
pub struct HttpSearchDispatch {
    endpoint: String,
    api_key: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpSearchDispatch {
    /// Dispatcher for `endpoint`.
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key,
            timeout,
            client: reqwest::Client::new(),
        }
    }

    /// Build from settings; `None` when no endpoint is configured.
    pub fn from_settings(settings: &SearchSettings) -> Option<Self> {
        settings.endpoint.as_ref().map(|endpoint| {
            Self::new(
                endpoint.clone(),
                settings.api_key.clone(),
                Duration::from_millis(settings.request_timeout_ms),
            )
        })
    }
}

#[async_trait]
impl SearchDispatch for HttpSearchDispatch {
    async fn dispatch(&self, request: &SearchRequest) -> Result<SearchAck, SearchDispatchError> {
        let mut builder = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(request);
        if let Some(key) = &self.api_key {
            builder = builder.header("x-api-key", key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| SearchDispatchError::ServiceUnavailable {
                message: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let conversation_id = serde_json::from_str::<AckBody>(&body)
                .ok()
                .and_then(|b| b.conversation_id)
                .filter(|id| !id.is_empty())
                .map(ConversationId::from);
            debug!(
                correlation_id = %request.correlation_id,
                status = status.as_u16(),
                "search request accepted"
            );
            return Ok(SearchAck { conversation_id });
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after_header);
        let body = response.text().await.unwrap_or_default();
        warn!(
            correlation_id = %request.correlation_id,
            status = status.as_u16(),
            "search request refused"
        );

        Err(if status.as_u16() == 429 {
            SearchDispatchError::RateLimited {
                retry_after_ms: retry_after.unwrap_or(DEFAULT_RETRY_AFTER_MS),
            }
        } else if status.is_client_error() {
            SearchDispatchError::BadRequest {
                status: status.as_u16(),
                message: body,
            }
        } else {
            SearchDispatchError::ServiceUnavailable {
                message: format!("HTTP {}: {body}", status.as_u16()),
            }
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Duplex channel
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ChannelSearchMessage<'a> {
    action: &'static str,
    #[serde(flatten)]
    request: &'a SearchRequest,
}

/// Sends requests as `{"action": "search", ...}` frames over the result
/// channel itself.
pub struct ChannelSearchDispatch {
    manager: Arc<ConnectionManager>,
}

impl ChannelSearchDispatch {
    /// Dispatcher over `manager`.
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl SearchDispatch for ChannelSearchDispatch {
    async fn dispatch(&self, request: &SearchRequest) -> Result<SearchAck, SearchDispatchError> {
        let text = serde_json::to_string(&ChannelSearchMessage {
            action: "search",
            request,
        })
        .map_err(|e| SearchDispatchError::BadRequest {
            status: 0,
            message: e.to_string(),
        })?;

        self.manager.send(text).map_err(|e| match e {
            ChannelError::NotConnected => SearchDispatchError::ServiceUnavailable {
                message: "result channel is not connected".into(),
            },
            other => SearchDispatchError::ServiceUnavailable {
                message: other.to_string(),
            },
        })?;
        debug!(correlation_id = %request.correlation_id, "search request sent over channel");
        Ok(SearchAck::default())
    }
}

/// Stand-in used when no endpoint is configured: every request is refused.
#[derive(Debug, Default)]
pub struct UnconfiguredSearch;

#[async_trait]
impl SearchDispatch for UnconfiguredSearch {
    async fn dispatch(&self, _request: &SearchRequest) -> Result<SearchAck, SearchDispatchError> {
        Err(SearchDispatchError::NotConfigured)
    }
}
