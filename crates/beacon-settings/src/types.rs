//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a settings
//! file may be partial: missing fields keep their compiled default.

use beacon_core::BackoffConfig;
use serde::{Deserialize, Serialize};

/// Root settings type.
///
/// ```json
/// {
///   "llm": { "defaultModel": "gpt-3.5-turbo" },
///   "search": { "ttlMs": 10000 }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BeaconSettings {
    /// Settings schema version.
    pub version: String,
    /// Application name.
    pub name: String,
    /// Chat-completion provider settings.
    pub llm: LlmSettings,
    /// Search dispatch settings.
    pub search: SearchSettings,
    /// Duplex result channel settings.
    pub channel: ChannelSettings,
    /// Timeout supervisor settings.
    pub supervisor: SupervisorSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Default for BeaconSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            name: "beacon".to_string(),
            llm: LlmSettings::default(),
            search: SearchSettings::default(),
            channel: ChannelSettings::default(),
            supervisor: SupervisorSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl BeaconSettings {
    /// Non-fatal configuration problems worth logging at startup.
    ///
    /// Each missing piece disables one feature; none prevents startup.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.llm.api_key.is_none() {
            warnings.push("LLM API key is not set; direct answers will fail".to_string());
        }
        if self.search.transport == SearchTransport::Http && self.search.endpoint.is_none() {
            warnings.push("search endpoint is not set; semantic search will fail".to_string());
        }
        if self.channel.url.is_none() {
            warnings.push("WebSocket URL is not set; search results cannot be delivered".to_string());
        }
        if !self.llm.available_models.contains(&self.llm.default_model) {
            warnings.push(format!(
                "default model {} is not among the available models",
                self.llm.default_model
            ));
        }
        warnings
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// LLM
// ─────────────────────────────────────────────────────────────────────────────

/// Chat-completion provider settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LlmSettings {
    /// Bearer key for the provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// API base URL (without the `/chat/completions` suffix).
    pub base_url: String,
    /// Model used until the user picks another.
    pub default_model: String,
    /// Models the user may switch between.
    pub available_models: Vec<String>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Completion token cap.
    pub max_tokens: u32,
    /// Nucleus sampling.
    pub top_p: f32,
    /// Request timeout in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            default_model: "gpt-4".to_string(),
            available_models: vec!["gpt-3.5-turbo".to_string(), "gpt-4".to_string()],
            temperature: 0.7,
            max_tokens: 1000,
            top_p: 1.0,
            request_timeout_ms: 60_000,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Search
// ─────────────────────────────────────────────────────────────────────────────

/// How search requests leave the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchTransport {
    /// POST to the search endpoint; results come back over the channel.
    Http,
    /// Send a search frame over the duplex channel itself.
    Channel,
}

/// Search dispatch settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchSettings {
    /// HTTP endpoint accepting search requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Value for the `x-api-key` header.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Outbound path for search requests.
    pub transport: SearchTransport,
    /// How long a search may stay pending, in milliseconds.
    pub ttl_ms: u64,
    /// HTTP request timeout in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            transport: SearchTransport::Http,
            ttl_ms: 30_000,
            request_timeout_ms: 10_000,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Channel
// ─────────────────────────────────────────────────────────────────────────────

/// Duplex result channel settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelSettings {
    /// WebSocket URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Value for the `x-api-key` header on the upgrade request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Ping interval in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Missed intervals tolerated before forcing a reconnect.
    pub heartbeat_grace: u32,
    /// Handshake timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Per-connection outbound queue capacity.
    pub outbound_buffer: usize,
    /// Connect on startup.
    pub auto_connect: bool,
    /// Reconnect backoff.
    pub backoff: BackoffConfig,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            heartbeat_interval_ms: 15_000,
            heartbeat_grace: 3,
            connect_timeout_ms: 10_000,
            outbound_buffer: 64,
            auto_connect: true,
            backoff: BackoffConfig::default(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Supervisor / logging
// ─────────────────────────────────────────────────────────────────────────────

/// Timeout supervisor settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SupervisorSettings {
    /// Sweep tick in milliseconds.
    pub sweep_interval_ms: u64,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            sweep_interval_ms: 1000,
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level when `RUST_LOG` is unset.
    pub level: String,
    /// Force debug-level logging.
    pub debug: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            debug: false,
        }
    }
}
