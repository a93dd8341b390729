//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`BeaconSettings::default()`]
//! 2. If `~/.beacon/settings.json` exists, deep-merge user values over defaults
//! 3. Load a `.env` file from the working directory, if present
//! 4. Apply environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{BeaconSettings, SearchTransport};

/// Resolve the path to the settings file (`~/.beacon/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".beacon").join("settings.json")
}

/// Load settings from the default path, `.env`, and the process environment.
pub fn load_settings() -> Result<BeaconSettings> {
    match dotenvy::dotenv() {
        Ok(path) => debug!(?path, "loaded .env file"),
        Err(e) if e.not_found() => debug!("no .env file found"),
        Err(e) => tracing::warn!(error = %e, "failed to load .env file, ignoring"),
    }
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with process env var overrides.
///
/// If the file does not exist, returns defaults (plus overrides). If the
/// file contains invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<BeaconSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings, |name| std::env::var(name).ok());
    Ok(settings)
}

/// Defaults deep-merged with the file at `path`, without env overrides.
pub fn load_file_layer(path: &Path) -> Result<BeaconSettings> {
    let defaults = serde_json::to_value(BeaconSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment overrides read through `lookup`.
///
/// Empty values are treated as unset. Invalid numeric or boolean values are
/// ignored with a warning (falling back to file/default).
pub fn apply_env_overrides<F>(settings: &mut BeaconSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── LLM ─────────────────────────────────────────────────────────
    if let Some(v) = env.string("OPENAI_API_KEY") {
        settings.llm.api_key = Some(v);
    }
    if let Some(v) = env.string("OPENAI_BASE_URL") {
        settings.llm.base_url = v;
    }
    if let Some(v) = env.string("BEACON_DEFAULT_MODEL") {
        settings.llm.default_model = v;
    }

    // ── Search + channel ────────────────────────────────────────────
    if let Some(v) = env.string("AWS_API_ENDPOINT") {
        settings.search.endpoint = Some(v);
    }
    if let Some(v) = env.string("AWS_WEBSOCKET_URL") {
        settings.channel.url = Some(v);
    }
    // One key authenticates both the search endpoint and the channel.
    if let Some(v) = env.string("AWS_API_KEY") {
        settings.search.api_key = Some(v.clone());
        settings.channel.api_key = Some(v);
    }
    if let Some(v) = env.u64("BEACON_SEARCH_TTL_MS", 1000, 3_600_000) {
        settings.search.ttl_ms = v;
    }
    if let Some(v) = env.string("BEACON_SEARCH_TRANSPORT") {
        match parse_transport(&v) {
            Some(t) => settings.search.transport = t,
            None => tracing::warn!(value = %v, "invalid search transport, ignoring"),
        }
    }
    if let Some(v) = env.u64("BEACON_HEARTBEAT_INTERVAL_MS", 1000, 600_000) {
        settings.channel.heartbeat_interval_ms = v;
    }
    if let Some(v) = env.u64("BEACON_SWEEP_INTERVAL_MS", 10, 60_000) {
        settings.supervisor.sweep_interval_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.bool("DEBUG") {
        settings.logging.debug = v;
    }
    if let Some(v) = env.string("BEACON_LOG_LEVEL") {
        settings.logging.level = v;
    }

    debug!(
        llm_key = if settings.llm.api_key.is_some() { "[SET]" } else { "[NOT SET]" },
        search_key = if settings.search.api_key.is_some() { "[SET]" } else { "[NOT SET]" },
        search_endpoint = settings.search.endpoint.as_deref().unwrap_or("[NOT SET]"),
        websocket_url = settings.channel.url.as_deref().unwrap_or("[NOT SET]"),
        debug = settings.logging.debug,
        "environment overrides applied"
    );
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a search transport name.
pub fn parse_transport(val: &str) -> Option<SearchTransport> {
    match val.to_lowercase().as_str() {
        "http" => Some(SearchTransport::Http),
        "channel" | "websocket" | "ws" => Some(SearchTransport::Channel),
        _ => None,
    }
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = self.string(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = self.string(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }
}
