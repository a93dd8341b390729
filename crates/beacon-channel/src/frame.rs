//! Inbound frame decoding.
//!
//! Expected wire shape:
//!
//! ```json
//! { "correlationId": "abc123", "status": "ok",
//!   "payload": { "results": [ { "title": "...", "snippet": "..." } ] } }
//! { "correlationId": "abc123", "status": "error",
//!   "payload": { "message": "index unavailable" } }
//! ```
//!
//! Decoding never panics and never blocks; the caller logs and drops
//! anything that comes back as [`MalformedFrame`].

use beacon_core::{CorrelationId, FailureReason, ResultEnvelope, SearchHit};
use serde::Deserialize;
use serde_json::Value;

use crate::errors::MalformedFrame;

/// Longest prefix of a frame included in log lines.
const PREVIEW_CHARS: usize = 100;

/// A frame exactly as it came off the socket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RawFrame {
    /// Text frame.
    Text(String),
    /// Binary frame (decoded only if it is UTF-8).
    Binary(Vec<u8>),
}

impl RawFrame {
    /// Short, char-boundary-safe prefix for logging.
    pub fn preview(&self) -> String {
        match self {
            Self::Text(text) => truncate(text),
            Self::Binary(bytes) => match std::str::from_utf8(bytes) {
                Ok(text) => truncate(text),
                Err(_) => format!("<{} binary bytes>", bytes.len()),
            },
        }
    }
}

fn truncate(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

#[derive(Deserialize)]
struct WireFrame {
    #[serde(rename = "correlationId", alias = "correlation_id")]
    correlation_id: Option<Value>,
    status: Option<String>,
    payload: Option<Value>,
}

#[derive(Deserialize)]
struct SuccessPayload {
    #[serde(alias = "search_results")]
    results: Vec<SearchHit>,
}

/// Decode a raw frame into a result envelope.
pub fn decode(raw: &RawFrame) -> Result<ResultEnvelope, MalformedFrame> {
    let text = match raw {
        RawFrame::Text(text) => text.as_str(),
        RawFrame::Binary(bytes) => std::str::from_utf8(bytes).map_err(|_| MalformedFrame::NotUtf8)?,
    };

    let wire: WireFrame =
        serde_json::from_str(text).map_err(|e| MalformedFrame::InvalidJson(e.to_string()))?;

    let correlation_id = match wire.correlation_id {
        Some(Value::String(id)) if !id.trim().is_empty() => CorrelationId::from(id),
        _ => return Err(MalformedFrame::MissingCorrelationId),
    };

    let status = wire.status.ok_or(MalformedFrame::MissingStatus)?;
    match status.to_ascii_lowercase().as_str() {
        "ok" | "success" => {
            let hits = decode_hits(wire.payload)?;
            Ok(ResultEnvelope::success(correlation_id, hits))
        }
        "error" => {
            let message = error_message(wire.payload.as_ref());
            Ok(ResultEnvelope::failure(
                correlation_id,
                FailureReason::Remote { message },
            ))
        }
        _ => Err(MalformedFrame::UnknownStatus(status)),
    }
}

fn decode_hits(payload: Option<Value>) -> Result<Vec<SearchHit>, MalformedFrame> {
    match payload {
        Some(list @ Value::Array(_)) => serde_json::from_value(list)
            .map_err(|e| MalformedFrame::InvalidPayload(e.to_string())),
        Some(object @ Value::Object(_)) => serde_json::from_value::<SuccessPayload>(object)
            .map(|p| p.results)
            .map_err(|e| MalformedFrame::InvalidPayload(e.to_string())),
        Some(other) => Err(MalformedFrame::InvalidPayload(format!(
            "expected results, got {}",
            json_kind(&other)
        ))),
        None => Err(MalformedFrame::InvalidPayload("missing payload".into())),
    }
}

fn error_message(payload: Option<&Value>) -> String {
    match payload {
        Some(Value::String(message)) => message.clone(),
        Some(Value::Object(map)) => map
            .get("message")
            .or_else(|| map.get("error"))
            .and_then(Value::as_str)
            .map_or_else(|| "remote worker reported an error".to_string(), str::to_string),
        _ => "remote worker reported an error".to_string(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
