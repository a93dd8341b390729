//! Result envelopes: the unit the merge engine consumes.
//!
//! Envelopes come from three places: the frame decoder (real results), the
//! timeout supervisor (synthetic `TimedOut` failures), and the dispatch path
//! (immediate rejections). All three are merged through the same function.

use std::fmt::Write as _;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::conversation::EntryStatus;
use crate::ids::CorrelationId;

/// A single semantic-search hit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Result title.
    pub title: String,
    /// Short excerpt.
    #[serde(default)]
    pub snippet: String,
    /// Source location, when the worker provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Relevance score, when the worker provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// Why an asynchronous request ended without results.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// The remote worker reported an error.
    Remote {
        /// Message forwarded from the worker.
        message: String,
    },
    /// No frame arrived before the deadline.
    TimedOut {
        /// The TTL that elapsed, in milliseconds.
        ttl_ms: u64,
    },
    /// The search endpoint refused the request.
    Rejected {
        /// Rejection detail.
        message: String,
    },
    /// The channel was explicitly disconnected while the request was pending.
    Disconnected,
}

impl FailureReason {
    /// Build a timeout reason from a TTL.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn timed_out(ttl: Duration) -> Self {
        Self::TimedOut {
            ttl_ms: ttl.as_millis() as u64,
        }
    }

    /// User-visible text for this failure.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Remote { message } => format!("Search failed: {message}"),
            Self::TimedOut { ttl_ms } => format!(
                "No search results arrived within {}s. Please try again.",
                ttl_ms.div_ceil(1000)
            ),
            Self::Rejected { message } => format!("Search request was rejected: {message}"),
            Self::Disconnected => {
                "Search was cancelled because the result channel was disconnected.".to_string()
            }
        }
    }
}

/// What an envelope carries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResultPayload {
    /// Search completed; zero or more hits.
    Success {
        /// Ordered hits.
        hits: Vec<SearchHit>,
    },
    /// Search ended without results.
    Failure {
        /// Failure cause.
        reason: FailureReason,
    },
}

impl ResultPayload {
    /// Entry status the anchored placeholder moves to.
    #[must_use]
    pub fn terminal_status(&self) -> EntryStatus {
        match self {
            Self::Success { .. } => EntryStatus::Fulfilled,
            Self::Failure {
                reason: FailureReason::TimedOut { .. },
            } => EntryStatus::TimedOut,
            Self::Failure { .. } => EntryStatus::Errored,
        }
    }

    /// Render the payload into placeholder content.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Success { hits } if hits.is_empty() => "No search results found.".to_string(),
            Self::Success { hits } => {
                let mut text = String::from("Here are the search results:\n\n");
                for (idx, hit) in hits.iter().enumerate() {
                    let _ = writeln!(text, "{}. {}: {}", idx + 1, hit.title, hit.snippet);
                }
                text
            }
            Self::Failure { reason } => reason.render(),
        }
    }
}

/// A decoded (or synthesized) terminal event for one correlation ID.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultEnvelope {
    /// Request this result belongs to.
    pub correlation_id: CorrelationId,
    /// Result body.
    pub payload: ResultPayload,
    /// When the envelope was produced locally.
    pub received_at: DateTime<Utc>,
}

impl ResultEnvelope {
    /// Successful result.
    #[must_use]
    pub fn success(correlation_id: CorrelationId, hits: Vec<SearchHit>) -> Self {
        Self {
            correlation_id,
            payload: ResultPayload::Success { hits },
            received_at: Utc::now(),
        }
    }

    /// Failure result.
    #[must_use]
    pub fn failure(correlation_id: CorrelationId, reason: FailureReason) -> Self {
        Self {
            correlation_id,
            payload: ResultPayload::Failure { reason },
            received_at: Utc::now(),
        }
    }
}
