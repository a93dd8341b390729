//! Runtime error types.

use beacon_core::CorrelationId;
use beacon_llm::LlmError;
use thiserror::Error;

/// Pending-ledger failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// The id is already outstanding.
    #[error("duplicate correlation id: {id}")]
    DuplicateCorrelation {
        /// Offending id.
        id: CorrelationId,
    },
    /// No entry for the id.
    #[error("correlation id not found: {id}")]
    NotFound {
        /// Requested id.
        id: CorrelationId,
    },
}

/// Merge failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    /// No outstanding request carries this id: a duplicate, late, or stray
    /// result. History is left untouched.
    #[error("no pending request for correlation id {id}")]
    UnknownCorrelation {
        /// Id carried by the envelope.
        id: CorrelationId,
    },
}

/// Search endpoint refusals.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SearchDispatchError {
    /// The endpoint asked us to slow down.
    #[error("search service is rate limited (retry after {retry_after_ms}ms)")]
    RateLimited {
        /// Suggested delay.
        retry_after_ms: u64,
    },
    /// The endpoint rejected the request itself.
    #[error("search request rejected (HTTP {status}): {message}")]
    BadRequest {
        /// HTTP status code.
        status: u16,
        /// Response detail.
        message: String,
    },
    /// Transport failure, 5xx, or channel not connected.
    #[error("search service unavailable: {message}")]
    ServiceUnavailable {
        /// Error description.
        message: String,
    },
    /// No search endpoint was configured.
    #[error("search endpoint is not configured")]
    NotConfigured,
}

impl SearchDispatchError {
    /// Whether re-sending later could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::ServiceUnavailable { .. }
        )
    }
}

/// Failures of a user submission.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Blank input.
    #[error("message is empty")]
    EmptyMessage,
    /// The direct LLM call failed.
    #[error(transparent)]
    Llm(#[from] LlmError),
    /// The pending request could not be registered.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Session-level failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Model name not in the configured list.
    #[error("unknown model '{name}' (available: {available})")]
    UnknownModel {
        /// Requested model.
        name: String,
        /// Comma-separated list of configured models.
        available: String,
    },
}
