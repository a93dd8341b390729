//! LLM boundary errors.

use thiserror::Error;

/// Errors from a [`ChatModel`](crate::ChatModel) call.
#[derive(Debug, Error)]
pub enum LlmError {
    /// The provider asked us to slow down.
    #[error("rate limited: retry after {retry_after_ms}ms")]
    RateLimited {
        /// Suggested retry delay in milliseconds.
        retry_after_ms: u64,
        /// Error description.
        message: String,
    },

    /// Missing or rejected API key.
    #[error("auth error: {message}")]
    Auth {
        /// Error description.
        message: String,
    },

    /// The request did not finish in time.
    #[error("request timed out after {timeout_ms}ms")]
    Timeout {
        /// Configured timeout.
        timeout_ms: u64,
    },

    /// The provider returned a non-success status.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error description.
        message: String,
    },

    /// Transport failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The response body could not be parsed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LlmError {
    /// Whether the same request might succeed later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout { .. } => true,
            Self::Api { status, .. } => *status >= 500,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Auth { .. } | Self::Json(_) => false,
        }
    }

    /// Short category label for logs.
    pub fn category(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limit",
            Self::Auth { .. } => "auth",
            Self::Timeout { .. } => "timeout",
            Self::Api { .. } => "api",
            Self::Http(_) => "network",
            Self::Json(_) => "parse",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(
            LlmError::RateLimited {
                retry_after_ms: 1000,
                message: "slow down".into()
            }
            .is_retryable()
        );
        assert!(LlmError::Timeout { timeout_ms: 10 }.is_retryable());
        assert!(
            LlmError::Api {
                status: 503,
                message: "overloaded".into()
            }
            .is_retryable()
        );
        assert!(
            !LlmError::Api {
                status: 400,
                message: "bad".into()
            }
            .is_retryable()
        );
        assert!(!LlmError::Auth { message: "no key".into() }.is_retryable());
    }

    #[test]
    fn categories() {
        assert_eq!(LlmError::Auth { message: String::new() }.category(), "auth");
        assert_eq!(LlmError::Timeout { timeout_ms: 1 }.category(), "timeout");
    }

    #[test]
    fn display() {
        let err = LlmError::Api {
            status: 400,
            message: "model not found".into(),
        };
        assert_eq!(err.to_string(), "API error (400): model not found");
    }
}
