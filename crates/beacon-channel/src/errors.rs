//! Channel and decoder error types.

use thiserror::Error;

/// Connection-level failures.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The server refused our credentials. Never retried.
    #[error("authentication failed: {message}")]
    Auth {
        /// Error description.
        message: String,
    },

    /// The URL could not be turned into a WebSocket request. Never retried.
    #[error("invalid channel URL: {message}")]
    InvalidUrl {
        /// Error description.
        message: String,
    },

    /// Transport failure (DNS, TCP, TLS, handshake timeout, 5xx).
    #[error("network error: {message}")]
    Network {
        /// Error description.
        message: String,
    },

    /// A send was attempted while the channel is not connected.
    #[error("channel is not connected")]
    NotConnected,

    /// The per-connection outbound queue is saturated.
    #[error("outbound queue is full")]
    OutboundFull,
}

impl ChannelError {
    /// Whether reconnecting can never fix this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Auth { .. } | Self::InvalidUrl { .. })
    }
}

/// Why an inbound frame was rejected by the decoder.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum MalformedFrame {
    /// Binary frame that is not UTF-8.
    #[error("binary frame is not valid UTF-8")]
    NotUtf8,
    /// Frame body is not a JSON object.
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    /// `correlationId` absent, empty, or not a string.
    #[error("missing correlation id")]
    MissingCorrelationId,
    /// `status` absent.
    #[error("missing status")]
    MissingStatus,
    /// `status` is neither `ok` nor `error`.
    #[error("unknown status: {0}")]
    UnknownStatus(String),
    /// Success payload does not carry a result list.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}
