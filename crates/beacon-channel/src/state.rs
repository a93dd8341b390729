//! Observable connection state.
//!
//! The manager is the only writer; everyone else holds a
//! `watch::Receiver<ConnectionState>` or a cloned snapshot.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse lifecycle of the duplex channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// No connection and no attempt in progress.
    #[default]
    Disconnected,
    /// First handshake in progress.
    Connecting,
    /// Socket open and healthy.
    Connected,
    /// Connection lost; backoff loop running.
    Reconnecting,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Reconnecting => write!(f, "Reconnecting"),
        }
    }
}

/// Snapshot of the channel published on every transition.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    /// Current lifecycle status.
    pub status: ConnectionStatus,
    /// Last time any inbound traffic (including Pong) was seen.
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    /// Reconnect attempt number (0 when not reconnecting).
    pub retry_attempt: u32,
    /// Most recent connection-level error, cleared on successful connect.
    pub last_error: Option<String>,
}

impl ConnectionState {
    /// Whether sends are currently accepted.
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    /// Whether a connection task is alive (connected or trying to be).
    pub fn is_active(&self) -> bool {
        self.status != ConnectionStatus::Disconnected
    }
}
