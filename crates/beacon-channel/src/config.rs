//! Channel configuration and credentials.

use std::fmt;
use std::time::Duration;

use beacon_core::BackoffConfig;

/// Floor for the ping period; a zero interval would stall the timer.
pub const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(50);

/// Static parameters for one [`ConnectionManager`](crate::ConnectionManager).
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    /// WebSocket URL (`ws://` or `wss://`).
    pub url: String,
    /// Interval between Ping frames.
    pub heartbeat_interval: Duration,
    /// Missed intervals tolerated before the connection is declared dead.
    pub heartbeat_grace: u32,
    /// Upper bound on a single handshake.
    pub connect_timeout: Duration,
    /// Per-connection outbound queue capacity.
    pub outbound_buffer: usize,
    /// Reconnect backoff.
    pub backoff: BackoffConfig,
}

impl ChannelConfig {
    /// Config for `url` with production defaults.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            heartbeat_interval: Duration::from_secs(15),
            heartbeat_grace: 3,
            connect_timeout: Duration::from_secs(10),
            outbound_buffer: 64,
            backoff: BackoffConfig::default(),
        }
    }

    /// Ping period actually used, never below [`MIN_HEARTBEAT_INTERVAL`].
    pub fn ping_interval(&self) -> Duration {
        self.heartbeat_interval.max(MIN_HEARTBEAT_INTERVAL)
    }

    /// Silence longer than this forces a reconnect.
    pub fn liveness_timeout(&self) -> Duration {
        self.ping_interval() * self.heartbeat_grace.max(1)
    }
}

/// Credentials presented on the upgrade request.
#[derive(Clone, Default)]
pub struct Credentials {
    /// Sent as the `x-api-key` header when present.
    pub api_key: Option<String>,
}

impl Credentials {
    /// Credentials carrying an API key.
    pub fn api_key(key: impl Into<String>) -> Self {
        Self {
            api_key: Some(key.into()),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .finish()
    }
}
