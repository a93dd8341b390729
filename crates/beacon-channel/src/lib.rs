//! # beacon-channel
//!
//! The duplex result channel. Two independent pieces live here:
//!
//! - [`ConnectionManager`]: owns the WebSocket lifecycle (connect,
//!   authenticate, heartbeat, reconnect with backoff, teardown) and exposes
//!   a stream of raw inbound frames that survives reconnects. It knows
//!   nothing about what the frames mean.
//! - [`frame::decode`]: turns a raw frame into a [`beacon_core::ResultEnvelope`]
//!   or a [`MalformedFrame`] describing why it was rejected.

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod frame;
pub mod heartbeat;
pub mod manager;
pub mod state;

pub use config::{ChannelConfig, Credentials};
pub use errors::{ChannelError, MalformedFrame};
pub use frame::{RawFrame, decode};
pub use manager::{ConnectionManager, FrameReceiver};
pub use state::{ConnectionState, ConnectionStatus};
