//! # beacon-core
//!
//! Foundation types shared by every Beacon crate:
//!
//! - **Branded IDs**: [`CorrelationId`], [`ConversationId`] as newtypes for type safety
//! - **Conversation**: [`ConversationEntry`] with [`Role`] and [`EntryStatus`]
//! - **Envelopes**: [`ResultEnvelope`] carrying a search result or a failure
//! - **Backoff**: capped exponential delay math used by the reconnect loop
//! - **Logging**: [`logging::init_subscriber`] for the `tracing` subscriber

#![deny(unsafe_code)]

pub mod conversation;
pub mod envelope;
pub mod ids;
pub mod logging;
pub mod retry;

pub use conversation::{ConversationEntry, EntryStatus, Role};
pub use envelope::{FailureReason, ResultEnvelope, ResultPayload, SearchHit};
pub use ids::{ConversationId, CorrelationId};
pub use retry::BackoffConfig;
