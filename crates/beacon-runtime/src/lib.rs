//! # beacon-runtime
//!
//! The correlation engine that ties an outbound search to the result that
//! arrives later on the duplex channel.
//!
//! - [`PendingLedger`]: outstanding searches keyed by correlation id
//! - [`ConversationHistory`]: the ordered conversation with anchored placeholders
//! - [`MergeEngine`]: applies a [`beacon_core::ResultEnvelope`] exactly once
//! - [`TimeoutSupervisor`]: converts expired requests into timeout failures
//! - [`Dispatcher`]: routes a user message to the LLM or to search
//! - [`ChatSession`]: owns all of the above plus the connection manager

#![deny(unsafe_code)]

pub mod dispatch;
pub mod errors;
pub mod history;
pub mod ledger;
pub mod merge;
pub mod receiver;
pub mod search;
pub mod session;
pub mod supervisor;

pub use dispatch::{
    DEFAULT_SEARCH_KEYWORDS, DispatchOutcome, DispatchPolicy, Dispatcher, DispatcherParts,
    KeywordPolicy, Route, SEARCH_PLACEHOLDER,
};
pub use errors::{DispatchError, LedgerError, MergeError, SearchDispatchError, SessionError};
pub use history::ConversationHistory;
pub use ledger::{PendingLedger, PendingRequest, RequestState};
pub use merge::{MergeEngine, MergeOutcome};
pub use receiver::{run_receiver, spawn_receiver};
pub use search::{
    ChannelSearchDispatch, HttpSearchDispatch, SearchAck, SearchDispatch, SearchRequest,
    UnconfiguredSearch,
};
pub use session::{ChatSession, SessionConfig, SessionParts, SessionSnapshot, shared_session};
pub use supervisor::TimeoutSupervisor;
