//! Pending request ledger.
//!
//! The single source of truth for what is outstanding. One mutex guards the
//! map and is held only for the map operation itself; nothing here awaits.
//! Removal through [`PendingLedger::complete`] is the serialization point
//! for merges: whoever removes an entry first owns its terminal transition.

use std::collections::HashMap;
use std::time::Duration;

use beacon_core::CorrelationId;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::errors::LedgerError;

/// Lifecycle of an outstanding request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestState {
    /// Waiting for a result.
    Pending,
    /// Result merged.
    Fulfilled,
    /// Deadline passed; a timeout merge is on its way.
    TimedOut,
    /// Rejected or failed remotely.
    Errored,
}

/// Metadata kept for one outstanding request.
#[derive(Clone, Debug)]
pub struct PendingRequest {
    /// Join key.
    pub correlation_id: CorrelationId,
    /// The user message that triggered the search.
    pub original_message: String,
    /// Wall-clock registration time.
    pub created_at: DateTime<Utc>,
    /// Monotonic expiry.
    pub deadline: Instant,
    /// TTL the deadline was derived from.
    pub ttl: Duration,
    /// Current state.
    pub state: RequestState,
}

impl PendingRequest {
    /// Whether the deadline has passed at `now`.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.deadline <= now
    }
}

/// Correlation id → outstanding request.
#[derive(Debug, Default)]
pub struct PendingLedger {
    entries: Mutex<HashMap<CorrelationId, PendingRequest>>,
}

impl PendingLedger {
    /// Empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new outstanding request expiring `ttl` from now.
    ///
    /// Ids are minted fresh per request, so a duplicate is a programming
    /// error: it trips a debug assertion and is logged and refused in
    /// release builds.
    pub fn register(
        &self,
        id: CorrelationId,
        message: impl Into<String>,
        ttl: Duration,
    ) -> Result<PendingRequest, LedgerError> {
        let request = PendingRequest {
            correlation_id: id.clone(),
            original_message: message.into(),
            created_at: Utc::now(),
            deadline: Instant::now() + ttl,
            ttl,
            state: RequestState::Pending,
        };

        let mut entries = self.entries.lock();
        let duplicate = entries.contains_key(&id);
        if !duplicate {
            let _ = entries.insert(id.clone(), request.clone());
        }
        drop(entries);

        if duplicate {
            error!(correlation_id = %id, "duplicate correlation id registration refused");
        }
        debug_assert!(!duplicate, "duplicate correlation id {id}");
        if duplicate {
            return Err(LedgerError::DuplicateCorrelation { id });
        }

        debug!(correlation_id = %id, ttl_ms = ttl.as_millis(), "pending request registered");
        Ok(request)
    }

    /// Copy of the entry for `id`.
    pub fn lookup(&self, id: &CorrelationId) -> Result<PendingRequest, LedgerError> {
        self.entries
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound { id: id.clone() })
    }

    /// Remove and return the entry for `id`.
    pub fn complete(&self, id: &CorrelationId) -> Option<PendingRequest> {
        self.entries.lock().remove(id)
    }

    /// Mark every still-pending entry whose deadline is at or before `now`
    /// as timed out and return copies of them.
    ///
    /// Marked entries stay in the ledger until merged, but are never
    /// returned by a later sweep.
    pub fn sweep_expired(&self, now: Instant) -> Vec<PendingRequest> {
        let mut entries = self.entries.lock();
        entries
            .values_mut()
            .filter(|r| r.state == RequestState::Pending && r.is_expired_at(now))
            .map(|r| {
                r.state = RequestState::TimedOut;
                r.clone()
            })
            .collect()
    }

    /// Remove and return every entry.
    pub fn drain(&self) -> Vec<PendingRequest> {
        self.entries.lock().drain().map(|(_, r)| r).collect()
    }

    /// Ids currently outstanding.
    pub fn ids(&self) -> Vec<CorrelationId> {
        self.entries.lock().keys().cloned().collect()
    }

    /// Number of outstanding entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing is outstanding.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const TTL: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn register_then_lookup() {
        let ledger = PendingLedger::new();
        let id = CorrelationId::from("abc123");
        let request = ledger.register(id.clone(), "search rust", TTL).unwrap();
        assert_eq!(request.state, RequestState::Pending);
        assert_eq!(request.ttl, TTL);

        let found = ledger.lookup(&id).unwrap();
        assert_eq!(found.original_message, "search rust");
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test]
    async fn lookup_missing_is_not_found() {
        let ledger = PendingLedger::new();
        assert_matches!(
            ledger.lookup(&CorrelationId::from("nope")),
            Err(LedgerError::NotFound { .. })
        );
    }

    #[tokio::test]
    async fn complete_removes_exactly_once() {
        let ledger = PendingLedger::new();
        let id = CorrelationId::new();
        let _ = ledger.register(id.clone(), "q", TTL).unwrap();

        assert!(ledger.complete(&id).is_some());
        assert!(ledger.complete(&id).is_none());
        assert!(ledger.is_empty());
    }

    #[cfg(debug_assertions)]
    #[tokio::test]
    #[should_panic(expected = "duplicate correlation id")]
    async fn duplicate_registration_asserts_in_debug() {
        let ledger = PendingLedger::new();
        let id = CorrelationId::from("dup");
        let _ = ledger.register(id.clone(), "a", TTL).unwrap();
        let _ = ledger.register(id, "b", TTL);
    }

    #[cfg(not(debug_assertions))]
    #[tokio::test]
    async fn duplicate_registration_is_refused_in_release() {
        let ledger = PendingLedger::new();
        let id = CorrelationId::from("dup");
        let _ = ledger.register(id.clone(), "a", TTL).unwrap();
        assert_matches!(
            ledger.register(id.clone(), "b", TTL),
            Err(LedgerError::DuplicateCorrelation { .. })
        );
        assert_eq!(ledger.lookup(&id).unwrap().original_message, "a");
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_returns_each_expired_entry_once() {
        let ledger = PendingLedger::new();
        let short = CorrelationId::from("short");
        let long = CorrelationId::from("long");
        let _ = ledger.register(short.clone(), "a", Duration::from_secs(5)).unwrap();
        let _ = ledger.register(long.clone(), "b", Duration::from_secs(60)).unwrap();

        assert!(ledger.sweep_expired(Instant::now()).is_empty());

        tokio::time::advance(Duration::from_secs(5)).await;
        let expired = ledger.sweep_expired(Instant::now());
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].correlation_id, short);
        assert_eq!(expired[0].state, RequestState::TimedOut);

        // Still present until merged, but not swept again.
        assert_eq!(ledger.lookup(&short).unwrap().state, RequestState::TimedOut);
        assert!(ledger.sweep_expired(Instant::now()).is_empty());
        assert_eq!(ledger.lookup(&long).unwrap().state, RequestState::Pending);
    }

    #[tokio::test]
    async fn drain_empties_ledger() {
        let ledger = PendingLedger::new();
        for _ in 0..3 {
            let _ = ledger.register(CorrelationId::new(), "q", TTL).unwrap();
        }
        assert_eq!(ledger.ids().len(), 3);
        assert_eq!(ledger.drain().len(), 3);
        assert!(ledger.is_empty());
        assert!(ledger.drain().is_empty());
    }
}
