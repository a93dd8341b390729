//! Conversation merge engine.
//!
//! Real results, synthetic timeouts, dispatch rejections and disconnect
//! failures all arrive here as [`ResultEnvelope`]s. The ledger removal is
//! the serialization point, so at most one envelope per correlation id ever
//! reaches the history.

use std::sync::Arc;

use beacon_core::{CorrelationId, EntryStatus, ResultEnvelope};
use tracing::{debug, info, warn};

use crate::errors::MergeError;
use crate::history::ConversationHistory;
use crate::ledger::{PendingLedger, PendingRequest, RequestState};

/// Result of a successful merge.
#[derive(Clone, Debug)]
pub enum MergeOutcome {
    /// The placeholder was rewritten.
    Applied {
        /// The request, in its terminal state.
        request: PendingRequest,
        /// Placeholder index in the history.
        index: usize,
        /// Status written to the placeholder.
        status: EntryStatus,
    },
    /// The request was outstanding but its placeholder is gone (history was
    /// cleared concurrently). Nothing was written.
    Orphaned {
        /// The request, in its terminal state.
        request: PendingRequest,
    },
}

impl MergeOutcome {
    /// Correlation id of the merged request.
    pub fn correlation_id(&self) -> &CorrelationId {
        match self {
            Self::Applied { request, .. } | Self::Orphaned { request } => &request.correlation_id,
        }
    }
}

fn request_state_for(status: EntryStatus) -> RequestState {
    match status {
        EntryStatus::Fulfilled => RequestState::Fulfilled,
        EntryStatus::TimedOut => RequestState::TimedOut,
        EntryStatus::Pending | EntryStatus::Complete | EntryStatus::Errored => RequestState::Errored,
    }
}

/// Folds envelopes into the conversation history.
#[derive(Debug, Clone)]
pub struct MergeEngine {
    ledger: Arc<PendingLedger>,
    history: Arc<ConversationHistory>,
}

impl MergeEngine {
    /// Engine over a shared ledger and history.
    pub fn new(ledger: Arc<PendingLedger>, history: Arc<ConversationHistory>) -> Self {
        Self { ledger, history }
    }

    /// Apply `envelope` to its placeholder, first writer wins.
    pub fn merge(&self, envelope: ResultEnvelope) -> Result<MergeOutcome, MergeError> {
        let id = envelope.correlation_id;
        let Some(mut request) = self.ledger.complete(&id) else {
            debug!(correlation_id = %id, "no pending request for result, ignoring");
            return Err(MergeError::UnknownCorrelation { id });
        };

        let status = envelope.payload.terminal_status();
        request.state = request_state_for(status);
        let content = envelope.payload.render();

        match self.history.resolve_anchor(&id, content, status) {
            Some(index) => {
                info!(
                    correlation_id = %id,
                    status = ?status,
                    waited_ms = (envelope.received_at - request.created_at).num_milliseconds(),
                    "result merged"
                );
                Ok(MergeOutcome::Applied {
                    request,
                    index,
                    status,
                })
            }
            None => {
                warn!(correlation_id = %id, "placeholder missing for pending request");
                Ok(MergeOutcome::Orphaned { request })
            }
        }
    }

    /// Shared ledger.
    pub fn ledger(&self) -> &Arc<PendingLedger> {
        &self.ledger
    }

    /// Shared history.
    pub fn history(&self) -> &Arc<ConversationHistory> {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use beacon_core::{ConversationEntry, FailureReason, Role, SearchHit};

    use super::*;

    const TTL: Duration = Duration::from_secs(30);

    fn engine() -> MergeEngine {
        MergeEngine::new(
            Arc::new(PendingLedger::new()),
            Arc::new(ConversationHistory::new()),
        )
    }

    fn hit(title: &str) -> SearchHit {
        SearchHit {
            title: title.into(),
            snippet: format!("about {title}"),
            url: None,
            score: None,
        }
    }

    /// Register a request and its placeholder the way dispatch does.
    fn pending(engine: &MergeEngine, id: &str) -> CorrelationId {
        let id = CorrelationId::from(id);
        let _ = engine.ledger.register(id.clone(), "search", TTL).unwrap();
        let _ = engine
            .history
            .append(ConversationEntry::placeholder(id.clone(), "Searching...", "search"));
        id
    }

    #[tokio::test]
    async fn success_rewrites_placeholder() {
        let engine = engine();
        let id = pending(&engine, "abc123");

        let outcome = engine
            .merge(ResultEnvelope::success(id.clone(), vec![hit("Rust")]))
            .unwrap();
        assert_matches!(
            outcome,
            MergeOutcome::Applied { index: 0, status: EntryStatus::Fulfilled, ref request }
                if request.state == RequestState::Fulfilled
        );
        let entry = engine.history.get(0).unwrap();
        assert_eq!(entry.content, "Here are the search results:\n\n1. Rust: about Rust\n");
        assert!(engine.ledger.is_empty());
    }

    #[tokio::test]
    async fn second_frame_for_same_id_is_ignored() {
        let engine = engine();
        let id = pending(&engine, "abc123");

        let _ = engine
            .merge(ResultEnvelope::success(id.clone(), vec![hit("first")]))
            .unwrap();
        let revision = engine.history.revision();

        let err = engine
            .merge(ResultEnvelope::success(id.clone(), vec![hit("second")]))
            .unwrap_err();
        assert_eq!(err, MergeError::UnknownCorrelation { id });
        assert!(engine.history.get(0).unwrap().content.contains("first"));
        assert_eq!(engine.history.revision(), revision);
    }

    #[tokio::test]
    async fn stray_frame_leaves_history_untouched() {
        let engine = engine();
        let _ = engine
            .history
            .append(ConversationEntry::complete(Role::User, "hello"));
        let before = engine.history.snapshot();

        assert_matches!(
            engine.merge(ResultEnvelope::success(CorrelationId::from("stray"), vec![])),
            Err(MergeError::UnknownCorrelation { .. })
        );
        assert_eq!(engine.history.snapshot(), before);
    }

    #[tokio::test]
    async fn failure_statuses() {
        let engine = engine();
        let timed_out = pending(&engine, "t");
        let remote = pending(&engine, "r");

        let _ = engine
            .merge(ResultEnvelope::failure(
                timed_out,
                FailureReason::timed_out(Duration::from_secs(5)),
            ))
            .unwrap();
        let _ = engine
            .merge(ResultEnvelope::failure(
                remote,
                FailureReason::Remote {
                    message: "index offline".into(),
                },
            ))
            .unwrap();

        let entries = engine.history.snapshot();
        assert_eq!(entries[0].status, EntryStatus::TimedOut);
        assert_eq!(
            entries[0].content,
            "No search results arrived within 5s. Please try again."
        );
        assert_eq!(entries[1].status, EntryStatus::Errored);
        assert_eq!(entries[1].content, "Search failed: index offline");
    }

    #[tokio::test]
    async fn results_merge_at_anchor_regardless_of_arrival_order() {
        let engine = engine();
        let a = pending(&engine, "a");
        let _ = engine
            .history
            .append(ConversationEntry::complete(Role::User, "between"));
        let b = pending(&engine, "b");

        let _ = engine.merge(ResultEnvelope::success(b, vec![hit("B")])).unwrap();
        let _ = engine.merge(ResultEnvelope::success(a, vec![hit("A")])).unwrap();

        let entries = engine.history.snapshot();
        assert!(entries[0].content.contains("1. A"));
        assert_eq!(entries[1].content, "between");
        assert!(entries[2].content.contains("1. B"));
    }

    #[tokio::test]
    async fn missing_placeholder_is_orphaned() {
        let engine = engine();
        let id = CorrelationId::from("lonely");
        let _ = engine.ledger.register(id.clone(), "q", TTL).unwrap();

        assert_matches!(
            engine.merge(ResultEnvelope::success(id, vec![])),
            Ok(MergeOutcome::Orphaned { .. })
        );
        assert!(engine.ledger.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_merges_have_one_winner() {
        let engine = Arc::new(engine());
        for round in 0..50 {
            let id = pending(&engine, &format!("race-{round}"));
            let real = {
                let engine = Arc::clone(&engine);
                let id = id.clone();
                tokio::spawn(async move {
                    engine.merge(ResultEnvelope::success(id, vec![hit("real")]))
                })
            };
            let timeout = {
                let engine = Arc::clone(&engine);
                let id = id.clone();
                tokio::spawn(async move {
                    engine.merge(ResultEnvelope::failure(
                        id,
                        FailureReason::timed_out(TTL),
                    ))
                })
            };
            let real = real.await.unwrap();
            let timeout = timeout.await.unwrap();
            assert_ne!(real.is_ok(), timeout.is_ok(), "exactly one merge must win");

            let entry = engine
                .history
                .snapshot()
                .into_iter()
                .find(|e| e.is_anchored_to(&id))
                .unwrap();
            if real.is_ok() {
                assert_eq!(entry.status, EntryStatus::Fulfilled);
                assert!(entry.content.contains("real"));
            } else {
                assert_eq!(entry.status, EntryStatus::TimedOut);
                assert_eq!(entry.content, FailureReason::timed_out(TTL).render());
            }
        }
        assert!(engine.ledger.is_empty());
        assert!(engine.history.snapshot().iter().all(|e| !e.status.is_pending()));
    }
}
