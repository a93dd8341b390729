//! Dispatch policy and the dispatcher.
//!
//! Each user message takes one of two routes. Direct messages block on the
//! language model and append the reply. Search messages register a pending
//! request, append a placeholder, and hand the outbound send to a spawned
//! task so the caller never waits on the search endpoint.

use std::sync::Arc;
use std::time::Duration;

use beacon_channel::ConnectionState;
use beacon_core::{
    ConversationEntry, ConversationId, CorrelationId, FailureReason, ResultEnvelope, Role,
};
use beacon_llm::{ChatModel, ChatTurn};
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::errors::DispatchError;
use crate::history::ConversationHistory;
use crate::ledger::PendingLedger;
use crate::merge::MergeEngine;
use crate::search::{SearchDispatch, SearchRequest};

/// Placeholder content shown while a search is outstanding.
pub const SEARCH_PLACEHOLDER: &str = "Searching for relevant information...";

/// Phrases that send a message down the search route.
pub const DEFAULT_SEARCH_KEYWORDS: &[&str] = &[
    "search",
    "find",
    "look up",
    "lookup",
    "search for",
    "find information",
    "get information",
    "retrieve",
];

/// Which path a message takes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    /// Synchronous LLM reply.
    Direct,
    /// Asynchronous search with a placeholder.
    Search,
}

/// Decides the route for a user message.
pub trait DispatchPolicy: Send + Sync {
    /// Classify `message`. Must not block.
    fn classify(&self, message: &str) -> Route;
}

/// Case-insensitive substring match against a keyword list.
#[derive(Clone, Debug)]
pub struct KeywordPolicy {
    keywords: Vec<String>,
}

impl KeywordPolicy {
    /// Policy with a custom keyword list.
    pub fn with_keywords<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.into().to_lowercase())
                .collect(),
        }
    }
}

impl Default for KeywordPolicy {
    fn default() -> Self {
        Self::with_keywords(DEFAULT_SEARCH_KEYWORDS.iter().copied())
    }
}

impl DispatchPolicy for KeywordPolicy {
    fn classify(&self, message: &str) -> Route {
        let lowered = message.to_lowercase();
        if self.keywords.iter().any(|k| lowered.contains(k.as_str())) {
            Route::Search
        } else {
            Route::Direct
        }
    }
}

/// What a submission produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The assistant reply was appended.
    Replied,
    /// A placeholder is waiting on this id.
    Pending(CorrelationId),
}

/// Collaborators a [`Dispatcher`] needs.
pub struct DispatcherParts {
    /// Routing decision.
    pub policy: Arc<dyn DispatchPolicy>,
    /// Direct-reply model.
    pub model: Arc<dyn ChatModel>,
    /// Outbound search path.
    pub search: Arc<dyn SearchDispatch>,
    /// Shared merge engine (owns ledger and history).
    pub merge: Arc<MergeEngine>,
    /// Result channel state, for diagnostics.
    pub connection: watch::Receiver<ConnectionState>,
    /// Bounded lifetime of a pending search.
    pub ttl: Duration,
}

/// Routes user messages and performs the chosen path.
pub struct Dispatcher {
    policy: Arc<dyn DispatchPolicy>,
    model: Arc<dyn ChatModel>,
    search: Arc<dyn SearchDispatch>,
    merge: Arc<MergeEngine>,
    connection: watch::Receiver<ConnectionState>,
    ttl: Duration,
    conversation: Arc<RwLock<ConversationSlot>>,
}

/// Remote conversation handle plus a generation bumped on every forget, so
/// an acknowledgment for a search sent before a clear cannot revive it.
#[derive(Debug, Default)]
struct ConversationSlot {
    generation: u64,
    id: Option<ConversationId>,
}

impl Dispatcher {
    /// Assemble a dispatcher.
    pub fn new(parts: DispatcherParts) -> Self {
        Self {
            policy: parts.policy,
            model: parts.model,
            search: parts.search,
            merge: parts.merge,
            connection: parts.connection,
            ttl: parts.ttl,
            conversation: Arc::new(RwLock::new(ConversationSlot::default())),
        }
    }

    fn ledger(&self) -> &PendingLedger {
        self.merge.ledger()
    }

    fn history(&self) -> &ConversationHistory {
        self.merge.history()
    }

    /// Conversation handle issued by the search endpoint, if any.
    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.conversation.read().id.clone()
    }

    /// Drop the conversation handle.
    pub fn forget_conversation(&self) {
        let mut slot = self.conversation.write();
        slot.generation += 1;
        slot.id = None;
    }

    /// Pending-search TTL.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Route and perform one user message.
    ///
    /// LLM errors are returned without touching history beyond the user
    /// turn; the caller decides how to surface them.
    pub async fn submit(&self, text: &str, model: &str) -> Result<DispatchOutcome, DispatchError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(DispatchError::EmptyMessage);
        }

        match self.policy.classify(text) {
            Route::Direct => self.reply_directly(text, model).await,
            Route::Search => self.start_search(text),
        }
    }

    async fn reply_directly(&self, text: &str, model: &str) -> Result<DispatchOutcome, DispatchError> {
        let _ = self
            .history()
            .append(ConversationEntry::complete(Role::User, text));
        let turns = ChatTurn::from_history(&self.history().snapshot());

        debug!(model, "direct route");
        let reply = self.model.complete(model, &turns).await?;
        let _ = self
            .history()
            .append(ConversationEntry::complete(Role::Assistant, reply));
        Ok(DispatchOutcome::Replied)
    }

    fn start_search(&self, text: &str) -> Result<DispatchOutcome, DispatchError> {
        let context = ChatTurn::from_history(&self.history().snapshot());
        let _ = self
            .history()
            .append(ConversationEntry::complete(Role::User, text));

        let id = CorrelationId::new();
        let _ = self.ledger().register(id.clone(), text, self.ttl)?;
        let _ = self
            .history()
            .append(ConversationEntry::placeholder(id.clone(), SEARCH_PLACEHOLDER, text));

        if !self.connection.borrow().is_connected() {
            warn!(
                correlation_id = %id,
                "result channel is not connected; the search will time out unless it reconnects"
            );
        }

        let (generation, conversation_id) = {
            let slot = self.conversation.read();
            (slot.generation, slot.id.clone())
        };
        let request = SearchRequest {
            correlation_id: id.clone(),
            query: text.to_string(),
            conversation_id,
            context,
        };
        let search = Arc::clone(&self.search);
        let merge = Arc::clone(&self.merge);
        let conversation = Arc::clone(&self.conversation);
        let span = info_span!("search_dispatch", correlation_id = %id);

        drop(tokio::spawn(
            async move {
                match search.dispatch(&request).await {
                    Ok(ack) => {
                        if let Some(remote) = ack.conversation_id {
                            let mut slot = conversation.write();
                            if slot.generation != generation {
                                debug!(conversation_id = %remote, "ignoring ack from a cleared conversation");
                            } else if slot.id.is_none() {
                                info!(conversation_id = %remote, "conversation started");
                                slot.id = Some(remote);
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "search dispatch rejected");
                        let envelope = ResultEnvelope::failure(
                            request.correlation_id,
                            FailureReason::Rejected {
                                message: e.to_string(),
                            },
                        );
                        let _ = merge.merge(envelope);
                    }
                }
            }
            .instrument(span),
        ));

        info!(correlation_id = %id, "search dispatched");
        Ok(DispatchOutcome::Pending(id))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use beacon_core::EntryStatus;
    use beacon_llm::LlmError;
    use parking_lot::Mutex;

    use super::*;
    use crate::errors::SearchDispatchError;
    use crate::search::SearchAck;

    struct EchoModel;

    #[async_trait]
    impl ChatModel for EchoModel {
        async fn complete(&self, model: &str, turns: &[ChatTurn]) -> Result<String, LlmError> {
            Ok(format!("{model}:{}:{}", turns.len(), turns.last().map_or("", |t| t.content.as_str())))
        }
    }

    struct FailingModel;

    #[async_trait]
    impl ChatModel for FailingModel {
        async fn complete(&self, _model: &str, _turns: &[ChatTurn]) -> Result<String, LlmError> {
            Err(LlmError::Auth {
                message: "no key".into(),
            })
        }
    }

    #[derive(Default)]
    struct RecordingSearch {
        sent: Mutex<Vec<SearchRequest>>,
        ack: Option<ConversationId>,
        reject: bool,
    }

    #[async_trait]
    impl SearchDispatch for RecordingSearch {
        async fn dispatch(&self, request: &SearchRequest) -> Result<SearchAck, SearchDispatchError> {
            self.sent.lock().push(request.clone());
            if self.reject {
                return Err(SearchDispatchError::BadRequest {
                    status: 400,
                    message: "bad query".into(),
                });
            }
            Ok(SearchAck {
                conversation_id: self.ack.clone(),
            })
        }
    }

    fn dispatcher(
        model: Arc<dyn ChatModel>,
        search: Arc<dyn SearchDispatch>,
    ) -> (Dispatcher, Arc<MergeEngine>) {
        let merge = Arc::new(MergeEngine::new(
            Arc::new(PendingLedger::new()),
            Arc::new(ConversationHistory::new()),
        ));
        let (_tx, connection) = watch::channel(ConnectionState::default());
        let dispatcher = Dispatcher::new(DispatcherParts {
            policy: Arc::new(KeywordPolicy::default()),
            model,
            search,
            merge: Arc::clone(&merge),
            connection,
            ttl: Duration::from_secs(30),
        });
        (dispatcher, merge)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn keyword_policy_routes() {
        let policy = KeywordPolicy::default();
        assert_eq!(policy.classify("Search for rust async"), Route::Search);
        assert_eq!(policy.classify("can you LOOK UP tokio"), Route::Search);
        assert_eq!(policy.classify("please retrieve the docs"), Route::Search);
        assert_eq!(policy.classify("hello there"), Route::Direct);
        assert_eq!(policy.classify(""), Route::Direct);
    }

    #[test]
    fn custom_keywords() {
        let policy = KeywordPolicy::with_keywords(["Query"]);
        assert_eq!(policy.classify("query the index"), Route::Search);
        assert_eq!(policy.classify("search"), Route::Direct);
    }

    #[tokio::test]
    async fn direct_route_appends_reply() {
        let (dispatcher, merge) = dispatcher(Arc::new(EchoModel), Arc::new(RecordingSearch::default()));
        let outcome = dispatcher.submit("hello", "gpt-4").await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Replied);

        let entries = merge.history().snapshot();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].role, Role::User);
        assert_eq!(entries[1].content, "gpt-4:1:hello");
        assert!(merge.ledger().is_empty());
    }

    #[tokio::test]
    async fn direct_route_error_is_returned_not_appended() {
        let (dispatcher, merge) = dispatcher(Arc::new(FailingModel), Arc::new(RecordingSearch::default()));
        assert_matches!(
            dispatcher.submit("hello", "gpt-4").await,
            Err(DispatchError::Llm(LlmError::Auth { .. }))
        );
        assert_eq!(merge.history().len(), 1);
    }

    #[tokio::test]
    async fn empty_message_is_rejected() {
        let (dispatcher, merge) = dispatcher(Arc::new(EchoModel), Arc::new(RecordingSearch::default()));
        assert_matches!(dispatcher.submit("   ", "gpt-4").await, Err(DispatchError::EmptyMessage));
        assert!(merge.history().is_empty());
    }

    #[tokio::test]
    async fn search_route_registers_and_appends_placeholder() {
        let search = Arc::new(RecordingSearch {
            ack: Some(ConversationId::from("conv-1")),
            ..RecordingSearch::default()
        });
        let (dispatcher, merge) = dispatcher(Arc::new(EchoModel), search.clone());
        let _ = merge
            .history()
            .append(ConversationEntry::complete(Role::User, "earlier"));

        let outcome = dispatcher.submit("search rust", "gpt-4").await.unwrap();
        let DispatchOutcome::Pending(id) = outcome else {
            panic!("expected pending outcome");
        };

        let entries = merge.history().snapshot();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].content, "search rust");
        assert_eq!(entries[2].content, SEARCH_PLACEHOLDER);
        assert_eq!(entries[2].status, EntryStatus::Pending);
        assert!(entries[2].is_anchored_to(&id));
        assert_eq!(merge.ledger().lookup(&id).unwrap().original_message, "search rust");

        settle().await;
        let sent = search.sent.lock().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].correlation_id, id);
        assert_eq!(sent[0].context, vec![ChatTurn::new(Role::User, "earlier")]);
        assert_eq!(dispatcher.conversation_id(), Some(ConversationId::from("conv-1")));
    }

    #[tokio::test]
    async fn later_searches_carry_conversation_id() {
        let search = Arc::new(RecordingSearch {
            ack: Some(ConversationId::from("conv-1")),
            ..RecordingSearch::default()
        });
        let (dispatcher, _merge) = dispatcher(Arc::new(EchoModel), search.clone());

        let _ = dispatcher.submit("search one", "gpt-4").await.unwrap();
        settle().await;
        let _ = dispatcher.submit("search two", "gpt-4").await.unwrap();
        settle().await;

        let sent = search.sent.lock().clone();
        assert_eq!(sent[0].conversation_id, None);
        assert_eq!(sent[1].conversation_id, Some(ConversationId::from("conv-1")));

        dispatcher.forget_conversation();
        assert_eq!(dispatcher.conversation_id(), None);
    }

    #[tokio::test]
    async fn ack_after_forget_does_not_restore_conversation() {
        let search = Arc::new(RecordingSearch {
            ack: Some(ConversationId::from("conv-old")),
            ..RecordingSearch::default()
        });
        let (dispatcher, _merge) = dispatcher(Arc::new(EchoModel), search.clone());

        let _ = dispatcher.submit("search before clear", "gpt-4").await.unwrap();
        dispatcher.forget_conversation();
        settle().await;

        assert_eq!(search.sent.lock().len(), 1);
        assert_eq!(dispatcher.conversation_id(), None);
    }

    #[tokio::test]
    async fn rejected_dispatch_fails_placeholder_immediately() {
        let search = Arc::new(RecordingSearch {
            reject: true,
            ..RecordingSearch::default()
        });
        let (dispatcher, merge) = dispatcher(Arc::new(EchoModel), search);

        let _ = dispatcher.submit("find docs", "gpt-4").await.unwrap();
        settle().await;

        let placeholder = merge.history().get(1).unwrap();
        assert_eq!(placeholder.status, EntryStatus::Errored);
        assert_eq!(
            placeholder.content,
            "Search request was rejected: search request rejected (HTTP 400): bad query"
        );
        assert!(merge.ledger().is_empty());
    }
}
