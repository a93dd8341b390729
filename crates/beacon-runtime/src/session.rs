//! The chat session: the one long-lived object the presentation talks to.
//!
//! A session owns the connection manager, the ledger, the history, and the
//! two background loops (receive and timeout sweep). It is built once per
//! process and fetched through [`shared_session`]; the presentation re-reads
//! [`ChatSession::snapshot`] whenever [`ChatSession::subscribe`] reports a
//! new revision.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use beacon_channel::{ChannelConfig, ChannelError, ConnectionManager, ConnectionState, Credentials};
use beacon_core::{ConversationEntry, ConversationId, FailureReason, ResultEnvelope};
use beacon_llm::{ChatModel, OpenAiChatModel, OpenAiConfig};
use beacon_settings::{BeaconSettings, SearchTransport};
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::dispatch::{DispatchOutcome, DispatchPolicy, Dispatcher, DispatcherParts, KeywordPolicy};
use crate::errors::{DispatchError, SessionError};
use crate::history::ConversationHistory;
use crate::ledger::PendingLedger;
use crate::merge::{MergeEngine, MergeOutcome};
use crate::receiver::spawn_receiver;
use crate::search::{ChannelSearchDispatch, HttpSearchDispatch, SearchDispatch, UnconfiguredSearch};
use crate::supervisor::TimeoutSupervisor;

/// Static session parameters.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Result channel parameters.
    pub channel: ChannelConfig,
    /// Credentials for the channel upgrade.
    pub credentials: Credentials,
    /// Pending-search lifetime.
    pub ttl: Duration,
    /// Timeout supervisor tick.
    pub sweep_interval: Duration,
    /// Model used until the user picks another.
    pub default_model: String,
    /// Models the user may switch to.
    pub available_models: Vec<String>,
}

impl SessionConfig {
    /// Derive from loaded settings.
    pub fn from_settings(settings: &BeaconSettings) -> Self {
        let channel = &settings.channel;
        let mut available_models = settings.llm.available_models.clone();
        if !available_models.contains(&settings.llm.default_model) {
            available_models.push(settings.llm.default_model.clone());
        }
        Self {
            channel: ChannelConfig {
                url: channel.url.clone().unwrap_or_default(),
                heartbeat_interval: Duration::from_millis(channel.heartbeat_interval_ms),
                heartbeat_grace: channel.heartbeat_grace,
                connect_timeout: Duration::from_millis(channel.connect_timeout_ms),
                outbound_buffer: channel.outbound_buffer,
                backoff: channel.backoff.clone(),
            },
            credentials: Credentials {
                api_key: channel.api_key.clone(),
            },
            ttl: Duration::from_millis(settings.search.ttl_ms),
            sweep_interval: Duration::from_millis(settings.supervisor.sweep_interval_ms),
            default_model: settings.llm.default_model.clone(),
            available_models,
        }
    }
}

/// Pluggable collaborators.
pub struct SessionParts {
    /// Direct-reply model.
    pub model: Arc<dyn ChatModel>,
    /// Outbound search path.
    pub search: Arc<dyn SearchDispatch>,
    /// Routing decision.
    pub policy: Arc<dyn DispatchPolicy>,
}

/// Immutable view handed to the presentation.
#[derive(Clone, Debug)]
pub struct SessionSnapshot {
    /// Conversation in order.
    pub entries: Vec<ConversationEntry>,
    /// Result channel state.
    pub connection: ConnectionState,
    /// Outstanding searches.
    pub pending: usize,
    /// History revision the entries were read at.
    pub revision: u64,
    /// Current model.
    pub model: String,
    /// Remote conversation handle, if issued.
    pub conversation_id: Option<ConversationId>,
}

/// A single user's chat session.
pub struct ChatSession {
    manager: Arc<ConnectionManager>,
    credentials: Credentials,
    merge: Arc<MergeEngine>,
    dispatcher: Dispatcher,
    model: RwLock<String>,
    available_models: Vec<String>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ChatSession {
    /// Build a session and start its background loops.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        config: SessionConfig,
        manager: Arc<ConnectionManager>,
        parts: SessionParts,
    ) -> Arc<Self> {
        let ledger = Arc::new(PendingLedger::new());
        let history = Arc::new(ConversationHistory::new());
        let merge = Arc::new(MergeEngine::new(ledger, history));
        let cancel = CancellationToken::new();

        let mut tasks = Vec::with_capacity(2);
        match manager.take_frames() {
            Some(frames) => tasks.push(spawn_receiver(frames, Arc::clone(&merge), cancel.child_token())),
            None => warn!("frame receiver already taken; results will not be merged"),
        }
        tasks.push(
            TimeoutSupervisor::new(Arc::clone(&merge), config.sweep_interval)
                .spawn(cancel.child_token()),
        );

        let dispatcher = Dispatcher::new(DispatcherParts {
            policy: parts.policy,
            model: parts.model,
            search: parts.search,
            merge: Arc::clone(&merge),
            connection: manager.subscribe(),
            ttl: config.ttl,
        });

        info!(
            model = %config.default_model,
            ttl_ms = config.ttl.as_millis(),
            "chat session started"
        );
        Arc::new(Self {
            manager,
            credentials: config.credentials,
            merge,
            dispatcher,
            model: RwLock::new(config.default_model),
            available_models: config.available_models,
            cancel,
            tasks: Mutex::new(tasks),
        })
    }

    /// Build the production session from settings.
    pub fn from_settings(settings: &BeaconSettings) -> Arc<Self> {
        let config = SessionConfig::from_settings(settings);
        let manager = Arc::new(ConnectionManager::new(config.channel.clone()));

        let search: Arc<dyn SearchDispatch> = match settings.search.transport {
            SearchTransport::Channel => Arc::new(ChannelSearchDispatch::new(Arc::clone(&manager))),
            SearchTransport::Http => match HttpSearchDispatch::from_settings(&settings.search) {
                Some(http) => Arc::new(http),
                None => {
                    warn!("no search endpoint configured; search requests will be refused");
                    Arc::new(UnconfiguredSearch)
                }
            },
        };

        let parts = SessionParts {
            model: Arc::new(OpenAiChatModel::new(OpenAiConfig::from(&settings.llm))),
            search,
            policy: Arc::new(KeywordPolicy::default()),
        };
        Self::start(config, manager, parts)
    }

    // ─── Connection ──────────────────────────────────────────────────────

    /// Open the result channel.
    ///
    /// Failures are reported through the returned error and the connection
    /// state's `last_error`; the conversation is never touched.
    pub async fn connect(&self) -> Result<(), ChannelError> {
        if self.manager.state().is_active() {
            warn!("already connected to the result channel");
            return Ok(());
        }
        self.manager.connect(self.credentials.clone()).await
    }

    /// Close the result channel and fail every outstanding search.
    ///
    /// Returns how many placeholders were failed.
    pub async fn disconnect(&self) -> usize {
        self.manager.disconnect().await;
        let failed = self.fail_pending(&FailureReason::Disconnected);
        info!(failed, "session disconnected");
        failed
    }

    fn fail_pending(&self, reason: &FailureReason) -> usize {
        self.merge
            .ledger()
            .ids()
            .into_iter()
            .filter_map(|id| {
                self.merge
                    .merge(ResultEnvelope::failure(id, reason.clone()))
                    .ok()
            })
            .filter(|outcome| matches!(outcome, MergeOutcome::Applied { .. }))
            .count()
    }

    /// Current channel state.
    pub fn connection_state(&self) -> ConnectionState {
        self.manager.state()
    }

    /// Watch channel state transitions.
    pub fn connection(&self) -> watch::Receiver<ConnectionState> {
        self.manager.subscribe()
    }

    // ─── Conversation ────────────────────────────────────────────────────

    /// Submit a user message.
    pub async fn submit(&self, text: &str) -> Result<DispatchOutcome, DispatchError> {
        let model = self.model.read().clone();
        self.dispatcher.submit(text, &model).await
    }

    /// Consistent view for rendering.
    pub fn snapshot(&self) -> SessionSnapshot {
        let history = self.merge.history();
        let revision = history.revision();
        SessionSnapshot {
            entries: history.snapshot(),
            connection: self.manager.state(),
            pending: self.merge.ledger().len(),
            revision,
            model: self.model.read().clone(),
            conversation_id: self.dispatcher.conversation_id(),
        }
    }

    /// Watch history revisions.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.merge.history().subscribe()
    }

    /// Empty the conversation, drop outstanding searches silently, and
    /// forget the remote conversation handle. Returns how many searches
    /// were dropped.
    pub fn clear(&self) -> usize {
        let dropped = self.merge.ledger().drain().len();
        self.merge.history().clear();
        self.dispatcher.forget_conversation();
        info!(dropped, "conversation cleared");
        dropped
    }

    /// Remote conversation handle, if issued.
    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.dispatcher.conversation_id()
    }

    // ─── Model selection ─────────────────────────────────────────────────

    /// Current model.
    pub fn model(&self) -> String {
        self.model.read().clone()
    }

    /// Models the user may pick.
    pub fn available_models(&self) -> &[String] {
        &self.available_models
    }

    /// Switch model.
    pub fn set_model(&self, name: &str) -> Result<(), SessionError> {
        let name = name.trim();
        if !self.available_models.iter().any(|m| m == name) {
            return Err(SessionError::UnknownModel {
                name: name.to_string(),
                available: self.available_models.join(", "),
            });
        }
        *self.model.write() = name.to_string();
        info!(model = name, "model changed");
        Ok(())
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Stop background loops and close the channel.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.manager.disconnect().await;
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
        info!("chat session stopped");
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

static SESSION: OnceLock<Arc<ChatSession>> = OnceLock::new();

/// The process-wide session, created on first call.
///
/// Later calls ignore `settings` and return the same session.
pub fn shared_session(settings: &BeaconSettings) -> Arc<ChatSession> {
    Arc::clone(SESSION.get_or_init(|| ChatSession::from_settings(settings)))
}
