//! Conversation timeline types.
//!
//! The history is append-only. An asynchronous turn is appended as a
//! placeholder whose `anchor` names the correlation ID it waits for; when the
//! result (or a failure) arrives, only the placeholder's `content` and
//! `status` change. Its position never does.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::CorrelationId;

/// Who authored a conversation entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The human user.
    User,
    /// The assistant (LLM reply or merged search result).
    Assistant,
    /// Out-of-band system notice.
    System,
}

impl Role {
    /// Wire name used by chat-completion APIs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a conversation entry's content.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Final content written at append time (user turns, direct replies).
    Complete,
    /// Placeholder waiting for its anchored result.
    Pending,
    /// The anchored search returned results.
    Fulfilled,
    /// No result arrived before the deadline.
    TimedOut,
    /// The search was rejected or failed remotely.
    Errored,
}

impl EntryStatus {
    /// Whether the entry can still be rewritten by a merge.
    #[must_use]
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// One element of the ordered conversation timeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationEntry {
    /// Author of the entry.
    pub role: Role,
    /// Rendered text.
    pub content: String,
    /// Correlation ID this placeholder is waiting for, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor: Option<CorrelationId>,
    /// Content lifecycle.
    pub status: EntryStatus,
    /// When the entry was appended.
    pub created_at: DateTime<Utc>,
    /// Query text for search turns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_query: Option<String>,
}

impl ConversationEntry {
    /// A finished entry with no anchor.
    #[must_use]
    pub fn complete(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            anchor: None,
            status: EntryStatus::Complete,
            created_at: Utc::now(),
            search_query: None,
        }
    }

    /// An assistant placeholder anchored to `anchor`.
    #[must_use]
    pub fn placeholder(
        anchor: CorrelationId,
        content: impl Into<String>,
        search_query: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            anchor: Some(anchor),
            status: EntryStatus::Pending,
            created_at: Utc::now(),
            search_query: Some(search_query.into()),
        }
    }

    /// Whether this entry is anchored to `id`.
    #[must_use]
    pub fn is_anchored_to(&self, id: &CorrelationId) -> bool {
        self.anchor.as_ref() == Some(id)
    }
}
