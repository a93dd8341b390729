//! The chat-completion seam.

use async_trait::async_trait;
use beacon_core::{ConversationEntry, EntryStatus, Role};
use serde::{Deserialize, Serialize};

use crate::errors::LlmError;

/// One message sent to the model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    /// Author.
    pub role: Role,
    /// Message text.
    pub content: String,
}

impl ChatTurn {
    /// Build a turn.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Turns the model should see for a timeline.
    ///
    /// Placeholders still waiting for a result and local system notices are
    /// left out; merged search results are included so follow-up questions
    /// can refer to them.
    pub fn from_history(entries: &[ConversationEntry]) -> Vec<Self> {
        entries
            .iter()
            .filter(|e| e.role != Role::System && e.status != EntryStatus::Pending)
            .map(|e| Self::new(e.role, e.content.clone()))
            .collect()
    }
}

/// A language model that turns an ordered conversation into one reply.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Complete the conversation with `model`.
    async fn complete(&self, model: &str, turns: &[ChatTurn]) -> Result<String, LlmError>;
}
