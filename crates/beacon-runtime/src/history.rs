//! Ordered conversation history.
//!
//! Append-only with respect to position: entries are pushed to the end and
//! never moved or removed individually. The only in-place mutation is
//! [`ConversationHistory::resolve_anchor`], which rewrites a pending
//! placeholder exactly once. Every change bumps a revision published on a
//! watch channel so the presentation can re-render without callbacks.

use beacon_core::{ConversationEntry, CorrelationId, EntryStatus};
use parking_lot::RwLock;
use tokio::sync::watch;

/// The shared conversation timeline.
#[derive(Debug)]
pub struct ConversationHistory {
    entries: RwLock<Vec<ConversationEntry>>,
    revision: watch::Sender<u64>,
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationHistory {
    /// Empty history at revision 0.
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            entries: RwLock::new(Vec::new()),
            revision,
        }
    }

    fn bump(&self) {
        self.revision.send_modify(|r| *r += 1);
    }

    /// Append an entry and return its index.
    pub fn append(&self, entry: ConversationEntry) -> usize {
        let index = {
            let mut entries = self.entries.write();
            entries.push(entry);
            entries.len() - 1
        };
        self.bump();
        index
    }

    /// Overwrite the pending placeholder anchored to `id`.
    ///
    /// Returns the placeholder's index, or `None` when there is no such
    /// placeholder or it is no longer pending.
    pub fn resolve_anchor(
        &self,
        id: &CorrelationId,
        content: String,
        status: EntryStatus,
    ) -> Option<usize> {
        let index = {
            let mut entries = self.entries.write();
            let index = entries
                .iter()
                .rposition(|e| e.is_anchored_to(id) && e.status.is_pending())?;
            let entry = &mut entries[index];
            entry.content = content;
            entry.status = status;
            index
        };
        self.bump();
        Some(index)
    }

    /// Copy of every entry in order.
    pub fn snapshot(&self) -> Vec<ConversationEntry> {
        self.entries.read().clone()
    }

    /// Copy of the entry at `index`.
    pub fn get(&self, index: usize) -> Option<ConversationEntry> {
        self.entries.read().get(index).cloned()
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.entries.write().clear();
        self.bump();
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the history is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Current revision.
    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    /// Watch revision changes.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}
