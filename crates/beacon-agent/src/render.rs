//! Terminal rendering of session snapshots.
//!
//! The render loop only ever sees snapshots. [`Transcript`] remembers what
//! has already been printed so each revision prints only new entries and
//! placeholders that have just settled.

use beacon_channel::{ConnectionState, ConnectionStatus};
use beacon_core::{ConversationEntry, EntryStatus, Role};

fn label(role: Role) -> &'static str {
    match role {
        Role::User => "You",
        Role::Assistant => "Assistant",
        Role::System => "System",
    }
}

/// One entry as a line of output.
pub fn entry_line(entry: &ConversationEntry) -> String {
    format!("{}: {}", label(entry.role), entry.content)
}

/// Connection indicator text.
pub fn status_line(state: &ConnectionState) -> String {
    match state.status {
        ConnectionStatus::Connected => match state.last_heartbeat_at {
            Some(at) => format!("Connected (last heartbeat {})", at.format("%H:%M:%S")),
            None => "Connected".to_string(),
        },
        ConnectionStatus::Reconnecting => {
            format!("Reconnecting (attempt {})", state.retry_attempt)
        }
        ConnectionStatus::Connecting => "Connecting".to_string(),
        ConnectionStatus::Disconnected => match &state.last_error {
            Some(error) => format!("Disconnected: {error}"),
            None => "Disconnected".to_string(),
        },
    }
}

/// Printed-so-far state for the conversation.
#[derive(Debug, Default)]
pub struct Transcript {
    printed: Vec<EntryStatus>,
}

impl Transcript {
    /// Lines to print for `entries`, given everything printed before.
    pub fn update(&mut self, entries: &[ConversationEntry]) -> Vec<String> {
        // history was cleared
        if entries.len() < self.printed.len() {
            self.printed.clear();
        }

        let mut lines = Vec::new();
        for (index, entry) in entries.iter().enumerate() {
            match self.printed.get_mut(index) {
                Some(seen) if seen.is_pending() && !entry.status.is_pending() => {
                    lines.push(entry_line(entry));
                    *seen = entry.status;
                }
                Some(_) => {}
                None => {
                    lines.push(entry_line(entry));
                    self.printed.push(entry.status);
                }
            }
        }
        lines
    }
}
