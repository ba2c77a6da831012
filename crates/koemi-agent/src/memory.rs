//! Conversation memory with interrupt repair.

use tracing::debug;

use koemi_core::config::InterruptRole;
use koemi_core::types::{ChatRole, MemoryEntry};

const INTERRUPT_MARKER: &str = "[Interrupted by user]";

/// Per-session conversation memory.
///
/// Append-only within a turn, except for the repair performed when the
/// user cuts a response short.
#[derive(Debug, Default)]
pub struct Memory {
    entries: Vec<MemoryEntry>,
    interrupt_handled: bool,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the contents wholesale, e.g. when restoring a session.
    pub fn load(&mut self, entries: Vec<MemoryEntry>) {
        self.entries = entries;
    }

    pub fn entries(&self) -> &[MemoryEntry] {
        &self.entries
    }

    /// Re-arm interrupt handling. Called once at the start of each turn.
    pub fn begin_turn(&mut self) {
        self.interrupt_handled = false;
    }

    /// Append an entry. Empty assistant text and a repeat of the last
    /// entry are both dropped.
    pub fn add(&mut self, entry: MemoryEntry) {
        if entry.role == ChatRole::Assistant && entry.content.trim().is_empty() {
            return;
        }
        if let Some(last) = self.entries.last()
            && last.role == entry.role
            && last.content == entry.content
        {
            debug!(role = last.role.as_str(), "Skipping duplicate memory entry");
            return;
        }
        self.entries.push(entry);
    }

    /// Repair memory after the user interrupted the response.
    ///
    /// The in-progress assistant entry is truncated to what the user
    /// actually heard, then a marker entry records the interruption.
    /// Idempotent per turn; the second call in one turn is a no-op.
    pub fn handle_interrupt(&mut self, heard: &str, role: InterruptRole) {
        if self.interrupt_handled {
            return;
        }
        self.interrupt_handled = true;

        let truncated = format!("{heard}...");
        match self.entries.last_mut() {
            Some(last) if last.role == ChatRole::Assistant => {
                last.content = truncated;
            }
            _ => {
                self.entries
                    .push(MemoryEntry::new(ChatRole::Assistant, truncated));
            }
        }

        let marker_role = match role {
            InterruptRole::System => ChatRole::System,
            InterruptRole::User => ChatRole::User,
        };
        self.entries
            .push(MemoryEntry::new(marker_role, INTERRUPT_MARKER));
    }
}
