//! Conversational agent for a real-time character backend.
//!
//! [`ChatAgent`] runs one user turn at a time: it streams a model
//! completion, executes any tool calls (native function-calling or the
//! prompt-embedded fallback), and pipes the text through sentence
//! division, action extraction, display shaping, and TTS filtering into
//! a stream of [`ChatItem`]s ready for the surrounding transport.

pub mod agent;
pub mod memory;
pub mod pipeline;

mod loops;

pub use agent::ChatAgent;
pub use memory::Memory;
pub use pipeline::{ActionExtractor, Identity, filter_text};

use koemi_core::types::SentenceOutput;

/// One output item of a conversation turn.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatItem {
    /// A renderable sentence: display text, speakable text, actions.
    Sentence(SentenceOutput),
    /// An out-of-band payload (e.g. a tool status event) to relay as-is.
    Control(serde_json::Value),
}
