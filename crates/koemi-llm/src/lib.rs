//! Streaming model-completion capability.
//!
//! The interaction loop depends only on the [`StreamEvent`] vocabulary
//! defined here, never on a concrete client type. One representative
//! client ([`openai::OpenAiCompatibleClient`]) is provided; further
//! providers implement [`ChatCompletion`] against the same events.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use koemi_core::types::WireToolCall;

pub mod openai;
pub mod sse;

/// One event from a streaming completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Incremental assistant text.
    TextDelta { text: String },

    /// A native tool call has started streaming.
    ToolCallStart { id: String, name: String },

    /// A fragment of a native tool call's argument JSON.
    ToolCallDelta { id: String, partial_json: String },

    /// A native tool call is fully assembled.
    ToolCallComplete { call: WireToolCall },

    /// The model finished this message.
    MessageEnd { stop_reason: Option<String> },

    /// The API rejected the structured tool schemas; the caller should
    /// fall back to prompt-mode tooling for this session.
    ToolsUnsupported,

    /// Transport or API failure. The message is user-presentable.
    Error { message: String },
}

/// Lazy sequence of completion events.
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// The abstract streaming-completion capability.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    /// Model identifier, for logs and error messages.
    fn model(&self) -> &str;

    /// Whether this client speaks a structured function-calling protocol.
    fn supports_native_tools(&self) -> bool;

    /// Stream a completion. Transport failures surface as
    /// [`StreamEvent::Error`] items, never as panics or Err returns.
    async fn stream_completion(
        &self,
        messages: &[serde_json::Value],
        system: &str,
        tools: Option<&[serde_json::Value]>,
    ) -> EventStream;
}
