//! The remote tool capability boundary.

use async_trait::async_trait;
use serde_json::Value;

use crate::registry::RemoteTool;

/// One typed content item from a tool response.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentItem {
    Text { text: String },
    Image { mime_type: String, data: String },
    Error { message: String },
}

/// Result of one remote tool invocation.
#[derive(Debug, Clone, Default)]
pub struct ToolCallOutcome {
    pub is_error: bool,
    pub content_items: Vec<ContentItem>,
    pub metadata: Option<Value>,
}

impl ToolCallOutcome {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            is_error: false,
            content_items: vec![ContentItem::Text { text: text.into() }],
            metadata: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            is_error: true,
            content_items: vec![ContentItem::Error {
                message: message.into(),
            }],
            metadata: None,
        }
    }
}

/// MCP-style list/call capability over some transport.
#[async_trait]
pub trait RemoteToolClient: Send + Sync {
    /// Enumerate the tools a server exposes.
    async fn list_tools(&self, server: &str) -> anyhow::Result<Vec<RemoteTool>>;

    /// Invoke one tool. Transport failures are `Err`; tool-reported
    /// failures come back as an outcome with `is_error` set.
    async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: &Value,
    ) -> anyhow::Result<ToolCallOutcome>;
}
