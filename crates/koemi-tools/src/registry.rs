//! Tool registry: name -> owning server plus per-protocol formatting.

use std::collections::HashMap;

use serde_json::{Value, json};
use tracing::{debug, warn};

use koemi_core::error::{KoemiError, Result};

use crate::calls::CallerMode;
use crate::client::RemoteToolClient;

/// A tool as advertised by a remote server.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

struct Registered {
    tool: RemoteTool,
    server: String,
}

/// Tools keyed by name. Registration order is preserved so formatted
/// tool lists are deterministic.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Registered>,
    by_name: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one tool under its owning server. A duplicate name is
    /// ignored with a warning; the first registration wins.
    pub fn register(&mut self, server: &str, tool: RemoteTool) {
        if self.by_name.contains_key(&tool.name) {
            warn!(tool = %tool.name, server, "Duplicate tool name, keeping earlier registration");
            return;
        }
        self.by_name.insert(tool.name.clone(), self.tools.len());
        self.tools.push(Registered {
            tool,
            server: server.to_string(),
        });
    }

    /// Populate from the given servers via the remote capability.
    pub async fn load_from(
        &mut self,
        client: &dyn RemoteToolClient,
        servers: &[String],
    ) -> Result<()> {
        for server in servers {
            let tools = client
                .list_tools(server)
                .await
                .map_err(|e| KoemiError::Tool(format!("listing tools on {server}: {e}")))?;
            debug!(server, count = tools.len(), "Registered remote tools");
            for tool in tools {
                self.register(server, tool);
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn get(&self, name: &str) -> Option<&RemoteTool> {
        self.by_name.get(name).map(|&i| &self.tools[i].tool)
    }

    /// The server owning the named tool.
    pub fn server_for(&self, name: &str) -> Option<&str> {
        self.by_name.get(name).map(|&i| self.tools[i].server.as_str())
    }

    /// Render the registered tools in the shape the target protocol
    /// expects. `Prompt` mode has no schema list; use [`prompt_block`].
    ///
    /// [`prompt_block`]: ToolRegistry::prompt_block
    pub fn formatted_tools(&self, mode: CallerMode) -> Vec<Value> {
        match mode {
            CallerMode::NativeFunctions => self
                .tools
                .iter()
                .map(|r| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": r.tool.name,
                            "description": r.tool.description,
                            "parameters": r.tool.input_schema,
                        }
                    })
                })
                .collect(),
            CallerMode::NativeBlocks => self
                .tools
                .iter()
                .map(|r| {
                    json!({
                        "name": r.tool.name,
                        "description": r.tool.description,
                        "input_schema": r.tool.input_schema,
                    })
                })
                .collect(),
            CallerMode::Prompt => Vec::new(),
        }
    }

    /// The tool-description block appended to the system prompt when the
    /// model has no structured function-calling support.
    pub fn prompt_block(&self) -> String {
        if self.tools.is_empty() {
            return String::new();
        }
        let mut out = String::from(
            "You can use the following tools. To call a tool, reply with a JSON object \
             of the form {\"mcp_server\": \"<server>\", \"tool\": \"<name>\", \"arguments\": {...}} \
             and nothing else on that line.\n\nAvailable tools:\n",
        );
        for r in &self.tools {
            out.push_str(&format!(
                "- {} (server: {}): {}\n  Input schema: {}\n",
                r.tool.name, r.server, r.tool.description, r.tool.input_schema
            ));
        }
        out
    }
}
