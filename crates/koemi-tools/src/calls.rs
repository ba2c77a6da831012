//! Normalized tool calls and the wire-format parsing that produces them.
//!
//! All format sniffing lives here; downstream code only ever sees
//! [`ToolCall`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use koemi_core::types::WireToolCall;

/// Where a call came from on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallFormat {
    /// OpenAI-style function call with a JSON-string argument payload.
    NativeFunctionCall,
    /// Claude-style structured block with an already-parsed input object.
    NativeStructuredBlock,
    /// JSON object embedded in plain model text (prompt-mode fallback).
    PromptEmbeddedJson,
}

/// Which protocol shape tool results must take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallerMode {
    /// Typed content blocks with `tool_use_id` (Claude-style).
    NativeBlocks,
    /// `role: "tool"` messages with string content (OpenAI-style).
    NativeFunctions,
    /// Plain result strings folded back into the prompt.
    Prompt,
}

/// A tool call normalized from any wire shape.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
    pub source: ToolCallFormat,
}

/// A not-yet-parsed call as the interaction loop collected it.
#[derive(Debug, Clone)]
pub enum RawToolCall {
    Wire(WireToolCall),
    PromptJson(Value),
}

/// Parse failure for one call. Carries whatever identity was recoverable
/// so the error result can still name the tool.
#[derive(Debug, Clone)]
pub struct CallParseError {
    pub id: String,
    pub name: String,
    pub message: String,
}

/// Normalize one raw call. `index` synthesizes ids for prompt-embedded
/// calls, which carry none of their own.
pub fn parse_raw(index: usize, raw: &RawToolCall) -> Result<ToolCall, CallParseError> {
    match raw {
        RawToolCall::Wire(WireToolCall::Function {
            id,
            name,
            arguments,
        }) => {
            if name.is_empty() {
                return Err(CallParseError {
                    id: id.clone(),
                    name: String::new(),
                    message: "function call is missing a tool name".to_string(),
                });
            }
            let trimmed = arguments.trim();
            let arguments = if trimmed.is_empty() {
                Value::Object(Default::default())
            } else {
                serde_json::from_str(trimmed).map_err(|e| CallParseError {
                    id: id.clone(),
                    name: name.clone(),
                    message: format!("malformed arguments JSON: {e}"),
                })?
            };
            Ok(ToolCall {
                id: id.clone(),
                name: name.clone(),
                arguments,
                source: ToolCallFormat::NativeFunctionCall,
            })
        }
        RawToolCall::Wire(WireToolCall::Block { id, name, input }) => {
            if name.is_empty() {
                return Err(CallParseError {
                    id: id.clone(),
                    name: String::new(),
                    message: "tool-use block is missing a tool name".to_string(),
                });
            }
            Ok(ToolCall {
                id: id.clone(),
                name: name.clone(),
                arguments: input.clone(),
                source: ToolCallFormat::NativeStructuredBlock,
            })
        }
        RawToolCall::PromptJson(value) => {
            let id = format!("prompt_tool_{index}");
            let name = value
                .get("tool")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if name.is_empty() {
                return Err(CallParseError {
                    id,
                    name: String::new(),
                    message: "embedded JSON has no \"tool\" field".to_string(),
                });
            }
            let arguments = value
                .get("arguments")
                .cloned()
                .unwrap_or_else(|| Value::Object(Default::default()));
            Ok(ToolCall {
                id,
                name,
                arguments,
                source: ToolCallFormat::PromptEmbeddedJson,
            })
        }
    }
}
