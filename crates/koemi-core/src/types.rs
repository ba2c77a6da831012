use serde::{Deserialize, Serialize};

/// Role of a conversation memory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

/// One record of conversation memory.
///
/// Append-only within a turn, except for the interrupt repair performed
/// by the agent when the user cuts a response short.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub role: ChatRole,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl MemoryEntry {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
            avatar: None,
        }
    }
}

/// Where a text input came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextSource {
    Input,
    Clipboard,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextInput {
    pub source: TextSource,
    pub content: String,
}

/// An image attached to a user turn, carried as a `data:` URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageInput {
    pub data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl ImageInput {
    /// Whether `data` is a data URL we can forward to a model.
    pub fn is_data_url(&self) -> bool {
        self.data.starts_with("data:image")
    }
}

/// One user turn: texts from one or more sources plus optional images.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchInput {
    pub texts: Vec<TextInput>,
    pub images: Vec<ImageInput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl BatchInput {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            texts: vec![TextInput {
                source: TextSource::Input,
                content: text.into(),
            }],
            images: Vec::new(),
            metadata: None,
        }
    }

    /// Whether the caller asked for this turn to stay out of memory.
    pub fn skip_memory(&self) -> bool {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("skip_memory"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// A tool call exactly as a model protocol delivered it.
///
/// Function-calling APIs send arguments as a JSON-encoded string;
/// block-style APIs send them already structured. Normalization into a
/// single shape happens in one dedicated parse step downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "style", rename_all = "snake_case")]
pub enum WireToolCall {
    Function {
        id: String,
        name: String,
        arguments: String,
    },
    Block {
        id: String,
        name: String,
        input: serde_json::Value,
    },
}

impl WireToolCall {
    pub fn id(&self) -> &str {
        match self {
            WireToolCall::Function { id, .. } | WireToolCall::Block { id, .. } => id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            WireToolCall::Function { name, .. } | WireToolCall::Block { name, .. } => name,
        }
    }
}

/// Text prepared for on-screen display, with optional speaker identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplayText {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl DisplayText {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            name: None,
            avatar: None,
        }
    }
}

/// Avatar actions extracted from a sentence (expression indices).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Actions {
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub expressions: Vec<u32>,
}

/// One fully transformed output unit: what to show, what to speak,
/// and which avatar actions to trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentenceOutput {
    pub display: DisplayText,
    pub tts: String,
    pub actions: Actions,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_input_from_text() {
        let input = BatchInput::from_text("hello");
        assert_eq!(input.texts.len(), 1);
        assert_eq!(input.texts[0].content, "hello");
        assert!(input.images.is_empty());
        assert!(!input.skip_memory());
    }

    #[test]
    fn skip_memory_metadata() {
        let mut input = BatchInput::from_text("hi");
        input.metadata = Some(serde_json::json!({ "skip_memory": true }));
        assert!(input.skip_memory());
    }

    #[test]
    fn image_data_url_check() {
        let img = ImageInput {
            data: "data:image/png;base64,AAAA".into(),
            mime_type: None,
        };
        assert!(img.is_data_url());
        let bad = ImageInput {
            data: "/tmp/cat.png".into(),
            mime_type: None,
        };
        assert!(!bad.is_data_url());
    }
}
