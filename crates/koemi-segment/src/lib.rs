//! Incremental sentence segmentation with nested semantic-tag tracking.
//!
//! Model output arrives as a token stream that may embed semantic tags
//! like `<think>...</think>`. The [`SentenceDivider`] turns that stream
//! into complete speakable sentence units, each annotated with the tags
//! currently enclosing it, so downstream display and TTS stages can
//! treat tagged content differently.

use serde::{Deserialize, Serialize};

pub mod boundary;
pub mod divider;

pub use divider::{DividerInput, DividerItem, SentenceDivider, divide_stream};

/// Position of a tag occurrence relative to its span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagState {
    /// `<tag>`
    Start,
    /// Text between `<tag>` and `</tag>`.
    Inside,
    /// `</tag>`
    End,
    /// `<tag/>`
    SelfClosing,
    /// No enclosing tag.
    None,
}

/// A named tag with its state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub state: TagState,
}

impl Tag {
    pub fn new(name: impl Into<String>, state: TagState) -> Self {
        Self {
            name: name.into(),
            state,
        }
    }

    /// Placeholder for untagged text, so `SentenceUnit::tags` is never empty.
    pub fn none() -> Self {
        Self {
            name: String::new(),
            state: TagState::None,
        }
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.state {
            TagState::None => write!(f, "none"),
            TagState::Start => write!(f, "{}:start", self.name),
            TagState::Inside => write!(f, "{}:inside", self.name),
            TagState::End => write!(f, "{}:end", self.name),
            TagState::SelfClosing => write!(f, "{}:self", self.name),
        }
    }
}

/// One segmentation result: a complete sentence (or final fragment)
/// annotated with its enclosing tags, or a standalone tag boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentenceUnit {
    pub text: String,
    /// Enclosing tags, outermost first. Never empty: untagged text
    /// carries a single [`Tag::none`] entry.
    pub tags: Vec<Tag>,
}

impl SentenceUnit {
    pub fn new(text: impl Into<String>, tags: Vec<Tag>) -> Self {
        let tags = if tags.is_empty() {
            vec![Tag::none()]
        } else {
            tags
        };
        Self {
            text: text.into(),
            tags,
        }
    }

    /// Whether this unit is a tag boundary rather than sentence text.
    pub fn is_tag_boundary(&self) -> bool {
        self.tags.iter().any(|t| {
            matches!(
                t.state,
                TagState::Start | TagState::End | TagState::SelfClosing
            )
        })
    }

    /// Whether any enclosing or boundary tag has the given name.
    pub fn has_tag(&self, name: &str) -> bool {
        self.tags
            .iter()
            .any(|t| t.name == name && t.state != TagState::None)
    }
}
