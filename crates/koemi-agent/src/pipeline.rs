//! Ordered output pipeline: sentence units in, renderable output out.
//!
//! Stages run in a fixed order (action extraction, display shaping,
//! TTS filtering) and every stage passes control payloads through
//! untouched, preserving their position relative to sentences.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use futures::{Stream, StreamExt};
use regex::Regex;
use serde_json::Value;

use koemi_core::config::TtsFilterConfig;
use koemi_core::types::{Actions, DisplayText, SentenceOutput};
use koemi_segment::divider::DividerItem;
use koemi_segment::{SentenceUnit, TagState};

use crate::ChatItem;

/// A sentence unit partway through the pipeline.
#[derive(Debug, Clone)]
pub enum StageItem {
    Sentence {
        unit: SentenceUnit,
        actions: Actions,
        display: String,
        tts: String,
    },
    Control(Value),
}

static EMOTION_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([a-zA-Z_]+)\]").expect("emotion keyword regex"));

/// Maps emotion keywords the model emits (`[joy]`, `[anger]`, ...) to
/// avatar expression indices.
#[derive(Debug, Clone, Default)]
pub struct ActionExtractor {
    map: HashMap<String, u32>,
}

impl ActionExtractor {
    pub fn from_map(map: HashMap<String, u32>) -> Self {
        Self { map }
    }

    /// Strip known emotion keywords from `text`, returning the cleaned
    /// text and the expression indices in order of appearance.
    pub fn extract(&self, text: &str) -> (String, Vec<u32>) {
        if self.map.is_empty() {
            return (text.to_string(), Vec::new());
        }
        let mut expressions = Vec::new();
        let cleaned = EMOTION_KEYWORD.replace_all(text, |caps: &regex::Captures<'_>| {
            let keyword = caps[1].to_lowercase();
            match self.map.get(&keyword) {
                Some(&index) => {
                    expressions.push(index);
                    String::new()
                }
                None => caps[0].to_string(),
            }
        });
        (cleaned.into_owned(), expressions)
    }
}

static BRACKET_SPAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[^\]]*\]").expect("bracket span regex"));
static PAREN_SPAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\([^)]*\)|（[^）]*）").expect("paren span regex"));
static ASTERISK_SPAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*[^*]*\*").expect("asterisk span regex"));
static ANGLE_SPAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("angle span regex"));

/// Punctuation a TTS engine handles fine and should keep.
fn is_speakable_punctuation(c: char) -> bool {
    matches!(
        c,
        '.' | ','
            | '!'
            | '?'
            | ';'
            | ':'
            | '\''
            | '"'
            | '-'
            | '%'
            | '…'
            | '。'
            | '，'
            | '、'
            | '！'
            | '？'
            | '；'
            | '：'
            | '「'
            | '」'
            | '“'
            | '”'
    )
}

/// Strip spans and symbols that read badly when spoken.
pub fn filter_text(text: &str, config: &TtsFilterConfig) -> String {
    let mut out = text.to_string();
    if config.ignore_brackets {
        out = BRACKET_SPAN.replace_all(&out, "").into_owned();
    }
    if config.ignore_parentheses {
        out = PAREN_SPAN.replace_all(&out, "").into_owned();
    }
    if config.ignore_asterisks {
        out = ASTERISK_SPAN.replace_all(&out, "").into_owned();
    }
    if config.ignore_angle_brackets {
        out = ANGLE_SPAN.replace_all(&out, "").into_owned();
    }
    if config.remove_special_char {
        out = out
            .chars()
            .filter(|&c| c.is_alphanumeric() || c.is_whitespace() || is_speakable_punctuation(c))
            .collect();
    }
    out.trim().to_string()
}

/// Stage 2: emotion keywords become expression indices. Tag-boundary
/// units carry no prose and are passed through unextracted.
pub fn extract_actions_stage(
    input: impl Stream<Item = DividerItem>,
    extractor: Arc<ActionExtractor>,
) -> impl Stream<Item = StageItem> {
    input.map(move |item| match item {
        DividerItem::Sentence(unit) => {
            if unit.is_tag_boundary() {
                StageItem::Sentence {
                    unit,
                    actions: Actions::default(),
                    display: String::new(),
                    tts: String::new(),
                }
            } else {
                let (cleaned, expressions) = extractor.extract(&unit.text);
                StageItem::Sentence {
                    unit: SentenceUnit::new(cleaned, unit.tags),
                    actions: Actions { expressions },
                    display: String::new(),
                    tts: String::new(),
                }
            }
        }
        DividerItem::Control(payload) => StageItem::Control(payload),
    })
}

/// Stage 3: display shaping. `<think>` boundaries render as an opening
/// or closing parenthesis; other tag boundaries render nothing.
pub fn display_stage(input: impl Stream<Item = StageItem>) -> impl Stream<Item = StageItem> {
    input.map(|item| match item {
        StageItem::Sentence {
            unit,
            actions,
            tts,
            ..
        } => {
            let display = if unit.is_tag_boundary() {
                match (&unit.tags[0].name[..], unit.tags[0].state) {
                    ("think", TagState::Start) => "(".to_string(),
                    ("think", TagState::End) => ")".to_string(),
                    _ => String::new(),
                }
            } else {
                unit.text.clone()
            };
            StageItem::Sentence {
                unit,
                actions,
                display,
                tts,
            }
        }
        control => control,
    })
}

/// Stage 4: TTS filtering. Thought content is never spoken; everything
/// else goes through [`filter_text`].
pub fn tts_stage(
    input: impl Stream<Item = StageItem>,
    config: TtsFilterConfig,
) -> impl Stream<Item = StageItem> {
    input.map(move |item| match item {
        StageItem::Sentence {
            unit,
            actions,
            display,
            ..
        } => {
            let tts = if unit.has_tag("think") || unit.is_tag_boundary() {
                String::new()
            } else {
                filter_text(&unit.text, &config)
            };
            StageItem::Sentence {
                unit,
                actions,
                display,
                tts,
            }
        }
        control => control,
    })
}

/// Identity attached to displayed sentences.
#[derive(Debug, Clone, Default)]
pub struct Identity {
    pub name: Option<String>,
    pub avatar: Option<String>,
}

/// Compose all stages over the divider's output.
pub fn pipeline(
    input: impl Stream<Item = DividerItem>,
    extractor: Arc<ActionExtractor>,
    tts_config: TtsFilterConfig,
    identity: Identity,
) -> impl Stream<Item = ChatItem> {
    let staged = tts_stage(
        display_stage(extract_actions_stage(input, extractor)),
        tts_config,
    );
    staged.map(move |item| match item {
        StageItem::Sentence {
            actions,
            display,
            tts,
            ..
        } => ChatItem::Sentence(SentenceOutput {
            display: DisplayText {
                text: display,
                name: identity.name.clone(),
                avatar: identity.avatar.clone(),
            },
            tts,
            actions,
        }),
        StageItem::Control(payload) => ChatItem::Control(payload),
    })
}
