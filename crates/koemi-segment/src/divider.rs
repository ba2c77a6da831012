//! The incremental sentence divider.
//!
//! One divider instance owns the buffer and tag stack for a single
//! conversational turn. Text chunks are appended and drained into
//! [`SentenceUnit`]s; out-of-band control payloads pass through the
//! stream adapter untouched, flushing formed sentences first so
//! relative ordering is preserved.

use futures::{Stream, StreamExt};
use tracing::{debug, warn};

use koemi_core::config::{AgentConfig, SegmentMethod};

use crate::boundary;
use crate::{SentenceUnit, Tag, TagState};

/// Input to the stream adapter: model text or an opaque control payload.
#[derive(Debug, Clone)]
pub enum DividerInput {
    Text(String),
    Control(serde_json::Value),
}

/// Output of the stream adapter.
#[derive(Debug, Clone)]
pub enum DividerItem {
    Sentence(SentenceUnit),
    Control(serde_json::Value),
}

/// A located tag occurrence in the buffer.
struct TagHit {
    pos: usize,
    len: usize,
    name: String,
    state: TagState,
}

/// Stateful segmenter for one conversational turn.
pub struct SentenceDivider {
    faster_first_response: bool,
    segment_method: SegmentMethod,
    valid_tags: Vec<String>,
    buffer: String,
    tag_stack: Vec<Tag>,
    first_sentence: bool,
}

impl SentenceDivider {
    pub fn new(
        faster_first_response: bool,
        segment_method: SegmentMethod,
        valid_tags: Vec<String>,
    ) -> Self {
        Self {
            faster_first_response,
            segment_method,
            valid_tags,
            buffer: String::new(),
            tag_stack: Vec::new(),
            first_sentence: true,
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(
            config.faster_first_response,
            config.segment_method,
            config.valid_tags.clone(),
        )
    }

    /// Reset for a new turn.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.tag_stack.clear();
        self.first_sentence = true;
    }

    /// Currently open tags, outermost first, reported as `Inside`.
    fn current_tags(&self) -> Vec<Tag> {
        self.tag_stack
            .iter()
            .map(|t| Tag::new(&t.name, TagState::Inside))
            .collect()
    }

    /// Append a chunk and drain whatever complete units it unlocks.
    pub fn push_chunk(&mut self, chunk: &str) -> Vec<SentenceUnit> {
        self.buffer.push_str(chunk);
        self.drain_ready()
    }

    /// Earliest occurrence of any configured tag pattern in the buffer.
    fn find_next_tag(&self) -> Option<TagHit> {
        let mut best: Option<TagHit> = None;
        for name in &self.valid_tags {
            let patterns = [
                (format!("<{name}/>"), TagState::SelfClosing),
                (format!("<{name}>"), TagState::Start),
                (format!("</{name}>"), TagState::End),
            ];
            for (pattern, state) in patterns {
                if let Some(pos) = self.buffer.find(&pattern) {
                    if best.as_ref().is_none_or(|b| pos < b.pos) {
                        best = Some(TagHit {
                            pos,
                            len: pattern.len(),
                            name: name.clone(),
                            state,
                        });
                    }
                }
            }
        }
        best
    }

    /// Update the tag stack for an extracted tag occurrence.
    fn apply_tag(&mut self, hit: &TagHit) {
        match hit.state {
            TagState::Start => self.tag_stack.push(Tag::new(&hit.name, TagState::Start)),
            TagState::End => {
                if self.tag_stack.last().map(|t| t.name.as_str()) == Some(hit.name.as_str()) {
                    self.tag_stack.pop();
                } else {
                    warn!(tag = %hit.name, "Mismatched closing tag, ignoring");
                }
            }
            TagState::SelfClosing | TagState::Inside | TagState::None => {}
        }
    }

    /// Drain the buffer, emitting every unit that is complete so far.
    pub fn drain_ready(&mut self) -> Vec<SentenceUnit> {
        let mut out = Vec::new();

        loop {
            if self.buffer.trim().is_empty() {
                break;
            }

            match self.find_next_tag() {
                Some(hit) if self.buffer[..hit.pos].trim().is_empty() => {
                    // Tag at the effective start of the buffer.
                    let consumed = hit.pos + hit.len;
                    let raw = self.buffer[..consumed].trim().to_string();
                    let tag = Tag::new(&hit.name, hit.state);
                    self.apply_tag(&hit);
                    out.push(SentenceUnit::new(raw, vec![tag]));
                    self.buffer = self.buffer[consumed..].trim_start().to_string();
                }
                Some(hit) => {
                    // Text precedes the tag; the tag is a hard boundary,
                    // so nothing before it stays buffered.
                    let before = self.buffer[..hit.pos].to_string();
                    let tags = self.current_tags();
                    if boundary::contains_end_punctuation(&before) {
                        let (sentences, rest) = boundary::segment(&before, self.segment_method);
                        for sentence in sentences {
                            if !sentence.trim().is_empty() {
                                out.push(SentenceUnit::new(sentence.trim(), tags.clone()));
                                self.first_sentence = false;
                            }
                        }
                        if !rest.trim().is_empty() {
                            out.push(SentenceUnit::new(rest.trim(), tags));
                        }
                    } else {
                        out.push(SentenceUnit::new(before.trim(), tags));
                    }
                    self.buffer.drain(..hit.pos);
                }
                None => {
                    if self.first_sentence
                        && self.faster_first_response
                        && boundary::contains_comma(&self.buffer)
                    {
                        if let Some((head, tail)) = boundary::split_at_first_comma(&self.buffer) {
                            if !head.trim().is_empty() {
                                let tags = self.current_tags();
                                out.push(SentenceUnit::new(head, tags));
                                self.buffer = tail;
                                self.first_sentence = false;
                                continue;
                            }
                        }
                    }

                    if boundary::contains_end_punctuation(&self.buffer) {
                        let (sentences, rest) = boundary::segment(&self.buffer, self.segment_method);
                        if !sentences.is_empty() {
                            let tags = self.current_tags();
                            for sentence in sentences {
                                if !sentence.trim().is_empty() {
                                    out.push(SentenceUnit::new(sentence.trim(), tags.clone()));
                                }
                            }
                            self.buffer = rest;
                            self.first_sentence = false;
                            continue;
                        }
                    }

                    break;
                }
            }
        }

        out
    }

    /// End of stream: drain, then emit any remainder as a final fragment.
    pub fn flush(&mut self) -> Vec<SentenceUnit> {
        let mut out = self.drain_ready();
        let rest = self.buffer.trim().to_string();
        if !rest.is_empty() {
            debug!(fragment = %rest, "Flushing final fragment");
            out.push(SentenceUnit::new(rest, self.current_tags()));
        }
        self.buffer.clear();
        out
    }

    /// Whether all opened tags have been closed.
    pub fn tag_stack_is_empty(&self) -> bool {
        self.tag_stack.is_empty()
    }
}

/// Adapt a mixed text/control stream into sentence units with control
/// passthrough. Control payloads flush formed sentences first, keeping
/// relative ordering between text-derived units and controls.
pub fn divide_stream<S>(
    mut divider: SentenceDivider,
    input: S,
) -> impl Stream<Item = DividerItem>
where
    S: Stream<Item = DividerInput>,
{
    async_stream::stream! {
        divider.reset();
        futures::pin_mut!(input);
        while let Some(item) = input.next().await {
            match item {
                DividerInput::Text(text) => {
                    for unit in divider.push_chunk(&text) {
                        yield DividerItem::Sentence(unit);
                    }
                }
                DividerInput::Control(payload) => {
                    for unit in divider.drain_ready() {
                        yield DividerItem::Sentence(unit);
                    }
                    yield DividerItem::Control(payload);
                }
            }
        }
        for unit in divider.flush() {
            yield DividerItem::Sentence(unit);
        }
    }
}
