//! The conversational agent: memory, loop selection, output pipeline.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use async_stream::stream;
use futures::{Stream, StreamExt, pin_mut};
use serde_json::{Value, json};
use tracing::warn;

use koemi_core::config::{AgentConfig, TtsFilterConfig};
use koemi_core::types::{BatchInput, ChatRole, MemoryEntry};
use koemi_llm::ChatCompletion;
use koemi_segment::{SentenceDivider, divide_stream};
use koemi_tools::ToolExecutor;
use tokio::sync::Mutex;

use crate::ChatItem;
use crate::loops::{LoopContext, interaction_loop};
use crate::memory::Memory;
use crate::pipeline::{ActionExtractor, Identity, pipeline};

/// A per-session conversational agent.
///
/// Holds the session's memory and mode state behind `Arc`s so that the
/// interrupt side channel stays usable while a `chat` stream is live.
pub struct ChatAgent {
    llm: Arc<dyn ChatCompletion>,
    executor: Option<Arc<ToolExecutor>>,
    config: AgentConfig,
    system_prompt: String,
    extractor: Arc<ActionExtractor>,
    tts_filter: TtsFilterConfig,
    name: Option<String>,
    avatar: Option<String>,
    memory: Arc<Mutex<Memory>>,
    prompt_mode: Arc<AtomicBool>,
}

impl ChatAgent {
    pub fn new(llm: Arc<dyn ChatCompletion>, config: AgentConfig, system_prompt: &str) -> Self {
        Self {
            llm,
            executor: None,
            config,
            system_prompt: system_prompt.to_string(),
            extractor: Arc::new(ActionExtractor::default()),
            tts_filter: TtsFilterConfig::default(),
            name: None,
            avatar: None,
            memory: Arc::new(Mutex::new(Memory::new())),
            prompt_mode: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Attach tool execution. The per-call timeout comes from the agent
    /// config.
    pub fn with_executor(mut self, executor: ToolExecutor) -> Self {
        let timeout = Duration::from_secs(self.config.tool_timeout_secs);
        self.executor = Some(Arc::new(executor.with_timeout(timeout)));
        self
    }

    pub fn with_identity(mut self, name: Option<String>, avatar: Option<String>) -> Self {
        self.name = name;
        self.avatar = avatar;
        self
    }

    pub fn with_action_extractor(mut self, extractor: ActionExtractor) -> Self {
        self.extractor = Arc::new(extractor);
        self
    }

    pub fn with_tts_filter(mut self, filter: TtsFilterConfig) -> Self {
        self.tts_filter = filter;
        self
    }

    /// Restore memory, e.g. from a persisted session.
    pub async fn load_memory(&self, entries: Vec<MemoryEntry>) {
        self.memory.lock().await.load(entries);
    }

    pub async fn memory_snapshot(&self) -> Vec<MemoryEntry> {
        self.memory.lock().await.entries().to_vec()
    }

    /// Side channel: the user interrupted the response and heard only
    /// `heard`. Safe to call while a `chat` stream is live.
    pub async fn handle_interrupt(&self, heard: &str) {
        self.memory
            .lock()
            .await
            .handle_interrupt(heard, self.config.interrupt_role);
    }

    /// Run one conversation turn, yielding renderable sentences and
    /// control payloads. Errors surface as spoken text, never panics.
    pub fn chat(&self, input: BatchInput) -> impl Stream<Item = ChatItem> + use<> {
        let ctx = LoopContext {
            llm: Arc::clone(&self.llm),
            executor: self.executor.clone(),
            system_prompt: self.system_prompt.clone(),
            prompt_mode: Arc::clone(&self.prompt_mode),
            memory: Arc::clone(&self.memory),
            char_name: self.name.clone(),
            avatar: self.avatar.clone(),
        };
        let config = self.config.clone();
        let extractor = Arc::clone(&self.extractor);
        let tts_filter = self.tts_filter.clone();
        let identity = Identity {
            name: self.name.clone(),
            avatar: self.avatar.clone(),
        };

        stream! {
            let user_text = input
                .texts
                .iter()
                .map(|t| t.content.as_str())
                .collect::<Vec<_>>()
                .join("\n");

            let mut messages: Vec<Value>;
            {
                let mut memory = ctx.memory.lock().await;
                memory.begin_turn();
                messages = memory.entries().iter().map(entry_to_message).collect();
                if !input.skip_memory() && !user_text.is_empty() {
                    memory.add(MemoryEntry::new(ChatRole::User, user_text.clone()));
                }
            }
            messages.push(build_user_message(&user_text, &input));

            let divider = SentenceDivider::from_config(&config);
            let items = divide_stream(divider, interaction_loop(ctx, messages));
            let output = pipeline(items, extractor, tts_filter, identity);
            pin_mut!(output);
            while let Some(item) = output.next().await {
                yield item;
            }
        }
    }
}

fn entry_to_message(entry: &MemoryEntry) -> Value {
    json!({ "role": entry.role.as_str(), "content": entry.content })
}

/// Wire shape of the new user turn: plain string when text-only,
/// array-of-parts when images ride along.
fn build_user_message(text: &str, input: &BatchInput) -> Value {
    if input.images.is_empty() {
        return json!({ "role": "user", "content": text });
    }
    let mut parts = vec![json!({ "type": "text", "text": text })];
    for image in &input.images {
        if image.is_data_url() {
            parts.push(json!({
                "type": "image_url",
                "image_url": { "url": image.data },
            }));
        } else {
            warn!("Skipping image that is not a data URL");
        }
    }
    json!({ "role": "user", "content": parts })
}
