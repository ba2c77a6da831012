//! The model interaction loop: stream text, execute tools, repeat.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_stream::stream;
use futures::{Stream, StreamExt, pin_mut};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use koemi_core::types::{ChatRole, MemoryEntry, WireToolCall};
use koemi_llm::{ChatCompletion, StreamEvent};
use koemi_segment::divider::DividerInput;
use koemi_tools::{CallerMode, RawToolCall, StreamJsonDetector, ToolEvent, ToolExecutor};

use crate::memory::Memory;

/// Hard cap on model/tool round-trips within one user turn.
const MAX_TOOL_ROUNDS: usize = 10;

/// Everything one turn of the loop needs, cheap to clone into the
/// returned stream.
#[derive(Clone)]
pub(crate) struct LoopContext {
    pub llm: Arc<dyn ChatCompletion>,
    pub executor: Option<Arc<ToolExecutor>>,
    pub system_prompt: String,
    pub prompt_mode: Arc<AtomicBool>,
    pub memory: Arc<Mutex<Memory>>,
    pub char_name: Option<String>,
    pub avatar: Option<String>,
}

impl LoopContext {
    async fn commit_assistant(&self, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        let mut entry = MemoryEntry::new(ChatRole::Assistant, text);
        entry.name = self.char_name.clone();
        entry.avatar = self.avatar.clone();
        self.memory.lock().await.add(entry);
    }

    fn has_tools(&self) -> bool {
        self.executor.as_ref().is_some_and(|e| !e.registry().is_empty())
    }
}

fn wire_call_to_openai(call: &WireToolCall) -> Value {
    match call {
        WireToolCall::Function {
            id,
            name,
            arguments,
        } => json!({
            "id": id,
            "type": "function",
            "function": { "name": name, "arguments": arguments },
        }),
        WireToolCall::Block { id, name, input } => json!({
            "id": id,
            "type": "function",
            "function": { "name": name, "arguments": input.to_string() },
        }),
    }
}

/// What one streamed model round produced.
struct RoundOutcome {
    text: String,
    calls: Vec<WireToolCall>,
    unsupported: bool,
    errored: bool,
}

/// Run rounds of model streaming and tool execution until the model
/// answers without requesting tools. Yields text chunks and control
/// payloads for the downstream pipeline.
pub(crate) fn interaction_loop(
    ctx: LoopContext,
    mut messages: Vec<Value>,
) -> impl Stream<Item = DividerInput> {
    stream! {
        let mut detector = StreamJsonDetector::new();

        for round in 0..MAX_TOOL_ROUNDS {
            let prompt_mode =
                ctx.prompt_mode.load(Ordering::SeqCst) || !ctx.llm.supports_native_tools();
            debug!(round, prompt_mode, "Interaction loop round");

            if prompt_mode && ctx.has_tools() {
                // ---- Prompt-embedded-JSON round ----
                let Some(executor) = ctx.executor.as_ref() else {
                    return;
                };
                let system = format!(
                    "{}\n\n{}",
                    ctx.system_prompt,
                    executor.registry().prompt_block()
                );
                detector.reset();
                let events = ctx.llm.stream_completion(&messages, &system, None).await;
                pin_mut!(events);

                // Brace spans are held back until they either complete
                // as a tool call or turn out to be ordinary text.
                let mut spoken = String::new();
                let mut held = String::new();
                let mut full_text = String::new();
                let mut detected: Vec<Value> = Vec::new();
                let mut errored = false;

                while let Some(event) = events.next().await {
                    match event {
                        StreamEvent::TextDelta { text } => {
                            full_text.push_str(&text);
                            let was_pending = detector.has_pending();
                            let found = detector.process_chunk(&text);
                            if was_pending {
                                held.push_str(&text);
                            } else {
                                // A candidate span starts at the first
                                // brace; prose before it is ordinary
                                // speech even in the same delta.
                                match text.find('{') {
                                    Some(idx) => {
                                        let (speech, span) = text.split_at(idx);
                                        if !speech.is_empty() {
                                            spoken.push_str(speech);
                                            yield DividerInput::Text(speech.to_string());
                                        }
                                        held.push_str(span);
                                    }
                                    None => {
                                        spoken.push_str(&text);
                                        yield DividerInput::Text(text);
                                    }
                                }
                            }
                            if !found.is_empty() {
                                detected = found;
                                break;
                            }
                            if !detector.has_pending() && !held.is_empty() {
                                // The span closed without parsing as a
                                // tool call; it was plain text after all.
                                spoken.push_str(&held);
                                yield DividerInput::Text(std::mem::take(&mut held));
                            }
                        }
                        StreamEvent::Error { message } => {
                            yield DividerInput::Text(message);
                            errored = true;
                            break;
                        }
                        _ => {}
                    }
                }

                if errored {
                    ctx.commit_assistant(&spoken).await;
                    return;
                }

                if detected.is_empty() {
                    // Round finished as plain speech; anything still
                    // held was never a tool call.
                    if !held.is_empty() {
                        spoken.push_str(&held);
                        yield DividerInput::Text(held);
                    }
                    ctx.commit_assistant(&spoken).await;
                    return;
                }

                info!(count = detected.len(), "Detected prompt-embedded tool calls");
                messages.push(json!({ "role": "assistant", "content": full_text }));
                ctx.commit_assistant(&spoken).await;

                let raw: Vec<RawToolCall> =
                    detected.into_iter().map(RawToolCall::PromptJson).collect();
                let exec = executor.execute(raw, CallerMode::Prompt);
                pin_mut!(exec);
                let mut results: Vec<Value> = Vec::new();
                while let Some(event) = exec.next().await {
                    match event {
                        ToolEvent::Final { results: r } => results = r,
                        status => {
                            if let Ok(payload) = serde_json::to_value(&status) {
                                yield DividerInput::Control(payload);
                            }
                        }
                    }
                }
                let combined = results
                    .iter()
                    .map(|v| match v.as_str() {
                        Some(s) => s.to_string(),
                        None => v.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                messages.push(json!({
                    "role": "user",
                    "content": format!("Tool results:\n{combined}"),
                }));
                continue;
            }

            // ---- Structured (or tool-less) round ----
            let tools = if !prompt_mode && ctx.has_tools() {
                ctx.executor
                    .as_ref()
                    .map(|e| e.registry().formatted_tools(CallerMode::NativeFunctions))
            } else {
                None
            };
            let events = ctx
                .llm
                .stream_completion(&messages, &ctx.system_prompt, tools.as_deref())
                .await;
            pin_mut!(events);

            let mut outcome = RoundOutcome {
                text: String::new(),
                calls: Vec::new(),
                unsupported: false,
                errored: false,
            };
            while let Some(event) = events.next().await {
                match event {
                    StreamEvent::TextDelta { text } => {
                        outcome.text.push_str(&text);
                        yield DividerInput::Text(text);
                    }
                    StreamEvent::ToolCallComplete { call } => outcome.calls.push(call),
                    StreamEvent::ToolsUnsupported => {
                        outcome.unsupported = true;
                        break;
                    }
                    StreamEvent::Error { message } => {
                        yield DividerInput::Text(message);
                        outcome.errored = true;
                        break;
                    }
                    StreamEvent::ToolCallStart { .. }
                    | StreamEvent::ToolCallDelta { .. }
                    | StreamEvent::MessageEnd { .. } => {}
                }
            }

            if outcome.errored {
                ctx.commit_assistant(&outcome.text).await;
                return;
            }

            if outcome.unsupported {
                // Permanent per-session switch; the round restarts in
                // prompt mode without consuming a user turn, and prompt
                // rounds never pass schemas so the sentinel cannot recur.
                info!(model = ctx.llm.model(), "Model rejected structured tools, switching to prompt mode");
                ctx.prompt_mode.store(true, Ordering::SeqCst);
                continue;
            }

            if outcome.calls.is_empty() {
                ctx.commit_assistant(&outcome.text).await;
                return;
            }

            let Some(executor) = ctx.executor.as_ref() else {
                warn!("Model requested tool calls but no tool executor is configured");
                yield DividerInput::Text(
                    "I tried to use a tool, but tool support is not configured.".to_string(),
                );
                ctx.commit_assistant(&outcome.text).await;
                return;
            };

            // API-facing list gets the full partial assistant message;
            // memory gets only the text portion.
            let call_descriptors: Vec<Value> =
                outcome.calls.iter().map(wire_call_to_openai).collect();
            let mut assistant_msg = json!({
                "role": "assistant",
                "tool_calls": call_descriptors,
            });
            if !outcome.text.is_empty() {
                assistant_msg["content"] = json!(outcome.text);
            }
            messages.push(assistant_msg);
            ctx.commit_assistant(&outcome.text).await;

            let raw: Vec<RawToolCall> = outcome
                .calls
                .into_iter()
                .map(RawToolCall::Wire)
                .collect();
            let exec = executor.execute(raw, CallerMode::NativeFunctions);
            pin_mut!(exec);
            let mut results: Vec<Value> = Vec::new();
            while let Some(event) = exec.next().await {
                match event {
                    ToolEvent::Final { results: r } => results = r,
                    status => {
                        if let Ok(payload) = serde_json::to_value(&status) {
                            yield DividerInput::Control(payload);
                        }
                    }
                }
            }
            messages.extend(results);
        }

        warn!(limit = MAX_TOOL_ROUNDS, "Tool round limit reached, ending turn");
    }
}
