//! OpenAI-compatible Chat Completions client.
//!
//! Streams `/v1/chat/completions` and maps the wire chunks onto the
//! [`StreamEvent`] vocabulary. Works against OpenAI itself and the
//! compatible endpoints (Ollama, LM Studio, OpenRouter, vLLM and so on).

use async_stream::stream;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, trace, warn};

use koemi_core::types::WireToolCall;

use crate::sse::{SseEvent, parse_sse_response};
use crate::{ChatCompletion, EventStream, StreamEvent};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiCompatibleClient {
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f64,
    client: reqwest::Client,
}

impl OpenAiCompatibleClient {
    pub fn new(base_url: Option<&str>, api_key: Option<String>, model: &str) -> Self {
        Self {
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key,
            model: model.to_string(),
            temperature: 1.0,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest {
    model: String,
    messages: Vec<serde_json::Value>,
    stream: bool,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Default, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Accumulates one tool call across streaming deltas.
#[derive(Debug, Default, Clone)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
    started: bool,
}

impl ToolCallAccumulator {
    fn into_call(self) -> WireToolCall {
        WireToolCall::Function {
            id: self.id,
            name: self.name,
            arguments: self.arguments,
        }
    }
}

/// Map a parsed SSE stream onto [`StreamEvent`]s.
///
/// Tool-call deltas are accumulated per index; each call is announced
/// with `ToolCallStart` when its name arrives and flushed as
/// `ToolCallComplete` at `finish_reason` or end of stream.
pub fn completion_events<S>(sse: S) -> impl Stream<Item = StreamEvent>
where
    S: Stream<Item = anyhow::Result<SseEvent>>,
{
    stream! {
        let mut sse = std::pin::pin!(sse);
        let mut pending: Vec<ToolCallAccumulator> = Vec::new();
        let mut ended = false;

        while let Some(item) = sse.next().await {
            let event = match item {
                Ok(e) => e,
                Err(e) => {
                    yield StreamEvent::Error {
                        message: format!("Error calling the chat endpoint: {e}"),
                    };
                    return;
                }
            };

            let data = event.data.trim();
            if data == "[DONE]" {
                break;
            }

            let chunk: ChatCompletionChunk = match serde_json::from_str(data) {
                Ok(c) => c,
                Err(e) => {
                    trace!(%e, data, "Skipping unparseable completion chunk");
                    continue;
                }
            };

            let Some(choice) = chunk.choices.into_iter().next() else {
                continue;
            };

            if let Some(deltas) = choice.delta.tool_calls {
                for tc in deltas {
                    while pending.len() <= tc.index {
                        pending.push(ToolCallAccumulator::default());
                    }
                    let acc = &mut pending[tc.index];
                    if let Some(id) = tc.id {
                        acc.id = id;
                    }
                    if let Some(f) = tc.function {
                        if let Some(name) = f.name {
                            acc.name = name;
                        }
                        if let Some(args) = f.arguments {
                            if !acc.started && !acc.name.is_empty() {
                                acc.started = true;
                                yield StreamEvent::ToolCallStart {
                                    id: acc.id.clone(),
                                    name: acc.name.clone(),
                                };
                            }
                            if !args.is_empty() {
                                let id = pending[tc.index].id.clone();
                                yield StreamEvent::ToolCallDelta {
                                    id,
                                    partial_json: args.clone(),
                                };
                                pending[tc.index].arguments.push_str(&args);
                            }
                        }
                    }
                }
            }

            if let Some(content) = choice.delta.content
                && !content.is_empty()
            {
                yield StreamEvent::TextDelta { text: content };
            }

            if let Some(reason) = choice.finish_reason {
                for acc in pending.drain(..) {
                    yield StreamEvent::ToolCallComplete {
                        call: acc.into_call(),
                    };
                }
                yield StreamEvent::MessageEnd {
                    stop_reason: Some(reason),
                };
                ended = true;
            }
        }

        // Endpoints that omit finish_reason still get their calls flushed.
        for acc in pending.drain(..) {
            yield StreamEvent::ToolCallComplete {
                call: acc.into_call(),
            };
        }
        if !ended {
            yield StreamEvent::MessageEnd { stop_reason: None };
        }
    }
}

fn single_event(event: StreamEvent) -> EventStream {
    Box::pin(futures::stream::iter(vec![event]))
}

#[async_trait]
impl ChatCompletion for OpenAiCompatibleClient {
    fn model(&self) -> &str {
        &self.model
    }

    fn supports_native_tools(&self) -> bool {
        true
    }

    async fn stream_completion(
        &self,
        messages: &[serde_json::Value],
        system: &str,
        tools: Option<&[serde_json::Value]>,
    ) -> EventStream {
        let mut wire_messages = Vec::with_capacity(messages.len() + 1);
        if !system.is_empty() {
            wire_messages.push(json!({ "role": "system", "content": system }));
        }
        wire_messages.extend(messages.iter().cloned());

        let body = CompletionRequest {
            model: self.model.clone(),
            messages: wire_messages,
            stream: true,
            temperature: self.temperature,
            tools: tools.map(|t| t.to_vec()),
        };

        debug!(model = %body.model, base_url = %self.base_url, tools = body.tools.is_some(), "Streaming chat completion");

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("content-type", "application/json");
        if let Some(ref key) = self.api_key {
            request = request.header("authorization", format!("Bearer {key}"));
        }

        let response = match request.json(&body).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(%e, "Chat endpoint unreachable");
                return single_event(StreamEvent::Error {
                    message: "Error calling the chat endpoint: Connection error. Please check the configuration.".to_string(),
                });
            }
        };

        let status = response.status();
        if !status.is_success() {
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return single_event(StreamEvent::Error {
                    message: "Error calling the chat endpoint: Rate limit exceeded. Please try again later.".to_string(),
                });
            }
            let detail = response.text().await.unwrap_or_default();
            if status == reqwest::StatusCode::BAD_REQUEST
                && detail.to_lowercase().contains("tool")
                && body.tools.is_some()
            {
                warn!(model = %self.model, "Endpoint rejected tool schemas");
                return single_event(StreamEvent::ToolsUnsupported);
            }
            return single_event(StreamEvent::Error {
                message: format!("Error calling the chat endpoint: {status}: {detail}"),
            });
        }

        Box::pin(completion_events(parse_sse_response(response)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sse_items(datas: &[&str]) -> impl Stream<Item = anyhow::Result<SseEvent>> {
        let owned: Vec<anyhow::Result<SseEvent>> = datas
            .iter()
            .map(|d| {
                Ok(SseEvent {
                    event: None,
                    data: d.to_string(),
                    id: None,
                })
            })
            .collect();
        futures::stream::iter(owned)
    }

    async fn run(datas: &[&str]) -> Vec<StreamEvent> {
        completion_events(sse_items(datas)).collect().await
    }

    #[tokio::test]
    async fn text_deltas_and_stop() {
        let events = run(&[
            r#"{"choices":[{"delta":{"content":"Hel"},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{"content":"lo"},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
            "[DONE]",
        ])
        .await;
        assert_eq!(
            events,
            vec![
                StreamEvent::TextDelta { text: "Hel".into() },
                StreamEvent::TextDelta { text: "lo".into() },
                StreamEvent::MessageEnd {
                    stop_reason: Some("stop".into())
                },
            ]
        );
    }

    #[tokio::test]
    async fn tool_call_accumulated_across_deltas() {
        let events = run(&[
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"lookup","arguments":""}}]},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"q\":"}}]},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"rust\"}"}}]},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
            "[DONE]",
        ])
        .await;

        assert!(matches!(
            &events[0],
            StreamEvent::ToolCallStart { id, name } if id == "call_1" && name == "lookup"
        ));
        let complete = events
            .iter()
            .find_map(|e| match e {
                StreamEvent::ToolCallComplete { call } => Some(call.clone()),
                _ => None,
            })
            .unwrap();
        match complete {
            WireToolCall::Function {
                id,
                name,
                arguments,
            } => {
                assert_eq!(id, "call_1");
                assert_eq!(name, "lookup");
                assert_eq!(arguments, r#"{"q":"rust"}"#);
            }
            other => panic!("unexpected call shape: {other:?}"),
        }
        assert!(matches!(
            events.last().unwrap(),
            StreamEvent::MessageEnd {
                stop_reason: Some(r)
            } if r == "tool_calls"
        ));
    }

    #[tokio::test]
    async fn parallel_tool_calls_flushed_in_index_order() {
        let events = run(&[
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"a","function":{"name":"first","arguments":"{}"}},{"index":1,"id":"b","function":{"name":"second","arguments":"{}"}}]},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
        ])
        .await;
        let names: Vec<String> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ToolCallComplete { call } => Some(call.name().to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn pending_calls_flushed_without_finish_reason() {
        let events = run(&[
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"x","function":{"name":"f","arguments":"{}"}}]},"finish_reason":null}]}"#,
        ])
        .await;
        assert!(
            events
                .iter()
                .any(|e| matches!(e, StreamEvent::ToolCallComplete { .. }))
        );
        assert!(matches!(
            events.last().unwrap(),
            StreamEvent::MessageEnd { stop_reason: None }
        ));
    }

    #[tokio::test]
    async fn unparseable_chunks_skipped() {
        let events = run(&[
            "not json",
            r#"{"choices":[{"delta":{"content":"ok"},"finish_reason":"stop"}]}"#,
        ])
        .await;
        assert_eq!(events[0], StreamEvent::TextDelta { text: "ok".into() });
    }

    #[tokio::test]
    async fn transport_error_surfaces_as_event() {
        let items: Vec<anyhow::Result<SseEvent>> = vec![Err(anyhow::anyhow!("reset by peer"))];
        let events: Vec<StreamEvent> = completion_events(futures::stream::iter(items))
            .collect()
            .await;
        assert!(matches!(
            &events[0],
            StreamEvent::Error { message } if message.contains("reset by peer")
        ));
    }

    #[test]
    fn request_serialization_omits_absent_tools() {
        let body = CompletionRequest {
            model: "gpt-4o".into(),
            messages: vec![json!({"role": "user", "content": "hi"})],
            stream: true,
            temperature: 1.0,
            tools: None,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert!(value.get("tools").is_none());
        assert_eq!(value["stream"], true);
    }
}
