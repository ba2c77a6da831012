//! Batch tool execution with streamed progress events.

use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use chrono::Utc;
use futures::Stream;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::calls::{CallParseError, CallerMode, RawToolCall, ToolCall, parse_raw};
use crate::client::{ContentItem, RemoteToolClient};
use crate::registry::ToolRegistry;

/// Per-call lifecycle state as shown to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Running,
    Completed,
    Error,
}

/// Progress events streamed while a batch executes. Serializes to the
/// wire schema the surrounding transport relays.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ToolEvent {
    #[serde(rename = "tool_call_status", rename_all = "camelCase")]
    Status {
        tool_id: String,
        tool_name: String,
        status: ToolStatus,
        content: String,
        timestamp: String,
    },
    #[serde(rename = "final_tool_results")]
    Final { results: Vec<Value> },
}

impl ToolEvent {
    fn status(call_id: &str, name: &str, status: ToolStatus, content: String) -> Self {
        ToolEvent::Status {
            tool_id: call_id.to_string(),
            tool_name: name.to_string(),
            status,
            content,
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Executes batches of tool calls against the remote capability.
///
/// Nothing escapes the stream as a panic or `Err`: every failure mode
/// becomes an error status plus an error result for that one call.
pub struct ToolExecutor {
    registry: ToolRegistry,
    client: Arc<dyn RemoteToolClient>,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, client: Arc<dyn RemoteToolClient>) -> Self {
        Self {
            registry,
            client,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Run the batch. Yields a `Running` then a `Completed`/`Error`
    /// status per call, and exactly one terminal [`ToolEvent::Final`]
    /// whose results are in input order.
    pub fn execute(
        &self,
        calls: Vec<RawToolCall>,
        mode: CallerMode,
    ) -> impl Stream<Item = ToolEvent> + '_ {
        stream! {
            let mut results = Vec::with_capacity(calls.len());
            for (index, raw) in calls.into_iter().enumerate() {
                let call = match parse_raw(index, &raw) {
                    Ok(call) => call,
                    Err(e) => {
                        warn!(id = %e.id, tool = %e.name, error = %e.message, "Tool call failed to parse");
                        yield ToolEvent::status(&e.id, &e.name, ToolStatus::Error, e.message.clone());
                        results.push(parse_error_result(&e, mode));
                        continue;
                    }
                };

                let input = call.arguments.to_string();
                yield ToolEvent::status(&call.id, &call.name, ToolStatus::Running, input);

                let Some(server) = self.registry.server_for(&call.name) else {
                    let message = format!("No server provides tool '{}'", call.name);
                    warn!(tool = %call.name, "{message}");
                    yield ToolEvent::status(&call.id, &call.name, ToolStatus::Error, message.clone());
                    results.push(error_result(&call, &message, mode));
                    continue;
                };

                debug!(tool = %call.name, server, "Invoking remote tool");
                let invocation = self.client.call_tool(server, &call.name, &call.arguments);
                let outcome = match tokio::time::timeout(self.timeout, invocation).await {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(e)) => {
                        let message = format!("Tool '{}' failed: {e}", call.name);
                        yield ToolEvent::status(&call.id, &call.name, ToolStatus::Error, message.clone());
                        results.push(error_result(&call, &message, mode));
                        continue;
                    }
                    Err(_) => {
                        let message = format!(
                            "Tool '{}' timed out after {}s",
                            call.name,
                            self.timeout.as_secs()
                        );
                        warn!(tool = %call.name, "{message}");
                        yield ToolEvent::status(&call.id, &call.name, ToolStatus::Error, message.clone());
                        results.push(error_result(&call, &message, mode));
                        continue;
                    }
                };

                let flattened = flatten_content(&outcome.content_items);
                let status = if outcome.is_error {
                    ToolStatus::Error
                } else {
                    ToolStatus::Completed
                };
                yield ToolEvent::status(&call.id, &call.name, status, flattened.clone());

                results.push(shape_result(&call, &outcome.content_items, outcome.is_error, &flattened, mode));
            }
            yield ToolEvent::Final { results };
        }
    }
}

/// Flatten content items to one descriptive string. Non-text items are
/// annotated with a count rather than inlined.
fn flatten_content(items: &[ContentItem]) -> String {
    let mut parts = Vec::new();
    let mut images = 0usize;
    for item in items {
        match item {
            ContentItem::Text { text } => parts.push(text.clone()),
            ContentItem::Error { message } => parts.push(format!("Error: {message}")),
            ContentItem::Image { .. } => images += 1,
        }
    }
    if images > 0 {
        parts.push(format!("[Tool returned {images} image(s)]"));
    }
    parts.join("\n")
}

fn shape_result(
    call: &ToolCall,
    items: &[ContentItem],
    is_error: bool,
    flattened: &str,
    mode: CallerMode,
) -> Value {
    match mode {
        CallerMode::NativeBlocks => {
            let blocks: Vec<Value> = items
                .iter()
                .map(|item| match item {
                    ContentItem::Text { text } => json!({"type": "text", "text": text}),
                    ContentItem::Error { message } => json!({"type": "text", "text": format!("Error: {message}")}),
                    ContentItem::Image { mime_type, data } => json!({
                        "type": "image",
                        "source": {
                            "type": "base64",
                            "media_type": mime_type,
                            "data": data,
                        }
                    }),
                })
                .collect();
            json!({
                "type": "tool_result",
                "tool_use_id": call.id,
                "content": blocks,
                "is_error": is_error,
            })
        }
        CallerMode::NativeFunctions => json!({
            "role": "tool",
            "tool_call_id": call.id,
            "content": flattened,
        }),
        CallerMode::Prompt => {
            if is_error {
                Value::String(format!("Tool '{}' failed: {flattened}", call.name))
            } else {
                Value::String(format!("Tool '{}' output: {flattened}", call.name))
            }
        }
    }
}

fn error_result(call: &ToolCall, message: &str, mode: CallerMode) -> Value {
    match mode {
        CallerMode::NativeBlocks => json!({
            "type": "tool_result",
            "tool_use_id": call.id,
            "content": [{"type": "text", "text": message}],
            "is_error": true,
        }),
        CallerMode::NativeFunctions => json!({
            "role": "tool",
            "tool_call_id": call.id,
            "content": format!("Error: {message}"),
        }),
        CallerMode::Prompt => Value::String(format!("Tool '{}' failed: {message}", call.name)),
    }
}

fn parse_error_result(e: &CallParseError, mode: CallerMode) -> Value {
    let placeholder = ToolCall {
        id: e.id.clone(),
        name: e.name.clone(),
        arguments: Value::Null,
        source: crate::calls::ToolCallFormat::NativeFunctionCall,
    };
    error_result(&placeholder, &e.message, mode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use futures::StreamExt;
    use serde_json::json;

    use crate::client::ToolCallOutcome;
    use crate::registry::RemoteTool;
    use koemi_core::types::WireToolCall;

    struct FakeClient {
        outcomes: Mutex<HashMap<String, anyhow::Result<ToolCallOutcome>>>,
        calls: AtomicUsize,
        delay: Option<Duration>,
    }

    impl FakeClient {
        fn new() -> Self {
            Self {
                outcomes: Mutex::new(HashMap::new()),
                calls: AtomicUsize::new(0),
                delay: None,
            }
        }

        fn with(self, tool: &str, outcome: anyhow::Result<ToolCallOutcome>) -> Self {
            self.outcomes.lock().unwrap().insert(tool.to_string(), outcome);
            self
        }
    }

    #[async_trait]
    impl RemoteToolClient for FakeClient {
        async fn list_tools(&self, _server: &str) -> anyhow::Result<Vec<RemoteTool>> {
            Ok(Vec::new())
        }

        async fn call_tool(
            &self,
            _server: &str,
            tool: &str,
            _arguments: &Value,
        ) -> anyhow::Result<ToolCallOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            match self.outcomes.lock().unwrap().remove(tool) {
                Some(outcome) => outcome,
                None => Ok(ToolCallOutcome::text("ok")),
            }
        }
    }

    fn registry_with(tools: &[&str]) -> ToolRegistry {
        let mut reg = ToolRegistry::new();
        for name in tools {
            reg.register(
                "srv",
                RemoteTool {
                    name: name.to_string(),
                    description: String::new(),
                    input_schema: json!({"type": "object"}),
                },
            );
        }
        reg
    }

    fn wire(id: &str, name: &str, args: &str) -> RawToolCall {
        RawToolCall::Wire(WireToolCall::Function {
            id: id.into(),
            name: name.into(),
            arguments: args.into(),
        })
    }

    async fn run(
        executor: &ToolExecutor,
        calls: Vec<RawToolCall>,
        mode: CallerMode,
    ) -> Vec<ToolEvent> {
        executor.execute(calls, mode).collect().await
    }

    fn final_results(events: &[ToolEvent]) -> &[Value] {
        match events.last().unwrap() {
            ToolEvent::Final { results } => results,
            other => panic!("expected Final, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn success_emits_running_then_completed_then_final() {
        let client = Arc::new(
            FakeClient::new().with("add", Ok(ToolCallOutcome::text("3"))),
        );
        let executor = ToolExecutor::new(registry_with(&["add"]), client);
        let events = run(
            &executor,
            vec![wire("c1", "add", r#"{"a":1,"b":2}"#)],
            CallerMode::NativeFunctions,
        )
        .await;

        assert_eq!(events.len(), 3);
        assert!(matches!(
            &events[0],
            ToolEvent::Status { status: ToolStatus::Running, tool_name, .. } if tool_name == "add"
        ));
        assert!(matches!(
            &events[1],
            ToolEvent::Status { status: ToolStatus::Completed, content, .. } if content == "3"
        ));
        let results = final_results(&events);
        assert_eq!(results[0]["role"], "tool");
        assert_eq!(results[0]["tool_call_id"], "c1");
        assert_eq!(results[0]["content"], "3");
    }

    #[tokio::test]
    async fn parse_failure_never_invokes_the_client() {
        let client = Arc::new(FakeClient::new());
        let executor = ToolExecutor::new(registry_with(&["add"]), client.clone());
        let events = run(
            &executor,
            vec![wire("c1", "add", "{broken")],
            CallerMode::NativeFunctions,
        )
        .await;

        assert!(matches!(
            &events[0],
            ToolEvent::Status { status: ToolStatus::Error, .. }
        ));
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
        let results = final_results(&events);
        assert!(results[0]["content"].as_str().unwrap().starts_with("Error:"));
    }

    #[tokio::test]
    async fn unknown_tool_is_configuration_error() {
        let client = Arc::new(FakeClient::new());
        let executor = ToolExecutor::new(registry_with(&[]), client);
        let events = run(
            &executor,
            vec![wire("c1", "mystery", "{}")],
            CallerMode::Prompt,
        )
        .await;

        let results = final_results(&events);
        assert!(
            results[0]
                .as_str()
                .unwrap()
                .contains("No server provides tool 'mystery'")
        );
    }

    #[tokio::test]
    async fn one_failing_call_does_not_abort_the_batch() {
        let client = Arc::new(
            FakeClient::new()
                .with("bad", Err(anyhow::anyhow!("connection refused")))
                .with("good", Ok(ToolCallOutcome::text("fine"))),
        );
        let executor = ToolExecutor::new(registry_with(&["bad", "good"]), client);
        let events = run(
            &executor,
            vec![wire("c1", "bad", "{}"), wire("c2", "good", "{}")],
            CallerMode::NativeFunctions,
        )
        .await;

        let results = final_results(&events);
        assert_eq!(results.len(), 2);
        assert!(results[0]["content"].as_str().unwrap().contains("connection refused"));
        assert_eq!(results[1]["content"], "fine");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_call_times_out_into_error_result() {
        let mut client = FakeClient::new();
        client.delay = Some(Duration::from_secs(600));
        let executor = ToolExecutor::new(registry_with(&["slow"]), Arc::new(client))
            .with_timeout(Duration::from_secs(5));
        let events = run(
            &executor,
            vec![wire("c1", "slow", "{}")],
            CallerMode::NativeFunctions,
        )
        .await;

        let results = final_results(&events);
        assert!(results[0]["content"].as_str().unwrap().contains("timed out after 5s"));
    }

    #[tokio::test]
    async fn image_content_becomes_blocks_or_annotation() {
        let outcome = ToolCallOutcome {
            is_error: false,
            content_items: vec![
                ContentItem::Text { text: "a chart".into() },
                ContentItem::Image {
                    mime_type: "image/png".into(),
                    data: "aWtl".into(),
                },
            ],
            metadata: None,
        };

        let client = Arc::new(FakeClient::new().with("plot", Ok(outcome.clone())));
        let executor = ToolExecutor::new(registry_with(&["plot"]), client);
        let events = run(&executor, vec![wire("c1", "plot", "{}")], CallerMode::NativeBlocks).await;
        let results = final_results(&events);
        let blocks = results[0]["content"].as_array().unwrap();
        assert_eq!(blocks[0]["type"], "text");
        assert_eq!(blocks[1]["type"], "image");
        assert_eq!(blocks[1]["source"]["media_type"], "image/png");

        let client = Arc::new(FakeClient::new().with("plot", Ok(outcome)));
        let executor = ToolExecutor::new(registry_with(&["plot"]), client);
        let events = run(&executor, vec![wire("c1", "plot", "{}")], CallerMode::NativeFunctions).await;
        let results = final_results(&events);
        let content = results[0]["content"].as_str().unwrap();
        assert!(content.contains("a chart"));
        assert!(content.contains("[Tool returned 1 image(s)]"));
    }

    #[tokio::test]
    async fn tool_reported_error_marks_block_result() {
        let client = Arc::new(
            FakeClient::new().with("add", Ok(ToolCallOutcome::error("division by zero"))),
        );
        let executor = ToolExecutor::new(registry_with(&["add"]), client);
        let events = run(&executor, vec![wire("c1", "add", "{}")], CallerMode::NativeBlocks).await;

        assert!(matches!(
            &events[1],
            ToolEvent::Status { status: ToolStatus::Error, .. }
        ));
        let results = final_results(&events);
        assert_eq!(results[0]["is_error"], true);
    }

    #[test]
    fn status_event_serializes_to_wire_schema() {
        let event = ToolEvent::status("c1", "add", ToolStatus::Running, "{}".into());
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "tool_call_status");
        assert_eq!(value["toolId"], "c1");
        assert_eq!(value["toolName"], "add");
        assert_eq!(value["status"], "running");
        assert!(value["timestamp"].as_str().is_some());

        let final_event = ToolEvent::Final { results: vec![json!("r")] };
        let value = serde_json::to_value(&final_event).unwrap();
        assert_eq!(value["type"], "final_tool_results");
        assert_eq!(value["results"][0], "r");
    }
}
