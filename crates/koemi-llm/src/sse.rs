//! Generic SSE (Server-Sent Events) parser.
//!
//! Works over any byte stream so the field handling can be tested
//! without a live HTTP response.

use async_stream::stream;
use bytes::Bytes;
use futures::{Stream, StreamExt};

/// A parsed SSE event.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

/// Parse a reqwest response body as an SSE stream.
pub fn parse_sse_response(
    response: reqwest::Response,
) -> impl Stream<Item = anyhow::Result<SseEvent>> {
    let bytes = response
        .bytes_stream()
        .map(|chunk| chunk.map_err(|e| anyhow::anyhow!("SSE stream error: {e}")));
    parse_sse(bytes)
}

/// Parse a raw byte stream as SSE events.
///
/// Lines may be split anywhere across chunks. An empty line dispatches
/// the accumulated fields; a trailing event without a blank line is
/// dispatched at end of stream. Comment lines (leading `:`) and unknown
/// fields are skipped.
pub fn parse_sse<S>(bytes: S) -> impl Stream<Item = anyhow::Result<SseEvent>>
where
    S: Stream<Item = anyhow::Result<Bytes>>,
{
    stream! {
        let mut bytes = std::pin::pin!(bytes);
        let mut buffer = String::new();
        let mut event: Option<String> = None;
        let mut data: Vec<String> = Vec::new();
        let mut id: Option<String> = None;

        loop {
            if let Some(newline) = buffer.find('\n') {
                let line = buffer[..newline].trim_end_matches('\r').to_string();
                buffer.drain(..=newline);

                if line.is_empty() {
                    if !data.is_empty() {
                        yield Ok(SseEvent {
                            event: event.take(),
                            data: data.join("\n"),
                            id: id.take(),
                        });
                        data.clear();
                    }
                    continue;
                }
                if line.starts_with(':') {
                    continue;
                }
                if let Some(value) = line.strip_prefix("event:") {
                    event = Some(value.trim_start().to_string());
                } else if let Some(value) = line.strip_prefix("data:") {
                    data.push(value.trim_start().to_string());
                } else if let Some(value) = line.strip_prefix("id:") {
                    id = Some(value.trim_start().to_string());
                }
                continue;
            }

            match bytes.next().await {
                Some(Ok(chunk)) => buffer.push_str(&String::from_utf8_lossy(&chunk)),
                Some(Err(e)) => {
                    yield Err(e);
                    return;
                }
                None => {
                    if !data.is_empty() {
                        yield Ok(SseEvent {
                            event: event.take(),
                            data: data.join("\n"),
                            id: id.take(),
                        });
                    }
                    return;
                }
            }
        }
    }
}
