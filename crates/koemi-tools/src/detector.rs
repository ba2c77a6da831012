//! Incremental JSON-object detection in free-flowing model text.

use serde_json::Value;
use tracing::{debug, warn};

/// Finds complete `{...}` objects inside a growing text stream.
///
/// Each `{` in newly-appended text becomes a candidate start. Candidates
/// are resolved in ascending offset order by brace counting, so when
/// braces nest the outermost object wins. A range that produced a value
/// is never rescanned, which makes re-feeding past text safe.
#[derive(Debug, Default)]
pub struct StreamJsonDetector {
    buffer: String,
    pending_starts: Vec<usize>,
    processed: Vec<(usize, usize)>,
}

impl StreamJsonDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all state. Must be called before each detection round.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.pending_starts.clear();
        self.processed.clear();
    }

    /// Append a chunk and return every JSON value newly completed by it.
    pub fn process_chunk(&mut self, chunk: &str) -> Vec<Value> {
        let scan_from = self.buffer.len();
        self.buffer.push_str(chunk);

        // Braces are ASCII, so byte offsets are safe in UTF-8 text.
        for (i, b) in self.buffer.as_bytes()[scan_from..].iter().enumerate() {
            if *b == b'{' {
                self.pending_starts.push(scan_from + i);
            }
        }

        let mut found = Vec::new();
        let starts = std::mem::take(&mut self.pending_starts);
        for start in starts {
            if self.is_processed(start) {
                continue;
            }
            match self.balanced_end(start) {
                Some(end) => {
                    let span = &self.buffer[start..=end];
                    match serde_json::from_str::<Value>(span) {
                        Ok(value) => {
                            debug!(start, end, "Detected embedded JSON object");
                            self.processed.push((start, end));
                            found.push(value);
                        }
                        Err(e) => {
                            // Dropped, not retried. Inner candidates may
                            // still resolve on their own.
                            warn!(%e, span, "Balanced brace span is not valid JSON, dropping");
                        }
                    }
                }
                None => self.pending_starts.push(start),
            }
        }
        found
    }

    /// Whether an unterminated brace span is still waiting for more text.
    pub fn has_pending(&self) -> bool {
        !self.pending_starts.is_empty()
    }

    fn is_processed(&self, offset: usize) -> bool {
        self.processed
            .iter()
            .any(|&(start, end)| offset >= start && offset <= end)
    }

    /// Offset of the `}` closing the brace span opened at `start`, if
    /// the buffer already contains it.
    fn balanced_end(&self, start: usize) -> Option<usize> {
        let mut depth = 0i32;
        for (i, b) in self.buffer.as_bytes()[start..].iter().enumerate() {
            match b {
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(start + i);
                    }
                }
                _ => {}
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn object_split_across_chunks() {
        let mut d = StreamJsonDetector::new();
        assert!(d.process_chunk("I will use a tool: {\"tool\": \"add\",").is_empty());
        assert!(d.process_chunk(" \"arguments\": {\"a\":").is_empty());
        let found = d.process_chunk(" 1}}");
        assert_eq!(
            found,
            vec![json!({"tool": "add", "arguments": {"a": 1}})]
        );
    }

    #[test]
    fn outermost_object_wins_over_nested() {
        let mut d = StreamJsonDetector::new();
        let found = d.process_chunk(r#"{"outer": {"inner": 1}}"#);
        assert_eq!(found, vec![json!({"outer": {"inner": 1}})]);
    }

    #[test]
    fn multiple_independent_objects_each_extracted() {
        let mut d = StreamJsonDetector::new();
        let found = d.process_chunk(r#"first {"a": 1} then {"b": 2} done"#);
        assert_eq!(found, vec![json!({"a": 1}), json!({"b": 2})]);
    }

    #[test]
    fn completed_range_never_rescanned() {
        let mut d = StreamJsonDetector::new();
        assert_eq!(d.process_chunk(r#"{"a": 1}"#).len(), 1);
        assert!(d.process_chunk(" trailing prose").is_empty());
        assert_eq!(d.process_chunk(r#" {"b": 2}"#), vec![json!({"b": 2})]);
    }

    #[test]
    fn unparseable_balanced_span_dropped_inner_still_found() {
        let mut d = StreamJsonDetector::new();
        let found = d.process_chunk(r#"{oops {"a": 1} }"#);
        assert_eq!(found, vec![json!({"a": 1})]);
        // The bad span is not retried.
        assert!(d.process_chunk(" more").is_empty());
    }

    #[test]
    fn plain_text_yields_nothing() {
        let mut d = StreamJsonDetector::new();
        assert!(d.process_chunk("no braces here, just words.").is_empty());
    }

    #[test]
    fn reset_clears_pending_state() {
        let mut d = StreamJsonDetector::new();
        assert!(d.process_chunk(r#"{"a": "#).is_empty());
        assert!(d.has_pending());
        d.reset();
        assert!(!d.has_pending());
        assert!(d.process_chunk("1}").is_empty());
        assert_eq!(d.process_chunk(r#"{"b": 2}"#), vec![json!({"b": 2})]);
    }
}
