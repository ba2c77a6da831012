//! Runtime configuration for the agent and its output pipeline.
//!
//! These structs are plain serde values; loading them from disk and
//! validating user config files belongs to the embedding application.

use serde::{Deserialize, Serialize};

/// Sentence-boundary strategy used by the divider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentMethod {
    /// Detect the dominant script and apply script-appropriate boundary
    /// rules, falling back to [`SegmentMethod::Regex`] when unsupported.
    #[default]
    LocaleAware,
    /// Terminal-punctuation regex matching with abbreviation skipping.
    Regex,
}

/// Role used for the `[Interrupted by user]` marker appended on interrupt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptRole {
    System,
    #[default]
    User,
}

/// Agent behavior knobs, threaded through per conversation session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Split the first sentence of a turn at the first comma to reduce
    /// time-to-first-audio.
    pub faster_first_response: bool,

    pub segment_method: SegmentMethod,

    /// Tag names the divider recognizes; anything else in angle
    /// brackets is ordinary text.
    pub valid_tags: Vec<String>,

    pub interrupt_role: InterruptRole,

    /// Per-call timeout for remote tool invocations, in seconds.
    pub tool_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            faster_first_response: true,
            segment_method: SegmentMethod::default(),
            valid_tags: vec!["think".into()],
            interrupt_role: InterruptRole::default(),
            tool_timeout_secs: 30,
        }
    }
}

/// Controls what the TTS filter strips from spoken text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsFilterConfig {
    /// Remove emoji and other symbols TTS engines tend to read aloud.
    pub remove_special_char: bool,
    /// Drop `[...]` spans.
    pub ignore_brackets: bool,
    /// Drop `(...)` spans.
    pub ignore_parentheses: bool,
    /// Drop `*...*` spans.
    pub ignore_asterisks: bool,
    /// Drop `<...>` spans.
    pub ignore_angle_brackets: bool,
}

impl Default for TtsFilterConfig {
    fn default() -> Self {
        Self {
            remove_special_char: true,
            ignore_brackets: true,
            ignore_parentheses: true,
            ignore_asterisks: true,
            ignore_angle_brackets: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_config_defaults() {
        let config = AgentConfig::default();
        assert!(config.faster_first_response);
        assert_eq!(config.segment_method, SegmentMethod::LocaleAware);
        assert_eq!(config.valid_tags, vec!["think".to_string()]);
        assert_eq!(config.interrupt_role, InterruptRole::User);
    }

    #[test]
    fn segment_method_serde_round_trip() {
        let json = serde_json::to_string(&SegmentMethod::LocaleAware).unwrap();
        assert_eq!(json, "\"locale_aware\"");
        let back: SegmentMethod = serde_json::from_str("\"regex\"").unwrap();
        assert_eq!(back, SegmentMethod::Regex);
    }
}
