//! Sentence-boundary detection strategies.
//!
//! Two interchangeable strategies produce `(complete sentences,
//! incomplete remainder)` from a text span: a terminal-punctuation
//! regex scan, and a locale-aware variant that picks boundary rules
//! from the dominant script and falls back to the regex scan.

use std::sync::LazyLock;

use regex::Regex;

use koemi_core::config::SegmentMethod;

/// Comma-class characters used by the first-sentence fast path.
pub const COMMAS: &[char] = &[
    ',', '،', '，', '、', '፣', '၊', ';', '΄', '‛', '।', '﹐', '꓾', '⹁', '︐', '﹑', '､',
];

/// Characters that can terminate a sentence.
pub const END_PUNCTUATION: &[char] = &['.', '!', '?', '…', '。', '！', '？'];

/// Abbreviations whose trailing period does not end a sentence.
pub const ABBREVIATIONS: &[&str] = &[
    "Mr.", "Mrs.", "Dr.", "Prof.", "Inc.", "Ltd.", "Jr.", "Sr.", "e.g.", "i.e.", "vs.", "St.",
    "Rd.",
];

static SENTENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^.*?[.!?…。！？]").expect("sentence regex"));

pub fn contains_comma(text: &str) -> bool {
    text.contains(COMMAS)
}

pub fn contains_end_punctuation(text: &str) -> bool {
    text.contains(END_PUNCTUATION)
}

/// Whether `text` ends in terminal punctuation and not in an abbreviation.
pub fn is_complete_sentence(text: &str) -> bool {
    let text = text.trim();
    if text.is_empty() {
        return false;
    }
    if ends_with_abbreviation(text) {
        return false;
    }
    text.ends_with(END_PUNCTUATION)
}

fn ends_with_abbreviation(text: &str) -> bool {
    ABBREVIATIONS.iter().any(|abbrev| text.ends_with(abbrev))
}

/// Split at the first comma, keeping the comma on the left half.
/// Returns `None` when no comma is present.
pub fn split_at_first_comma(text: &str) -> Option<(String, String)> {
    let (idx, comma) = text.char_indices().find(|(_, c)| COMMAS.contains(c))?;
    let head = format!("{}{}", text[..idx].trim(), comma);
    let tail = text[idx + comma.len_utf8()..].trim_start().to_string();
    Some((head, tail))
}

/// Segment `text` with the configured strategy.
pub fn segment(text: &str, method: SegmentMethod) -> (Vec<String>, String) {
    match method {
        SegmentMethod::Regex => scan(text, true, false),
        SegmentMethod::LocaleAware => match detect_script(text) {
            Script::Cjk => scan(text, false, false),
            Script::Latin => scan(text, true, true),
            Script::Unknown => scan(text, true, false),
        },
    }
}

/// Dominant script classification, decided by character counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Script {
    Cjk,
    Latin,
    Unknown,
}

pub(crate) fn detect_script(text: &str) -> Script {
    let mut cjk = 0usize;
    let mut latin = 0usize;
    for c in text.chars() {
        if is_cjk(c) {
            cjk += 1;
        } else if c.is_ascii_alphabetic() {
            latin += 1;
        }
    }
    if cjk == 0 && latin == 0 {
        Script::Unknown
    } else if cjk >= latin {
        Script::Cjk
    } else {
        Script::Latin
    }
}

fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x3040..=0x30FF      // hiragana + katakana
        | 0x3400..=0x4DBF    // CJK extension A
        | 0x4E00..=0x9FFF    // CJK unified
        | 0xAC00..=0xD7AF    // hangul
        | 0xF900..=0xFAFF)   // CJK compatibility
}

/// Core scanner: repeatedly find the shortest prefix ending in terminal
/// punctuation, absorbing trailing punctuation runs (ellipses, `?!`).
///
/// A candidate ending in an abbreviation (or, when `skip_decimal` is
/// set, a period inside a decimal number) is not a boundary: scanning
/// continues past it without dropping any text.
fn scan(text: &str, check_abbrev: bool, skip_decimal: bool) -> (Vec<String>, String) {
    if text.is_empty() {
        return (Vec::new(), String::new());
    }

    let mut sentences = Vec::new();
    let mut sent_start = 0usize;
    let mut search_from = 0usize;

    while let Some(m) = SENTENCE_RE.find(&text[search_from..]) {
        let mut end = search_from + m.end();
        end += punctuation_run_len(&text[end..]);

        let candidate = text[sent_start..end].trim();
        let mid_decimal = skip_decimal && period_inside_number(text, end);

        if (check_abbrev && ends_with_abbreviation(candidate)) || mid_decimal {
            // Not a boundary; keep accumulating into the current sentence.
            search_from = end;
            continue;
        }

        if !candidate.is_empty() {
            sentences.push(candidate.to_string());
        }
        sent_start = end;
        search_from = end;
    }

    let remainder = text[sent_start..].trim_start().to_string();
    (sentences, remainder)
}

/// Length in bytes of the terminal-punctuation run starting at `text`.
fn punctuation_run_len(text: &str) -> usize {
    text.char_indices()
        .take_while(|(_, c)| END_PUNCTUATION.contains(c))
        .last()
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0)
}

/// Whether the punctuation ending at byte `end` is a period wedged
/// between two digits (e.g. "3.14").
fn period_inside_number(text: &str, end: usize) -> bool {
    let before = text[..end].chars().rev().take(2).collect::<Vec<_>>();
    let after = text[end..].chars().next();
    matches!(
        (before.first(), before.get(1), after),
        (Some('.'), Some(prev), Some(next)) if prev.is_ascii_digit() && next.is_ascii_digit()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regex_segments_simple_sentences() {
        let (sentences, rest) = segment("Hello there. How are you? I am", SegmentMethod::Regex);
        assert_eq!(sentences, vec!["Hello there.", "How are you?"]);
        assert_eq!(rest, "I am");
    }

    #[test]
    fn abbreviation_does_not_split() {
        let (sentences, rest) = segment("Talk to Dr. Smith today. Then rest", SegmentMethod::Regex);
        assert_eq!(sentences, vec!["Talk to Dr. Smith today."]);
        assert_eq!(rest, "Then rest");
    }

    #[test]
    fn abbreviation_text_is_not_dropped() {
        let input = "See e.g. the manual. Done.";
        let (sentences, rest) = segment(input, SegmentMethod::Regex);
        assert_eq!(sentences, vec!["See e.g. the manual.", "Done."]);
        assert!(rest.is_empty());
    }

    #[test]
    fn ellipsis_absorbed_as_one_boundary() {
        let (sentences, rest) = segment("Well... maybe. Or", SegmentMethod::Regex);
        assert_eq!(sentences, vec!["Well...", "maybe."]);
        assert_eq!(rest, "Or");
    }

    #[test]
    fn cjk_full_width_punctuation() {
        let (sentences, rest) = segment("今日はいい天気です。散歩に行きましょう！まだ", SegmentMethod::LocaleAware);
        assert_eq!(sentences, vec!["今日はいい天気です。", "散歩に行きましょう！"]);
        assert_eq!(rest, "まだ");
    }

    #[test]
    fn latin_decimal_number_not_a_boundary() {
        let (sentences, rest) = segment("Pi is 3.14 roughly. Yes", SegmentMethod::LocaleAware);
        assert_eq!(sentences, vec!["Pi is 3.14 roughly."]);
        assert_eq!(rest, "Yes");
    }

    #[test]
    fn empty_and_unpunctuated_input() {
        assert_eq!(segment("", SegmentMethod::Regex), (vec![], String::new()));
        let (sentences, rest) = segment("no punctuation here", SegmentMethod::Regex);
        assert!(sentences.is_empty());
        assert_eq!(rest, "no punctuation here");
    }

    #[test]
    fn comma_split_keeps_comma() {
        let (head, tail) = split_at_first_comma("Hello, world").unwrap();
        assert_eq!(head, "Hello,");
        assert_eq!(tail, "world");
        assert!(split_at_first_comma("no comma").is_none());
    }

    #[test]
    fn full_width_comma_split() {
        let (head, tail) = split_at_first_comma("こんにちは、元気").unwrap();
        assert_eq!(head, "こんにちは、");
        assert_eq!(tail, "元気");
    }

    #[test]
    fn complete_sentence_checks() {
        assert!(is_complete_sentence("Done."));
        assert!(is_complete_sentence("いいですね。"));
        assert!(!is_complete_sentence("Ask Dr."));
        assert!(!is_complete_sentence("trailing"));
        assert!(!is_complete_sentence("  "));
    }

    #[test]
    fn script_detection() {
        assert_eq!(detect_script("hello world"), Script::Latin);
        assert_eq!(detect_script("こんにちは"), Script::Cjk);
        assert_eq!(detect_script("1234 !!"), Script::Unknown);
    }
}
