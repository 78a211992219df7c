//! Text splitting helpers for narration.
//!
//! The splitter is a punctuation heuristic: a segment is a run of
//! non-terminal characters followed by any run of `.`, `!` or `?`. It does not
//! know about abbreviations or decimal numbers, so "Mr. Smith" and "3.5" split
//! in the middle. Callers must tolerate that.

use once_cell::sync::Lazy;
use regex::Regex;

static RE_SENTENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^.!?]+[.!?]*").unwrap());

/// Split chapter text into sentences, keeping terminators attached.
///
/// Segments are returned untrimmed and may be whitespace-only; playback skips
/// those. Text made only of terminators comes back as a single segment.
pub fn split_sentences(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    let sentences: Vec<String> = RE_SENTENCE
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect();
    if sentences.is_empty() {
        return vec![text.to_string()];
    }
    sentences
}

/// Whether a segment carries anything worth sending to the synthesizer.
pub fn is_speakable(sentence: &str) -> bool {
    !sentence.trim().is_empty()
}
