//! Section truncation policies.
//!
//! All three functions return text whose [`estimate_tokens`] is at most the
//! requested token count.

use crate::context::token::{bytes_for_tokens, estimate_tokens};

pub const MARKER: &str = "...";

/// Below this many bytes a marker costs more than it tells.
const MIN_MARKED_BYTES: usize = 8;

/// Longest prefix of `s` that is at most `max` bytes on a char boundary.
pub fn floor_char(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Byte offsets just past each sentence terminator that is followed by
/// whitespace or the end of the text.
pub fn sentence_ends(text: &str) -> Vec<usize> {
    let mut ends = Vec::new();
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            let next_is_break = chars.peek().is_none_or(|(_, n)| n.is_whitespace());
            if next_is_break {
                ends.push(i + c.len_utf8());
            }
        }
    }
    ends
}

/// Keep the beginning of `text`.
///
/// Cuts at the last sentence end past 70% of the allowance, else the last
/// word break past 80%, else mid-word, then appends [`MARKER`].
pub fn preserve_start(text: &str, max_tokens: usize) -> (String, bool) {
    if estimate_tokens(text) <= max_tokens {
        return (text.to_string(), false);
    }
    let max_bytes = bytes_for_tokens(max_tokens);
    if max_bytes < MIN_MARKED_BYTES {
        return (floor_char(text, max_bytes).to_string(), true);
    }

    let allowance = max_bytes - MARKER.len();
    let head = floor_char(text, allowance);
    let sentence = sentence_ends(text)
        .into_iter()
        .filter(|&e| e <= head.len())
        .next_back()
        .filter(|&e| e * 10 >= allowance * 7);
    let word = || {
        head.rfind(char::is_whitespace)
            .filter(|&i| i * 10 >= allowance * 8)
    };
    let cut = sentence.or_else(word).unwrap_or(head.len());

    let mut out = head[..cut].trim_end().to_string();
    out.push_str(MARKER);
    (out, true)
}

/// Keep the end of `text`, prefixed with [`MARKER`].
pub fn preserve_end(text: &str, max_tokens: usize) -> (String, bool) {
    if estimate_tokens(text) <= max_tokens {
        return (text.to_string(), false);
    }
    let max_bytes = bytes_for_tokens(max_tokens);
    let (marker, allowance) = if max_bytes < MIN_MARKED_BYTES {
        ("", max_bytes)
    } else {
        (MARKER, max_bytes - MARKER.len())
    };

    let mut start = text.len().saturating_sub(allowance);
    while !text.is_char_boundary(start) {
        start += 1;
    }
    let mut tail = &text[start..];
    // Start on a word if one begins within the first fifth.
    if let Some(i) = tail.find(char::is_whitespace) {
        if i * 5 <= allowance {
            tail = &tail[i..];
        }
    }
    (format!("{marker}{}", tail.trim_start()), true)
}

/// Longest prefix of `text` ending on a sentence boundary that fits in
/// `max_tokens`. `None` when not even the first sentence fits.
pub fn sentence_prefix(text: &str, max_tokens: usize) -> Option<&str> {
    sentence_ends(text)
        .into_iter()
        .rev()
        .map(|e| &text[..e])
        .find(|prefix| estimate_tokens(prefix) <= max_tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROSE: &str = "The allocator runs first. It reserves the query floor. \
                         Then it fills each section in order until nothing is left.";

    #[test]
    fn fitting_text_is_untouched() {
        assert_eq!(preserve_start("short", 10), ("short".to_string(), false));
        assert_eq!(preserve_end("short", 10), ("short".to_string(), false));
    }

    #[test]
    fn preserve_start_snaps_to_sentence() {
        let (out, truncated) = preserve_start(PROSE, 15);
        assert!(truncated);
        assert_eq!(out, "The allocator runs first. It reserves the query floor....");
        assert!(estimate_tokens(&out) <= 15);
    }

    #[test]
    fn preserve_start_falls_back_to_word() {
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa lambda";
        let (out, _) = preserve_start(text, 10);
        assert_eq!(out, "alpha beta gamma delta epsilon zeta...");
        assert!(estimate_tokens(&out) <= 10);
        let body = out.trim_end_matches(MARKER);
        assert!(text.starts_with(body));
        assert!(text[body.len()..].starts_with(' '));
    }

    #[test]
    fn preserve_start_tiny_budget_hard_cuts() {
        let (out, truncated) = preserve_start("abcdefghij", 1);
        assert!(truncated);
        assert_eq!(out, "abcd");
    }

    #[test]
    fn preserve_start_respects_char_boundaries() {
        let text = "é".repeat(40);
        let (out, _) = preserve_start(&text, 5);
        assert!(estimate_tokens(&out) <= 5);
        assert!(out.ends_with(MARKER));
    }

    #[test]
    fn preserve_end_keeps_tail() {
        let (out, truncated) = preserve_end(PROSE, 10);
        assert!(truncated);
        assert!(out.starts_with(MARKER));
        assert!(out.ends_with("nothing is left."));
        assert!(estimate_tokens(&out) <= 10);
    }

    #[test]
    fn sentence_ends_ignore_decimals() {
        assert_eq!(sentence_ends("Pi is 3.14 today. Yes"), vec![17]);
        assert_eq!(sentence_ends("Done!"), vec![5]);
    }

    #[test]
    fn sentence_prefix_picks_longest_fitting() {
        assert_eq!(sentence_prefix(PROSE, 14), Some("The allocator runs first. It reserves the query floor."));
        assert_eq!(sentence_prefix(PROSE, 3), None);
        assert_eq!(sentence_prefix("no terminator here", 100), None);
    }
}
