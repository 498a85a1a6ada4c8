//! Keyword matching with identifier splitting and light stemming.
//!
//! Used both as the lexical fallback path of a source and as the
//! keyword-overlap factor of the reranker.

use std::collections::BTreeSet;

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had", "do",
    "does", "did", "will", "would", "could", "should", "may", "might", "must", "shall", "can", "need",
    "to", "of", "in", "for", "on", "with", "at", "by", "from", "as", "into", "through", "during",
    "before", "after", "above", "below", "between", "under", "again", "further", "then", "once",
    "here", "there", "when", "where", "why", "how", "all", "each", "few", "more", "most", "other",
    "some", "such", "no", "nor", "not", "only", "own", "same", "so", "than", "too", "very", "just",
    "but", "and", "or", "if", "this", "that", "these", "those", "what", "which", "who", "whom", "i",
    "me", "my", "we", "our", "you", "your", "he", "him", "his", "she", "her", "it", "its", "they",
    "them", "their",
];

const STEM_SUFFIXES: &[&str] = &["ing", "ed", "ly", "er", "est", "ness", "ment", "tion", "sion", "es", "s"];

/// Text beyond this many bytes is ignored when tokenizing.
const MAX_SCAN_BYTES: usize = 32 * 1024;

/// Strip one common suffix, keeping at least three characters of stem.
pub fn stem(word: &str) -> &str {
    for suffix in STEM_SUFFIXES {
        if word.len() > suffix.len() + 2 && word.ends_with(suffix) {
            return &word[..word.len() - suffix.len()];
        }
    }
    word
}

pub fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(&word)
}

/// Split an identifier on camelCase, acronym and snake_case boundaries.
fn split_identifier(token: &str) -> Vec<String> {
    let chars: Vec<char> = token.chars().collect();
    let mut parts = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        if c == '_' {
            if !current.is_empty() {
                parts.push(std::mem::take(&mut current));
            }
            continue;
        }
        let prev = if i > 0 { Some(chars[i - 1]) } else { None };
        let next = chars.get(i + 1).copied();
        let boundary = match prev {
            // searchDocuments -> search | Documents
            Some(p) if p.is_lowercase() && c.is_uppercase() => true,
            // HTTPResponse -> HTTP | Response
            Some(p) if p.is_uppercase() && c.is_uppercase() && next.is_some_and(|n| n.is_lowercase()) => true,
            _ => false,
        };
        if boundary && !current.is_empty() {
            parts.push(std::mem::take(&mut current));
        }
        current.push(c);
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

/// Stateless keyword matcher.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordMatcher;

impl KeywordMatcher {
    pub fn new() -> Self {
        Self
    }

    /// Normalized tokens: identifiers plus their parts, lowercased, without
    /// stopwords or single characters, stemmed, deduplicated in order.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let text = truncate_bytes(text, MAX_SCAN_BYTES);
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();

        for raw in text
            .split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .filter(|t| t.starts_with(|c: char| c.is_alphabetic() || c == '_'))
        {
            let parts = split_identifier(raw);
            let whole = raw.to_lowercase();
            let candidates = parts
                .into_iter()
                .map(|p| p.to_lowercase())
                .filter(|p| *p != whole)
                .chain(std::iter::once(whole.clone()));

            for token in candidates {
                if token.chars().count() <= 1 || is_stopword(&token) {
                    continue;
                }
                let stemmed = stem(&token).to_string();
                if seen.insert(stemmed.clone()) {
                    out.push(stemmed);
                }
            }
        }
        out
    }

    /// Fraction of query tokens found in `text`, in [0, 1].
    ///
    /// Exact token matches count 1, prefix matches 0.5 each.
    pub fn match_score(&self, query: &str, text: &str) -> f32 {
        let query_tokens: BTreeSet<String> = self.tokenize(query).into_iter().collect();
        let text_tokens: BTreeSet<String> = self.tokenize(text).into_iter().collect();
        self.score_tokens(&query_tokens, &text_tokens)
    }

    pub(crate) fn score_tokens(&self, query_tokens: &BTreeSet<String>, text_tokens: &BTreeSet<String>) -> f32 {
        if query_tokens.is_empty() || text_tokens.is_empty() {
            return 0.0;
        }

        let exact = query_tokens.intersection(text_tokens).count() as f32;
        let mut fuzzy = 0.0f32;
        for q in query_tokens {
            for t in text_tokens {
                if q != t
                    && q.chars().count() >= 3
                    && t.chars().count() >= 3
                    && (t.starts_with(q.as_str()) || q.starts_with(t.as_str()))
                {
                    fuzzy += 0.5;
                }
            }
        }

        ((exact + fuzzy) / query_tokens.len() as f32).min(1.0)
    }
}

/// Longest prefix of `s` that is at most `max` bytes and ends on a char boundary.
pub(crate) fn truncate_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
