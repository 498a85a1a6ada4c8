//! Query decomposition — splits compound queries into independently
//! searchable sub-queries using cheap lexical heuristics.
//!
//! Strategies are tried in order and the first one that yields at least
//! two usable fragments wins:
//!
//! | strategy | example | confidence |
//! |---|---|---|
//! | combined list | "auth, db, and api handlers" | 0.92 |
//! | conjunction | "auth and logging handlers" | 0.90 |
//! | comma list | "parser, lexer" | 0.85 |
//! | multi-topic | "python session token cache layout" | 0.75 |
//! | multi-question | "How is it built? Where is it stored?" | 0.70 |
//!
//! A query that matches nothing comes back unchanged as its own single
//! sub-query, which makes decomposition idempotent on simple queries.

use cinder_config::DecompositionConfig;
use cinder_core::{DecompositionResult, DecompositionStrategy, SubQuery};
use std::collections::HashSet;
use tracing::debug;

const COMBINED_LIST_CONFIDENCE: f32 = 0.92;
const CONJUNCTION_CONFIDENCE: f32 = 0.90;
const COMMA_LIST_CONFIDENCE: f32 = 0.85;
const MULTI_TOPIC_CONFIDENCE: f32 = 0.75;
const MULTI_QUESTION_CONFIDENCE: f32 = 0.70;

/// Multi-topic splitting only kicks in for queries at least this long.
const MIN_WORDS_FOR_TOPICS: usize = 4;

/// Longest phrases first so "as well as" wins over a bare "as".
const CONJUNCTIONS: &[&[&str]] = &[
    &["in", "addition", "to"],
    &["as", "well", "as"],
    &["together", "with"],
    &["along", "with"],
    &["and"],
    &["or"],
    &["plus"],
];

const INTERROGATIVES: &[&str] = &["how", "what", "where", "when", "why", "which", "who"];

const TOPIC_CLUSTERS: &[(&str, &[&str])] = &[
    ("authentication", &["auth", "authentication", "login", "logout", "session", "token", "jwt", "oauth"]),
    ("logging", &["log", "logging", "logger", "debug", "trace", "warning"]),
    ("database", &["db", "database", "sql", "schema", "migration", "orm"]),
    ("api", &["api", "endpoint", "route", "handler", "rest"]),
    ("testing", &["test", "testing", "mock", "fixture", "assert"]),
    ("memory", &["memory", "cache", "storage", "persist"]),
    ("file", &["file", "path", "directory", "folder"]),
    ("network", &["network", "http", "socket", "connection", "server"]),
    ("ui", &["ui", "view", "component", "render", "button", "form"]),
    ("config", &["config", "configuration", "settings", "options", "environment", "env"]),
];

const LANGUAGES: &[(&str, &[&str])] = &[
    ("python", &["python", "py"]),
    ("javascript", &["javascript", "js", "typescript", "ts"]),
    ("rust", &["rust", "rs"]),
    ("swift", &["swift"]),
];

/// A word of the query with its byte span and normalized form.
struct Word {
    start: usize,
    end: usize,
    norm: String,
}

fn words(text: &str) -> Vec<Word> {
    let mut out = Vec::new();
    let mut start = None;
    for (i, c) in text.char_indices() {
        match (c.is_whitespace(), start) {
            (true, Some(s)) => {
                out.push(word_at(text, s, i));
                start = None;
            }
            (false, None) => start = Some(i),
            _ => {}
        }
    }
    if let Some(s) = start {
        out.push(word_at(text, s, text.len()));
    }
    out
}

fn word_at(text: &str, start: usize, end: usize) -> Word {
    let norm = text[start..end]
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase();
    Word { start, end, norm }
}

fn matches_keyword(token: &str, keyword: &str) -> bool {
    token == keyword
        || token.strip_suffix('s').is_some_and(|t| t == keyword)
        || (keyword.len() >= 4 && token.starts_with(keyword))
}

/// Split on commas outside quotes and brackets.
fn split_commas(query: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth: i32 = 0;
    let mut in_quotes = false;

    for c in query.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = (depth - 1).max(0),
            ',' if depth == 0 && !in_quotes => {
                parts.push(std::mem::take(&mut current).trim().to_string());
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    parts.push(current.trim().to_string());
    parts
}

/// Give fragments that lost their shared words back the missing context.
///
/// "auth" + "logging handlers" -> "auth handlers", "logging handlers"
/// "find files for auth" + "logging" -> "find files for auth", "find files for logging"
fn distribute_shared_words(parts: Vec<String>) -> Vec<String> {
    if parts.len() < 2 {
        return parts;
    }
    let counts: Vec<usize> = parts.iter().map(|p| p.split_whitespace().count()).collect();
    let last = parts.len() - 1;

    let leading_single = counts[..last].iter().all(|&c| c == 1);
    let trailing_single = counts[1..].iter().all(|&c| c == 1);

    if leading_single && counts[last] >= 2 {
        let tail: Vec<&str> = parts[last].split_whitespace().skip(1).collect();
        let suffix = tail.join(" ");
        return parts
            .iter()
            .enumerate()
            .map(|(i, p)| if i < last { format!("{p} {suffix}") } else { p.clone() })
            .collect();
    }

    if trailing_single && counts[0] >= 2 {
        let head: Vec<&str> = parts[0].split_whitespace().collect();
        let prefix = head[..head.len() - 1].join(" ");
        return parts
            .iter()
            .enumerate()
            .map(|(i, p)| if i > 0 { format!("{prefix} {p}") } else { p.clone() })
            .collect();
    }

    parts
}

/// Splits compound queries.
#[derive(Debug, Clone)]
pub struct QueryDecomposer {
    config: DecompositionConfig,
}

impl Default for QueryDecomposer {
    fn default() -> Self {
        Self::new(DecompositionConfig::default())
    }
}

impl QueryDecomposer {
    pub fn new(config: DecompositionConfig) -> Self {
        Self { config }
    }

    pub fn decompose(&self, query: &str) -> DecompositionResult {
        let query = query.trim();
        if query.is_empty() {
            return DecompositionResult::atomic(query);
        }

        let Some((strategy, confidence, parts)) = self.first_match(query) else {
            return DecompositionResult::atomic(query);
        };

        if confidence < self.config.min_confidence {
            debug!(?strategy, confidence, "Decomposition below confidence floor, keeping query atomic");
            return DecompositionResult {
                fell_back: true,
                ..DecompositionResult::atomic(query)
            };
        }

        debug!(?strategy, count = parts.len(), "Query decomposed");
        DecompositionResult {
            is_complex: true,
            sub_queries: parts
                .into_iter()
                .map(|text| SubQuery {
                    text,
                    strategy,
                    confidence,
                })
                .collect(),
            fell_back: false,
        }
    }

    fn first_match(&self, query: &str) -> Option<(DecompositionStrategy, f32, Vec<String>)> {
        let attempts: [(DecompositionStrategy, f32, fn(&Self, &str) -> Vec<String>); 5] = [
            (DecompositionStrategy::ListedItems, COMBINED_LIST_CONFIDENCE, Self::split_combined_list),
            (DecompositionStrategy::Conjunction, CONJUNCTION_CONFIDENCE, Self::split_conjunctions),
            (DecompositionStrategy::ListedItems, COMMA_LIST_CONFIDENCE, Self::split_comma_list),
            (DecompositionStrategy::MultiTopic, MULTI_TOPIC_CONFIDENCE, Self::topic_queries),
            (DecompositionStrategy::MultiQuestion, MULTI_QUESTION_CONFIDENCE, Self::split_questions),
        ];

        attempts.into_iter().find_map(|(strategy, confidence, split)| {
            let parts = self.clean(split(self, query));
            (parts.len() >= 2).then_some((strategy, confidence, parts))
        })
    }

    /// "a, b, and c" / "a, b or c"
    fn split_combined_list(&self, query: &str) -> Vec<String> {
        let mut parts = split_commas(query);
        if parts.len() < 2 {
            return vec![];
        }
        let Some(last) = parts.pop() else {
            return vec![];
        };
        let Some((before, after)) = split_at_first_conjunction(&last, &[&["and"], &["or"]]) else {
            return vec![];
        };
        if !before.is_empty() {
            parts.push(before);
        }
        parts.push(after);
        distribute_shared_words(parts)
    }

    fn split_conjunctions(&self, query: &str) -> Vec<String> {
        let ws = words(query);
        let mut parts = Vec::new();
        let mut segment_start = 0;
        let mut i = 0;

        while i < ws.len() {
            let matched = CONJUNCTIONS.iter().find(|phrase| {
                phrase.len() <= ws.len() - i && phrase.iter().zip(&ws[i..]).all(|(p, w)| w.norm == *p)
            });
            match matched {
                Some(phrase) => {
                    parts.push(query[segment_start..ws[i].start].trim().to_string());
                    let last_word = &ws[i + phrase.len() - 1];
                    segment_start = last_word.end;
                    i += phrase.len();
                }
                None => i += 1,
            }
        }
        if parts.is_empty() {
            return vec![];
        }
        parts.push(query[segment_start..].trim().to_string());
        parts.retain(|p| !p.is_empty());
        distribute_shared_words(parts)
    }

    fn split_comma_list(&self, query: &str) -> Vec<String> {
        let parts: Vec<String> = split_commas(query).into_iter().filter(|p| !p.is_empty()).collect();
        if parts.len() < 2 {
            return vec![];
        }
        distribute_shared_words(parts)
    }

    fn topic_queries(&self, query: &str) -> Vec<String> {
        let ws = words(query);
        if ws.len() < MIN_WORDS_FOR_TOPICS {
            return vec![];
        }
        let tokens: Vec<&str> = ws.iter().map(|w| w.norm.as_str()).collect();

        let topics: Vec<&str> = TOPIC_CLUSTERS
            .iter()
            .filter(|(_, keywords)| {
                tokens
                    .iter()
                    .any(|t| keywords.iter().any(|k| matches_keyword(t, k)))
            })
            .map(|(topic, _)| *topic)
            .collect();
        if topics.len() < 2 {
            return vec![];
        }

        let language = LANGUAGES
            .iter()
            .find(|(_, aliases)| tokens.iter().any(|t| aliases.contains(t)))
            .map(|(lang, _)| *lang);

        topics
            .into_iter()
            .map(|topic| match language {
                Some(lang) => format!("{lang} {topic}"),
                None => topic.to_string(),
            })
            .collect()
    }

    /// Split before interrogatives that open a clause.
    fn split_questions(&self, query: &str) -> Vec<String> {
        let ws = words(query);
        let starts: Vec<usize> = ws
            .iter()
            .enumerate()
            .filter(|(i, w)| {
                INTERROGATIVES.contains(&w.norm.as_str())
                    && (*i == 0 || query[..w.start].trim_end().ends_with(['?', '.', '!', ';']))
            })
            .map(|(_, w)| w.start)
            .collect();
        if starts.len() < 2 {
            return vec![];
        }

        let mut bounds = starts.clone();
        bounds[0] = 0;
        bounds.push(query.len());
        bounds
            .windows(2)
            .map(|w| query[w[0]..w[1]].trim().to_string())
            .collect()
    }

    /// Trim, strip trailing punctuation, drop short fragments and
    /// case-insensitive duplicates, cap the count.
    fn clean(&self, parts: Vec<String>) -> Vec<String> {
        let mut seen = HashSet::new();
        parts
            .into_iter()
            .map(|p| {
                let collapsed = p.split_whitespace().collect::<Vec<_>>().join(" ");
                collapsed
                    .trim_end_matches(['?', '.', '!', ',', ';', ':'])
                    .trim()
                    .to_string()
            })
            .filter(|p| p.chars().count() >= self.config.min_sub_query_chars)
            .filter(|p| seen.insert(p.to_lowercase()))
            .take(self.config.max_sub_queries)
            .collect()
    }
}

/// Split `text` around its first conjunction from `phrases`.
fn split_at_first_conjunction(text: &str, phrases: &[&[&str]]) -> Option<(String, String)> {
    let ws = words(text);
    for i in 0..ws.len() {
        for phrase in phrases {
            if phrase.len() <= ws.len() - i && phrase.iter().zip(&ws[i..]).all(|(p, w)| w.norm == *p) {
                let before = text[..ws[i].start].trim().to_string();
                let after = text[ws[i + phrase.len() - 1].end..].trim().to_string();
                if after.is_empty() {
                    return None;
                }
                return Some((before, after));
            }
        }
    }
    None
}
