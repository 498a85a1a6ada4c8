//! Query type detection.
//!
//! Patterns are checked in a fixed order (code, recall, reasoning,
//! project, roleplay) and the first match wins. Anything else is chat.

use cinder_core::QueryType;
use regex_lite::Regex;

const PATTERNS: &[(QueryType, &str)] = &[
    (
        QueryType::Code,
        r"(?i)\b(code|coding|function|method|class|struct|trait|enum|compile[rsd]?|bug|debug|stack ?trace|exception|refactor|implement|syntax|variable|regex|api|endpoint|unit test|rust|python|javascript|typescript|swift)\b|`|\w\(\)|\.(rs|py|js|ts|swift|go|java)\b",
    ),
    (
        QueryType::Recall,
        r"(?i)\b(remember|recall|last time|earlier today|yesterday|previously|you said|i told you|did i (say|mention|tell)|what did (i|we)|my name)\b",
    ),
    (
        QueryType::Reasoning,
        r"(?i)\b(why|explain|analy[sz]e|compare|trade-?offs?|pros and cons|step by step|reason(ing)?|prove|evaluate|should i)\b",
    ),
    (
        QueryType::Project,
        r"(?i)\b(project|roadmap|milestones?|deadline|sprint|backlog|architecture|codebase|repo(sitory)?|plan for)\b",
    ),
    (
        QueryType::Roleplay,
        r"(?i)\b(pretend|role-?play|act as|you are now|in character|imagine you are|let's play)\b",
    ),
];

/// Regex-based query classifier.
#[derive(Debug, Clone)]
pub struct QueryClassifier {
    patterns: Vec<(QueryType, Regex)>,
}

impl Default for QueryClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryClassifier {
    pub fn new() -> Self {
        let patterns = PATTERNS
            .iter()
            .filter_map(|(query_type, pattern)| Regex::new(pattern).ok().map(|re| (*query_type, re)))
            .collect();
        Self { patterns }
    }

    pub fn classify(&self, query: &str) -> QueryType {
        self.patterns
            .iter()
            .find(|(_, re)| re.is_match(query))
            .map(|(query_type, _)| *query_type)
            .unwrap_or_default()
    }
}
