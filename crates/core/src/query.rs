//! Query classification and decomposition types.

use serde::{Deserialize, Serialize};

/// What kind of request a query is. Drives both per-source weighting in the
/// reranker and per-section weighting in the context budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    #[default]
    Chat,
    Code,
    Recall,
    Reasoning,
    Roleplay,
    Project,
}

impl QueryType {
    pub const ALL: [QueryType; 6] = [
        QueryType::Chat,
        QueryType::Code,
        QueryType::Recall,
        QueryType::Reasoning,
        QueryType::Roleplay,
        QueryType::Project,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            QueryType::Chat => "chat",
            QueryType::Code => "code",
            QueryType::Recall => "recall",
            QueryType::Reasoning => "reasoning",
            QueryType::Roleplay => "roleplay",
            QueryType::Project => "project",
        }
    }
}

impl std::fmt::Display for QueryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QueryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QueryType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown query type: {s}"))
    }
}

/// How a sub-query was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecompositionStrategy {
    /// Not decomposed.
    Atomic,
    /// "X and Y"
    Conjunction,
    /// "A, B, and C"
    ListedItems,
    /// Several topic clusters in one query.
    MultiTopic,
    /// Several interrogative clauses.
    MultiQuestion,
}

/// One independently searchable fragment of a user query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubQuery {
    pub text: String,
    pub strategy: DecompositionStrategy,
    /// Confidence in [0, 1].
    pub confidence: f32,
}

impl SubQuery {
    pub fn atomic(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            strategy: DecompositionStrategy::Atomic,
            confidence: 1.0,
        }
    }
}

/// Output of query decomposition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecompositionResult {
    /// True when more than one sub-query was produced.
    pub is_complex: bool,

    /// Never empty.
    pub sub_queries: Vec<SubQuery>,

    /// A pattern matched but with confidence below the configured
    /// minimum, so the query was kept atomic.
    #[serde(default)]
    pub fell_back: bool,
}

impl DecompositionResult {
    pub fn atomic(query: impl Into<String>) -> Self {
        Self {
            is_complex: false,
            sub_queries: vec![SubQuery::atomic(query)],
            fell_back: false,
        }
    }

    pub fn texts(&self) -> Vec<&str> {
        self.sub_queries.iter().map(|q| q.text.as_str()).collect()
    }
}
