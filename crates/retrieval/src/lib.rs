//! Retrieval pipeline for cinder: knowledge sources, parallel fan-out,
//! query decomposition and reranking.

pub mod corpus;
pub mod decompose;
pub mod fanout;
pub mod keyword;
pub mod rerank;
pub mod source;
pub mod vector;

pub use corpus::{Corpus, CorpusItem};
pub use decompose::QueryDecomposer;
pub use fanout::{FanoutOutcome, RetrievalFanout, SourceBatch, SourceFailure};
pub use keyword::KeywordMatcher;
pub use rerank::{Reranker, ScoredResult, SubScores};
pub use source::{IndexedSource, SourceOptions};
pub use vector::{cosine_similarity, vector_search};
