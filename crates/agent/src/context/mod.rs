//! Context assembly: token estimation, query classification, truncation
//! and the section budget allocator.

pub mod allocator;
pub mod classify;
pub mod token;
pub mod truncate;

pub use allocator::{
    AssembledContext, ContextBudget, ContextBudgetAllocator, ContextUsage, DropInfo, EvidenceItem, Section,
    SectionContents, SectionUsage, EMPTY_QUERY_PLACEHOLDER,
};
pub use classify::QueryClassifier;
pub use token::estimate_tokens;
