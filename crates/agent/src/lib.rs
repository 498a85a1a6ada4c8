//! The request pipeline of cinder.
//!
//! A request flows through the [`Orchestrator`]:
//!
//! 1. **Admit** against current memory (degrade immediately at CRITICAL)
//! 2. **Decompose** the query into independently searchable parts
//! 3. **Retrieve** from every source concurrently, tolerating failures
//! 4. **Rerank** the merged candidates for the query type
//! 5. **Budget** the context window across prompt sections
//! 6. **Generate** with the local engine, retrying once on a smaller budget
//! 7. **Escalate** low-confidence answers when allowed

pub mod context;
pub mod orchestrator;

pub use context::{
    AssembledContext, ContextBudget, ContextBudgetAllocator, ContextUsage, DropInfo, EvidenceItem, QueryClassifier,
    Section, SectionContents, SectionUsage,
};
pub use orchestrator::{DegradedReason, Orchestrator, OrchestratorStats, Response, UserContext};
