//! Context budget allocation — fits instructions, facts, evidence, history
//! and notes into a fixed token budget.
//!
//! # Algorithm
//!
//! 1. Reserve a floor for the literal query (`query_floor_tokens`, or the
//!    whole rendered query if it is shorter).
//! 2. Allocate the system instructions in full. They are only cut when they
//!    alone do not fit in what is left.
//! 3. Complete the query allocation.
//! 4. Split the remainder across the variable sections by their base ratio
//!    times the query type's multiplier, normalized.
//! 5. Sections whose content was shorter than their share give the rest
//!    back; truncated sections are re-offered the pool in priority order:
//!    user facts, evidence, history, working notes.
//!
//! # Section layout (attention order)
//!
//! | Section | Truncation |
//! |---|---|
//! | System | keep the start |
//! | User Facts | whole facts, in order |
//! | Working Notes | keep the start |
//! | Evidence | whole items by rank; the first item only cut at a sentence end |
//! | Conversation | newest whole turns; the newest turn keeps its end |
//! | Query | keep the start; rendered bare under tiny budgets |
//!
//! The sum of per-section token counts never exceeds the budget, and the
//! query section is never empty, so the assembled context is never empty.

use crate::context::classify::QueryClassifier;
use crate::context::token::{estimate_tokens, estimate_turn_tokens};
use crate::context::truncate::{preserve_end, preserve_start, sentence_prefix};
use cinder_config::BudgetConfig;
use cinder_core::{QueryType, Role, Turn};
use cinder_retrieval::ScoredResult;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Shown in place of an empty query.
pub const EMPTY_QUERY_PLACEHOLDER: &str = "(no query)";

// ── Types ─────────────────────────────────────────────────────────────────

/// A context section. Variants are declared in attention order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    SystemInstructions,
    UserFacts,
    WorkingNotes,
    RetrievedEvidence,
    ConversationHistory,
    Query,
}

impl Section {
    pub const ALL: [Section; 6] = [
        Section::SystemInstructions,
        Section::UserFacts,
        Section::WorkingNotes,
        Section::RetrievedEvidence,
        Section::ConversationHistory,
        Section::Query,
    ];

    /// Order in which variable sections are offered spare tokens.
    pub const VARIABLE_PRIORITY: [Section; 4] = [
        Section::UserFacts,
        Section::RetrievedEvidence,
        Section::ConversationHistory,
        Section::WorkingNotes,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Section::SystemInstructions => "System",
            Section::UserFacts => "User Facts",
            Section::WorkingNotes => "Working Notes",
            Section::RetrievedEvidence => "Evidence",
            Section::ConversationHistory => "Conversation",
            Section::Query => "Query",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Section::SystemInstructions => "system_instructions",
            Section::UserFacts => "user_facts",
            Section::WorkingNotes => "working_notes",
            Section::RetrievedEvidence => "retrieved_evidence",
            Section::ConversationHistory => "conversation_history",
            Section::Query => "query",
        }
    }

    fn header(self) -> String {
        format!("[{}]\n", self.label())
    }
}

impl std::fmt::Display for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ranked piece of retrieved evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    /// Source name.
    pub source: String,
    /// File path, title or other human-readable reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    pub text: String,
    pub score: f32,
}

impl EvidenceItem {
    pub fn new(source: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            reference: None,
            text: text.into(),
            score: 0.0,
        }
    }

    fn prefix(&self, rank: usize) -> String {
        match &self.reference {
            Some(r) => format!("{rank}. ({}: {r}) ", self.source),
            None => format!("{rank}. ({}) ", self.source),
        }
    }

    fn render(&self, rank: usize) -> String {
        format!("{}{}\n", self.prefix(rank), self.text.trim())
    }
}

impl From<&ScoredResult> for EvidenceItem {
    fn from(r: &ScoredResult) -> Self {
        let c = &r.candidate;
        let reference = c
            .location
            .clone()
            .or_else(|| (!c.title.is_empty()).then(|| c.title.clone()));
        Self {
            source: c.source.clone(),
            reference,
            text: c.text.clone(),
            score: r.final_score,
        }
    }
}

/// Raw content for every section, before budgeting.
#[derive(Debug, Clone, Default)]
pub struct SectionContents {
    pub system_instructions: String,
    /// Corrections and stated preferences, most important first.
    pub user_facts: Vec<String>,
    pub working_notes: String,
    /// Ranked best first.
    pub evidence: Vec<EvidenceItem>,
    /// Chronological, oldest first.
    pub history: Vec<Turn>,
    pub query: String,
}

/// Final token allocation per section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextBudget {
    pub total: usize,
    pub allocations: Vec<(Section, usize)>,
}

impl ContextBudget {
    pub fn allocated(&self, section: Section) -> usize {
        self.allocations
            .iter()
            .find(|(s, _)| *s == section)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }

    pub fn allocated_total(&self) -> usize {
        self.allocations.iter().map(|(_, n)| n).sum()
    }
}

/// Statistics for a single section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionUsage {
    pub section: Section,
    /// Share computed from ratios and multipliers, or the full need for
    /// fixed sections.
    pub target: usize,
    /// Tokens granted after redistribution.
    pub allocated: usize,
    /// Tokens actually rendered.
    pub used: usize,
    pub items_included: usize,
    pub items_total: usize,
    pub truncated: bool,
}

/// Content dropped from a section during budget enforcement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropInfo {
    pub section: Section,
    pub items_dropped: usize,
    pub tokens_dropped: usize,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextUsage {
    pub query_type: QueryType,
    /// Requested budget.
    pub total_tokens: usize,
    /// Sum of per-section token counts.
    pub total_used: usize,
    /// 0.0 to 100.0
    pub utilization_pct: f32,
    pub sections: Vec<SectionUsage>,
    pub drops: Vec<DropInfo>,
}

impl ContextUsage {
    pub fn section(&self, section: Section) -> Option<&SectionUsage> {
        self.sections.iter().find(|s| s.section == section)
    }
}

/// The assembled prompt context.
#[derive(Debug, Clone)]
pub struct AssembledContext {
    pub text: String,
    pub budget: ContextBudget,
    pub usage: ContextUsage,
}

// ── Rendering ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
struct Rendered {
    text: String,
    used: usize,
    included: usize,
    total: usize,
    truncated: bool,
    /// Tokens the untruncated section would have needed.
    need: usize,
}

impl Rendered {
    fn empty(total: usize, need: usize) -> Self {
        Self {
            total,
            need,
            truncated: total > 0,
            ..Self::default()
        }
    }

    fn finish(text: String, included: usize, total: usize, truncated: bool, need: usize) -> Self {
        if included == 0 {
            return Self::empty(total, need);
        }
        Self {
            used: estimate_tokens(&text),
            text,
            included,
            total,
            truncated,
            need,
        }
    }
}

/// Header plus a single block of text cut from the start.
fn render_block(section: Section, text: &str, budget: usize) -> Rendered {
    let text = text.trim();
    if text.is_empty() {
        return Rendered::default();
    }
    let header = section.header();
    let need = estimate_tokens(&format!("{header}{text}\n"));
    let room = budget.saturating_sub(estimate_tokens(&header) + 1);
    if room == 0 {
        return Rendered::empty(1, need);
    }
    let (body, truncated) = preserve_start(text, room);
    if body.is_empty() {
        return Rendered::empty(1, need);
    }
    Rendered::finish(format!("{header}{body}\n"), 1, 1, truncated, need)
}

fn render_facts(facts: &[String], budget: usize) -> Rendered {
    let lines: Vec<String> = facts
        .iter()
        .map(|f| f.trim())
        .filter(|f| !f.is_empty())
        .map(|f| format!("- {f}\n"))
        .collect();
    if lines.is_empty() {
        return Rendered::default();
    }
    let header = Section::UserFacts.header();
    let need = estimate_tokens(&header) + lines.iter().map(|l| estimate_tokens(l)).sum::<usize>();

    let mut used = estimate_tokens(&header);
    let mut out = header;
    let mut included = 0;
    for line in &lines {
        let cost = estimate_tokens(line);
        if used + cost <= budget {
            out.push_str(line);
            used += cost;
            included += 1;
        }
    }
    Rendered::finish(out, included, lines.len(), included < lines.len(), need)
}

fn render_evidence(items: &[EvidenceItem], budget: usize) -> Rendered {
    let items: Vec<&EvidenceItem> = items.iter().filter(|i| !i.text.trim().is_empty()).collect();
    if items.is_empty() {
        return Rendered::default();
    }
    let header = Section::RetrievedEvidence.header();
    let need = estimate_tokens(&header)
        + items
            .iter()
            .enumerate()
            .map(|(i, item)| estimate_tokens(&item.render(i + 1)))
            .sum::<usize>();

    let mut used = estimate_tokens(&header);
    let mut out = header;
    let mut included = 0;
    let mut truncated = false;

    for (i, item) in items.iter().enumerate() {
        let line = item.render(i + 1);
        let cost = estimate_tokens(&line);
        if used + cost <= budget {
            out.push_str(&line);
            used += cost;
            included += 1;
            continue;
        }
        truncated = true;
        if included == 0 {
            // The best item alone is too large: keep its leading sentences.
            let prefix = item.prefix(i + 1);
            let room = budget.saturating_sub(used + estimate_tokens(&prefix) + 1);
            if let Some(sentences) = sentence_prefix(item.text.trim(), room) {
                out.push_str(&format!("{prefix}{sentences}\n"));
                included += 1;
            }
        }
        break;
    }
    Rendered::finish(out, included, items.len(), truncated, need)
}

fn render_history(turns: &[Turn], budget: usize) -> Rendered {
    let turns: Vec<&Turn> = turns
        .iter()
        .filter(|t| t.role != Role::System && !t.content.trim().is_empty())
        .collect();
    if turns.is_empty() {
        return Rendered::default();
    }
    let header = Section::ConversationHistory.header();
    let header_tokens = estimate_tokens(&header);
    let need = header_tokens + turns.iter().map(|t| estimate_turn_tokens(t)).sum::<usize>();

    let mut used = header_tokens;
    let mut kept: Vec<String> = Vec::new();
    let mut truncated = false;

    for turn in turns.iter().rev() {
        let cost = estimate_turn_tokens(turn);
        if used + cost <= budget {
            kept.push(format!("{}\n", turn.render()));
            used += cost;
            continue;
        }
        truncated = true;
        if kept.is_empty() {
            let label = format!("{}: ", turn.role.label());
            let room = budget.saturating_sub(used + estimate_tokens(&label) + 1);
            if room > 0 {
                let (tail, _) = preserve_end(turn.content.trim(), room);
                if !tail.is_empty() {
                    kept.push(format!("{label}{tail}\n"));
                }
            }
        }
        break;
    }

    kept.reverse();
    let included = kept.len();
    Rendered::finish(format!("{header}{}", kept.concat()), included, turns.len(), truncated, need)
}

fn render_query(query: &str, budget: usize) -> Rendered {
    let header = Section::Query.header();
    let full = format!("{header}{query}\n");
    let need = estimate_tokens(&full);
    if need <= budget {
        return Rendered::finish(full, 1, 1, false, need);
    }
    let header_tokens = estimate_tokens(&header);
    if budget > header_tokens + 1 {
        let (body, _) = preserve_start(query, budget - header_tokens - 1);
        return Rendered::finish(format!("{header}{body}\n"), 1, 1, true, need);
    }
    // Too small for a header: the bare query text.
    let (body, _) = preserve_start(query, budget.max(1));
    Rendered::finish(body, 1, 1, true, need)
}

// ── Allocator ─────────────────────────────────────────────────────────────

/// The context budget allocator. Stateless; create one and reuse it.
#[derive(Debug, Clone, Default)]
pub struct ContextBudgetAllocator {
    config: BudgetConfig,
    classifier: QueryClassifier,
}

impl ContextBudgetAllocator {
    pub fn new(config: BudgetConfig) -> Self {
        Self {
            config,
            classifier: QueryClassifier::new(),
        }
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    /// Fit `contents` into `total_tokens`.
    ///
    /// `query_type` is detected from the query when not given. A budget of
    /// zero is treated as one token so that the query is always present.
    pub fn allocate(
        &self,
        total_tokens: usize,
        query_type: Option<QueryType>,
        contents: &SectionContents,
    ) -> AssembledContext {
        let query_type = query_type.unwrap_or_else(|| self.classifier.classify(&contents.query));
        let total = total_tokens.max(1);
        let query = match contents.query.trim() {
            "" => EMPTY_QUERY_PLACEHOLDER,
            q => q,
        };

        // ── Fixed sections ────────────────────────────────────────────────
        let query_need = render_query(query, usize::MAX).need;
        let floor = self.config.query_floor_tokens.min(query_need).max(1).min(total);
        let mut remaining = total - floor;

        let system_need = render_block(Section::SystemInstructions, &contents.system_instructions, usize::MAX).need;
        let system = render_block(
            Section::SystemInstructions,
            &contents.system_instructions,
            system_need.min(remaining),
        );
        remaining -= system.used;

        let extra = (query_need - floor.min(query_need)).min(remaining);
        let rendered_query = render_query(query, floor + extra);
        remaining = (remaining + floor).saturating_sub(rendered_query.used);

        // ── Variable sections ─────────────────────────────────────────────
        let ratios = &self.config.ratios;
        let m = self.config.multipliers_for(query_type);
        let weights = [
            ratios.user_facts * m.user_facts,
            ratios.retrieved_evidence * m.retrieved_evidence,
            ratios.conversation_history * m.conversation_history,
            ratios.working_notes * m.working_notes,
        ];
        let weight_sum: f64 = weights.iter().map(|w| f64::from(w.max(0.0))).sum();
        let targets: [usize; 4] = weights.map(|w| {
            if weight_sum > 0.0 {
                (remaining as f64 * f64::from(w.max(0.0)) / weight_sum).floor() as usize
            } else {
                0
            }
        });

        let render_variable = |section: Section, budget: usize| -> Rendered {
            match section {
                Section::UserFacts => render_facts(&contents.user_facts, budget),
                Section::RetrievedEvidence => render_evidence(&contents.evidence, budget),
                Section::ConversationHistory => render_history(&contents.history, budget),
                _ => render_block(Section::WorkingNotes, &contents.working_notes, budget),
            }
        };

        let mut variable: Vec<(Section, usize, usize, Rendered)> = Section::VARIABLE_PRIORITY
            .iter()
            .zip(targets)
            .map(|(&section, target)| {
                let rendered = render_variable(section, target);
                let allocated = if rendered.truncated { target } else { rendered.used };
                (section, target, allocated, rendered)
            })
            .collect();

        let mut pool = remaining.saturating_sub(variable.iter().map(|(_, _, a, _)| a).sum::<usize>());
        for (section, _, allocated, rendered) in variable.iter_mut() {
            if pool == 0 {
                break;
            }
            if !rendered.truncated {
                continue;
            }
            let offer = *allocated + pool;
            let again = render_variable(*section, offer);
            let granted = if again.truncated { offer } else { again.used.max(*allocated) };
            pool = offer - granted;
            *allocated = granted;
            *rendered = again;
        }

        // ── Assemble in attention order ───────────────────────────────────
        let mut entries: Vec<(Section, usize, usize, Rendered)> = vec![
            (Section::SystemInstructions, system_need, system.used, system),
            (Section::Query, query_need, rendered_query.used, rendered_query),
        ];
        entries.extend(variable);
        entries.sort_by_key(|(section, ..)| *section);

        let mut text = String::new();
        let mut sections = Vec::with_capacity(entries.len());
        let mut allocations = Vec::with_capacity(entries.len());
        let mut drops = Vec::new();

        for (section, target, allocated, rendered) in entries {
            text.push_str(&rendered.text);
            allocations.push((section, allocated));
            if rendered.truncated {
                drops.push(DropInfo {
                    section,
                    items_dropped: rendered.total - rendered.included,
                    tokens_dropped: rendered.need.saturating_sub(rendered.used),
                    reason: drop_reason(section).into(),
                });
            }
            sections.push(SectionUsage {
                section,
                target,
                allocated,
                used: rendered.used,
                items_included: rendered.included,
                items_total: rendered.total,
                truncated: rendered.truncated,
            });
        }

        let total_used: usize = sections.iter().map(|s| s.used).sum();
        let utilization_pct = (total_used as f32 / total as f32) * 100.0;

        debug!(
            query_type = %query_type,
            budget = total,
            used = total_used,
            dropped_sections = drops.len(),
            "Context assembled"
        );

        AssembledContext {
            text,
            budget: ContextBudget { total, allocations },
            usage: ContextUsage {
                query_type,
                total_tokens: total,
                total_used,
                utilization_pct,
                sections,
                drops,
            },
        }
    }
}

fn drop_reason(section: Section) -> &'static str {
    match section {
        Section::SystemInstructions => "Instructions cut to fit the budget",
        Section::UserFacts => "Facts that did not fit were dropped",
        Section::WorkingNotes => "Notes cut from the end",
        Section::RetrievedEvidence => "Lowest-ranked items dropped",
        Section::ConversationHistory => "Oldest turns dropped",
        Section::Query => "Query cut to fit the budget",
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::truncate::MARKER;

    fn allocator() -> ContextBudgetAllocator {
        ContextBudgetAllocator::default()
    }

    fn sentence(n: usize) -> String {
        format!("This is sentence number {n} of the evidence text. ")
    }

    fn rich_contents() -> SectionContents {
        SectionContents {
            system_instructions: "You are a concise local assistant.".into(),
            user_facts: (0..40).map(|i| format!("The user stated preference number {i}")).collect(),
            working_notes: "step ".repeat(400),
            evidence: (0..40)
                .map(|i| EvidenceItem::new("code", (0..5).map(sentence).collect::<String>() + &i.to_string()))
                .collect(),
            history: (0..60)
                .map(|i| if i % 2 == 0 { Turn::user(format!("question {i} ").repeat(10)) } else { Turn::assistant(format!("answer {i} ").repeat(10)) })
                .collect(),
            query: "How do the auth handlers validate session tokens?".into(),
        }
    }

    #[test]
    fn code_gives_evidence_more_than_history() {
        let out = allocator().allocate(2000, Some(QueryType::Code), &rich_contents());
        let evidence = out.budget.allocated(Section::RetrievedEvidence);
        let history = out.budget.allocated(Section::ConversationHistory);
        assert!(evidence > history, "evidence {evidence} history {history}");

        let usage = &out.usage;
        let e = usage.section(Section::RetrievedEvidence).unwrap();
        let h = usage.section(Section::ConversationHistory).unwrap();
        assert!(e.target > h.target);
        assert!(out.budget.allocated_total() <= 2000);
        assert!(usage.total_used <= 2000);
    }

    #[test]
    fn roleplay_inverts_the_weighting() {
        let out = allocator().allocate(2000, Some(QueryType::Roleplay), &rich_contents());
        assert!(
            out.budget.allocated(Section::ConversationHistory) > out.budget.allocated(Section::RetrievedEvidence)
        );
    }

    #[test]
    fn system_instructions_never_shrunk_when_they_fit() {
        let contents = rich_contents();
        let out = allocator().allocate(500, Some(QueryType::Code), &contents);
        let system = out.usage.section(Section::SystemInstructions).unwrap();
        assert!(!system.truncated);
        assert!(out.text.starts_with("[System]\nYou are a concise local assistant.\n"));
    }

    #[test]
    fn never_exceeds_budget_and_never_empty() {
        let contents = rich_contents();
        for total in [0, 1, 2, 3, 5, 8, 13, 40, 100, 333, 1000, 4096] {
            let out = allocator().allocate(total, None, &contents);
            let limit = total.max(1);
            assert!(!out.text.is_empty(), "empty at {total}");
            assert!(estimate_tokens(&out.text) <= limit, "over budget at {total}");
            assert!(out.usage.total_used <= limit);
            assert!(out.budget.allocated_total() <= limit);
        }
    }

    #[test]
    fn tiny_budget_keeps_bare_query() {
        let out = allocator().allocate(2, None, &rich_contents());
        assert!(!out.text.starts_with('['));
        assert!(out.text.starts_with("How"));
        assert_eq!(out.usage.section(Section::Query).unwrap().items_included, 1);
    }

    #[test]
    fn empty_query_uses_placeholder() {
        let out = allocator().allocate(100, None, &SectionContents::default());
        assert_eq!(out.text, "[Query]\n(no query)\n");
        assert_eq!(out.usage.query_type, QueryType::Chat);
    }

    #[test]
    fn sections_rendered_in_attention_order() {
        let contents = SectionContents {
            system_instructions: "sys".into(),
            user_facts: vec!["likes tea".into()],
            working_notes: "draft".into(),
            evidence: vec![EvidenceItem::new("docs", "Evidence body.")],
            history: vec![Turn::user("hi"), Turn::assistant("hello")],
            query: "what now".into(),
        };
        let out = allocator().allocate(2000, Some(QueryType::Chat), &contents);
        assert_eq!(
            out.text,
            "[System]\nsys\n[User Facts]\n- likes tea\n[Working Notes]\ndraft\n\
             [Evidence]\n1. (docs) Evidence body.\n[Conversation]\nUser: hi\nAssistant: hello\n\
             [Query]\nwhat now\n"
        );
        assert!(out.usage.drops.is_empty());
    }

    #[test]
    fn history_keeps_most_recent_turns() {
        let contents = SectionContents {
            history: (0..50).map(|i| Turn::user(format!("turn {i:02}"))).collect(),
            query: "q?".into(),
            ..SectionContents::default()
        };
        let out = allocator().allocate(120, Some(QueryType::Chat), &contents);
        assert!(out.text.contains("turn 49"));
        assert!(!out.text.contains("turn 00"));
        let h = out.usage.section(Section::ConversationHistory).unwrap();
        assert!(h.truncated);
        assert!(h.items_included < 50);
        assert!(out.usage.drops.iter().any(|d| d.section == Section::ConversationHistory));
    }

    #[test]
    fn newest_turn_keeps_its_end() {
        let long = format!("{} the final words", "filler ".repeat(200));
        let rendered = render_history(&[Turn::user("older"), Turn::assistant(long)], 30);
        assert!(rendered.text.starts_with("[Conversation]\nAssistant: ..."));
        assert!(rendered.text.ends_with("the final words\n"));
        assert!(!rendered.text.contains("older"));
        assert!(rendered.used <= 30);
    }

    #[test]
    fn evidence_drops_whole_items() {
        let items: Vec<EvidenceItem> = (0..5)
            .map(|i| EvidenceItem::new("code", format!("Item {i} has one full sentence here.")))
            .collect();
        let rendered = render_evidence(&items, 30);
        assert!(rendered.included >= 1 && rendered.included < 5);
        for line in rendered.text.lines().skip(1) {
            assert!(line.ends_with("here."), "cut mid-item: {line}");
        }
    }

    #[test]
    fn first_evidence_item_cut_at_sentence_end() {
        let item = EvidenceItem::new("docs", (0..20).map(sentence).collect::<String>());
        let rendered = render_evidence(&[item], 40);
        assert_eq!(rendered.included, 1);
        assert!(rendered.truncated);
        assert!(rendered.text.trim_end().ends_with("evidence text."));
        assert!(!rendered.text.contains(MARKER));
        assert!(rendered.used <= 40);
    }

    #[test]
    fn unsplittable_first_item_is_dropped() {
        let item = EvidenceItem::new("docs", "x".repeat(1000));
        let rendered = render_evidence(&[item], 40);
        assert_eq!(rendered.included, 0);
        assert_eq!(rendered.used, 0);
        assert!(rendered.text.is_empty());
    }

    #[test]
    fn spare_tokens_flow_to_truncated_sections() {
        // Only evidence has content, so it should get nearly everything.
        let contents = SectionContents {
            evidence: (0..200).map(|i| EvidenceItem::new("code", format!("Fact {i} is true."))).collect(),
            query: "facts".into(),
            ..SectionContents::default()
        };
        let out = allocator().allocate(1000, Some(QueryType::Chat), &contents);
        let e = out.usage.section(Section::RetrievedEvidence).unwrap();
        assert!(e.allocated > e.target);
        assert!(e.used > 900);
        assert!(out.budget.allocated_total() <= 1000);
    }

    #[test]
    fn classifies_when_type_unknown() {
        let contents = SectionContents {
            query: "refactor this function".into(),
            ..SectionContents::default()
        };
        let out = allocator().allocate(200, None, &contents);
        assert_eq!(out.usage.query_type, QueryType::Code);
    }

    #[test]
    fn long_query_is_cut_from_the_end() {
        let contents = SectionContents {
            query: format!("Start here. {}", "more words ".repeat(500)),
            ..SectionContents::default()
        };
        let out = allocator().allocate(60, None, &contents);
        assert!(out.text.starts_with("[Query]\nStart here."));
        assert!(estimate_tokens(&out.text) <= 60);
        assert!(out.usage.section(Section::Query).unwrap().truncated);
    }
}
