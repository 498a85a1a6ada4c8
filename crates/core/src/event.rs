//! Pipeline events — observable state changes of a request.
//!
//! The orchestrator publishes an event at every state transition and at
//! every recovered failure. Subscribers (tests, tooling) filter for what
//! they care about.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::resource::ResourceLevel;

/// Request lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Received,
    Admitted,
    Rejected,
    Decomposed,
    Retrieved,
    Reranked,
    Budgeted,
    Generating,
    Done,
    Escalated,
    Failed,
}

impl PipelineState {
    /// Terminal states end a request.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PipelineState::Rejected
                | PipelineState::Done
                | PipelineState::Escalated
                | PipelineState::Failed
        )
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Received, Admitted)
                | (Received, Rejected)
                | (Received, Failed)
                | (Admitted, Decomposed)
                | (Decomposed, Retrieved)
                | (Retrieved, Reranked)
                | (Reranked, Budgeted)
                | (Budgeted, Generating)
                | (Generating, Done)
                | (Generating, Escalated)
                | (Generating, Failed)
                | (Admitted, Failed)
                | (Decomposed, Failed)
                | (Retrieved, Failed)
                | (Reranked, Failed)
                | (Budgeted, Failed)
        )
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PipelineState::Received => "RECEIVED",
            PipelineState::Admitted => "ADMITTED",
            PipelineState::Rejected => "REJECTED",
            PipelineState::Decomposed => "DECOMPOSED",
            PipelineState::Retrieved => "RETRIEVED",
            PipelineState::Reranked => "RERANKED",
            PipelineState::Budgeted => "BUDGETED",
            PipelineState::Generating => "GENERATING",
            PipelineState::Done => "DONE",
            PipelineState::Escalated => "ESCALATED",
            PipelineState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Everything the pipeline reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineEvent {
    /// A request moved between states
    StateChanged {
        request_id: String,
        from: PipelineState,
        to: PipelineState,
        timestamp: DateTime<Utc>,
    },

    /// Admission was refused
    AdmissionRejected {
        request_id: String,
        level: ResourceLevel,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A source failed or timed out and contributed nothing
    SourceFailed {
        request_id: String,
        source: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },

    /// Generation failed and will be retried with a smaller budget
    GenerationRetried {
        request_id: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },

    /// Local confidence fell below the threshold
    EscalationCandidate {
        request_id: String,
        confidence: f32,
        threshold: f32,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for pipeline events.
pub struct EventBus {
    sender: broadcast::Sender<Arc<PipelineEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: PipelineEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<PipelineEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
