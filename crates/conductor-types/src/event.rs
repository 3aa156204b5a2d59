//! Workflow events: the append-only ground truth of execution.
//!
//! Every state change is expressed as a `WorkflowEvent` wrapped in an
//! `EventRecord` carrying its sequence number and timestamp.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorInfo;
use crate::state::WorkflowStatus;

/// A state transition of one workflow instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    WorkflowStarted {
        definition_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        definition_name: Option<String>,
        #[serde(default)]
        variables: BTreeMap<String, serde_json::Value>,
    },
    /// A new invocation picked up a non-pending workflow.
    WorkflowResumed {
        from: WorkflowStatus,
    },
    StepStarted {
        step_id: String,
        agent: String,
        action: String,
        attempt: u32,
    },
    StepCompleted {
        step_id: String,
        attempt: u32,
        #[serde(default)]
        artifacts: BTreeMap<String, serde_json::Value>,
    },
    StepFailed {
        step_id: String,
        attempt: u32,
        error: ErrorInfo,
        /// Another attempt follows in this invocation.
        will_retry: bool,
    },
    StepCancelled {
        step_id: String,
        attempt: u32,
        reason: String,
    },
    /// A running attempt found dangling on resume.
    StepInterrupted {
        step_id: String,
        attempt: u32,
    },
    /// An optional step failed and was skipped.
    StepSkipped {
        step_id: String,
        reason: String,
    },
    WorkflowPaused {
        reason: String,
    },
    WorkflowCompleted,
    WorkflowFailed {
        error: ErrorInfo,
    },
    CheckpointTaken {
        /// Sequence the checkpoint reflects.
        sequence: u64,
    },
}

impl WorkflowEvent {
    /// Wire name of the event type.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowEvent::WorkflowStarted { .. } => "workflow_started",
            WorkflowEvent::WorkflowResumed { .. } => "workflow_resumed",
            WorkflowEvent::StepStarted { .. } => "step_started",
            WorkflowEvent::StepCompleted { .. } => "step_completed",
            WorkflowEvent::StepFailed { .. } => "step_failed",
            WorkflowEvent::StepCancelled { .. } => "step_cancelled",
            WorkflowEvent::StepInterrupted { .. } => "step_interrupted",
            WorkflowEvent::StepSkipped { .. } => "step_skipped",
            WorkflowEvent::WorkflowPaused { .. } => "workflow_paused",
            WorkflowEvent::WorkflowCompleted => "workflow_completed",
            WorkflowEvent::WorkflowFailed { .. } => "workflow_failed",
            WorkflowEvent::CheckpointTaken { .. } => "checkpoint_taken",
        }
    }

    /// Step the event concerns, if any.
    pub fn step_id(&self) -> Option<&str> {
        match self {
            WorkflowEvent::StepStarted { step_id, .. }
            | WorkflowEvent::StepCompleted { step_id, .. }
            | WorkflowEvent::StepFailed { step_id, .. }
            | WorkflowEvent::StepCancelled { step_id, .. }
            | WorkflowEvent::StepInterrupted { step_id, .. }
            | WorkflowEvent::StepSkipped { step_id, .. } => Some(step_id),
            _ => None,
        }
    }
}

/// A sequenced, timestamped event as stored in the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Monotonic per workflow, starting at 1.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub workflow_id: String,
    pub event: WorkflowEvent,
}
