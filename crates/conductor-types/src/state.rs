//! Workflow execution state: the projection rebuilt from the event log.
//!
//! `WorkflowState` is never mutated directly by the engine. The reducer in
//! `conductor-core` folds `EventRecord`s into it, and checkpoints are full
//! snapshots of it tagged with the sequence they reflect.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorInfo;

/// Current on-disk format of checkpoints.
pub const STATE_FORMAT_VERSION: u32 = 2;

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

/// Lifecycle status of a workflow instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    #[default]
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
}

impl WorkflowStatus {
    /// Whether the status ends an invocation.
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Failed)
    }

    /// Legal status transitions. `failed -> running` is the explicit retry and
    /// `running -> running` is a resume after a crash.
    pub fn can_transition_to(self, next: WorkflowStatus) -> bool {
        use WorkflowStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Failed)
                | (Running, Running)
                | (Running, Paused)
                | (Running, Completed)
                | (Running, Failed)
                | (Paused, Running)
                | (Failed, Running)
        )
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::Running => "running",
            WorkflowStatus::Paused => "paused",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Status of a single step attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// How a step left the pending set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionKind {
    Completed,
    Skipped,
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A produced artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Step that produced it.
    pub produced_by: String,
    /// Attempt of that step that produced it.
    pub attempt: u32,
    pub value: serde_json::Value,
}

/// One attempt of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    pub step_id: String,
    pub agent: String,
    pub action: String,
    pub status: StepStatus,
    /// 1-based attempt number, counted across invocations.
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl StepExecution {
    pub fn is_active(&self) -> bool {
        self.status == StepStatus::Running
    }
}

// ---------------------------------------------------------------------------
// WorkflowState
// ---------------------------------------------------------------------------

/// Durable projection of one workflow instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub workflow_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition_id: Option<String>,
    pub status: WorkflowStatus,
    /// Steps that left the pending set, keyed by step id.
    #[serde(default)]
    pub completed_steps: BTreeMap<String, CompletionKind>,
    /// Produced artifacts keyed by artifact id.
    #[serde(default)]
    pub artifacts: BTreeMap<String, Artifact>,
    #[serde(default)]
    pub variables: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause_reason: Option<String>,
    /// Every attempt in dispatch order.
    #[serde(default)]
    pub executions: Vec<StepExecution>,
    /// Sequence of the last event folded in.
    pub last_sequence: u64,
    /// Sequence of the last checkpoint recorded in the log.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checkpoint: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl WorkflowState {
    /// Empty state for a workflow that has not recorded any event yet.
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            definition_id: None,
            status: WorkflowStatus::Pending,
            completed_steps: BTreeMap::new(),
            artifacts: BTreeMap::new(),
            variables: BTreeMap::new(),
            error: None,
            pause_reason: None,
            executions: Vec::new(),
            last_sequence: 0,
            last_checkpoint: None,
            created_at: None,
            updated_at: None,
        }
    }

    /// Whether the step completed or was skipped.
    pub fn is_done(&self, step_id: &str) -> bool {
        self.completed_steps.contains_key(step_id)
    }

    /// The running attempt of `step_id`, if any.
    pub fn active_execution(&self, step_id: &str) -> Option<&StepExecution> {
        self.executions
            .iter()
            .rev()
            .find(|e| e.step_id == step_id && e.is_active())
    }

    pub fn is_running(&self, step_id: &str) -> bool {
        self.active_execution(step_id).is_some()
    }

    /// Every attempt that is still marked running.
    pub fn running_executions(&self) -> impl Iterator<Item = &StepExecution> {
        self.executions.iter().filter(|e| e.is_active())
    }

    /// Attempts of one step in order.
    pub fn executions_for<'a>(&'a self, step_id: &'a str) -> impl Iterator<Item = &'a StepExecution> {
        self.executions.iter().filter(move |e| e.step_id == step_id)
    }

    /// Highest attempt number recorded for `step_id` (0 if never started).
    pub fn attempts_for(&self, step_id: &str) -> u32 {
        self.executions_for(step_id)
            .map(|e| e.attempt)
            .max()
            .unwrap_or(0)
    }

    /// The most recent attempt of `step_id`.
    pub fn last_execution(&self, step_id: &str) -> Option<&StepExecution> {
        self.executions.iter().rev().find(|e| e.step_id == step_id)
    }

    /// Artifact values by id, for capability requests.
    pub fn artifact_values(&self) -> BTreeMap<String, serde_json::Value> {
        self.artifacts
            .iter()
            .map(|(id, a)| (id.clone(), a.value.clone()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Checkpoint
// ---------------------------------------------------------------------------

/// Checksummed full snapshot of a `WorkflowState`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub format_version: u32,
    pub workflow_id: String,
    /// Sequence of the last event reflected in `state`.
    pub sequence: u64,
    pub taken_at: DateTime<Utc>,
    /// Hex digest of the canonical JSON encoding of `state`.
    pub checksum: String,
    pub state: WorkflowState,
}

/// Listing entry for a stored workflow instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub workflow_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
