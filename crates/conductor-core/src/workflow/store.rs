//! Durable state store port.
//!
//! The store holds, per workflow instance, an append-only event log, a set
//! of checkpoints, the definition and execution plan the instance was
//! started with, and a writer lease. Implementations live in
//! conductor-infra (files, SQLite); `MemoryStateStore` here backs tests and
//! dry runs.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use conductor_types::event::EventRecord;
use conductor_types::plan::ExecutionPlan;
use conductor_types::state::{Checkpoint, WorkflowSummary};
use conductor_types::workflow::WorkflowDefinition;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("workflow '{0}' not found")]
    NotFound(String),

    #[error(
        "workflow '{workflow_id}' is being executed by another process \
         (holder {holder}, pid {pid}, since {acquired_at}); use --force if it is gone"
    )]
    LeaseHeld {
        workflow_id: String,
        holder: String,
        pid: u32,
        acquired_at: DateTime<Utc>,
    },

    #[error("event sequence conflict for '{workflow_id}': expected {expected}, got {found}")]
    SequenceConflict {
        workflow_id: String,
        expected: u64,
        found: u64,
    },

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("database error: {0}")]
    Database(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Lease and raw checkpoint
// ---------------------------------------------------------------------------

/// Exclusive writer claim on a workflow instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// Unique per journal, so two journals in one process never share a lease.
    pub holder: String,
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
}

impl Lease {
    /// A fresh lease for the current process.
    pub fn for_current_process() -> Self {
        Self {
            holder: Uuid::now_v7().to_string(),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        }
    }
}

/// A checkpoint exactly as stored, before checksum verification and
/// migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCheckpoint {
    pub sequence: u64,
    /// Where it came from, for log messages.
    pub location: String,
    pub body: String,
}

// ---------------------------------------------------------------------------
// Port
// ---------------------------------------------------------------------------

/// Storage port for workflow execution state.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait StateStore: Send + Sync {
    /// Append one event. Durable before returning; returns its sequence.
    fn append(
        &self,
        record: &EventRecord,
    ) -> impl std::future::Future<Output = Result<u64, StoreError>> + Send;

    /// Events with `sequence > after`, in order.
    fn read_events(
        &self,
        workflow_id: &str,
        after: u64,
    ) -> impl std::future::Future<Output = Result<Vec<EventRecord>, StoreError>> + Send;

    /// Write a checkpoint atomically. A reader sees either the previous set
    /// of checkpoints or the set including this one, never a partial file.
    fn write_checkpoint(
        &self,
        checkpoint: &Checkpoint,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Stored checkpoints, newest first.
    fn list_checkpoints(
        &self,
        workflow_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<RawCheckpoint>, StoreError>> + Send;

    fn save_definition(
        &self,
        workflow_id: &str,
        definition: &WorkflowDefinition,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    fn load_definition(
        &self,
        workflow_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowDefinition>, StoreError>> + Send;

    fn save_plan(
        &self,
        workflow_id: &str,
        plan: &ExecutionPlan,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    fn load_plan(
        &self,
        workflow_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<ExecutionPlan>, StoreError>> + Send;

    /// Known workflow instances, most recently updated first.
    fn list_workflows(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowSummary>, StoreError>> + Send;

    /// Claim the writer lease. Fails with `LeaseHeld` while another live
    /// holder owns it, unless `force`.
    fn acquire_lease(
        &self,
        workflow_id: &str,
        lease: &Lease,
        force: bool,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Drop the lease if `holder` owns it.
    fn release_lease(
        &self,
        workflow_id: &str,
        holder: &str,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MemoryWorkflow {
    definition_id: Option<String>,
    events: Vec<EventRecord>,
    /// Sorted by sequence, oldest first.
    checkpoints: Vec<RawCheckpoint>,
    definition: Option<WorkflowDefinition>,
    plan: Option<ExecutionPlan>,
    lease: Option<Lease>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

/// Non-durable store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    workflows: Mutex<HashMap<String, MemoryWorkflow>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, MemoryWorkflow>> {
        self.workflows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Overwrite a stored checkpoint body. Test hook for corruption cases.
    pub fn tamper_checkpoint(&self, workflow_id: &str, sequence: u64, body: impl Into<String>) {
        let mut workflows = self.lock();
        if let Some(cp) = workflows
            .get_mut(workflow_id)
            .and_then(|w| w.checkpoints.iter_mut().find(|c| c.sequence == sequence))
        {
            cp.body = body.into();
        }
    }

    /// Current lease holder, if any.
    pub fn lease_holder(&self, workflow_id: &str) -> Option<Lease> {
        self.lock().get(workflow_id).and_then(|w| w.lease.clone())
    }
}

impl StateStore for MemoryStateStore {
    async fn append(&self, record: &EventRecord) -> Result<u64, StoreError> {
        let mut workflows = self.lock();
        let workflow = workflows.entry(record.workflow_id.clone()).or_default();
        let expected = workflow.events.last().map_or(1, |e| e.sequence + 1);
        if record.sequence != expected {
            return Err(StoreError::SequenceConflict {
                workflow_id: record.workflow_id.clone(),
                expected,
                found: record.sequence,
            });
        }
        if let conductor_types::event::WorkflowEvent::WorkflowStarted { definition_id, .. } = &record.event {
            workflow.definition_id = Some(definition_id.clone());
        }
        workflow.created_at.get_or_insert(record.timestamp);
        workflow.updated_at = Some(record.timestamp);
        workflow.events.push(record.clone());
        Ok(record.sequence)
    }

    async fn read_events(&self, workflow_id: &str, after: u64) -> Result<Vec<EventRecord>, StoreError> {
        Ok(self
            .lock()
            .get(workflow_id)
            .map(|w| w.events.iter().filter(|e| e.sequence > after).cloned().collect())
            .unwrap_or_default())
    }

    async fn write_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        let body = serde_json::to_string_pretty(checkpoint)?;
        let mut workflows = self.lock();
        let workflow = workflows.entry(checkpoint.workflow_id.clone()).or_default();
        workflow.checkpoints.retain(|c| c.sequence != checkpoint.sequence);
        workflow.checkpoints.push(RawCheckpoint {
            sequence: checkpoint.sequence,
            location: format!("memory:{}/{}", checkpoint.workflow_id, checkpoint.sequence),
            body,
        });
        workflow.checkpoints.sort_by_key(|c| c.sequence);
        Ok(())
    }

    async fn list_checkpoints(&self, workflow_id: &str) -> Result<Vec<RawCheckpoint>, StoreError> {
        Ok(self
            .lock()
            .get(workflow_id)
            .map(|w| w.checkpoints.iter().rev().cloned().collect())
            .unwrap_or_default())
    }

    async fn save_definition(
        &self,
        workflow_id: &str,
        definition: &WorkflowDefinition,
    ) -> Result<(), StoreError> {
        let mut workflows = self.lock();
        let workflow = workflows.entry(workflow_id.to_string()).or_default();
        workflow.definition_id = Some(definition.id.clone());
        workflow.definition = Some(definition.clone());
        Ok(())
    }

    async fn load_definition(&self, workflow_id: &str) -> Result<Option<WorkflowDefinition>, StoreError> {
        Ok(self.lock().get(workflow_id).and_then(|w| w.definition.clone()))
    }

    async fn save_plan(&self, workflow_id: &str, plan: &ExecutionPlan) -> Result<(), StoreError> {
        self.lock()
            .entry(workflow_id.to_string())
            .or_default()
            .plan = Some(plan.clone());
        Ok(())
    }

    async fn load_plan(&self, workflow_id: &str) -> Result<Option<ExecutionPlan>, StoreError> {
        Ok(self.lock().get(workflow_id).and_then(|w| w.plan.clone()))
    }

    async fn list_workflows(&self) -> Result<Vec<WorkflowSummary>, StoreError> {
        let mut out: Vec<WorkflowSummary> = self
            .lock()
            .iter()
            .filter_map(|(id, w)| {
                Some(WorkflowSummary {
                    workflow_id: id.clone(),
                    definition_id: w.definition_id.clone(),
                    created_at: w.created_at?,
                    updated_at: w.updated_at?,
                })
            })
            .collect();
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| b.workflow_id.cmp(&a.workflow_id)));
        Ok(out)
    }

    async fn acquire_lease(&self, workflow_id: &str, lease: &Lease, force: bool) -> Result<(), StoreError> {
        let mut workflows = self.lock();
        let workflow = workflows.entry(workflow_id.to_string()).or_default();
        if let Some(held) = &workflow.lease {
            if held.holder != lease.holder && !force {
                return Err(StoreError::LeaseHeld {
                    workflow_id: workflow_id.to_string(),
                    holder: held.holder.clone(),
                    pid: held.pid,
                    acquired_at: held.acquired_at,
                });
            }
        }
        workflow.lease = Some(lease.clone());
        Ok(())
    }

    async fn release_lease(&self, workflow_id: &str, holder: &str) -> Result<(), StoreError> {
        let mut workflows = self.lock();
        if let Some(workflow) = workflows.get_mut(workflow_id) {
            if workflow.lease.as_ref().is_some_and(|l| l.holder == holder) {
                workflow.lease = None;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_types::event::WorkflowEvent;

    fn record(sequence: u64) -> EventRecord {
        EventRecord {
            sequence,
            timestamp: Utc::now(),
            workflow_id: "wf-1".into(),
            event: WorkflowEvent::WorkflowCompleted,
        }
    }

    #[tokio::test]
    async fn append_enforces_contiguous_sequences() {
        let store = MemoryStateStore::new();
        assert_eq!(store.append(&record(1)).await.unwrap(), 1);
        assert_eq!(store.append(&record(2)).await.unwrap(), 2);
        let err = store.append(&record(4)).await.unwrap_err();
        assert!(matches!(err, StoreError::SequenceConflict { expected: 3, .. }));

        let events = store.read_events("wf-1", 1).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].sequence, 2);
        assert!(store.read_events("nope", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lease_is_exclusive_unless_forced() {
        let store = MemoryStateStore::new();
        let first = Lease::for_current_process();
        let second = Lease::for_current_process();
        store.acquire_lease("wf-1", &first, false).await.unwrap();
        let err = store.acquire_lease("wf-1", &second, false).await.unwrap_err();
        assert!(matches!(err, StoreError::LeaseHeld { .. }));
        assert!(err.to_string().contains("--force"));

        store.acquire_lease("wf-1", &second, true).await.unwrap();
        store.release_lease("wf-1", &first.holder).await.unwrap();
        assert_eq!(store.lease_holder("wf-1").unwrap().holder, second.holder);
        store.release_lease("wf-1", &second.holder).await.unwrap();
        assert!(store.lease_holder("wf-1").is_none());
    }
}
