//! Checkpoint management and the writable workflow journal.
//!
//! `CheckpointManager` rebuilds state from the newest valid checkpoint plus
//! the events after it. `WorkflowJournal` is the single writable handle on a
//! workflow: every mutation goes through `record`, which validates the event
//! against a copy of the state, appends it durably and only then commits the
//! new projection.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;

use conductor_types::event::{EventRecord, WorkflowEvent};
use conductor_types::state::{Checkpoint, WorkflowState, STATE_FORMAT_VERSION};

use crate::event::EventBus;
use crate::hash::ContentHasher;

use super::migration::{self, MigrationError};
use super::state::{apply, replay, ReplayError};
use super::store::{Lease, RawCheckpoint, StateStore, StoreError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("cannot rebuild state of workflow '{workflow_id}': {source}")]
    Replay {
        workflow_id: String,
        #[source]
        source: ReplayError,
    },

    #[error("event rejected for workflow '{workflow_id}': {source}")]
    Rejected {
        workflow_id: String,
        #[source]
        source: ReplayError,
    },

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error("journal for workflow '{0}' is closed")]
    Closed(String),

    #[error("failed to serialize state: {0}")]
    Serialization(String),
}

/// Why a stored checkpoint was not used.
#[derive(Debug)]
enum CheckpointFault {
    Unreadable(String),
    ChecksumMismatch,
    Migration(MigrationError),
}

impl std::fmt::Display for CheckpointFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckpointFault::Unreadable(e) => write!(f, "unreadable: {e}"),
            CheckpointFault::ChecksumMismatch => write!(f, "checksum mismatch"),
            CheckpointFault::Migration(e) => write!(f, "{e}"),
        }
    }
}

// ---------------------------------------------------------------------------
// CheckpointManager
// ---------------------------------------------------------------------------

/// Loads workflow state and opens journals over a `StateStore`.
pub struct CheckpointManager<S: StateStore> {
    store: Arc<S>,
    hasher: Arc<dyn ContentHasher>,
    bus: Option<EventBus>,
}

impl<S: StateStore> Clone for CheckpointManager<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            hasher: Arc::clone(&self.hasher),
            bus: self.bus.clone(),
        }
    }
}

impl<S: StateStore> CheckpointManager<S> {
    pub fn new(store: Arc<S>, hasher: Arc<dyn ContentHasher>) -> Self {
        Self {
            store,
            hasher,
            bus: None,
        }
    }

    /// Publish every recorded event on `bus`.
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn event_bus(&self) -> Option<&EventBus> {
        self.bus.as_ref()
    }

    /// Checksum of the canonical JSON form of `state`.
    pub fn checksum(&self, state: &WorkflowState) -> Result<String, CheckpointError> {
        let value = serde_json::to_value(state).map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        Ok(self.hasher.compute_hash(&value.to_string()))
    }

    fn verify(&self, raw: &RawCheckpoint) -> Result<Checkpoint, CheckpointFault> {
        let doc: Value =
            serde_json::from_str(&raw.body).map_err(|e| CheckpointFault::Unreadable(e.to_string()))?;
        let stored = doc
            .get("checksum")
            .and_then(Value::as_str)
            .ok_or_else(|| CheckpointFault::Unreadable("missing checksum".into()))?;
        let state = doc
            .get("state")
            .ok_or_else(|| CheckpointFault::Unreadable("missing state".into()))?;
        if self.hasher.compute_hash(&state.to_string()) != stored {
            return Err(CheckpointFault::ChecksumMismatch);
        }
        migration::migrate_checkpoint(doc).map_err(CheckpointFault::Migration)
    }

    /// Newest checkpoint that verifies and migrates. Corrupt ones are
    /// skipped; a checkpoint from a newer format is an error.
    async fn newest_valid_checkpoint(&self, workflow_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        for raw in self.store.list_checkpoints(workflow_id).await? {
            match self.verify(&raw) {
                Ok(cp) if cp.workflow_id == workflow_id && cp.state.workflow_id == workflow_id => {
                    return Ok(Some(cp));
                }
                Ok(_) => {
                    tracing::warn!(workflow_id, location = %raw.location, "checkpoint belongs to another workflow, skipping");
                }
                Err(CheckpointFault::Migration(err @ MigrationError::UnsupportedVersion { .. })) => {
                    return Err(err.into());
                }
                Err(fault) => {
                    tracing::warn!(
                        workflow_id,
                        sequence = raw.sequence,
                        location = %raw.location,
                        %fault,
                        "skipping invalid checkpoint"
                    );
                }
            }
        }
        Ok(None)
    }

    /// Rebuild the current state of a workflow.
    pub async fn load(&self, workflow_id: &str) -> Result<WorkflowState, CheckpointError> {
        let base = self.newest_valid_checkpoint(workflow_id).await?;
        let found = base.is_some();
        let state = match base {
            Some(cp) => {
                tracing::debug!(workflow_id, sequence = cp.sequence, "loaded checkpoint");
                cp.state
            }
            None => WorkflowState::new(workflow_id),
        };
        let events = self.store.read_events(workflow_id, state.last_sequence).await?;
        if !found && events.is_empty() {
            return Err(StoreError::NotFound(workflow_id.to_string()).into());
        }
        tracing::debug!(workflow_id, replayed = events.len(), "replaying events");
        replay(state, &events).map_err(|source| CheckpointError::Replay {
            workflow_id: workflow_id.to_string(),
            source,
        })
    }

    /// Claim the lease and return the writable journal. A workflow with no
    /// history starts from an empty pending state.
    pub async fn open(&self, workflow_id: &str, force: bool) -> Result<WorkflowJournal<S>, CheckpointError> {
        let lease = Lease::for_current_process();
        self.store.acquire_lease(workflow_id, &lease, force).await?;
        let state = match self.load(workflow_id).await {
            Ok(state) => state,
            Err(CheckpointError::Store(StoreError::NotFound(_))) => WorkflowState::new(workflow_id),
            Err(err) => {
                let _ = self.store.release_lease(workflow_id, &lease.holder).await;
                return Err(err);
            }
        };
        Ok(WorkflowJournal {
            workflow_id: workflow_id.to_string(),
            manager: self.clone(),
            lease,
            inner: Mutex::new(JournalInner {
                state,
                closed: false,
            }),
        })
    }
}

// ---------------------------------------------------------------------------
// WorkflowJournal
// ---------------------------------------------------------------------------

struct JournalInner {
    state: WorkflowState,
    closed: bool,
}

/// The single writable handle on one workflow's log and projection.
///
/// Appends are serialized behind an async mutex, so events of one workflow
/// are strictly ordered even when recorded from parallel step tasks.
pub struct WorkflowJournal<S: StateStore> {
    workflow_id: String,
    manager: CheckpointManager<S>,
    lease: Lease,
    inner: Mutex<JournalInner>,
}

impl<S: StateStore> WorkflowJournal<S> {
    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    /// Copy of the current projection.
    pub async fn snapshot(&self) -> WorkflowState {
        self.inner.lock().await.state.clone()
    }

    /// Validate, append, then commit one event.
    pub async fn record(&self, event: WorkflowEvent) -> Result<EventRecord, CheckpointError> {
        let mut inner = self.inner.lock().await;
        self.record_locked(&mut inner, event).await
    }

    async fn record_locked(
        &self,
        inner: &mut JournalInner,
        event: WorkflowEvent,
    ) -> Result<EventRecord, CheckpointError> {
        if inner.closed {
            return Err(CheckpointError::Closed(self.workflow_id.clone()));
        }
        let record = EventRecord {
            sequence: inner.state.last_sequence + 1,
            timestamp: Utc::now(),
            workflow_id: self.workflow_id.clone(),
            event,
        };
        let next = apply(inner.state.clone(), &record).map_err(|source| CheckpointError::Rejected {
            workflow_id: self.workflow_id.clone(),
            source,
        })?;
        self.manager.store.append(&record).await?;
        inner.state = next;
        tracing::debug!(
            workflow_id = %self.workflow_id,
            sequence = record.sequence,
            event = record.event.kind(),
            step_id = record.event.step_id(),
            "event recorded"
        );
        if let Some(bus) = &self.manager.bus {
            bus.publish(record.clone());
        }
        Ok(record)
    }

    /// Snapshot the current state and note it in the log. Returns the
    /// sequence the checkpoint reflects.
    pub async fn checkpoint(&self) -> Result<u64, CheckpointError> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(CheckpointError::Closed(self.workflow_id.clone()));
        }
        let state = inner.state.clone();
        let sequence = state.last_sequence;
        let checkpoint = Checkpoint {
            format_version: STATE_FORMAT_VERSION,
            workflow_id: self.workflow_id.clone(),
            sequence,
            taken_at: Utc::now(),
            checksum: self.manager.checksum(&state)?,
            state,
        };
        self.manager.store.write_checkpoint(&checkpoint).await?;
        self.record_locked(&mut inner, WorkflowEvent::CheckpointTaken { sequence })
            .await?;
        tracing::debug!(workflow_id = %self.workflow_id, sequence, "checkpoint written");
        Ok(sequence)
    }

    /// Mark every execution left `running` by a previous process as
    /// interrupted so the step becomes dispatchable again.
    pub async fn reclassify_interrupted(&self) -> Result<Vec<String>, CheckpointError> {
        let mut inner = self.inner.lock().await;
        let dangling: Vec<(String, u32)> = inner
            .state
            .running_executions()
            .map(|e| (e.step_id.clone(), e.attempt))
            .collect();
        for (step_id, attempt) in &dangling {
            tracing::warn!(
                workflow_id = %self.workflow_id,
                step_id = %step_id,
                attempt,
                "step was running when the previous process stopped, marking interrupted"
            );
            self.record_locked(
                &mut inner,
                WorkflowEvent::StepInterrupted {
                    step_id: step_id.clone(),
                    attempt: *attempt,
                },
            )
            .await?;
        }
        Ok(dangling.into_iter().map(|(id, _)| id).collect())
    }

    /// Release the lease. Further writes fail.
    pub async fn close(&self) -> Result<(), CheckpointError> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Ok(());
        }
        inner.closed = true;
        self.manager
            .store
            .release_lease(&self.workflow_id, &self.lease.holder)
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
