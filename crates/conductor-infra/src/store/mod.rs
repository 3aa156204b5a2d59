//! Durable `StateStore` implementations.
//!
//! - `file`: JSON-lines event log and checkpoint files per workflow
//! - `sqlite`: single SQLite database (sqlx, WAL)
//!
//! [`AnyStateStore`] picks one from `[store] backend` at startup.

pub mod file;
pub mod sqlite;

use std::path::Path;
use std::time::Duration;

use chrono::Utc;

use conductor_core::workflow::store::{Lease, RawCheckpoint, StateStore, StoreError};
use conductor_types::config::{StoreBackend, StoreConfig};
use conductor_types::event::EventRecord;
use conductor_types::plan::ExecutionPlan;
use conductor_types::state::{Checkpoint, WorkflowSummary};
use conductor_types::workflow::WorkflowDefinition;

use crate::filesystem::DataLayout;

pub use file::FileStateStore;
pub use sqlite::SqliteStateStore;

/// The configured backend.
#[derive(Debug, Clone)]
pub enum AnyStateStore {
    File(FileStateStore),
    Sqlite(SqliteStateStore),
}

impl AnyStateStore {
    /// Open the backend named in `config` under `data_dir`.
    pub async fn open(data_dir: &Path, config: &StoreConfig) -> Result<Self, StoreError> {
        tokio::fs::create_dir_all(data_dir).await?;
        match config.backend {
            StoreBackend::File => Ok(Self::File(FileStateStore::with_config(data_dir, config))),
            StoreBackend::Sqlite => {
                let url = DataLayout::new(data_dir).database_url();
                Ok(Self::Sqlite(SqliteStateStore::connect(&url, config).await?))
            }
        }
    }

    pub fn backend(&self) -> StoreBackend {
        match self {
            Self::File(_) => StoreBackend::File,
            Self::Sqlite(_) => StoreBackend::Sqlite,
        }
    }
}

macro_rules! delegate {
    ($self:ident, $store:ident => $call:expr) => {
        match $self {
            AnyStateStore::File($store) => $call.await,
            AnyStateStore::Sqlite($store) => $call.await,
        }
    };
}

impl StateStore for AnyStateStore {
    async fn append(&self, record: &EventRecord) -> Result<u64, StoreError> {
        delegate!(self, s => s.append(record))
    }

    async fn read_events(&self, workflow_id: &str, after: u64) -> Result<Vec<EventRecord>, StoreError> {
        delegate!(self, s => s.read_events(workflow_id, after))
    }

    async fn write_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        delegate!(self, s => s.write_checkpoint(checkpoint))
    }

    async fn list_checkpoints(&self, workflow_id: &str) -> Result<Vec<RawCheckpoint>, StoreError> {
        delegate!(self, s => s.list_checkpoints(workflow_id))
    }

    async fn save_definition(
        &self,
        workflow_id: &str,
        definition: &WorkflowDefinition,
    ) -> Result<(), StoreError> {
        delegate!(self, s => s.save_definition(workflow_id, definition))
    }

    async fn load_definition(&self, workflow_id: &str) -> Result<Option<WorkflowDefinition>, StoreError> {
        delegate!(self, s => s.load_definition(workflow_id))
    }

    async fn save_plan(&self, workflow_id: &str, plan: &ExecutionPlan) -> Result<(), StoreError> {
        delegate!(self, s => s.save_plan(workflow_id, plan))
    }

    async fn load_plan(&self, workflow_id: &str) -> Result<Option<ExecutionPlan>, StoreError> {
        delegate!(self, s => s.load_plan(workflow_id))
    }

    async fn list_workflows(&self) -> Result<Vec<WorkflowSummary>, StoreError> {
        delegate!(self, s => s.list_workflows())
    }

    async fn acquire_lease(&self, workflow_id: &str, lease: &Lease, force: bool) -> Result<(), StoreError> {
        delegate!(self, s => s.acquire_lease(workflow_id, lease, force))
    }

    async fn release_lease(&self, workflow_id: &str, holder: &str) -> Result<(), StoreError> {
        delegate!(self, s => s.release_lease(workflow_id, holder))
    }
}

/// Workflow ids become directory names; reject anything path-like.
pub(crate) fn check_workflow_id(workflow_id: &str) -> Result<(), StoreError> {
    let ok = !workflow_id.is_empty()
        && workflow_id != "."
        && workflow_id != ".."
        && workflow_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("invalid workflow id '{workflow_id}'"),
        )))
    }
}

/// A lease is stale when its process is gone or it outlived `ttl`.
///
/// Process liveness is only checked on Linux (`/proc`); elsewhere only the
/// TTL applies.
pub(crate) fn lease_is_stale(lease: &Lease, ttl: Duration) -> bool {
    let age = Utc::now().signed_duration_since(lease.acquired_at);
    if age.to_std().is_ok_and(|age| age > ttl) {
        return true;
    }
    !process_alive(lease.pid)
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    let proc = Path::new("/proc");
    !proc.exists() || proc.join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}
