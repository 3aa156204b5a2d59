//! File-backed state store.
//!
//! One directory per workflow instance (see [`crate::filesystem`]). The event
//! log is JSON lines, fsynced after every append. Checkpoints, the definition
//! and the plan are written to a temp file in the target directory and
//! renamed into place, so readers never observe a partial document.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use conductor_core::workflow::store::{Lease, RawCheckpoint, StateStore, StoreError};
use conductor_types::config::StoreConfig;
use conductor_types::event::EventRecord;
use conductor_types::plan::ExecutionPlan;
use conductor_types::state::{Checkpoint, WorkflowSummary};
use conductor_types::workflow::WorkflowDefinition;

use crate::filesystem::{DataLayout, checkpoint_sequence};

use super::{check_workflow_id, lease_is_stale};

/// Per-workflow append state: the last durable sequence, loaded lazily.
#[derive(Debug, Default)]
struct LogTail {
    last_sequence: Option<u64>,
}

/// JSON-lines event log plus checkpoint files under the data directory.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    layout: DataLayout,
    keep_checkpoints: usize,
    lease_ttl: Duration,
    tails: Arc<DashMap<String, Arc<Mutex<LogTail>>>>,
    /// Makes the next append write half its line and fail.
    #[cfg(test)]
    tear_next_append: Arc<std::sync::atomic::AtomicBool>,
}

impl FileStateStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self::with_config(data_dir, &StoreConfig::default())
    }

    pub fn with_config(data_dir: impl Into<PathBuf>, config: &StoreConfig) -> Self {
        Self {
            layout: DataLayout::new(data_dir),
            keep_checkpoints: config.keep_checkpoints.max(1),
            lease_ttl: Duration::from_secs(config.lease_ttl_secs),
            tails: Arc::new(DashMap::new()),
            #[cfg(test)]
            tear_next_append: Arc::default(),
        }
    }

    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }

    fn tail(&self, workflow_id: &str) -> Arc<Mutex<LogTail>> {
        self.tails
            .entry(workflow_id.to_string())
            .or_default()
            .clone()
    }

    /// Last durable sequence in the log. Truncates a torn trailing line so
    /// the next append starts on a fresh line.
    async fn recover_tail(&self, workflow_id: &str) -> Result<u64, StoreError> {
        let path = self.layout.events_path(workflow_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };

        let (records, torn_at) = parse_log(workflow_id, &content)?;
        if let Some(offset) = torn_at {
            tracing::warn!(
                workflow_id,
                path = %path.display(),
                offset,
                "truncating torn trailing line in event log"
            );
            let file = tokio::fs::OpenOptions::new().write(true).open(&path).await?;
            file.set_len(offset as u64).await?;
            file.sync_all().await?;
        }
        Ok(records.last().map_or(0, |r| r.sequence))
    }

    async fn write_line(&self, workflow_id: &str, line: &[u8]) -> std::io::Result<()> {
        tokio::fs::create_dir_all(self.layout.workflow_dir(workflow_id)).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.layout.events_path(workflow_id))
            .await?;
        #[cfg(test)]
        if self.tear_next_append.swap(false, std::sync::atomic::Ordering::SeqCst) {
            file.write_all(&line[..line.len() / 2]).await?;
            return Err(std::io::Error::other("disk full"));
        }
        file.write_all(line).await?;
        file.sync_data().await
    }

    async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn read_lease(&self, workflow_id: &str) -> Result<Option<Lease>, StoreError> {
        let path = self.layout.lease_path(workflow_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(lease) => Ok(Some(lease)),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "ignoring unreadable lease file");
                    Ok(None)
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn summary(&self, workflow_id: &str) -> Result<Option<WorkflowSummary>, StoreError> {
        let events = self.read_events(workflow_id, 0).await?;
        let (Some(first), Some(last)) = (events.first(), events.last()) else {
            return Ok(None);
        };
        let definition_id = events.iter().find_map(|r| match &r.event {
            conductor_types::event::WorkflowEvent::WorkflowStarted { definition_id, .. } => {
                Some(definition_id.clone())
            }
            _ => None,
        });
        Ok(Some(WorkflowSummary {
            workflow_id: workflow_id.to_string(),
            definition_id,
            created_at: first.timestamp,
            updated_at: last.timestamp,
        }))
    }
}

/// Parse a JSON-lines log. Returns the records and, when the final line is
/// incomplete, the byte offset where it starts.
fn parse_log(workflow_id: &str, content: &str) -> Result<(Vec<EventRecord>, Option<usize>), StoreError> {
    let mut records = Vec::new();
    let mut offset = 0;
    for line in content.split_inclusive('\n') {
        let start = offset;
        offset += line.len();
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<EventRecord>(trimmed) {
            Ok(record) => records.push(record),
            Err(err) if !line.ends_with('\n') => {
                tracing::warn!(workflow_id, offset = start, error = %err, "ignoring torn trailing event log line");
                return Ok((records, Some(start)));
            }
            Err(err) => {
                return Err(StoreError::Serialization(format!(
                    "corrupt event log for '{workflow_id}' at byte {start}: {err}"
                )));
            }
        }
    }
    Ok((records, None))
}

/// Write `value` next to `path` and rename it into place.
async fn write_atomic<T: Serialize>(path: PathBuf, value: &T) -> Result<(), StoreError> {
    let body = serde_json::to_vec_pretty(value)?;
    write_atomic_bytes(path, body).await
}

async fn write_atomic_bytes(path: PathBuf, body: Vec<u8>) -> Result<(), StoreError> {
    tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
        let dir = path
            .parent()
            .ok_or_else(|| std::io::Error::other(format!("{} has no parent", path.display())))?;
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&body)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        // Make the rename itself durable.
        std::fs::File::open(dir)?.sync_all()?;
        Ok(())
    })
    .await
    .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
}

impl StateStore for FileStateStore {
    async fn append(&self, record: &EventRecord) -> Result<u64, StoreError> {
        let workflow_id = record.workflow_id.as_str();
        check_workflow_id(workflow_id)?;

        let tail = self.tail(workflow_id);
        let mut tail = tail.lock().await;
        let last = match tail.last_sequence {
            Some(last) => last,
            None => self.recover_tail(workflow_id).await?,
        };
        let expected = last + 1;
        if record.sequence != expected {
            return Err(StoreError::SequenceConflict {
                workflow_id: workflow_id.to_string(),
                expected,
                found: record.sequence,
            });
        }

        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        if let Err(err) = self.write_line(workflow_id, &line).await {
            // The log may now end in a partial line; rescan before the next append.
            tail.last_sequence = None;
            tracing::warn!(workflow_id, sequence = record.sequence, error = %err, "event append failed");
            return Err(err.into());
        }

        tail.last_sequence = Some(record.sequence);
        tracing::trace!(workflow_id, sequence = record.sequence, kind = record.event.kind(), "event appended");
        Ok(record.sequence)
    }

    async fn read_events(&self, workflow_id: &str, after: u64) -> Result<Vec<EventRecord>, StoreError> {
        check_workflow_id(workflow_id)?;
        let content = match tokio::fs::read_to_string(self.layout.events_path(workflow_id)).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let (records, _) = parse_log(workflow_id, &content)?;
        Ok(records.into_iter().filter(|r| r.sequence > after).collect())
    }

    async fn write_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        let workflow_id = checkpoint.workflow_id.as_str();
        check_workflow_id(workflow_id)?;

        let path = self.layout.checkpoint_path(workflow_id, checkpoint.sequence);
        write_atomic(path, checkpoint).await?;

        let mut sequences = self.checkpoint_files(workflow_id).await?;
        sequences.sort_by(|a, b| b.0.cmp(&a.0));
        for (sequence, path) in sequences.into_iter().skip(self.keep_checkpoints) {
            tracing::debug!(workflow_id, sequence, "pruning old checkpoint");
            if let Err(err) = tokio::fs::remove_file(&path).await {
                if err.kind() != std::io::ErrorKind::NotFound {
                    return Err(err.into());
                }
            }
        }
        Ok(())
    }

    async fn list_checkpoints(&self, workflow_id: &str) -> Result<Vec<RawCheckpoint>, StoreError> {
        check_workflow_id(workflow_id)?;
        let mut files = self.checkpoint_files(workflow_id).await?;
        files.sort_by(|a, b| b.0.cmp(&a.0));

        let mut out = Vec::with_capacity(files.len());
        for (sequence, path) in files {
            match tokio::fs::read_to_string(&path).await {
                Ok(body) => out.push(RawCheckpoint {
                    sequence,
                    location: path.display().to_string(),
                    body,
                }),
                // Pruned by a concurrent writer between listing and reading.
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(out)
    }

    async fn save_definition(
        &self,
        workflow_id: &str,
        definition: &WorkflowDefinition,
    ) -> Result<(), StoreError> {
        check_workflow_id(workflow_id)?;
        write_atomic(self.layout.definition_path(workflow_id), definition).await
    }

    async fn load_definition(&self, workflow_id: &str) -> Result<Option<WorkflowDefinition>, StoreError> {
        check_workflow_id(workflow_id)?;
        Self::read_json(&self.layout.definition_path(workflow_id)).await
    }

    async fn save_plan(&self, workflow_id: &str, plan: &ExecutionPlan) -> Result<(), StoreError> {
        check_workflow_id(workflow_id)?;
        write_atomic(self.layout.plan_path(workflow_id), plan).await
    }

    async fn load_plan(&self, workflow_id: &str) -> Result<Option<ExecutionPlan>, StoreError> {
        check_workflow_id(workflow_id)?;
        Self::read_json(&self.layout.plan_path(workflow_id)).await
    }

    async fn list_workflows(&self) -> Result<Vec<WorkflowSummary>, StoreError> {
        let mut entries = match tokio::fs::read_dir(self.layout.workflows_dir()).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut out = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(workflow_id) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            match self.summary(&workflow_id).await {
                Ok(Some(summary)) => out.push(summary),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(workflow_id = %workflow_id, error = %err, "skipping unreadable workflow");
                }
            }
        }
        out.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| b.workflow_id.cmp(&a.workflow_id))
        });
        Ok(out)
    }

    async fn acquire_lease(&self, workflow_id: &str, lease: &Lease, force: bool) -> Result<(), StoreError> {
        check_workflow_id(workflow_id)?;
        tokio::fs::create_dir_all(self.layout.workflow_dir(workflow_id)).await?;
        let path = self.layout.lease_path(workflow_id);
        let body = serde_json::to_vec_pretty(lease)?;

        // Second pass runs after removing a stale or forced lease.
        for _ in 0..2 {
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    file.write_all(&body).await?;
                    file.sync_all().await?;
                    tracing::debug!(workflow_id, holder = %lease.holder, "lease acquired");
                    return Ok(());
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(err) => return Err(err.into()),
            }

            match self.read_lease(workflow_id).await? {
                Some(held) if held.holder == lease.holder => {
                    write_atomic_bytes(path, body).await?;
                    return Ok(());
                }
                Some(held) if !force && !lease_is_stale(&held, self.lease_ttl) => {
                    return Err(StoreError::LeaseHeld {
                        workflow_id: workflow_id.to_string(),
                        holder: held.holder,
                        pid: held.pid,
                        acquired_at: held.acquired_at,
                    });
                }
                Some(held) => {
                    tracing::warn!(
                        workflow_id,
                        holder = %held.holder,
                        pid = held.pid,
                        forced = force,
                        "taking over workflow lease"
                    );
                }
                None => {}
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }

        let held = self.read_lease(workflow_id).await?;
        Err(StoreError::LeaseHeld {
            workflow_id: workflow_id.to_string(),
            holder: held.as_ref().map_or_else(|| "unknown".to_string(), |l| l.holder.clone()),
            pid: held.as_ref().map_or(0, |l| l.pid),
            acquired_at: held.map_or_else(chrono::Utc::now, |l| l.acquired_at),
        })
    }

    async fn release_lease(&self, workflow_id: &str, holder: &str) -> Result<(), StoreError> {
        check_workflow_id(workflow_id)?;
        if self
            .read_lease(workflow_id)
            .await?
            .is_some_and(|held| held.holder == holder)
        {
            match tokio::fs::remove_file(self.layout.lease_path(workflow_id)).await {
                Ok(()) => tracing::debug!(workflow_id, holder, "lease released"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}

impl FileStateStore {
    async fn checkpoint_files(&self, workflow_id: &str) -> Result<Vec<(u64, PathBuf)>, StoreError> {
        let mut entries = match tokio::fs::read_dir(self.layout.checkpoints_dir(workflow_id)).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut out = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if let Some(sequence) = checkpoint_sequence(&path) {
                out.push((sequence, path));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use conductor_types::event::WorkflowEvent;
    use conductor_types::state::WorkflowState;
    use tempfile::TempDir;

    fn record(workflow_id: &str, sequence: u64) -> EventRecord {
        EventRecord {
            sequence,
            timestamp: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, sequence as u32).unwrap(),
            workflow_id: workflow_id.to_string(),
            event: if sequence == 1 {
                WorkflowEvent::WorkflowStarted {
                    definition_id: "review".into(),
                    definition_name: None,
                    variables: Default::default(),
                }
            } else {
                WorkflowEvent::WorkflowPaused {
                    reason: format!("pause {sequence}"),
                }
            },
        }
    }

    fn checkpoint(workflow_id: &str, sequence: u64) -> Checkpoint {
        let mut state = WorkflowState::new(workflow_id);
        state.last_sequence = sequence;
        Checkpoint {
            format_version: conductor_types::state::STATE_FORMAT_VERSION,
            workflow_id: workflow_id.to_string(),
            sequence,
            taken_at: Utc::now(),
            checksum: "00".repeat(32),
            state,
        }
    }

    #[tokio::test]
    async fn appends_survive_a_new_store_instance() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path());
        for seq in 1..=3 {
            store.append(&record("wf", seq)).await.unwrap();
        }

        let reopened = FileStateStore::new(dir.path());
        let events = reopened.read_events("wf", 1).await.unwrap();
        assert_eq!(events.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![2, 3]);

        let err = reopened.append(&record("wf", 3)).await.unwrap_err();
        assert!(matches!(err, StoreError::SequenceConflict { expected: 4, found: 3, .. }));
        reopened.append(&record("wf", 4)).await.unwrap();
    }

    #[tokio::test]
    async fn torn_trailing_line_is_ignored_then_truncated() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path());
        store.append(&record("wf", 1)).await.unwrap();
        store.append(&record("wf", 2)).await.unwrap();

        let path = store.layout().events_path("wf");
        let mut file = tokio::fs::OpenOptions::new().append(true).open(&path).await.unwrap();
        file.write_all(br#"{"sequence":3,"timest"#).await.unwrap();
        drop(file);

        let reopened = FileStateStore::new(dir.path());
        assert_eq!(reopened.read_events("wf", 0).await.unwrap().len(), 2);

        reopened.append(&record("wf", 3)).await.unwrap();
        let events = reopened.read_events("wf", 0).await.unwrap();
        assert_eq!(events.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn failed_append_leaves_log_appendable() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path());
        store.append(&record("wf", 1)).await.unwrap();

        store.tear_next_append.store(true, std::sync::atomic::Ordering::SeqCst);
        let err = store.append(&record("wf", 2)).await.unwrap_err();
        assert!(matches!(err, StoreError::Io(_)), "got {err:?}");

        store.append(&record("wf", 2)).await.unwrap();
        store.append(&record("wf", 3)).await.unwrap();
        let events = store.read_events("wf", 0).await.unwrap();
        assert_eq!(events.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![1, 2, 3]);

        let reopened = FileStateStore::new(dir.path());
        assert_eq!(reopened.read_events("wf", 0).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn corrupt_middle_line_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path());
        store.append(&record("wf", 1)).await.unwrap();

        let path = store.layout().events_path("wf");
        let mut content = tokio::fs::read_to_string(&path).await.unwrap();
        content.insert_str(0, "garbage\n");
        tokio::fs::write(&path, content).await.unwrap();

        let err = store.read_events("wf", 0).await.unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
    }

    #[tokio::test]
    async fn checkpoints_listed_newest_first_and_pruned() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig {
            keep_checkpoints: 2,
            ..StoreConfig::default()
        };
        let store = FileStateStore::with_config(dir.path(), &config);
        for seq in [5, 10, 15] {
            store.write_checkpoint(&checkpoint("wf", seq)).await.unwrap();
        }

        let listed = store.list_checkpoints("wf").await.unwrap();
        assert_eq!(listed.iter().map(|c| c.sequence).collect::<Vec<_>>(), vec![15, 10]);
        let parsed: Checkpoint = serde_json::from_str(&listed[0].body).unwrap();
        assert_eq!(parsed.sequence, 15);

        // No temp files left behind.
        let mut names = std::fs::read_dir(store.layout().checkpoints_dir("wf"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect::<Vec<_>>();
        names.sort();
        assert_eq!(
            names,
            vec!["00000000000000000010.json", "00000000000000000015.json"]
        );
    }

    #[tokio::test]
    async fn definition_and_plan_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path());
        assert!(store.load_definition("wf").await.unwrap().is_none());

        let definition: WorkflowDefinition = serde_json::from_value(serde_json::json!({
            "schema_version": "1.1",
            "id": "review",
            "steps": [{ "id": "lint", "agent": "linter", "action": "run" }]
        }))
        .unwrap();
        store.save_definition("wf", &definition).await.unwrap();
        assert_eq!(store.load_definition("wf").await.unwrap(), Some(definition));
    }

    #[tokio::test]
    async fn list_workflows_orders_by_last_event() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path());
        store.append(&record("older", 1)).await.unwrap();
        store.append(&record("older", 2)).await.unwrap();
        store.append(&record("older", 3)).await.unwrap();
        store.append(&record("newer", 1)).await.unwrap();
        store.append(&record("newer", 2)).await.unwrap();
        store.append(&record("newer", 3)).await.unwrap();
        store.append(&record("newer", 4)).await.unwrap();
        tokio::fs::create_dir_all(store.layout().workflow_dir("empty")).await.unwrap();

        let listed = store.list_workflows().await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|w| w.workflow_id.as_str()).collect();
        assert_eq!(ids, vec!["newer", "older"]);
        assert_eq!(listed[0].definition_id.as_deref(), Some("review"));
    }

    #[tokio::test]
    async fn lease_blocks_second_holder_until_released_or_forced() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path());
        let first = Lease::for_current_process();
        let second = Lease::for_current_process();

        store.acquire_lease("wf", &first, false).await.unwrap();
        // Re-acquiring your own lease is fine.
        store.acquire_lease("wf", &first, false).await.unwrap();

        let err = store.acquire_lease("wf", &second, false).await.unwrap_err();
        assert!(matches!(err, StoreError::LeaseHeld { .. }));

        store.release_lease("wf", &second.holder).await.unwrap();
        assert!(store.acquire_lease("wf", &second, false).await.is_err());

        store.acquire_lease("wf", &second, true).await.unwrap();
        store.release_lease("wf", &second.holder).await.unwrap();
        store.acquire_lease("wf", &first, false).await.unwrap();
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn lease_of_dead_process_is_taken_over() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path());
        let dead = Lease {
            holder: "crashed".into(),
            pid: 999_999_999,
            acquired_at: Utc::now(),
        };
        store.acquire_lease("wf", &dead, false).await.unwrap();

        let fresh = Lease::for_current_process();
        store.acquire_lease("wf", &fresh, false).await.unwrap();
        assert_eq!(store.read_lease("wf").await.unwrap().unwrap().holder, fresh.holder);
    }

    #[tokio::test]
    async fn path_like_ids_are_rejected() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path());
        assert!(store.read_events("../escape", 0).await.is_err());
        assert!(store.append(&record("a/b", 1)).await.is_err());
    }
}
