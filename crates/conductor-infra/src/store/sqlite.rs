//! SQLite state store.
//!
//! One database for every workflow instance, opened with a split
//! reader/writer pool in WAL mode. SQLite allows a single writer, so the
//! writer pool holds one connection and every mutation (including the
//! sequence check on append) runs in a transaction on it.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use conductor_core::workflow::store::{Lease, RawCheckpoint, StateStore, StoreError};
use conductor_types::config::StoreConfig;
use conductor_types::event::{EventRecord, WorkflowEvent};
use conductor_types::plan::ExecutionPlan;
use conductor_types::state::{Checkpoint, WorkflowSummary};
use conductor_types::workflow::WorkflowDefinition;

use super::{check_workflow_id, lease_is_stale};

/// Split read/write pool for SQLite with WAL mode.
///
/// - `reader`: up to 8 read-only connections.
/// - `writer`: one connection for serialized writes.
#[derive(Debug, Clone)]
pub struct DatabasePool {
    pub reader: SqlitePool,
    pub writer: SqlitePool,
}

impl DatabasePool {
    /// Connect both pools and run migrations on the writer before the
    /// reader opens.
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let base_opts = SqliteConnectOptions::from_str(database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let read_opts = base_opts.clone().read_only(true);

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(base_opts)
            .await?;

        sqlx::migrate!("../../migrations").run(&writer).await?;

        let reader = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(read_opts)
            .await?;

        Ok(Self { reader, writer })
    }
}

/// SQLite-backed implementation of `StateStore`.
#[derive(Debug, Clone)]
pub struct SqliteStateStore {
    pool: DatabasePool,
    keep_checkpoints: usize,
    lease_ttl: Duration,
}

impl SqliteStateStore {
    pub fn new(pool: DatabasePool, config: &StoreConfig) -> Self {
        Self {
            pool,
            keep_checkpoints: config.keep_checkpoints.max(1),
            lease_ttl: Duration::from_secs(config.lease_ttl_secs),
        }
    }

    pub async fn connect(database_url: &str, config: &StoreConfig) -> Result<Self, StoreError> {
        let pool = DatabasePool::new(database_url).await.map_err(db_err)?;
        Ok(Self::new(pool, config))
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    async fn load_json<T: serde::de::DeserializeOwned>(
        &self,
        workflow_id: &str,
        column: &str,
    ) -> Result<Option<T>, StoreError> {
        check_workflow_id(workflow_id)?;
        // `column` is one of two literals below, never user input.
        let sql = format!("SELECT {column} AS doc FROM workflow_runs WHERE workflow_id = ?");
        let row = sqlx::query(&sql)
            .bind(workflow_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(db_err)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let doc: Option<String> = row.try_get("doc").map_err(db_err)?;
        doc.map(|doc| serde_json::from_str(&doc).map_err(StoreError::from))
            .transpose()
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

struct SummaryRow {
    workflow_id: String,
    definition_id: Option<String>,
    created_at: String,
    updated_at: String,
}

impl SummaryRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            workflow_id: row.try_get("workflow_id")?,
            definition_id: row.try_get("definition_id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_summary(self) -> Result<WorkflowSummary, StoreError> {
        Ok(WorkflowSummary {
            workflow_id: self.workflow_id,
            definition_id: self.definition_id,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

struct LeaseRow {
    holder: String,
    pid: i64,
    acquired_at: String,
}

impl LeaseRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            holder: row.try_get("holder")?,
            pid: row.try_get("pid")?,
            acquired_at: row.try_get("acquired_at")?,
        })
    }

    fn into_lease(self) -> Result<Lease, StoreError> {
        Ok(Lease {
            holder: self.holder,
            pid: u32::try_from(self.pid)
                .map_err(|_| StoreError::Database(format!("invalid lease pid {}", self.pid)))?,
            acquired_at: parse_datetime(&self.acquired_at)?,
        })
    }
}

fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Database(format!("invalid datetime '{s}': {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

fn to_i64(value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::Database(format!("sequence {value} out of range")))
}

/// Make sure the parent run row exists.
async fn ensure_run(
    conn: &mut sqlx::SqliteConnection,
    workflow_id: &str,
) -> Result<(), StoreError> {
    sqlx::query("INSERT INTO workflow_runs (workflow_id) VALUES (?) ON CONFLICT(workflow_id) DO NOTHING")
        .bind(workflow_id)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// StateStore
// ---------------------------------------------------------------------------

impl StateStore for SqliteStateStore {
    async fn append(&self, record: &EventRecord) -> Result<u64, StoreError> {
        let workflow_id = record.workflow_id.as_str();
        check_workflow_id(workflow_id)?;
        let body = serde_json::to_string(record)?;
        let timestamp = format_datetime(&record.timestamp);

        let mut tx = self.pool.writer.begin().await.map_err(db_err)?;
        ensure_run(&mut *tx, workflow_id).await?;

        let last: Option<i64> =
            sqlx::query_scalar("SELECT MAX(sequence) FROM workflow_events WHERE workflow_id = ?")
                .bind(workflow_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(db_err)?;
        let expected = last.map_or(1, |s| s as u64 + 1);
        if record.sequence != expected {
            return Err(StoreError::SequenceConflict {
                workflow_id: workflow_id.to_string(),
                expected,
                found: record.sequence,
            });
        }

        sqlx::query(
            "INSERT INTO workflow_events (workflow_id, sequence, timestamp, kind, record) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(workflow_id)
        .bind(to_i64(record.sequence)?)
        .bind(&timestamp)
        .bind(record.event.kind())
        .bind(&body)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let definition_id = match &record.event {
            WorkflowEvent::WorkflowStarted { definition_id, .. } => Some(definition_id.as_str()),
            _ => None,
        };
        sqlx::query(
            "UPDATE workflow_runs SET \
               created_at = COALESCE(created_at, ?1), \
               updated_at = ?1, \
               definition_id = COALESCE(?2, definition_id) \
             WHERE workflow_id = ?3",
        )
        .bind(&timestamp)
        .bind(definition_id)
        .bind(workflow_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(record.sequence)
    }

    async fn read_events(&self, workflow_id: &str, after: u64) -> Result<Vec<EventRecord>, StoreError> {
        check_workflow_id(workflow_id)?;
        let rows = sqlx::query(
            "SELECT record FROM workflow_events WHERE workflow_id = ? AND sequence > ? ORDER BY sequence",
        )
        .bind(workflow_id)
        .bind(to_i64(after)?)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(db_err)?;

        rows.iter()
            .map(|row| {
                let body: String = row.try_get("record").map_err(db_err)?;
                serde_json::from_str(&body).map_err(StoreError::from)
            })
            .collect()
    }

    async fn write_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        let workflow_id = checkpoint.workflow_id.as_str();
        check_workflow_id(workflow_id)?;
        let body = serde_json::to_string_pretty(checkpoint)?;

        let mut tx = self.pool.writer.begin().await.map_err(db_err)?;
        ensure_run(&mut *tx, workflow_id).await?;
        sqlx::query(
            "INSERT INTO workflow_checkpoints (workflow_id, sequence, taken_at, body) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT(workflow_id, sequence) DO UPDATE SET \
               taken_at = excluded.taken_at, body = excluded.body",
        )
        .bind(workflow_id)
        .bind(to_i64(checkpoint.sequence)?)
        .bind(format_datetime(&checkpoint.taken_at))
        .bind(&body)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let pruned = sqlx::query(
            "DELETE FROM workflow_checkpoints WHERE workflow_id = ?1 AND sequence NOT IN \
             (SELECT sequence FROM workflow_checkpoints WHERE workflow_id = ?1 \
              ORDER BY sequence DESC LIMIT ?2)",
        )
        .bind(workflow_id)
        .bind(self.keep_checkpoints as i64)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?
        .rows_affected();

        tx.commit().await.map_err(db_err)?;
        if pruned > 0 {
            tracing::debug!(workflow_id, pruned, "pruned old checkpoints");
        }
        Ok(())
    }

    async fn list_checkpoints(&self, workflow_id: &str) -> Result<Vec<RawCheckpoint>, StoreError> {
        check_workflow_id(workflow_id)?;
        let rows = sqlx::query(
            "SELECT sequence, body FROM workflow_checkpoints WHERE workflow_id = ? ORDER BY sequence DESC",
        )
        .bind(workflow_id)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(db_err)?;

        rows.iter()
            .map(|row| {
                let sequence: i64 = row.try_get("sequence").map_err(db_err)?;
                Ok(RawCheckpoint {
                    sequence: sequence as u64,
                    location: format!("sqlite:workflow_checkpoints/{workflow_id}/{sequence}"),
                    body: row.try_get("body").map_err(db_err)?,
                })
            })
            .collect()
    }

    async fn save_definition(
        &self,
        workflow_id: &str,
        definition: &WorkflowDefinition,
    ) -> Result<(), StoreError> {
        check_workflow_id(workflow_id)?;
        let body = serde_json::to_string(definition)?;
        sqlx::query(
            "INSERT INTO workflow_runs (workflow_id, definition_id, definition) VALUES (?, ?, ?) \
             ON CONFLICT(workflow_id) DO UPDATE SET \
               definition_id = excluded.definition_id, definition = excluded.definition",
        )
        .bind(workflow_id)
        .bind(&definition.id)
        .bind(&body)
        .execute(&self.pool.writer)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn load_definition(&self, workflow_id: &str) -> Result<Option<WorkflowDefinition>, StoreError> {
        self.load_json(workflow_id, "definition").await
    }

    async fn save_plan(&self, workflow_id: &str, plan: &ExecutionPlan) -> Result<(), StoreError> {
        check_workflow_id(workflow_id)?;
        let body = serde_json::to_string(plan)?;
        sqlx::query(
            "INSERT INTO workflow_runs (workflow_id, plan) VALUES (?, ?) \
             ON CONFLICT(workflow_id) DO UPDATE SET plan = excluded.plan",
        )
        .bind(workflow_id)
        .bind(&body)
        .execute(&self.pool.writer)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn load_plan(&self, workflow_id: &str) -> Result<Option<ExecutionPlan>, StoreError> {
        self.load_json(workflow_id, "plan").await
    }

    async fn list_workflows(&self) -> Result<Vec<WorkflowSummary>, StoreError> {
        let rows = sqlx::query(
            "SELECT workflow_id, definition_id, created_at, updated_at FROM workflow_runs \
             WHERE updated_at IS NOT NULL ORDER BY updated_at DESC, workflow_id DESC",
        )
        .fetch_all(&self.pool.reader)
        .await
        .map_err(db_err)?;

        rows.iter()
            .map(|row| SummaryRow::from_row(row).map_err(db_err)?.into_summary())
            .collect()
    }

    async fn acquire_lease(&self, workflow_id: &str, lease: &Lease, force: bool) -> Result<(), StoreError> {
        check_workflow_id(workflow_id)?;
        let mut tx = self.pool.writer.begin().await.map_err(db_err)?;

        let held = sqlx::query("SELECT holder, pid, acquired_at FROM workflow_leases WHERE workflow_id = ?")
            .bind(workflow_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?
            .map(|row| LeaseRow::from_row(&row).map_err(db_err)?.into_lease())
            .transpose()?;

        if let Some(held) = held.filter(|h| h.holder != lease.holder) {
            if !force && !lease_is_stale(&held, self.lease_ttl) {
                return Err(StoreError::LeaseHeld {
                    workflow_id: workflow_id.to_string(),
                    holder: held.holder,
                    pid: held.pid,
                    acquired_at: held.acquired_at,
                });
            }
            tracing::warn!(
                workflow_id,
                holder = %held.holder,
                pid = held.pid,
                forced = force,
                "taking over workflow lease"
            );
        }

        sqlx::query(
            "INSERT INTO workflow_leases (workflow_id, holder, pid, acquired_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT(workflow_id) DO UPDATE SET \
               holder = excluded.holder, pid = excluded.pid, acquired_at = excluded.acquired_at",
        )
        .bind(workflow_id)
        .bind(&lease.holder)
        .bind(i64::from(lease.pid))
        .bind(format_datetime(&lease.acquired_at))
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        tracing::debug!(workflow_id, holder = %lease.holder, "lease acquired");
        Ok(())
    }

    async fn release_lease(&self, workflow_id: &str, holder: &str) -> Result<(), StoreError> {
        check_workflow_id(workflow_id)?;
        sqlx::query("DELETE FROM workflow_leases WHERE workflow_id = ? AND holder = ?")
            .bind(workflow_id)
            .bind(holder)
            .execute(&self.pool.writer)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}
