//! Checkpoint format migration.
//!
//! Checkpoints are read as raw JSON so older layouts can be upgraded in
//! place before deserialization. Each step moves a document forward by one
//! version; newer versions than this build understands are refused.

use serde_json::{Map, Value};
use thiserror::Error;

use conductor_types::state::{Checkpoint, STATE_FORMAT_VERSION};

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error(
        "checkpoint format version {found} is newer than the supported version {supported}; \
         upgrade conductor to read it"
    )]
    UnsupportedVersion { found: u64, supported: u32 },

    #[error("checkpoint has no usable `format_version`")]
    MissingVersion,

    #[error("malformed checkpoint: {0}")]
    Malformed(String),
}

/// Format version of a raw checkpoint document.
pub fn format_version(raw: &Value) -> Result<u64, MigrationError> {
    match raw.get("format_version").and_then(Value::as_u64) {
        Some(v) if v >= 1 => Ok(v),
        _ => Err(MigrationError::MissingVersion),
    }
}

/// Upgrade a raw checkpoint to the current format and deserialize it.
pub fn migrate_checkpoint(mut raw: Value) -> Result<Checkpoint, MigrationError> {
    let mut version = format_version(&raw)?;
    if version > u64::from(STATE_FORMAT_VERSION) {
        return Err(MigrationError::UnsupportedVersion {
            found: version,
            supported: STATE_FORMAT_VERSION,
        });
    }

    while version < u64::from(STATE_FORMAT_VERSION) {
        let state = raw
            .get_mut("state")
            .and_then(Value::as_object_mut)
            .ok_or_else(|| MigrationError::Malformed("missing `state` object".into()))?;
        match version {
            1 => v1_to_v2(state)?,
            other => {
                return Err(MigrationError::Malformed(format!(
                    "no migration from format version {other}"
                )));
            }
        }
        version += 1;
        tracing::debug!(version, "migrated checkpoint format");
    }
    raw["format_version"] = Value::from(STATE_FORMAT_VERSION);

    serde_json::from_value(raw).map_err(|e| MigrationError::Malformed(e.to_string()))
}

/// Version 1 kept `completed_steps` and `skipped_steps` as id lists, called
/// the execution list `step_history`, and had no `variables`.
fn v1_to_v2(state: &mut Map<String, Value>) -> Result<(), MigrationError> {
    let mut completed = Map::new();
    for (key, kind) in [("completed_steps", "completed"), ("skipped_steps", "skipped")] {
        match state.remove(key) {
            None | Some(Value::Null) => {}
            Some(Value::Array(ids)) => {
                for id in ids {
                    let Value::String(id) = id else {
                        return Err(MigrationError::Malformed(format!("non-string id in `{key}`")));
                    };
                    completed.insert(id, Value::from(kind));
                }
            }
            Some(_) => {
                return Err(MigrationError::Malformed(format!("`{key}` is not a list")));
            }
        }
    }
    state.insert("completed_steps".into(), Value::Object(completed));

    let mut history = match state.remove("step_history") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items,
        Some(_) => return Err(MigrationError::Malformed("`step_history` is not a list".into())),
    };
    for entry in &mut history {
        if let Some(entry) = entry.as_object_mut() {
            for field in ["agent", "action"] {
                entry
                    .entry(field)
                    .or_insert_with(|| Value::from("unknown"));
            }
        }
    }
    state.insert("executions".into(), Value::Array(history));
    state
        .entry("variables")
        .or_insert_with(|| Value::Object(Map::new()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_types::state::{CompletionKind, StepStatus};
    use serde_json::json;

    fn v1_checkpoint() -> Value {
        json!({
            "format_version": 1,
            "workflow_id": "wf-1",
            "sequence": 4,
            "taken_at": "2026-01-05T10:00:00Z",
            "checksum": "abc",
            "state": {
                "workflow_id": "wf-1",
                "status": "running",
                "completed_steps": ["lint"],
                "skipped_steps": ["docs"],
                "artifacts": {},
                "step_history": [{
                    "step_id": "lint",
                    "status": "completed",
                    "attempt": 1,
                    "started_at": "2026-01-05T09:59:00Z"
                }],
                "last_sequence": 4
            }
        })
    }

    #[test]
    fn migrates_v1_layout() {
        let checkpoint = migrate_checkpoint(v1_checkpoint()).unwrap();
        assert_eq!(checkpoint.format_version, STATE_FORMAT_VERSION);
        let state = checkpoint.state;
        assert_eq!(state.completed_steps["lint"], CompletionKind::Completed);
        assert_eq!(state.completed_steps["docs"], CompletionKind::Skipped);
        assert_eq!(state.executions.len(), 1);
        assert_eq!(state.executions[0].status, StepStatus::Completed);
        assert_eq!(state.executions[0].agent, "unknown");
        assert!(state.variables.is_empty());
    }

    #[test]
    fn refuses_newer_format() {
        let mut raw = v1_checkpoint();
        raw["format_version"] = json!(STATE_FORMAT_VERSION + 1);
        let err = migrate_checkpoint(raw).unwrap_err();
        assert!(matches!(err, MigrationError::UnsupportedVersion { .. }));
        assert!(err.to_string().contains("upgrade"));
    }

    #[test]
    fn missing_version_rejected() {
        let mut raw = v1_checkpoint();
        raw.as_object_mut().unwrap().remove("format_version");
        assert!(matches!(migrate_checkpoint(raw), Err(MigrationError::MissingVersion)));
    }

    #[test]
    fn malformed_v1_lists_rejected() {
        let mut raw = v1_checkpoint();
        raw["state"]["completed_steps"] = json!("lint");
        assert!(matches!(migrate_checkpoint(raw), Err(MigrationError::Malformed(_))));
    }
}
