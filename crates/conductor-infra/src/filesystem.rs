//! Data directory resolution and on-disk layout.
//!
//! ```text
//! {data_dir}/
//!   config.toml
//!   conductor.db                  (sqlite backend)
//!   workflows/{workflow_id}/      (file backend)
//!     events.jsonl
//!     checkpoints/{sequence:020}.json
//!     definition.json
//!     plan.json
//!     lease.json
//! ```

use std::path::{Path, PathBuf};

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "CONDUCTOR_DATA_DIR";

/// Resolve the data directory.
///
/// Priority: `CONDUCTOR_DATA_DIR`, then `~/.conductor`, then `./.conductor`.
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".conductor");
    }

    PathBuf::from(".conductor")
}

/// Path helpers for one data directory.
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    pub fn database_path(&self) -> PathBuf {
        self.root.join("conductor.db")
    }

    /// `sqlx` URL for the SQLite database, created on first open.
    pub fn database_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.database_path().display())
    }

    pub fn workflows_dir(&self) -> PathBuf {
        self.root.join("workflows")
    }

    pub fn workflow_dir(&self, workflow_id: &str) -> PathBuf {
        self.workflows_dir().join(workflow_id)
    }

    pub fn events_path(&self, workflow_id: &str) -> PathBuf {
        self.workflow_dir(workflow_id).join("events.jsonl")
    }

    pub fn checkpoints_dir(&self, workflow_id: &str) -> PathBuf {
        self.workflow_dir(workflow_id).join("checkpoints")
    }

    /// Zero-padded so lexical order matches sequence order.
    pub fn checkpoint_path(&self, workflow_id: &str, sequence: u64) -> PathBuf {
        self.checkpoints_dir(workflow_id)
            .join(format!("{sequence:020}.json"))
    }

    pub fn definition_path(&self, workflow_id: &str) -> PathBuf {
        self.workflow_dir(workflow_id).join("definition.json")
    }

    pub fn plan_path(&self, workflow_id: &str) -> PathBuf {
        self.workflow_dir(workflow_id).join("plan.json")
    }

    pub fn lease_path(&self, workflow_id: &str) -> PathBuf {
        self.workflow_dir(workflow_id).join("lease.json")
    }
}

/// Parse the sequence number out of a checkpoint file name.
pub fn checkpoint_sequence(path: &Path) -> Option<u64> {
    if path.extension().and_then(|e| e.to_str()) != Some("json") {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_names_sort_by_sequence() {
        let layout = DataLayout::new("/data");
        let early = layout.checkpoint_path("wf", 9);
        let late = layout.checkpoint_path("wf", 10);
        assert!(early.file_name() < late.file_name());
        assert_eq!(
            late,
            PathBuf::from("/data/workflows/wf/checkpoints/00000000000000000010.json")
        );
    }

    #[test]
    fn checkpoint_sequence_parses_own_names_only() {
        let layout = DataLayout::new("/data");
        assert_eq!(checkpoint_sequence(&layout.checkpoint_path("wf", 42)), Some(42));
        assert_eq!(checkpoint_sequence(Path::new("/data/.tmpX1y2")), None);
        assert_eq!(checkpoint_sequence(Path::new("/data/notes.json")), None);
    }

    #[test]
    fn database_url_creates_missing_file() {
        let layout = DataLayout::new("/data");
        assert_eq!(layout.database_url(), "sqlite:///data/conductor.db?mode=rwc");
    }
}
