//! Workflow document parsing and file loading.
//!
//! YAML and JSON documents are parsed into a `serde_json::Value` first and
//! handed to the schema validator, so every document goes through the same
//! strict checks regardless of its source format.

use std::path::Path;

use serde_json::Value;
use thiserror::Error;

use super::schema::{self, ValidatedDefinition, ValidationError};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur while loading a workflow document.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// YAML/JSON syntax failure.
    #[error("parse error: {0}")]
    Parse(String),

    /// The document parsed but failed schema validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Filesystem I/O failure.
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse and validate a YAML workflow document.
pub fn parse_workflow_yaml(yaml: &str) -> Result<ValidatedDefinition, WorkflowError> {
    let raw: Value = serde_yaml_ng::from_str(yaml).map_err(|e| WorkflowError::Parse(e.to_string()))?;
    Ok(schema::validate(&raw)?)
}

/// Parse and validate a JSON workflow document.
pub fn parse_workflow_json(json: &str) -> Result<ValidatedDefinition, WorkflowError> {
    let raw: Value = serde_json::from_str(json).map_err(|e| WorkflowError::Parse(e.to_string()))?;
    Ok(schema::validate(&raw)?)
}

/// Load a workflow file, choosing the parser by extension (`.json` is JSON,
/// anything else is YAML).
pub fn load_workflow_file(path: &Path) -> Result<ValidatedDefinition, WorkflowError> {
    let content = std::fs::read_to_string(path).map_err(|source| WorkflowError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    if is_json {
        parse_workflow_json(&content)
    } else {
        parse_workflow_yaml(&content)
    }
}
