//! Capability output contract shared by in-process and subprocess agents.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Successful result of a capability call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityOutput {
    /// Named artifacts produced by the call.
    #[serde(default)]
    pub artifacts: BTreeMap<String, serde_json::Value>,
    /// Optional short human-readable summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl CapabilityOutput {
    pub fn with_artifact(mut self, id: impl Into<String>, value: serde_json::Value) -> Self {
        self.artifacts.insert(id.into(), value);
        self
    }
}
