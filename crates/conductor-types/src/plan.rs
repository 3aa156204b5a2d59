//! Normalized execution plan emitted at workflow start for introspection.

use serde::{Deserialize, Serialize};

/// Static view of a workflow graph: steps, edges, entry and exit points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub definition_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub schema_version: String,
    pub max_concurrency: usize,
    pub steps: Vec<PlannedStep>,
    pub edges: Vec<PlanEdge>,
    /// Steps with no incoming edge.
    pub entry_points: Vec<String>,
    /// Steps with no outgoing edge.
    pub exit_points: Vec<String>,
    /// Steps grouped by dependency depth.
    pub waves: Vec<Vec<String>>,
}

/// One step with its resolved policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedStep {
    pub id: String,
    pub agent: String,
    pub action: String,
    pub wave: usize,
    pub depends_on: Vec<String>,
    pub dependents: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub creates: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub consumes: Vec<String>,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub optional: bool,
}

/// A dependency edge `from -> to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEdge {
    pub from: String,
    pub to: String,
    #[serde(flatten)]
    pub kind: EdgeKind,
}

/// Why an edge exists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "via", rename_all = "snake_case")]
pub enum EdgeKind {
    /// Declared in `requires`.
    Requires,
    /// `to` consumes an artifact `from` creates.
    Artifact { artifact: String },
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EdgeKind::Requires => write!(f, "requires"),
            EdgeKind::Artifact { artifact } => write!(f, "artifact:{artifact}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_kind_flattens_into_edge() {
        let edge = PlanEdge {
            from: "lint".into(),
            to: "review".into(),
            kind: EdgeKind::Artifact {
                artifact: "lint-report".into(),
            },
        };
        let value = serde_json::to_value(&edge).unwrap();
        assert_eq!(value["via"], "artifact");
        assert_eq!(value["artifact"], "lint-report");
        let back: PlanEdge = serde_json::from_value(value).unwrap();
        assert_eq!(back, edge);
    }
}
