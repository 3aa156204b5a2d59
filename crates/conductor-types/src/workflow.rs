//! Workflow definition types for Conductor.
//!
//! `WorkflowDefinition` is the validated, immutable form of a workflow
//! document. YAML and JSON documents are checked by the schema validator in
//! `conductor-core` before they are deserialized into these types, so the
//! serde shape here mirrors the field allow-lists enforced there.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// A declarative DAG of steps, each bound to an agent capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct WorkflowDefinition {
    /// Declared schema version (`"1.0"` or `"1.1"`).
    pub schema_version: String,
    /// Stable identifier of the definition (kebab-case recommended).
    pub id: String,
    /// Optional human-readable name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Workflow-level settings; unset fields fall back to engine config.
    #[serde(default)]
    pub settings: WorkflowSettings,
    /// Default variable bag, overridable per run.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, serde_json::Value>,
    /// Ordered steps. Declaration order is the dispatch tie-break.
    pub steps: Vec<StepDefinition>,
    /// Post-step artifact checks.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gates: Vec<GateDefinition>,
    /// Legacy flag from schema 1.0. Accepted there and ignored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_detect: Option<bool>,
}

impl WorkflowDefinition {
    /// Look up a step by id.
    pub fn step(&self, id: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// The step that declares `artifact` in its `creates` list.
    pub fn producer_of(&self, artifact: &str) -> Option<&StepDefinition> {
        self.steps
            .iter()
            .find(|s| s.creates.iter().any(|a| a == artifact))
    }

    /// Gates evaluated after `step_id` completes.
    pub fn gates_after<'a>(&'a self, step_id: &'a str) -> impl Iterator<Item = &'a GateDefinition> {
        self.gates.iter().filter(move |g| g.after == step_id)
    }
}

/// Workflow-level execution settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct WorkflowSettings {
    /// Maximum steps running at once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
    /// Default per-step timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_timeout_secs: Option<u64>,
    /// Overall time budget for one invocation (default: 2x step timeout).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_timeout_secs: Option<u64>,
    /// Default retry policy for steps without an override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    /// Checkpoint after this many folded step results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_every: Option<u32>,
    /// Checkpoint when this much time has passed since the last one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_interval_secs: Option<u64>,
    /// Maximum step dispatches per invocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<u32>,
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// A single node in the workflow DAG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct StepDefinition {
    /// Unique step id within the workflow.
    pub id: String,
    /// Capability (agent class) that performs the step. Also the circuit
    /// breaker key.
    pub agent: String,
    /// Action requested from the agent.
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Steps that must complete before this one is dispatched.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<String>,
    /// Artifacts this step produces.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub creates: Vec<String>,
    /// Artifacts this step needs from earlier steps.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub consumes: Vec<String>,
    /// Inputs passed to the capability. String values may contain
    /// `{{ variables.x }}` / `{{ artifacts.x }}` / `{{ workflow.id }}`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    /// A failed optional step is recorded as skipped instead of failing the
    /// workflow.
    #[serde(default, skip_serializing_if = "is_false")]
    pub optional: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Artifact check evaluated when step `after` completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct GateDefinition {
    pub id: String,
    /// Step whose completion triggers the gate.
    pub after: String,
    /// Artifacts that must exist once `after` has completed.
    #[serde(default)]
    pub artifacts: Vec<String>,
    /// A failing blocking gate fails the step; a non-blocking one only warns.
    #[serde(default = "default_true")]
    pub blocking: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Retry Configuration
// ---------------------------------------------------------------------------

/// Retry and backoff policy for a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first (default 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff: BackoffStrategy,
    /// Delay before the second attempt (default 1000ms).
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Upper bound on any single delay (default 30000ms).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Add up to 10% random jitter to each delay.
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: BackoffStrategy::default(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: true,
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay before every retry.
    Fixed,
    /// Delay doubles with each attempt.
    #[default]
    Exponential,
}

impl std::fmt::Display for BackoffStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackoffStrategy::Fixed => write!(f, "fixed"),
            BackoffStrategy::Exponential => write!(f, "exponential"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
