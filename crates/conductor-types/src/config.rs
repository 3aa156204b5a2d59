//! Engine configuration types for Conductor.
//!
//! `EngineConfig` is the top-level `config.toml` in the data directory. Every
//! field has a default, so an empty or missing file yields a working engine.
//! Workflow `settings` override the `[engine]` and `[retry]` defaults per run.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::workflow::RetryPolicy;

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default)]
    pub engine: EngineSettings,
    /// Retry policy for steps that declare none.
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Subprocess agents registered as capabilities.
    #[serde(default)]
    pub agents: Vec<AgentCommandConfig>,
}

/// Scheduling defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineSettings {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Per-step timeout (default 15 minutes).
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,
    /// Workflow timeout as a multiple of the step timeout.
    #[serde(default = "default_workflow_timeout_multiplier")]
    pub workflow_timeout_multiplier: u32,
    #[serde(default = "default_checkpoint_every")]
    pub checkpoint_every: u32,
    #[serde(default = "default_checkpoint_interval_secs")]
    pub checkpoint_interval_secs: u64,
    /// Step dispatches allowed per invocation.
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            step_timeout_secs: default_step_timeout_secs(),
            workflow_timeout_multiplier: default_workflow_timeout_multiplier(),
            checkpoint_every: default_checkpoint_every(),
            checkpoint_interval_secs: default_checkpoint_interval_secs(),
            max_steps: default_max_steps(),
        }
    }
}

fn default_max_concurrency() -> usize {
    8
}

fn default_step_timeout_secs() -> u64 {
    900
}

fn default_workflow_timeout_multiplier() -> u32 {
    2
}

fn default_checkpoint_every() -> u32 {
    5
}

fn default_checkpoint_interval_secs() -> u64 {
    60
}

fn default_max_steps() -> u32 {
    1_000
}

/// Circuit breaker thresholds shared by every dependency class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the breaker.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close it again.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    /// Time spent open before a trial call is admitted.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_success_threshold() -> u32 {
    2
}

fn default_cooldown_secs() -> u64 {
    60
}

/// Where workflow state lives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// JSON-lines event log and checkpoint files per workflow.
    #[default]
    File,
    /// Single SQLite database in the data directory.
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Checkpoints retained per workflow.
    #[serde(default = "default_keep_checkpoints")]
    pub keep_checkpoints: usize,
    /// Lease age after which a lease of an unverifiable holder is stale.
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            keep_checkpoints: default_keep_checkpoints(),
            lease_ttl_secs: default_lease_ttl_secs(),
        }
    }
}

fn default_keep_checkpoints() -> usize {
    3
}

fn default_lease_ttl_secs() -> u64 {
    86_400
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Emit JSON log lines instead of human-readable text.
    #[serde(default)]
    pub json: bool,
    /// Export spans with the OpenTelemetry stdout exporter.
    #[serde(default)]
    pub otel: bool,
}

/// An out-of-process agent invoked as a subprocess.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentCommandConfig {
    /// Agent name referenced by steps.
    pub name: String,
    /// Program and arguments.
    pub command: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}
