//! Effective execution settings: workflow `settings` layered over engine
//! configuration.

use std::time::Duration;

use conductor_types::config::EngineSettings;
use conductor_types::workflow::{RetryPolicy, StepDefinition, WorkflowDefinition};

/// Settings in force for one workflow invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionSettings {
    pub max_concurrency: usize,
    pub step_timeout: Duration,
    pub workflow_timeout: Duration,
    pub retry: RetryPolicy,
    pub checkpoint_every: u32,
    pub checkpoint_interval: Duration,
    pub max_steps: u32,
}

impl ExecutionSettings {
    /// Resolve the workflow's settings against engine defaults. The workflow
    /// timeout defaults to the step timeout times the engine multiplier.
    pub fn resolve(
        engine: &EngineSettings,
        default_retry: &RetryPolicy,
        definition: &WorkflowDefinition,
    ) -> Self {
        let s = &definition.settings;
        let step_timeout_secs = s.step_timeout_secs.unwrap_or(engine.step_timeout_secs);
        let workflow_timeout_secs = s.workflow_timeout_secs.unwrap_or_else(|| {
            step_timeout_secs.saturating_mul(u64::from(engine.workflow_timeout_multiplier))
        });
        Self {
            max_concurrency: s.max_concurrency.unwrap_or(engine.max_concurrency).max(1),
            step_timeout: Duration::from_secs(step_timeout_secs),
            workflow_timeout: Duration::from_secs(workflow_timeout_secs),
            retry: s.retry.clone().unwrap_or_else(|| default_retry.clone()),
            checkpoint_every: s.checkpoint_every.unwrap_or(engine.checkpoint_every).max(1),
            checkpoint_interval: Duration::from_secs(
                s.checkpoint_interval_secs.unwrap_or(engine.checkpoint_interval_secs),
            ),
            max_steps: s.max_steps.unwrap_or(engine.max_steps),
        }
    }

    /// Override the per-invocation step budget.
    pub fn with_max_steps(mut self, max_steps: Option<u32>) -> Self {
        if let Some(n) = max_steps {
            self.max_steps = n;
        }
        self
    }

    pub fn retry_for<'a>(&'a self, step: &'a StepDefinition) -> &'a RetryPolicy {
        step.retry.as_ref().unwrap_or(&self.retry)
    }

    pub fn timeout_for(&self, step: &StepDefinition) -> Duration {
        step.timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.step_timeout)
    }
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        let engine = EngineSettings::default();
        Self {
            max_concurrency: engine.max_concurrency,
            step_timeout: Duration::from_secs(engine.step_timeout_secs),
            workflow_timeout: Duration::from_secs(
                engine.step_timeout_secs * u64::from(engine.workflow_timeout_multiplier),
            ),
            retry: RetryPolicy::default(),
            checkpoint_every: engine.checkpoint_every,
            checkpoint_interval: Duration::from_secs(engine.checkpoint_interval_secs),
            max_steps: engine.max_steps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn definition(settings: serde_json::Value) -> WorkflowDefinition {
        serde_json::from_value(json!({
            "schema_version": "1.1",
            "id": "wf",
            "settings": settings,
            "steps": [
                { "id": "a", "agent": "x", "action": "y" },
                { "id": "b", "agent": "x", "action": "y", "timeout_secs": 5,
                  "retry": { "max_attempts": 1 } }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn engine_defaults_apply() {
        let def = definition(json!({}));
        let s = ExecutionSettings::resolve(&EngineSettings::default(), &RetryPolicy::default(), &def);
        assert_eq!(s.max_concurrency, 8);
        assert_eq!(s.step_timeout, Duration::from_secs(900));
        assert_eq!(s.workflow_timeout, Duration::from_secs(1800));
        assert_eq!(s.checkpoint_every, 5);
        assert_eq!(s.max_steps, 1000);
        assert_eq!(s, ExecutionSettings::default());
    }

    #[test]
    fn workflow_settings_override() {
        let def = definition(json!({ "max_concurrency": 2, "step_timeout_secs": 10 }));
        let s = ExecutionSettings::resolve(&EngineSettings::default(), &RetryPolicy::default(), &def);
        assert_eq!(s.max_concurrency, 2);
        assert_eq!(s.workflow_timeout, Duration::from_secs(20), "twice the step timeout");

        let def = definition(json!({ "step_timeout_secs": 10, "workflow_timeout_secs": 15 }));
        let s = ExecutionSettings::resolve(&EngineSettings::default(), &RetryPolicy::default(), &def);
        assert_eq!(s.workflow_timeout, Duration::from_secs(15));
    }

    #[test]
    fn step_overrides() {
        let def = definition(json!({}));
        let s = ExecutionSettings::default().with_max_steps(Some(3));
        assert_eq!(s.max_steps, 3);
        assert_eq!(s.timeout_for(&def.steps[0]), Duration::from_secs(900));
        assert_eq!(s.timeout_for(&def.steps[1]), Duration::from_secs(5));
        assert_eq!(s.retry_for(&def.steps[0]).max_attempts, 3);
        assert_eq!(s.retry_for(&def.steps[1]).max_attempts, 1);
    }
}
