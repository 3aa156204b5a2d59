//! Runs one step to a result: circuit breaker check, per-step timeout and
//! the retry loop.
//!
//! The runner records `step_started` for every attempt and `step_failed`
//! (`will_retry = true`) for every failure it is about to retry. The terminal
//! event is left to the orchestrator, which folds results in step-id order.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use conductor_types::error::{ErrorCategory, ErrorInfo};
use conductor_types::event::WorkflowEvent;
use conductor_types::workflow::{RetryPolicy, StepDefinition};

use crate::capability::{CapabilityRegistry, CapabilityRequest};

use super::checkpoint::{CheckpointError, WorkflowJournal};
use super::circuit_breaker::CircuitBreakerRegistry;
use super::context::cap_artifact;
use super::retry::RetryHandler;
use super::store::StateStore;

// ---------------------------------------------------------------------------
// StepResult
// ---------------------------------------------------------------------------

/// How a step's run in this batch ended.
#[derive(Debug)]
pub enum StepOutcome {
    Completed {
        attempt: u32,
        artifacts: BTreeMap<String, Value>,
    },
    /// Retries exhausted or the error was not recoverable.
    Failed { attempt: u32, error: ErrorInfo },
    /// `attempt` is set when an execution was left running and still needs
    /// a terminal event.
    Cancelled { attempt: Option<u32> },
    /// The journal could not record an event; the workflow must stop.
    Aborted(CheckpointError),
}

#[derive(Debug)]
pub struct StepResult {
    pub step_id: String,
    pub outcome: StepOutcome,
}

impl StepResult {
    pub fn cancelled(step_id: impl Into<String>, attempt: Option<u32>) -> Self {
        Self {
            step_id: step_id.into(),
            outcome: StepOutcome::Cancelled { attempt },
        }
    }

    pub fn failed(step_id: impl Into<String>, attempt: u32, error: ErrorInfo) -> Self {
        Self {
            step_id: step_id.into(),
            outcome: StepOutcome::Failed { attempt, error },
        }
    }

    /// Whether this result should cancel the rest of its batch.
    pub fn is_fatal(&self, optional: bool) -> bool {
        match &self.outcome {
            StepOutcome::Failed { error, .. } => !optional && !error.recoverable,
            StepOutcome::Aborted(_) => true,
            StepOutcome::Completed { .. } | StepOutcome::Cancelled { .. } => false,
        }
    }
}

// ---------------------------------------------------------------------------
// StepJob
// ---------------------------------------------------------------------------

/// Everything needed to run one step, captured at dispatch time.
#[derive(Debug, Clone)]
pub struct StepJob {
    pub step: StepDefinition,
    pub request: CapabilityRequest,
    /// Attempt number of the first attempt in this batch.
    pub first_attempt: u32,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

// ---------------------------------------------------------------------------
// StepRunner
// ---------------------------------------------------------------------------

/// Executes steps of one workflow against the capability registry.
pub struct StepRunner<S: StateStore> {
    journal: Arc<WorkflowJournal<S>>,
    capabilities: Arc<CapabilityRegistry>,
    breakers: Arc<CircuitBreakerRegistry>,
}

enum AttemptError {
    Failed(ErrorInfo),
    Cancelled,
}

impl<S: StateStore> StepRunner<S> {
    pub fn new(
        journal: Arc<WorkflowJournal<S>>,
        capabilities: Arc<CapabilityRegistry>,
        breakers: Arc<CircuitBreakerRegistry>,
    ) -> Self {
        Self {
            journal,
            capabilities,
            breakers,
        }
    }

    /// Run `job` until it completes, fails for good, or `cancel` fires.
    pub async fn run(&self, job: StepJob, cancel: CancellationToken) -> StepResult {
        let step_id = job.step.id.clone();
        let outcome = self.run_attempts(job, &cancel).await;
        StepResult { step_id, outcome }
    }

    async fn run_attempts(&self, job: StepJob, cancel: &CancellationToken) -> StepOutcome {
        let StepJob {
            step,
            mut request,
            first_attempt,
            timeout,
            retry,
        } = job;
        let mut attempt = first_attempt;

        loop {
            if cancel.is_cancelled() {
                return StepOutcome::Cancelled { attempt: None };
            }
            if let Err(err) = self
                .journal
                .record(WorkflowEvent::StepStarted {
                    step_id: step.id.clone(),
                    agent: step.agent.clone(),
                    action: step.action.clone(),
                    attempt,
                })
                .await
            {
                return StepOutcome::Aborted(err);
            }
            tracing::debug!(step_id = %step.id, agent = %step.agent, attempt, "step attempt started");

            request.attempt = attempt;
            request.cancel = cancel.clone();
            let error = match self.attempt(&step, &request, timeout, cancel).await {
                Ok(artifacts) => {
                    return StepOutcome::Completed {
                        attempt,
                        artifacts: declared_artifacts(&step, artifacts),
                    };
                }
                Err(AttemptError::Cancelled) => {
                    return StepOutcome::Cancelled {
                        attempt: Some(attempt),
                    };
                }
                Err(AttemptError::Failed(error)) => error,
            };

            // Attempts are numbered across invocations; the budget is per
            // invocation.
            let used = attempt - first_attempt + 1;
            if !RetryHandler::should_retry(&retry, used, &error) {
                return StepOutcome::Failed { attempt, error };
            }

            let delay = RetryHandler::delay(&retry, used);
            tracing::warn!(
                step_id = %step.id,
                agent = %step.agent,
                attempt,
                category = %error.category,
                delay_ms = delay.as_millis() as u64,
                error = %error.message,
                "step attempt failed, retrying"
            );
            if let Err(err) = self
                .journal
                .record(WorkflowEvent::StepFailed {
                    step_id: step.id.clone(),
                    attempt,
                    error,
                    will_retry: true,
                })
                .await
            {
                return StepOutcome::Aborted(err);
            }

            tokio::select! {
                _ = cancel.cancelled() => return StepOutcome::Cancelled { attempt: None },
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    /// One capability call behind the breaker and the step timeout.
    async fn attempt(
        &self,
        step: &StepDefinition,
        request: &CapabilityRequest,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<String, Value>, AttemptError> {
        let Some(capability) = self.capabilities.resolve(&step.agent, &step.action) else {
            return Err(AttemptError::Failed(
                ErrorInfo::new(
                    ErrorCategory::Configuration,
                    format!("no capability registered for {}/{}", step.agent, step.action),
                )
                .with_step(&step.id),
            ));
        };

        let breaker = self.breakers.get(&step.agent);
        let permit = match breaker.try_acquire() {
            Ok(permit) => permit,
            Err(open) => {
                tracing::warn!(step_id = %step.id, agent = %step.agent, "circuit breaker open, call short-circuited");
                return Err(AttemptError::Failed(open.into_info(&step.id)));
            }
        };

        let call = AssertUnwindSafe(capability.execute(request)).catch_unwind();
        let result = tokio::select! {
            _ = cancel.cancelled() => {
                drop(permit);
                return Err(AttemptError::Cancelled);
            }
            result = tokio::time::timeout(timeout, call) => result,
        };

        match result {
            Ok(Ok(Ok(output))) => {
                permit.succeed();
                Ok(output.artifacts)
            }
            Ok(Ok(Err(err))) => {
                permit.fail(err.category);
                Err(AttemptError::Failed(err.into_info(&step.id)))
            }
            Ok(Err(panic)) => {
                permit.fail(ErrorCategory::Execution);
                Err(AttemptError::Failed(
                    ErrorInfo::new(
                        ErrorCategory::Execution,
                        format!("capability '{}' panicked: {}", capability.name(), panic_message(&panic)),
                    )
                    .with_step(&step.id),
                ))
            }
            Err(_elapsed) => {
                permit.fail(ErrorCategory::Timeout);
                Err(AttemptError::Failed(
                    ErrorInfo::new(
                        ErrorCategory::Timeout,
                        format!("step exceeded its {}s timeout", timeout.as_secs()),
                    )
                    .with_step(&step.id),
                ))
            }
        }
    }
}

/// Keep declared artifacts only, capping their size.
fn declared_artifacts(step: &StepDefinition, artifacts: BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    for (id, value) in artifacts {
        if step.creates.contains(&id) {
            let value = cap_artifact(&step.id, &id, value);
            out.insert(id, value);
        } else {
            tracing::warn!(step_id = %step.id, artifact_id = %id, "dropping undeclared artifact");
        }
    }
    out
}

pub(crate) fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
