//! Workflow executor: the ready-set loop over a durable journal.
//!
//! The `DagExecutor` repeatedly computes the ready set from the current state,
//! dispatches it through the `ParallelStepExecutor`, and folds the results
//! back into the journal in step-id order. Fresh runs and resumes enter the
//! same loop; a resume just starts it with non-empty prior state.
//!
//! # Execution flow
//!
//! 1. Validate the definition and check every `(agent, action)` resolves.
//! 2. Open the journal (claims the store lease and rebuilds state).
//! 3. Fresh run: store definition and plan, record `workflow_started`.
//!    Resume: mark dangling executions interrupted, record `workflow_resumed`.
//! 4. Loop until finished, stopped, out of budget, blocked or failed,
//!    checkpointing on a cadence and on every exit.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use conductor_types::config::{EngineConfig, EngineSettings};
use conductor_types::error::{ErrorCategory, ErrorInfo};
use conductor_types::event::WorkflowEvent;
use conductor_types::state::{CompletionKind, WorkflowState, WorkflowStatus};
use conductor_types::workflow::{RetryPolicy, StepDefinition, WorkflowDefinition};

use crate::capability::{CapabilityRegistry, CapabilityRequest};

use super::checkpoint::{CheckpointError, CheckpointManager, WorkflowJournal};
use super::circuit_breaker::CircuitBreakerRegistry;
use super::context::TemplateContext;
use super::dag::{BlockedReport, ExecutionGraph, GraphError};
use super::parallel::ParallelStepExecutor;
use super::plan::build_plan;
use super::schema::{revalidate, ValidationError};
use super::settings::ExecutionSettings;
use super::step_runner::{StepJob, StepOutcome, StepRunner};
use super::store::{StateStore, StoreError};

// ---------------------------------------------------------------------------
// WorkflowExecutor trait
// ---------------------------------------------------------------------------

/// Trait for workflow execution engines.
///
/// Uses RPITIT (return-position `impl Trait` in traits) for async methods,
/// consistent with the project's Rust 2024 edition approach.
pub trait WorkflowExecutor: Send + Sync {
    /// Execute a workflow definition. With an explicit `workflow_id` that
    /// already has history this continues that workflow.
    fn execute(
        &self,
        definition: &WorkflowDefinition,
        options: ExecuteOptions,
    ) -> impl std::future::Future<Output = Result<ExecutionResult, ExecutorError>> + Send;

    /// Resume a crashed, paused or failed workflow from durable state.
    fn resume(
        &self,
        target: ResumeTarget,
        options: ResumeOptions,
    ) -> impl std::future::Future<Output = Result<ExecutionResult, ExecutorError>> + Send;

    /// Ask a workflow running in this process to pause.
    fn pause(
        &self,
        workflow_id: &str,
    ) -> impl std::future::Future<Output = Result<(), ExecutorError>> + Send;
}

// ---------------------------------------------------------------------------
// Options and results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Instance id. Generated as `{definition-id}-{uuid v7}` when unset.
    pub workflow_id: Option<String>,
    /// Overrides for the definition's default variables.
    pub variables: BTreeMap<String, Value>,
    /// Step dispatches allowed in this invocation.
    pub max_steps: Option<u32>,
    /// Take over a lease held by another process.
    pub force_lease: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ResumeOptions {
    pub skip_validation: bool,
    pub max_steps: Option<u32>,
    pub force_lease: bool,
}

/// Which workflow to resume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeTarget {
    WorkflowId(String),
    /// The most recently updated workflow in the store.
    MostRecent,
}

/// Outcome of one invocation that did not error.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub workflow_id: String,
    /// `completed` or `paused`.
    pub status: WorkflowStatus,
    pub state: WorkflowState,
    /// Steps dispatched during this invocation.
    pub dispatched: u32,
}

impl ExecutionResult {
    fn new(state: WorkflowState, dispatched: u32) -> Self {
        Self {
            workflow_id: state.workflow_id.clone(),
            status: state.status,
            state,
            dispatched,
        }
    }

    pub fn completed_steps(&self) -> Vec<&str> {
        self.steps_with(CompletionKind::Completed)
    }

    pub fn skipped_steps(&self) -> Vec<&str> {
        self.steps_with(CompletionKind::Skipped)
    }

    fn steps_with(&self, kind: CompletionKind) -> Vec<&str> {
        self.state
            .completed_steps
            .iter()
            .filter(|(_, k)| **k == kind)
            .map(|(id, _)| id.as_str())
            .collect()
    }
}

/// Fresh instance id: `{definition-id}-{uuid v7}`, sortable by start time.
pub fn new_workflow_id(definition_id: &str) -> String {
    format!("{definition_id}-{}", Uuid::now_v7())
}

/// Command that continues a workflow from the CLI.
pub fn resume_command(workflow_id: &str) -> String {
    format!("cndr resume {workflow_id}")
}

// ---------------------------------------------------------------------------
// ExecutorError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("invalid workflow graph: {0}")]
    Graph(#[from] GraphError),

    #[error("no capability registered for {}", format_missing(.missing))]
    MissingCapabilities { missing: Vec<(String, String, String)> },

    #[error(transparent)]
    Journal(#[from] CheckpointError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("workflow '{workflow_id}' failed at step '{step_id}' ({}, {}): {}", .error.category, recoverability(.error), .error.message)]
    StepFailed {
        workflow_id: String,
        step_id: String,
        error: ErrorInfo,
    },

    #[error("workflow '{workflow_id}' exceeded its {timeout_secs}s timeout")]
    WorkflowTimeout { workflow_id: String, timeout_secs: u64 },

    #[error("workflow '{workflow_id}' is blocked: {report}")]
    Blocked {
        workflow_id: String,
        report: BlockedReport,
    },

    #[error("no stored definition for workflow '{0}'")]
    MissingDefinition(String),

    #[error("no workflow to resume")]
    NothingToResume,

    /// `execute` named an existing workflow but disagrees with its history.
    #[error("workflow '{workflow_id}' already exists with {reason}")]
    HistoryMismatch { workflow_id: String, reason: String },

    #[error("workflow '{0}' is not running in this process")]
    NotRunning(String),
}

fn format_missing(missing: &[(String, String, String)]) -> String {
    missing
        .iter()
        .map(|(step, agent, action)| format!("{agent}/{action} (step '{step}')"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn recoverability(error: &ErrorInfo) -> &'static str {
    if error.recoverable {
        "recoverable"
    } else {
        "not recoverable"
    }
}

impl ExecutorError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ExecutorError::Validation(_)
            | ExecutorError::Graph(_)
            | ExecutorError::HistoryMismatch { .. } => ErrorCategory::Validation,
            ExecutorError::MissingCapabilities { .. }
            | ExecutorError::MissingDefinition(_)
            | ExecutorError::NothingToResume
            | ExecutorError::NotRunning(_) => ErrorCategory::Configuration,
            ExecutorError::StepFailed { error, .. } => error.category,
            ExecutorError::WorkflowTimeout { .. } => ErrorCategory::Timeout,
            ExecutorError::Blocked { .. } | ExecutorError::Journal(_) | ExecutorError::Store(_) => {
                ErrorCategory::Execution
            }
        }
    }

    /// Whether resuming the workflow may succeed without changes.
    pub fn is_recoverable(&self) -> bool {
        match self {
            ExecutorError::StepFailed { error, .. } => error.recoverable,
            ExecutorError::WorkflowTimeout { .. } => true,
            _ => self.lease_held(),
        }
    }

    fn lease_held(&self) -> bool {
        matches!(
            self,
            ExecutorError::Store(StoreError::LeaseHeld { .. })
                | ExecutorError::Journal(CheckpointError::Store(StoreError::LeaseHeld { .. }))
        )
    }

    /// What the user can do next.
    pub fn remediation(&self) -> Option<String> {
        if self.lease_held() {
            return Some(
                "wait for the other process to finish, or rerun with --force if it is gone".into(),
            );
        }
        match self {
            ExecutorError::StepFailed { workflow_id, .. }
            | ExecutorError::WorkflowTimeout { workflow_id, .. } => Some(resume_command(workflow_id)),
            ExecutorError::Blocked { .. } => Some(
                "give every consumed artifact a producing step, then resume the workflow".into(),
            ),
            ExecutorError::MissingCapabilities { .. } => {
                Some("register the agents under [[agents]] in config.toml".into())
            }
            ExecutorError::Validation(_) | ExecutorError::Graph(_) => {
                Some("fix the reported fields and check with `cndr validate`".into())
            }
            ExecutorError::NothingToResume => Some("start a workflow with `cndr run`".into()),
            ExecutorError::HistoryMismatch { workflow_id, .. } => Some(format!(
                "continue it with `{}`, or start a new run without --id",
                resume_command(workflow_id)
            )),
            _ => None,
        }
    }

    pub fn workflow_id(&self) -> Option<&str> {
        match self {
            ExecutorError::StepFailed { workflow_id, .. }
            | ExecutorError::WorkflowTimeout { workflow_id, .. }
            | ExecutorError::Blocked { workflow_id, .. }
            | ExecutorError::HistoryMismatch { workflow_id, .. } => Some(workflow_id),
            ExecutorError::MissingDefinition(id) | ExecutorError::NotRunning(id) => Some(id),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Stop signal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum StopReason {
    Timeout,
    Paused(String),
}

impl StopReason {
    fn cancellation_reason(&self) -> String {
        match self {
            StopReason::Timeout => "workflow timed out".into(),
            StopReason::Paused(reason) => format!("workflow paused: {reason}"),
        }
    }
}

/// Cancels the in-flight batch; the first reason wins.
#[derive(Debug, Default)]
struct StopSignal {
    token: CancellationToken,
    reason: OnceLock<StopReason>,
}

impl StopSignal {
    fn request(&self, reason: StopReason) {
        let _ = self.reason.set(reason);
        self.token.cancel();
    }

    fn reason(&self) -> Option<&StopReason> {
        self.reason.get()
    }
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Keeps a workflow reachable by `pause` while its loop runs.
struct ActiveRun<'a> {
    active: &'a DashMap<String, Arc<StopSignal>>,
    workflow_id: String,
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        self.active.remove(&self.workflow_id);
    }
}

// ---------------------------------------------------------------------------
// DagExecutor
// ---------------------------------------------------------------------------

/// Ready-set DAG executor over a durable journal.
///
/// Generic over `S: StateStore` for storage flexibility.
pub struct DagExecutor<S: StateStore> {
    checkpoints: CheckpointManager<S>,
    capabilities: Arc<CapabilityRegistry>,
    breakers: Arc<CircuitBreakerRegistry>,
    engine: EngineSettings,
    default_retry: RetryPolicy,
    /// Stop signals of workflows running in this process, keyed by id.
    active: DashMap<String, Arc<StopSignal>>,
}

impl<S: StateStore + 'static> DagExecutor<S> {
    pub fn new(
        checkpoints: CheckpointManager<S>,
        capabilities: Arc<CapabilityRegistry>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            checkpoints,
            capabilities,
            breakers: Arc::new(CircuitBreakerRegistry::new(config.circuit_breaker.clone())),
            engine: config.engine.clone(),
            default_retry: config.retry.clone(),
            active: DashMap::new(),
        }
    }

    /// Share a breaker registry with other executors.
    pub fn with_breakers(mut self, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        self.breakers = breakers;
        self
    }

    pub fn checkpoints(&self) -> &CheckpointManager<S> {
        &self.checkpoints
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// An explicit id with history continues that workflow, so the definition
    /// must be the stored one and variable overrides must match the values
    /// it started with.
    async fn check_history(
        &self,
        workflow_id: &str,
        definition: &WorkflowDefinition,
        variables: &BTreeMap<String, Value>,
    ) -> Result<(), ExecutorError> {
        let Some(stored) = self.checkpoints.store().load_definition(workflow_id).await? else {
            return Ok(());
        };
        let mismatch = |reason: String| ExecutorError::HistoryMismatch {
            workflow_id: workflow_id.to_string(),
            reason,
        };
        if stored != *definition {
            return Err(mismatch(format!(
                "a different definition (stored '{}', given '{}')",
                stored.id, definition.id
            )));
        }
        if variables.is_empty() {
            return Ok(());
        }
        let state = match self.checkpoints.load(workflow_id).await {
            Ok(state) => state,
            // Definition stored but nothing started yet.
            Err(CheckpointError::Store(StoreError::NotFound(_))) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let changed: Vec<&str> = variables
            .iter()
            .filter(|(name, value)| state.variables.get(*name) != Some(*value))
            .map(|(name, _)| name.as_str())
            .collect();
        if !changed.is_empty() {
            return Err(mismatch(format!(
                "different values for variable(s) {}",
                changed.join(", ")
            )));
        }
        Ok(())
    }

    fn check_capabilities(&self, definition: &WorkflowDefinition) -> Result<(), ExecutorError> {
        let missing = self.capabilities.missing_for(definition);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ExecutorError::MissingCapabilities { missing })
        }
    }

    /// Drive an opened journal, then release it whatever the outcome.
    async fn run(
        &self,
        journal: WorkflowJournal<S>,
        definition: &WorkflowDefinition,
        graph: &ExecutionGraph,
        settings: &ExecutionSettings,
        variables: BTreeMap<String, Value>,
    ) -> Result<ExecutionResult, ExecutorError> {
        let journal = Arc::new(journal);
        let result = self
            .drive(&journal, definition, graph, settings, variables)
            .await;
        if let Err(e) = journal.close().await {
            tracing::warn!(workflow_id = %journal.workflow_id(), error = %e, "failed to release workflow lease");
        }
        result
    }

    async fn drive(
        &self,
        journal: &Arc<WorkflowJournal<S>>,
        definition: &WorkflowDefinition,
        graph: &ExecutionGraph,
        settings: &ExecutionSettings,
        variables: BTreeMap<String, Value>,
    ) -> Result<ExecutionResult, ExecutorError> {
        let workflow_id = journal.workflow_id().to_string();
        let initial = journal.snapshot().await;

        if initial.status == WorkflowStatus::Completed {
            tracing::info!(workflow_id = %workflow_id, "workflow already completed, nothing to do");
            return Ok(ExecutionResult::new(initial, 0));
        }

        if initial.last_sequence == 0 {
            let store = self.checkpoints.store();
            store.save_definition(&workflow_id, definition).await?;
            store
                .save_plan(&workflow_id, &build_plan(definition, graph, settings))
                .await?;
            let mut merged = definition.variables.clone();
            merged.extend(variables);
            journal
                .record(WorkflowEvent::WorkflowStarted {
                    definition_id: definition.id.clone(),
                    definition_name: definition.name.clone(),
                    variables: merged,
                })
                .await?;
            tracing::info!(
                workflow_id = %workflow_id,
                definition_id = %definition.id,
                steps = graph.len(),
                "workflow started"
            );
        } else {
            let interrupted = journal.reclassify_interrupted().await?;
            journal
                .record(WorkflowEvent::WorkflowResumed {
                    from: initial.status,
                })
                .await?;
            tracing::info!(
                workflow_id = %workflow_id,
                from = %initial.status,
                done = initial.completed_steps.len(),
                interrupted = interrupted.len(),
                "workflow resumed"
            );
        }

        let signal = Arc::new(StopSignal::default());
        self.active.insert(workflow_id.clone(), Arc::clone(&signal));
        let _active = ActiveRun {
            active: &self.active,
            workflow_id: workflow_id.clone(),
        };
        let _deadline = AbortOnDrop(tokio::spawn({
            let signal = Arc::clone(&signal);
            let timeout = settings.workflow_timeout;
            async move {
                tokio::time::sleep(timeout).await;
                signal.request(StopReason::Timeout);
            }
        }));

        let runner = Arc::new(StepRunner::new(
            Arc::clone(journal),
            Arc::clone(&self.capabilities),
            Arc::clone(&self.breakers),
        ));
        let parallel = ParallelStepExecutor::new(settings.max_concurrency);
        let mut dispatched: u32 = 0;
        let mut since_checkpoint: u32 = 0;
        let mut last_checkpoint_at = Instant::now();

        loop {
            let state = journal.snapshot().await;

            if graph.is_finished(&state) {
                journal.record(WorkflowEvent::WorkflowCompleted).await?;
                journal.checkpoint().await?;
                tracing::info!(workflow_id = %workflow_id, dispatched, "workflow completed");
                return Ok(ExecutionResult::new(journal.snapshot().await, dispatched));
            }

            if let Some(reason) = signal.reason() {
                return self.stop(journal, reason, settings, dispatched).await;
            }

            if dispatched >= settings.max_steps {
                let reason = format!(
                    "step budget of {} dispatches exhausted; run `{}` to continue",
                    settings.max_steps,
                    resume_command(&workflow_id)
                );
                tracing::warn!(workflow_id = %workflow_id, max_steps = settings.max_steps, "step budget exhausted, pausing");
                journal
                    .record(WorkflowEvent::WorkflowPaused { reason })
                    .await?;
                journal.checkpoint().await?;
                return Ok(ExecutionResult::new(journal.snapshot().await, dispatched));
            }

            let ready = graph.ready_steps(&state);
            if ready.is_empty() {
                let report = graph.diagnose_blocked(&state);
                let error = ErrorInfo::new(ErrorCategory::Execution, report.to_string())
                    .recoverable(false)
                    .with_remediation("give every consumed artifact a producing step, then resume");
                tracing::error!(workflow_id = %workflow_id, blocked = report.blocked.len(), "{report}");
                journal.record(WorkflowEvent::WorkflowFailed { error }).await?;
                journal.checkpoint().await?;
                return Err(ExecutorError::Blocked {
                    workflow_id,
                    report,
                });
            }

            let remaining = (settings.max_steps - dispatched) as usize;
            let batch: Vec<StepDefinition> = ready
                .iter()
                .take(remaining)
                .filter_map(|id| definition.step(id).cloned())
                .collect();
            dispatched += batch.len() as u32;
            tracing::debug!(
                workflow_id = %workflow_id,
                steps = ?batch.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
                "dispatching ready steps"
            );

            let context = TemplateContext::from_state(&state);
            let results = parallel
                .execute_parallel(
                    batch,
                    |step, cancel| {
                        let job = step_job(&workflow_id, &state, &context, settings, step);
                        let runner = Arc::clone(&runner);
                        async move { runner.run(job, cancel).await }
                    },
                    &signal.token,
                )
                .await;

            // Fold in step-id order.
            let mut failure: Option<(String, ErrorInfo)> = None;
            for result in results {
                let step_id = result.step_id;
                let optional = definition.step(&step_id).is_some_and(|s| s.optional);
                match result.outcome {
                    StepOutcome::Completed { attempt, artifacts } => {
                        since_checkpoint += 1;
                        let current = journal.snapshot().await;
                        if let Err(error) = check_gates(definition, &step_id, &current, &artifacts) {
                            journal
                                .record(WorkflowEvent::StepFailed {
                                    step_id: step_id.clone(),
                                    attempt,
                                    error: error.clone(),
                                    will_retry: false,
                                })
                                .await?;
                            self.step_failed(journal, &step_id, optional, error, &mut failure)
                                .await?;
                            continue;
                        }
                        let produced = artifacts.len();
                        journal
                            .record(WorkflowEvent::StepCompleted {
                                step_id: step_id.clone(),
                                attempt,
                                artifacts,
                            })
                            .await?;
                        tracing::info!(workflow_id = %workflow_id, step_id = %step_id, attempt, artifacts = produced, "step completed");
                    }
                    StepOutcome::Failed { error, .. } => {
                        since_checkpoint += 1;
                        if let Some(attempt) = active_attempt(journal, &step_id).await {
                            journal
                                .record(WorkflowEvent::StepFailed {
                                    step_id: step_id.clone(),
                                    attempt,
                                    error: error.clone(),
                                    will_retry: false,
                                })
                                .await?;
                        }
                        self.step_failed(journal, &step_id, optional, error, &mut failure)
                            .await?;
                    }
                    StepOutcome::Cancelled { attempt: Some(_) } => {
                        since_checkpoint += 1;
                        if let Some(attempt) = active_attempt(journal, &step_id).await {
                            let reason = signal
                                .reason()
                                .map(StopReason::cancellation_reason)
                                .unwrap_or_else(|| "a sibling step failed".into());
                            journal
                                .record(WorkflowEvent::StepCancelled {
                                    step_id: step_id.clone(),
                                    attempt,
                                    reason,
                                })
                                .await?;
                        }
                    }
                    StepOutcome::Cancelled { attempt: None } => {}
                    StepOutcome::Aborted(e) => return Err(e.into()),
                }
            }

            if let Some((step_id, error)) = failure {
                let message = format!(
                    "step '{step_id}' failed ({}, {}): {}",
                    error.category,
                    recoverability(&error),
                    error.message
                );
                let summary = ErrorInfo::new(error.category, message)
                    .recoverable(error.recoverable)
                    .with_step(&step_id)
                    .with_remediation(resume_command(&workflow_id));
                journal
                    .record(WorkflowEvent::WorkflowFailed { error: summary })
                    .await?;
                journal.checkpoint().await?;
                tracing::error!(
                    workflow_id = %workflow_id,
                    step_id = %step_id,
                    category = %error.category,
                    recoverable = error.recoverable,
                    "workflow failed"
                );
                return Err(ExecutorError::StepFailed {
                    workflow_id,
                    step_id,
                    error,
                });
            }

            if since_checkpoint >= settings.checkpoint_every
                || last_checkpoint_at.elapsed() >= settings.checkpoint_interval
            {
                journal.checkpoint().await?;
                since_checkpoint = 0;
                last_checkpoint_at = Instant::now();
            }
        }
    }

    /// Skip an optional step or remember the first required failure.
    async fn step_failed(
        &self,
        journal: &WorkflowJournal<S>,
        step_id: &str,
        optional: bool,
        error: ErrorInfo,
        failure: &mut Option<(String, ErrorInfo)>,
    ) -> Result<(), ExecutorError> {
        if optional {
            tracing::warn!(
                workflow_id = %journal.workflow_id(),
                step_id,
                category = %error.category,
                error = %error.message,
                "optional step failed, skipping"
            );
            journal
                .record(WorkflowEvent::StepSkipped {
                    step_id: step_id.to_string(),
                    reason: format!("optional step failed: {}", error.message),
                })
                .await?;
        } else if failure.is_none() {
            *failure = Some((step_id.to_string(), error));
        }
        Ok(())
    }

    async fn stop(
        &self,
        journal: &WorkflowJournal<S>,
        reason: &StopReason,
        settings: &ExecutionSettings,
        dispatched: u32,
    ) -> Result<ExecutionResult, ExecutorError> {
        let workflow_id = journal.workflow_id().to_string();
        match reason {
            StopReason::Timeout => {
                let timeout_secs = settings.workflow_timeout.as_secs();
                let error = ErrorInfo::new(
                    ErrorCategory::Timeout,
                    format!("workflow exceeded its {timeout_secs}s timeout"),
                )
                .recoverable(true)
                .with_remediation(resume_command(&workflow_id));
                journal.record(WorkflowEvent::WorkflowFailed { error }).await?;
                journal.checkpoint().await?;
                tracing::error!(workflow_id = %workflow_id, timeout_secs, "workflow timed out");
                Err(ExecutorError::WorkflowTimeout {
                    workflow_id,
                    timeout_secs,
                })
            }
            StopReason::Paused(reason) => {
                journal
                    .record(WorkflowEvent::WorkflowPaused {
                        reason: reason.clone(),
                    })
                    .await?;
                journal.checkpoint().await?;
                tracing::info!(workflow_id = %workflow_id, reason = %reason, "workflow paused");
                Ok(ExecutionResult::new(journal.snapshot().await, dispatched))
            }
        }
    }
}

impl<S: StateStore + 'static> WorkflowExecutor for DagExecutor<S> {
    async fn execute(
        &self,
        definition: &WorkflowDefinition,
        options: ExecuteOptions,
    ) -> Result<ExecutionResult, ExecutorError> {
        let validated = revalidate(definition)?;
        for warning in &validated.warnings {
            tracing::warn!(definition_id = %definition.id, "{warning}");
        }
        self.check_capabilities(definition)?;
        let graph = ExecutionGraph::build(definition)?;

        let workflow_id = options
            .workflow_id
            .unwrap_or_else(|| new_workflow_id(&definition.id));
        self.check_history(&workflow_id, definition, &options.variables)
            .await?;
        let settings = ExecutionSettings::resolve(&self.engine, &self.default_retry, definition)
            .with_max_steps(options.max_steps);
        let journal = self.checkpoints.open(&workflow_id, options.force_lease).await?;
        self.run(journal, definition, &graph, &settings, options.variables)
            .await
    }

    async fn resume(
        &self,
        target: ResumeTarget,
        options: ResumeOptions,
    ) -> Result<ExecutionResult, ExecutorError> {
        let store = self.checkpoints.store();
        let workflow_id = match target {
            ResumeTarget::WorkflowId(id) => id,
            ResumeTarget::MostRecent => store
                .list_workflows()
                .await?
                .into_iter()
                .next()
                .map(|summary| summary.workflow_id)
                .ok_or(ExecutorError::NothingToResume)?,
        };

        let definition = store
            .load_definition(&workflow_id)
            .await?
            .ok_or_else(|| ExecutorError::MissingDefinition(workflow_id.clone()))?;
        if options.skip_validation {
            tracing::warn!(workflow_id = %workflow_id, "resuming without re-validating the stored definition");
        } else {
            revalidate(&definition)?;
        }
        self.check_capabilities(&definition)?;
        let graph = ExecutionGraph::build(&definition)?;

        let settings = ExecutionSettings::resolve(&self.engine, &self.default_retry, &definition)
            .with_max_steps(options.max_steps);
        let journal = self.checkpoints.open(&workflow_id, options.force_lease).await?;
        self.run(journal, &definition, &graph, &settings, BTreeMap::new())
            .await
    }

    async fn pause(&self, workflow_id: &str) -> Result<(), ExecutorError> {
        let signal = self
            .active
            .get(workflow_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ExecutorError::NotRunning(workflow_id.to_string()))?;
        signal.request(StopReason::Paused("paused by operator".into()));
        tracing::info!(workflow_id, "pause requested");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn step_job(
    workflow_id: &str,
    state: &WorkflowState,
    context: &TemplateContext<'_>,
    settings: &ExecutionSettings,
    step: StepDefinition,
) -> StepJob {
    let request = CapabilityRequest {
        workflow_id: workflow_id.to_string(),
        step_id: step.id.clone(),
        agent: step.agent.clone(),
        action: step.action.clone(),
        attempt: 0,
        inputs: context.resolve_inputs(&step.inputs),
        artifacts: state.artifact_values(),
        variables: state.variables.clone(),
        cancel: CancellationToken::new(),
    };
    StepJob {
        first_attempt: state.attempts_for(&step.id) + 1,
        timeout: settings.timeout_for(&step),
        retry: settings.retry_for(&step).clone(),
        request,
        step,
    }
}

async fn active_attempt<S: StateStore>(journal: &WorkflowJournal<S>, step_id: &str) -> Option<u32> {
    journal
        .snapshot()
        .await
        .active_execution(step_id)
        .map(|e| e.attempt)
}

/// Gates after `step_id`. A blocking gate with missing artifacts fails the
/// step; a non-blocking one only warns.
fn check_gates(
    definition: &WorkflowDefinition,
    step_id: &str,
    state: &WorkflowState,
    produced: &BTreeMap<String, Value>,
) -> Result<(), ErrorInfo> {
    for gate in definition.gates_after(step_id) {
        let missing: Vec<&str> = gate
            .artifacts
            .iter()
            .filter(|a| !state.artifacts.contains_key(*a) && !produced.contains_key(*a))
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            continue;
        }
        let message = format!(
            "gate '{}' after step '{step_id}' is missing artifact(s): {}",
            gate.id,
            missing.join(", ")
        );
        if gate.blocking {
            return Err(ErrorInfo::new(ErrorCategory::Validation, message)
                .with_step(step_id)
                .with_remediation(format!(
                    "make step '{step_id}' produce {} and resume",
                    missing.join(", ")
                )));
        }
        tracing::warn!(workflow_id = %state.workflow_id, step_id, gate_id = %gate.id, "{message}");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
