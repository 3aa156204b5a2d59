//! `run` and `resume`: drive the executor with live progress output.

use std::collections::BTreeMap;
use std::path::Path;

use console::style;
use serde_json::{Value, json};
use tokio::sync::broadcast;

use conductor_core::workflow::definition::load_workflow_file;
use conductor_core::workflow::executor::{
    ExecuteOptions, ExecutionResult, ExecutorError, ResumeOptions, ResumeTarget, WorkflowExecutor,
    new_workflow_id, resume_command,
};
use conductor_core::workflow::store::StateStore;
use conductor_types::event::EventRecord;
use conductor_types::state::WorkflowStatus;

use crate::cli::output::{print_json, progress_line, styled_status};
use crate::state::AppState;

/// Flags shared by `run` and `resume`.
#[derive(Debug, Clone, Copy)]
pub struct OutputMode {
    pub json: bool,
    pub quiet: bool,
}

impl OutputMode {
    fn live(self) -> bool {
        !self.json && !self.quiet
    }
}

/// Start a workflow from a definition file.
pub async fn run(
    state: &AppState,
    file: &Path,
    id: Option<String>,
    vars: Vec<(String, Value)>,
    max_steps: Option<u32>,
    force: bool,
    mode: OutputMode,
) -> anyhow::Result<()> {
    let validated = load_workflow_file(file)?;
    for warning in &validated.warnings {
        tracing::warn!(file = %file.display(), "{warning}");
    }
    let definition = validated.definition;

    // Pick the id here so Ctrl+C can name the workflow to pause.
    let workflow_id = id.unwrap_or_else(|| new_workflow_id(&definition.id));
    let variables: BTreeMap<String, Value> = vars.into_iter().collect();

    if mode.live() {
        println!(
            "\n{} {} {}",
            style("Running").bold(),
            style(definition.display_name()).cyan().bold(),
            style(format!("({workflow_id})")).dim()
        );
    }

    let options = ExecuteOptions {
        workflow_id: Some(workflow_id.clone()),
        variables,
        max_steps,
        force_lease: force,
    };
    let events = state.events.subscribe();
    let outcome = drive(state, &workflow_id, events, mode, state.executor.execute(&definition, options)).await;
    finish(outcome, mode)
}

/// Continue a stored workflow.
pub async fn resume(
    state: &AppState,
    workflow_id: Option<String>,
    skip_validation: bool,
    max_steps: Option<u32>,
    force: bool,
    mode: OutputMode,
) -> anyhow::Result<()> {
    let workflow_id = match workflow_id {
        Some(id) => id,
        None => most_recent(state).await?,
    };

    if mode.live() {
        println!(
            "\n{} {}",
            style("Resuming").bold(),
            style(&workflow_id).cyan().bold()
        );
    }

    let options = ResumeOptions {
        skip_validation,
        max_steps,
        force_lease: force,
    };
    let target = ResumeTarget::WorkflowId(workflow_id.clone());
    let events = state.events.subscribe();
    let outcome = drive(state, &workflow_id, events, mode, state.executor.resume(target, options)).await;
    finish(outcome, mode)
}

/// Resolve `--latest` up front so progress and Ctrl+C know the id.
async fn most_recent(state: &AppState) -> Result<String, ExecutorError> {
    let workflows = state.store().list_workflows().await?;
    workflows
        .into_iter()
        .next()
        .map(|summary| summary.workflow_id)
        .ok_or(ExecutorError::NothingToResume)
}

/// Poll the invocation while echoing its events and turning the first
/// Ctrl+C into a pause request.
async fn drive<F>(
    state: &AppState,
    workflow_id: &str,
    mut events: broadcast::Receiver<EventRecord>,
    mode: OutputMode,
    invocation: F,
) -> Result<ExecutionResult, ExecutorError>
where
    F: std::future::Future<Output = Result<ExecutionResult, ExecutorError>>,
{
    tokio::pin!(invocation);
    let mut pause_requested = false;

    loop {
        tokio::select! {
            outcome = &mut invocation => {
                // Events published just before the invocation returned.
                while let Ok(record) = events.try_recv() {
                    show_progress(&record, workflow_id, mode);
                }
                return outcome;
            }
            received = events.recv() => match received {
                Ok(record) => show_progress(&record, workflow_id, mode),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "progress output fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => {}
            },
            signal = tokio::signal::ctrl_c(), if !pause_requested => {
                pause_requested = true;
                if let Err(e) = signal {
                    tracing::warn!(error = %e, "could not listen for Ctrl+C");
                    continue;
                }
                if mode.live() {
                    println!(
                        "  {} pausing after running steps stop...",
                        style("⏸").magenta()
                    );
                }
                if let Err(e) = state.executor.pause(workflow_id).await {
                    tracing::warn!(workflow_id, error = %e, "pause request failed");
                }
            }
        }
    }
}

fn show_progress(record: &EventRecord, workflow_id: &str, mode: OutputMode) {
    if !mode.live() || record.workflow_id != workflow_id {
        return;
    }
    if let Some(line) = progress_line(record) {
        println!("{line}");
    }
}

fn finish(outcome: Result<ExecutionResult, ExecutorError>, mode: OutputMode) -> anyhow::Result<()> {
    let result = outcome?;

    if mode.json {
        return print_json(&json!({
            "workflow_id": result.workflow_id,
            "status": result.status,
            "dispatched": result.dispatched,
            "completed_steps": result.completed_steps(),
            "skipped_steps": result.skipped_steps(),
            "artifacts": result.state.artifact_values(),
            "pause_reason": result.state.pause_reason,
            "last_sequence": result.state.last_sequence,
        }));
    }
    if mode.quiet {
        return Ok(());
    }

    let completed = result.completed_steps().len();
    let skipped = result.skipped_steps().len();
    println!();
    println!(
        "Workflow {} {}: {} step(s) completed, {} skipped, {} dispatched this run",
        style(&result.workflow_id).bold(),
        styled_status(result.status),
        completed,
        skipped,
        result.dispatched
    );
    if result.status == WorkflowStatus::Paused {
        if let Some(reason) = &result.state.pause_reason {
            println!("  {} {}", style("reason:").dim(), reason);
        }
        println!(
            "  {} {}",
            style("continue with:").dim(),
            style(resume_command(&result.workflow_id)).cyan()
        );
    }
    println!();
    Ok(())
}
