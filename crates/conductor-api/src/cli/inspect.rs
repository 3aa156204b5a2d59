//! `status`, `list` and `events`: read-only views of stored workflows.

use comfy_table::{Cell, Color};
use console::style;
use serde_json::json;

use conductor_core::workflow::executor::resume_command;
use conductor_core::workflow::store::StateStore;
use conductor_types::event::WorkflowEvent;
use conductor_types::state::{CompletionKind, StepStatus, WorkflowState, WorkflowStatus};

use crate::cli::output::{event_detail, format_status, print_json, styled_status, table};
use crate::state::AppState;

/// Show one workflow's state, step by step.
pub async fn status(state: &AppState, workflow_id: &str, json: bool) -> anyhow::Result<()> {
    let workflow = state.executor.checkpoints().load(workflow_id).await?;
    let store = state.store();
    let step_order = match store.load_plan(workflow_id).await? {
        Some(plan) => plan.steps.into_iter().map(|s| s.id).collect(),
        None => executed_steps(&workflow),
    };

    if json {
        return print_json(&workflow);
    }

    println!();
    println!(
        "{} {}",
        style(&workflow.workflow_id).cyan().bold(),
        styled_status(workflow.status)
    );
    if let Some(definition_id) = &workflow.definition_id {
        println!("  {} {definition_id}", style("definition:").dim());
    }
    if let Some(created) = workflow.created_at {
        println!("  {} {}", style("started:").dim(), created.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(updated) = workflow.updated_at {
        println!("  {} {}", style("updated:").dim(), updated.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    println!(
        "  {} {}{}",
        style("events:").dim(),
        workflow.last_sequence,
        workflow
            .last_checkpoint
            .map(|seq| format!(" (checkpoint at {seq})"))
            .unwrap_or_default()
    );

    let mut steps = table(&["Step", "Agent", "Status", "Attempts", "Last Error"]);
    for step_id in &step_order {
        let last = workflow.last_execution(step_id);
        let status = step_status(&workflow, step_id);
        let agent = last
            .map(|e| format!("{}/{}", e.agent, e.action))
            .unwrap_or_else(|| "-".into());
        let error = last
            .and_then(|e| e.error.as_ref())
            .map(|e| e.message.clone())
            .unwrap_or_default();
        steps.add_row(vec![
            Cell::new(step_id),
            Cell::new(agent),
            format_status(status),
            Cell::new(workflow.attempts_for(step_id)),
            Cell::new(error),
        ]);
    }
    println!();
    println!("{steps}");

    if !workflow.artifacts.is_empty() {
        let mut artifacts = table(&["Artifact", "Produced By", "Attempt"]);
        for (name, artifact) in &workflow.artifacts {
            artifacts.add_row(vec![
                Cell::new(name),
                Cell::new(&artifact.produced_by),
                Cell::new(artifact.attempt),
            ]);
        }
        println!();
        println!("{artifacts}");
    }

    if let Some(error) = &workflow.error {
        println!();
        println!("  {} {error}", style("error:").red().bold());
        if let Some(hint) = &error.remediation {
            println!("  {} {hint}", style("hint:").cyan());
        }
    }
    if let Some(reason) = &workflow.pause_reason {
        println!();
        println!("  {} {reason}", style("paused:").magenta());
    }
    if matches!(
        workflow.status,
        WorkflowStatus::Paused | WorkflowStatus::Failed | WorkflowStatus::Running
    ) {
        println!(
            "  {} {}",
            style("continue with:").dim(),
            style(resume_command(&workflow.workflow_id)).cyan()
        );
    }
    println!();
    Ok(())
}

/// Steps in first-execution order, for workflows stored without a plan.
fn executed_steps(workflow: &WorkflowState) -> Vec<String> {
    let mut order: Vec<String> = Vec::new();
    for execution in &workflow.executions {
        if !order.contains(&execution.step_id) {
            order.push(execution.step_id.clone());
        }
    }
    order
}

fn step_status(workflow: &WorkflowState, step_id: &str) -> &'static str {
    match workflow.completed_steps.get(step_id) {
        Some(CompletionKind::Completed) => return "completed",
        Some(CompletionKind::Skipped) => return "skipped",
        None => {}
    }
    if workflow.is_running(step_id) {
        return "running";
    }
    match workflow.last_execution(step_id) {
        Some(execution) => match execution.status {
            StepStatus::Failed => "failed",
            StepStatus::Cancelled => "cancelled",
            StepStatus::Running | StepStatus::Completed => "pending",
        },
        None => "pending",
    }
}

/// List stored workflows, most recently updated first.
pub async fn list(state: &AppState, json: bool) -> anyhow::Result<()> {
    let summaries = state.store().list_workflows().await?;

    let mut rows = Vec::with_capacity(summaries.len());
    for summary in summaries {
        let status = match state.executor.checkpoints().load(&summary.workflow_id).await {
            Ok(workflow) => Some(workflow.status),
            Err(e) => {
                tracing::warn!(workflow_id = %summary.workflow_id, error = %e, "could not load workflow state");
                None
            }
        };
        rows.push((summary, status));
    }

    if json {
        let items: Vec<_> = rows
            .iter()
            .map(|(summary, status)| {
                json!({
                    "workflow_id": summary.workflow_id,
                    "definition_id": summary.definition_id,
                    "status": status,
                    "created_at": summary.created_at,
                    "updated_at": summary.updated_at,
                })
            })
            .collect();
        return print_json(&items);
    }

    if rows.is_empty() {
        println!();
        println!("  No workflows yet.");
        println!(
            "  {}",
            style("Start one with: cndr run <workflow.yaml>").dim()
        );
        println!();
        return Ok(());
    }

    let mut listing = table(&["Workflow", "Definition", "Status", "Started", "Updated"]);
    for (summary, status) in &rows {
        listing.add_row(vec![
            Cell::new(&summary.workflow_id),
            Cell::new(summary.definition_id.as_deref().unwrap_or("-")),
            status
                .map(|s| format_status(&s.to_string()))
                .unwrap_or_else(|| format_status("unreadable")),
            Cell::new(summary.created_at.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(summary.updated_at.format("%Y-%m-%d %H:%M:%S")),
        ]);
    }
    println!();
    println!("{listing}");
    println!();
    Ok(())
}

/// Print a workflow's event log.
pub async fn events(state: &AppState, workflow_id: &str, after: u64, json: bool) -> anyhow::Result<()> {
    let records = state.store().read_events(workflow_id, after).await?;

    if json {
        return print_json(&records);
    }
    if records.is_empty() {
        println!();
        println!(
            "  {}",
            style(format!("No events for '{workflow_id}' after sequence {after}.")).dim()
        );
        println!();
        return Ok(());
    }

    let mut log = table(&["Seq", "Time", "Event", "Step", "Detail"]);
    for record in &records {
        let kind = record.event.kind();
        let kind_cell = match &record.event {
            WorkflowEvent::StepFailed { .. } | WorkflowEvent::WorkflowFailed { .. } => {
                Cell::new(kind).fg(Color::Red)
            }
            WorkflowEvent::WorkflowCompleted => Cell::new(kind).fg(Color::Green),
            WorkflowEvent::WorkflowPaused { .. } => Cell::new(kind).fg(Color::Magenta),
            _ => Cell::new(kind),
        };
        log.add_row(vec![
            Cell::new(record.sequence),
            Cell::new(record.timestamp.format("%H:%M:%S%.3f")),
            kind_cell,
            Cell::new(record.event.step_id().unwrap_or("")),
            Cell::new(event_detail(&record.event)),
        ]);
    }
    println!();
    println!("{log}");
    println!();
    Ok(())
}
