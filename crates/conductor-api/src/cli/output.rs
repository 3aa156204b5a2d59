//! Shared output helpers: status cells, event lines and error reports.

use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde::Serialize;

use conductor_core::workflow::executor::ExecutorError;
use conductor_types::event::{EventRecord, WorkflowEvent};
use conductor_types::state::WorkflowStatus;

/// Table with the CLI's standard look.
pub fn table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(headers.iter().map(|h| Cell::new(h).fg(Color::Cyan)).collect::<Vec<_>>());
    table
}

/// Format a workflow or step status as a colored table cell.
pub fn format_status(status: &str) -> Cell {
    match status {
        "pending" => Cell::new(status).fg(Color::Yellow),
        "running" => Cell::new(status).fg(Color::Blue),
        "paused" => Cell::new(status).fg(Color::Magenta),
        "completed" => Cell::new(status).fg(Color::Green),
        "failed" => Cell::new(status).fg(Color::Red),
        "skipped" | "cancelled" => Cell::new(status).fg(Color::DarkGrey),
        _ => Cell::new(status),
    }
}

/// Status word styled for inline text.
pub fn styled_status(status: WorkflowStatus) -> String {
    let text = status.to_string();
    match status {
        WorkflowStatus::Pending => style(text).yellow().to_string(),
        WorkflowStatus::Running => style(text).blue().to_string(),
        WorkflowStatus::Paused => style(text).magenta().to_string(),
        WorkflowStatus::Completed => style(text).green().bold().to_string(),
        WorkflowStatus::Failed => style(text).red().bold().to_string(),
    }
}

/// Print a value as pretty JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// One-line rendering of a live event, or `None` for events not worth
/// showing as progress.
pub fn progress_line(record: &EventRecord) -> Option<String> {
    let line = match &record.event {
        WorkflowEvent::StepStarted {
            step_id,
            agent,
            action,
            attempt,
        } => format!(
            "  {} {} {}",
            style("▸").blue(),
            style(step_id).bold(),
            style(format!("{agent}/{action}, attempt {attempt}")).dim()
        ),
        WorkflowEvent::StepCompleted { step_id, attempt, .. } => format!(
            "  {} {} {}",
            style("✓").green(),
            step_id,
            style(format!("(attempt {attempt})")).dim()
        ),
        WorkflowEvent::StepFailed {
            step_id,
            attempt,
            error,
            will_retry,
        } => {
            let next = if *will_retry { ", retrying" } else { "" };
            format!(
                "  {} {} {}",
                style("✗").red(),
                step_id,
                style(format!("attempt {attempt} failed{next}: {}", error.message)).red()
            )
        }
        WorkflowEvent::StepSkipped { step_id, reason } => format!(
            "  {} {} {}",
            style("↷").dim(),
            step_id,
            style(format!("skipped: {reason}")).dim()
        ),
        WorkflowEvent::StepCancelled { step_id, reason, .. } => format!(
            "  {} {} {}",
            style("■").yellow(),
            step_id,
            style(format!("cancelled: {reason}")).dim()
        ),
        WorkflowEvent::StepInterrupted { step_id, attempt } => format!(
            "  {} {} {}",
            style("!").yellow(),
            step_id,
            style(format!("attempt {attempt} was interrupted")).dim()
        ),
        WorkflowEvent::WorkflowResumed { from } => {
            format!("  {} resumed from {from}", style("↻").cyan())
        }
        _ => return None,
    };
    Some(line)
}

/// Short description of an event for the `events` table.
pub fn event_detail(event: &WorkflowEvent) -> String {
    match event {
        WorkflowEvent::WorkflowStarted { definition_id, .. } => format!("definition {definition_id}"),
        WorkflowEvent::WorkflowResumed { from } => format!("from {from}"),
        WorkflowEvent::StepStarted {
            agent, action, attempt, ..
        } => format!("{agent}/{action} attempt {attempt}"),
        WorkflowEvent::StepCompleted {
            attempt, artifacts, ..
        } => {
            if artifacts.is_empty() {
                format!("attempt {attempt}")
            } else {
                let names: Vec<&str> = artifacts.keys().map(String::as_str).collect();
                format!("attempt {attempt}, created {}", names.join(", "))
            }
        }
        WorkflowEvent::StepFailed {
            attempt,
            error,
            will_retry,
            ..
        } => format!(
            "attempt {attempt} {}: {}{}",
            error.category,
            error.message,
            if *will_retry { " (retrying)" } else { "" }
        ),
        WorkflowEvent::StepCancelled { attempt, reason, .. } => format!("attempt {attempt}: {reason}"),
        WorkflowEvent::StepInterrupted { attempt, .. } => format!("attempt {attempt}"),
        WorkflowEvent::StepSkipped { reason, .. } | WorkflowEvent::WorkflowPaused { reason } => reason.clone(),
        WorkflowEvent::WorkflowCompleted => String::new(),
        WorkflowEvent::WorkflowFailed { error } => format!("{}: {}", error.category, error.message),
        WorkflowEvent::CheckpointTaken { sequence } => format!("at sequence {sequence}"),
    }
}

/// Print a failed command's error.
///
/// Executor errors carry a category, recoverability and a suggested next
/// step; everything else is printed with its cause chain.
pub fn report_error(err: &anyhow::Error, json: bool) {
    let executor = err.downcast_ref::<ExecutorError>();
    if json {
        let body = match executor {
            Some(e) => serde_json::json!({
                "error": {
                    "message": e.to_string(),
                    "category": e.category().to_string(),
                    "recoverable": e.is_recoverable(),
                    "workflow_id": e.workflow_id(),
                    "remediation": e.remediation(),
                }
            }),
            None => serde_json::json!({ "error": { "message": format!("{err:#}") } }),
        };
        println!("{body}");
        return;
    }

    match executor {
        Some(e) => {
            eprintln!(
                "{} {} {}",
                style("error:").red().bold(),
                e,
                style(format!("[{}]", e.category())).dim()
            );
            if let Some(hint) = e.remediation() {
                eprintln!("  {} {}", style("hint:").cyan(), hint);
            }
        }
        None => eprintln!("{} {err:#}", style("error:").red().bold()),
    }
}
