//! `validate`, `plan` and `schema`: work on definition files, no store.

use std::path::Path;

use console::style;
use serde_json::json;

use conductor_core::workflow::dag::ExecutionGraph;
use conductor_core::workflow::definition::{WorkflowError, load_workflow_file};
use conductor_core::workflow::plan::{build_plan, render_text};
use conductor_core::workflow::schema::schema_json;
use conductor_core::workflow::settings::ExecutionSettings;
use conductor_types::config::EngineConfig;

use crate::cli::PlanFormat;
use crate::cli::output::print_json;

/// Check a definition file and report every issue at once.
pub fn validate(file: &Path, json: bool) -> anyhow::Result<()> {
    match load_workflow_file(file) {
        Ok(validated) => {
            let definition = &validated.definition;
            if json {
                return print_json(&json!({
                    "valid": true,
                    "id": definition.id,
                    "steps": definition.steps.len(),
                    "warnings": validated.warnings,
                }));
            }
            println!(
                "{} {} ({} steps)",
                style("✓").green().bold(),
                style(definition.display_name()).bold(),
                definition.steps.len()
            );
            for warning in &validated.warnings {
                println!("  {} {warning}", style("warning:").yellow());
            }
            Ok(())
        }
        Err(WorkflowError::Validation(err)) => {
            if json {
                let issues: Vec<_> = err
                    .issues
                    .iter()
                    .map(|i| json!({ "location": i.location, "message": i.kind.to_string() }))
                    .collect();
                print_json(&json!({ "valid": false, "issues": issues }))?;
            } else {
                println!(
                    "{} {} has {} issue(s):",
                    style("✗").red().bold(),
                    file.display(),
                    err.issues.len()
                );
                for issue in &err.issues {
                    println!("  {} {}", style(&issue.location).yellow(), issue.kind);
                }
            }
            anyhow::bail!("{} is not a valid workflow", file.display())
        }
        Err(other) => Err(other.into()),
    }
}

/// Print the execution plan of a definition file.
pub fn plan(file: &Path, format: PlanFormat, config: &EngineConfig) -> anyhow::Result<()> {
    let validated = load_workflow_file(file)?;
    for warning in &validated.warnings {
        tracing::warn!(file = %file.display(), "{warning}");
    }
    let definition = validated.definition;
    let graph = ExecutionGraph::build(&definition)?;

    match format {
        PlanFormat::Dot => print!("{}", graph.to_dot()),
        PlanFormat::Text | PlanFormat::Json => {
            let settings = ExecutionSettings::resolve(&config.engine, &config.retry, &definition);
            let plan = build_plan(&definition, &graph, &settings);
            if format == PlanFormat::Json {
                print_json(&plan)?;
            } else {
                print!("{}", render_text(&plan));
            }
        }
    }
    Ok(())
}

/// Print the JSON Schema of workflow definitions.
pub fn schema() -> anyhow::Result<()> {
    print_json(&schema_json())
}
