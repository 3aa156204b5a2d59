//! Execution plan construction and text rendering.

use std::fmt::Write;

use conductor_types::plan::{ExecutionPlan, PlannedStep};
use conductor_types::workflow::WorkflowDefinition;

use super::dag::ExecutionGraph;
use super::settings::ExecutionSettings;

/// Build the normalized plan for a validated definition.
pub fn build_plan(
    definition: &WorkflowDefinition,
    graph: &ExecutionGraph,
    settings: &ExecutionSettings,
) -> ExecutionPlan {
    let steps: Vec<PlannedStep> = definition
        .steps
        .iter()
        .map(|step| PlannedStep {
            id: step.id.clone(),
            agent: step.agent.clone(),
            action: step.action.clone(),
            wave: graph.wave_of(&step.id).unwrap_or(0),
            depends_on: graph.depends_on(&step.id),
            dependents: graph.dependents_of(&step.id),
            creates: step.creates.clone(),
            consumes: step.consumes.clone(),
            timeout_secs: settings.timeout_for(step).as_secs(),
            max_attempts: settings.retry_for(step).max_attempts,
            optional: step.optional,
        })
        .collect();

    let entry_points = steps
        .iter()
        .filter(|s| s.depends_on.is_empty())
        .map(|s| s.id.clone())
        .collect();
    let exit_points = steps
        .iter()
        .filter(|s| s.dependents.is_empty())
        .map(|s| s.id.clone())
        .collect();

    ExecutionPlan {
        definition_id: definition.id.clone(),
        name: definition.name.clone(),
        schema_version: definition.schema_version.clone(),
        max_concurrency: settings.max_concurrency,
        edges: graph.edges(),
        waves: graph.waves().to_vec(),
        steps,
        entry_points,
        exit_points,
    }
}

/// Human-readable rendering, one wave per block.
pub fn render_text(plan: &ExecutionPlan) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Plan for '{}' (schema {}, {} steps, max concurrency {})",
        plan.name.as_deref().unwrap_or(&plan.definition_id),
        plan.schema_version,
        plan.steps.len(),
        plan.max_concurrency
    );
    for (i, wave) in plan.waves.iter().enumerate() {
        let _ = writeln!(out, "\nWave {}:", i + 1);
        for id in wave {
            let Some(step) = plan.steps.iter().find(|s| &s.id == id) else {
                continue;
            };
            let _ = write!(out, "  {} [{}/{}]", step.id, step.agent, step.action);
            if step.optional {
                let _ = write!(out, " (optional)");
            }
            let _ = writeln!(
                out,
                " timeout {}s, {} attempt(s)",
                step.timeout_secs, step.max_attempts
            );
            for edge in plan.edges.iter().filter(|e| &e.to == id) {
                let _ = writeln!(out, "    <- {} ({})", edge.from, edge.kind);
            }
        }
    }
    let _ = writeln!(out, "\nEntry points: {}", plan.entry_points.join(", "));
    let _ = write!(out, "Exit points: {}", plan.exit_points.join(", "));
    out
}
