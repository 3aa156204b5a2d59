//! Dependency graph, cycle detection, ready-set computation and blocked-step
//! diagnosis.
//!
//! Uses `petgraph` to model step dependencies as a directed graph. Edges come
//! from `requires` and from artifact flow (`creates` -> `consumes`).
//! Topological sort detects cycles at build time; depth-based grouping
//! produces waves for the execution plan.

use std::collections::{BTreeSet, HashMap, HashSet};

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::dot::Dot;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, EdgeRef, Reversed};
use petgraph::Direction;
use thiserror::Error;

use conductor_types::plan::{EdgeKind, PlanEdge};
use conductor_types::state::{CompletionKind, StepStatus, WorkflowState};
use conductor_types::workflow::WorkflowDefinition;

/// Errors detected while building the graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("step '{step}' requires unknown step '{missing}'")]
    UnknownDependency { step: String, missing: String },

    #[error("step '{step}' consumes artifact '{artifact}' that no step creates")]
    UnknownArtifact { step: String, artifact: String },

    #[error(
        "dependency cycle between steps {}; unreachable because of it: {}",
        list(.cycle),
        list_or_none(.unreachable)
    )]
    Cycle {
        cycle: Vec<String>,
        unreachable: Vec<String>,
    },
}

fn list(items: &[String]) -> String {
    items
        .iter()
        .map(|i| format!("'{i}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn list_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        list(items)
    }
}

#[derive(Debug, Clone)]
struct StepNode {
    id: String,
    requires: Vec<String>,
    consumes: Vec<String>,
}

// ---------------------------------------------------------------------------
// ExecutionGraph
// ---------------------------------------------------------------------------

/// Validated, acyclic step graph of one workflow definition.
#[derive(Debug, Clone)]
pub struct ExecutionGraph {
    graph: DiGraph<String, EdgeKind>,
    index: HashMap<String, NodeIndex>,
    /// Declaration order.
    steps: Vec<StepNode>,
    /// Artifact id -> producing step.
    producers: HashMap<String, String>,
    waves: Vec<Vec<String>>,
}

impl ExecutionGraph {
    /// Build the graph and check it is a DAG whose references all resolve.
    pub fn build(definition: &WorkflowDefinition) -> Result<Self, GraphError> {
        let mut graph = DiGraph::<String, EdgeKind>::new();
        let mut index = HashMap::new();
        for step in &definition.steps {
            let node = graph.add_node(step.id.clone());
            index.insert(step.id.clone(), node);
        }

        let mut producers = HashMap::new();
        for step in &definition.steps {
            for artifact in &step.creates {
                producers.insert(artifact.clone(), step.id.clone());
            }
        }

        for step in &definition.steps {
            let to = index[&step.id];
            for dep in &step.requires {
                let from = index.get(dep).ok_or_else(|| GraphError::UnknownDependency {
                    step: step.id.clone(),
                    missing: dep.clone(),
                })?;
                graph.add_edge(*from, to, EdgeKind::Requires);
            }
            for artifact in &step.consumes {
                let producer = producers
                    .get(artifact)
                    .ok_or_else(|| GraphError::UnknownArtifact {
                        step: step.id.clone(),
                        artifact: artifact.clone(),
                    })?;
                graph.add_edge(index[producer], to, EdgeKind::Artifact {
                    artifact: artifact.clone(),
                });
            }
        }

        let sorted = toposort(&graph, None).map_err(|_| cycle_error(&graph, definition))?;

        // Depth of each node: longest path from any entry point.
        let mut depth: HashMap<NodeIndex, usize> = HashMap::new();
        for &node in &sorted {
            let d = graph
                .neighbors_directed(node, Direction::Incoming)
                .map(|dep| depth.get(&dep).copied().unwrap_or(0) + 1)
                .max()
                .unwrap_or(0);
            depth.insert(node, d);
        }
        let max_depth = depth.values().copied().max().unwrap_or(0);
        let mut waves: Vec<Vec<String>> = vec![Vec::new(); max_depth + 1];
        for step in &definition.steps {
            waves[depth[&index[&step.id]]].push(step.id.clone());
        }
        if definition.steps.is_empty() {
            waves.clear();
        }

        let steps = definition
            .steps
            .iter()
            .map(|s| StepNode {
                id: s.id.clone(),
                requires: s.requires.clone(),
                consumes: s.consumes.clone(),
            })
            .collect();

        Ok(Self {
            graph,
            index,
            steps,
            producers,
            waves,
        })
    }

    /// Step ids in declaration order.
    pub fn step_ids(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|s| s.id.as_str())
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Steps grouped by dependency depth; wave 0 has no dependencies.
    pub fn waves(&self) -> &[Vec<String>] {
        &self.waves
    }

    /// Wave index of a step.
    pub fn wave_of(&self, step_id: &str) -> Option<usize> {
        self.waves
            .iter()
            .position(|wave| wave.iter().any(|s| s == step_id))
    }

    /// Steps that can be dispatched now, in declaration order.
    ///
    /// A step is ready when it has not completed or been skipped, is not
    /// running, every `requires` entry is in `completed_steps`, and every
    /// consumed artifact has been produced.
    pub fn ready_steps(&self, state: &WorkflowState) -> Vec<String> {
        self.steps
            .iter()
            .filter(|step| self.is_ready(step, state))
            .map(|step| step.id.clone())
            .collect()
    }

    fn is_ready(&self, step: &StepNode, state: &WorkflowState) -> bool {
        !state.is_done(&step.id)
            && !state.is_running(&step.id)
            && step.requires.iter().all(|dep| state.is_done(dep))
            && step
                .consumes
                .iter()
                .all(|artifact| state.artifacts.contains_key(artifact))
    }

    /// Whether every step completed or was skipped.
    pub fn is_finished(&self, state: &WorkflowState) -> bool {
        self.steps.iter().all(|s| state.is_done(&s.id))
    }

    /// Steps that have not completed or been skipped.
    pub fn pending_steps<'a>(&'a self, state: &'a WorkflowState) -> impl Iterator<Item = &'a str> {
        self.steps
            .iter()
            .filter(|s| !state.is_done(&s.id))
            .map(|s| s.id.as_str())
    }

    /// Explain why pending, non-running steps cannot be dispatched.
    pub fn diagnose_blocked(&self, state: &WorkflowState) -> BlockedReport {
        let mut blocked = Vec::new();
        for step in &self.steps {
            if state.is_done(&step.id) || state.is_running(&step.id) || self.is_ready(step, state) {
                continue;
            }
            let mut unmet = Vec::new();
            for dep in &step.requires {
                if !state.is_done(dep) {
                    unmet.push(Unmet::Step {
                        step_id: dep.clone(),
                        condition: step_condition(state, dep),
                    });
                }
            }
            for artifact in &step.consumes {
                if state.artifacts.contains_key(artifact) {
                    continue;
                }
                let producer = self.producers.get(artifact).cloned();
                let condition = match producer.as_deref() {
                    Some(p) => match state.completed_steps.get(p) {
                        Some(CompletionKind::Skipped) => ArtifactCondition::ProducerSkipped,
                        Some(CompletionKind::Completed) => ArtifactCondition::NotEmitted,
                        None => ArtifactCondition::ProducerPending(step_condition(state, p)),
                    },
                    None => ArtifactCondition::NoProducer,
                };
                unmet.push(Unmet::Artifact {
                    artifact: artifact.clone(),
                    producer,
                    condition,
                });
            }
            blocked.push(BlockedStep {
                step_id: step.id.clone(),
                unmet,
            });
        }
        BlockedReport { blocked }
    }

    /// Transitive dependencies of a step, in declaration order.
    pub fn dependencies_of(&self, step_id: &str) -> Vec<String> {
        let Some(&start) = self.index.get(step_id) else {
            return Vec::new();
        };
        let reversed = Reversed(&self.graph);
        let mut dfs = Dfs::new(reversed, start);
        let mut seen = HashSet::new();
        while let Some(node) = dfs.next(reversed) {
            if node != start {
                seen.insert(node);
            }
        }
        self.in_declaration_order(seen)
    }

    /// Direct dependents of a step, in declaration order.
    pub fn dependents_of(&self, step_id: &str) -> Vec<String> {
        let Some(&node) = self.index.get(step_id) else {
            return Vec::new();
        };
        let direct: HashSet<NodeIndex> = self
            .graph
            .neighbors_directed(node, Direction::Outgoing)
            .collect();
        self.in_declaration_order(direct)
    }

    /// Direct dependencies of a step (requires and artifact producers).
    pub fn depends_on(&self, step_id: &str) -> Vec<String> {
        let Some(&node) = self.index.get(step_id) else {
            return Vec::new();
        };
        let direct: HashSet<NodeIndex> = self
            .graph
            .neighbors_directed(node, Direction::Incoming)
            .collect();
        self.in_declaration_order(direct)
    }

    /// All edges, ordered by target then source declaration order.
    pub fn edges(&self) -> Vec<PlanEdge> {
        let mut edges: Vec<PlanEdge> = self
            .graph
            .edge_references()
            .map(|e| PlanEdge {
                from: self.graph[e.source()].clone(),
                to: self.graph[e.target()].clone(),
                kind: e.weight().clone(),
            })
            .collect();
        let position: HashMap<&str, usize> = self
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.as_str(), i))
            .collect();
        edges.sort_by_key(|e| (position[e.to.as_str()], position[e.from.as_str()]));
        edges.dedup();
        edges
    }

    /// Graphviz DOT rendering of the graph.
    pub fn to_dot(&self) -> String {
        format!("{}", Dot::new(&self.graph))
    }

    fn in_declaration_order(&self, nodes: HashSet<NodeIndex>) -> Vec<String> {
        self.steps
            .iter()
            .filter(|s| nodes.contains(&self.index[&s.id]))
            .map(|s| s.id.clone())
            .collect()
    }
}

fn cycle_error(graph: &DiGraph<String, EdgeKind>, definition: &WorkflowDefinition) -> GraphError {
    let mut members: HashSet<NodeIndex> = HashSet::new();
    for component in tarjan_scc(graph) {
        let self_loop = component.len() == 1 && graph.contains_edge(component[0], component[0]);
        if component.len() > 1 || self_loop {
            members.extend(component);
        }
    }

    let mut downstream: HashSet<NodeIndex> = HashSet::new();
    for &start in &members {
        let mut dfs = Dfs::new(graph, start);
        while let Some(node) = dfs.next(graph) {
            if !members.contains(&node) {
                downstream.insert(node);
            }
        }
    }

    let ordered = |set: &HashSet<NodeIndex>| -> Vec<String> {
        definition
            .steps
            .iter()
            .filter(|s| set.iter().any(|n| graph[*n] == s.id))
            .map(|s| s.id.clone())
            .collect()
    };

    GraphError::Cycle {
        cycle: ordered(&members),
        unreachable: ordered(&downstream),
    }
}

fn step_condition(state: &WorkflowState, step_id: &str) -> StepCondition {
    if state.is_running(step_id) {
        return StepCondition::Running;
    }
    match state.last_execution(step_id) {
        None => StepCondition::NotStarted,
        Some(exec) => match exec.status {
            StepStatus::Failed => StepCondition::Failed(
                exec.error
                    .as_ref()
                    .map(|e| e.category.to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
            ),
            StepStatus::Cancelled => StepCondition::Cancelled,
            StepStatus::Running => StepCondition::Running,
            StepStatus::Completed => StepCondition::NotStarted,
        },
    }
}

// ---------------------------------------------------------------------------
// Blocked diagnosis
// ---------------------------------------------------------------------------

/// State of a dependency that has not completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepCondition {
    NotStarted,
    Running,
    /// Last attempt failed with this category.
    Failed(String),
    Cancelled,
}

impl std::fmt::Display for StepCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepCondition::NotStarted => write!(f, "never started"),
            StepCondition::Running => write!(f, "still running"),
            StepCondition::Failed(category) => write!(f, "failed: {category}"),
            StepCondition::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Why a consumed artifact is missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactCondition {
    ProducerPending(StepCondition),
    ProducerSkipped,
    /// The producer completed without emitting the artifact.
    NotEmitted,
    NoProducer,
}

/// One unmet requirement of a blocked step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unmet {
    Step {
        step_id: String,
        condition: StepCondition,
    },
    Artifact {
        artifact: String,
        producer: Option<String>,
        condition: ArtifactCondition,
    },
}

impl std::fmt::Display for Unmet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Unmet::Step { step_id, condition } => write!(f, "step '{step_id}' ({condition})"),
            Unmet::Artifact {
                artifact,
                producer,
                condition,
            } => {
                let producer = producer.as_deref().unwrap_or("?");
                match condition {
                    ArtifactCondition::ProducerPending(c) => {
                        write!(f, "artifact '{artifact}' (producer '{producer}' {c})")
                    }
                    ArtifactCondition::ProducerSkipped => {
                        write!(f, "artifact '{artifact}' (producer '{producer}' was skipped)")
                    }
                    ArtifactCondition::NotEmitted => write!(
                        f,
                        "artifact '{artifact}' (producer '{producer}' completed without emitting it)"
                    ),
                    ArtifactCondition::NoProducer => {
                        write!(f, "artifact '{artifact}' (no step creates it)")
                    }
                }
            }
        }
    }
}

/// A pending step and everything it is waiting on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedStep {
    pub step_id: String,
    pub unmet: Vec<Unmet>,
}

/// Itemized explanation of a stalled workflow.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockedReport {
    pub blocked: Vec<BlockedStep>,
}

impl BlockedReport {
    pub fn is_empty(&self) -> bool {
        self.blocked.is_empty()
    }

    /// Artifacts missing anywhere in the report.
    pub fn missing_artifacts(&self) -> BTreeSet<&str> {
        self.blocked
            .iter()
            .flat_map(|b| b.unmet.iter())
            .filter_map(|u| match u {
                Unmet::Artifact { artifact, .. } => Some(artifact.as_str()),
                Unmet::Step { .. } => None,
            })
            .collect()
    }
}

impl std::fmt::Display for BlockedReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "no step can be dispatched but {} step(s) are unfinished:",
            self.blocked.len()
        )?;
        for step in &self.blocked {
            let waiting: Vec<String> = step.unmet.iter().map(|u| u.to_string()).collect();
            write!(
                f,
                "\n  - step '{}' is waiting on {}",
                step.step_id,
                waiting.join(", ")
            )?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use conductor_types::error::{ErrorCategory, ErrorInfo};
    use conductor_types::state::{Artifact, StepExecution};
    use conductor_types::workflow::StepDefinition;

    /// Helper: build a step with given id and dependencies.
    fn step(id: &str, requires: Vec<&str>) -> StepDefinition {
        StepDefinition {
            id: id.to_string(),
            agent: "agent".to_string(),
            action: "run".to_string(),
            description: None,
            requires: requires.into_iter().map(String::from).collect(),
            creates: vec![],
            consumes: vec![],
            inputs: Default::default(),
            timeout_secs: None,
            retry: None,
            optional: false,
        }
    }

    fn definition(steps: Vec<StepDefinition>) -> WorkflowDefinition {
        WorkflowDefinition {
            schema_version: "1.1".to_string(),
            id: "test".to_string(),
            name: None,
            description: None,
            settings: Default::default(),
            variables: Default::default(),
            steps,
            gates: vec![],
            auto_detect: None,
        }
    }

    fn complete(state: &mut WorkflowState, id: &str) {
        state
            .completed_steps
            .insert(id.to_string(), CompletionKind::Completed);
    }

    fn running(state: &mut WorkflowState, id: &str) {
        state.executions.push(StepExecution {
            step_id: id.to_string(),
            agent: "agent".into(),
            action: "run".into(),
            status: StepStatus::Running,
            attempt: 1,
            started_at: Utc::now(),
            ended_at: None,
            error: None,
        });
    }

    #[test]
    fn fan_in_ready_sets() {
        let def = definition(vec![step("a", vec![]), step("b", vec![]), step("c", vec!["a", "b"])]);
        let graph = ExecutionGraph::build(&def).unwrap();
        let mut state = WorkflowState::new("wf");

        assert_eq!(graph.ready_steps(&state), vec!["a", "b"]);
        complete(&mut state, "a");
        assert_eq!(graph.ready_steps(&state), vec!["b"], "c still needs b");
        complete(&mut state, "b");
        assert_eq!(graph.ready_steps(&state), vec!["c"]);
        complete(&mut state, "c");
        assert!(graph.ready_steps(&state).is_empty());
        assert!(graph.is_finished(&state));
    }

    #[test]
    fn ready_set_follows_declaration_order() {
        let def = definition(vec![step("zeta", vec![]), step("alpha", vec![]), step("mid", vec![])]);
        let graph = ExecutionGraph::build(&def).unwrap();
        assert_eq!(
            graph.ready_steps(&WorkflowState::new("wf")),
            vec!["zeta", "alpha", "mid"]
        );
    }

    #[test]
    fn running_steps_not_ready() {
        let def = definition(vec![step("a", vec![]), step("b", vec![])]);
        let graph = ExecutionGraph::build(&def).unwrap();
        let mut state = WorkflowState::new("wf");
        running(&mut state, "a");
        assert_eq!(graph.ready_steps(&state), vec!["b"]);
    }

    #[test]
    fn skipped_steps_satisfy_requires() {
        let def = definition(vec![step("a", vec![]), step("b", vec!["a"])]);
        let graph = ExecutionGraph::build(&def).unwrap();
        let mut state = WorkflowState::new("wf");
        state
            .completed_steps
            .insert("a".into(), CompletionKind::Skipped);
        assert_eq!(graph.ready_steps(&state), vec!["b"]);
    }

    #[test]
    fn artifact_edges_gate_readiness() {
        let mut producer = step("lint", vec![]);
        producer.creates = vec!["report".into()];
        let mut consumer = step("review", vec![]);
        consumer.consumes = vec!["report".into()];
        let def = definition(vec![producer, consumer]);
        let graph = ExecutionGraph::build(&def).unwrap();

        let mut state = WorkflowState::new("wf");
        assert_eq!(graph.ready_steps(&state), vec!["lint"]);
        assert_eq!(graph.waves(), &[vec!["lint".to_string()], vec!["review".to_string()]]);

        complete(&mut state, "lint");
        assert!(graph.ready_steps(&state).is_empty(), "artifact not yet produced");
        let report = graph.diagnose_blocked(&state);
        assert_eq!(report.blocked.len(), 1);
        assert!(report.to_string().contains("completed without emitting it"));

        state.artifacts.insert(
            "report".into(),
            Artifact {
                produced_by: "lint".into(),
                attempt: 1,
                value: serde_json::json!({"ok": true}),
            },
        );
        assert_eq!(graph.ready_steps(&state), vec!["review"]);
    }

    #[test]
    fn unknown_dependency_is_build_error() {
        let def = definition(vec![step("a", vec!["Z"])]);
        let err = ExecutionGraph::build(&def).unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownDependency {
                step: "a".into(),
                missing: "Z".into()
            }
        );
    }

    #[test]
    fn cycle_reports_members_and_unreachable() {
        let def = definition(vec![
            step("root", vec![]),
            step("a", vec!["root", "c"]),
            step("b", vec!["a"]),
            step("c", vec!["b"]),
            step("after", vec!["c"]),
        ]);
        match ExecutionGraph::build(&def).unwrap_err() {
            GraphError::Cycle { cycle, unreachable } => {
                assert_eq!(cycle, vec!["a", "b", "c"]);
                assert_eq!(unreachable, vec!["after"]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn consuming_own_artifact_is_a_cycle() {
        let mut s = step("a", vec![]);
        s.creates = vec!["x".into()];
        s.consumes = vec!["x".into()];
        let err = ExecutionGraph::build(&definition(vec![s])).unwrap_err();
        assert!(matches!(err, GraphError::Cycle { .. }));
    }

    #[test]
    fn waves_and_dependency_queries() {
        let def = definition(vec![
            step("a", vec![]),
            step("b", vec!["a"]),
            step("c", vec!["a"]),
            step("d", vec!["b", "c"]),
        ]);
        let graph = ExecutionGraph::build(&def).unwrap();
        assert_eq!(graph.waves().len(), 3);
        assert_eq!(graph.wave_of("d"), Some(2));
        assert_eq!(graph.dependencies_of("d"), vec!["a", "b", "c"]);
        assert_eq!(graph.dependents_of("a"), vec!["b", "c"]);
        assert_eq!(graph.depends_on("d"), vec!["b", "c"]);
        assert_eq!(graph.edges().len(), 4);
        assert!(graph.to_dot().contains("digraph"));
    }

    #[test]
    fn diagnosis_names_failed_dependency() {
        let def = definition(vec![step("a", vec![]), step("b", vec!["a"])]);
        let graph = ExecutionGraph::build(&def).unwrap();
        let mut state = WorkflowState::new("wf");
        state.executions.push(StepExecution {
            step_id: "a".into(),
            agent: "agent".into(),
            action: "run".into(),
            status: StepStatus::Failed,
            attempt: 3,
            started_at: Utc::now(),
            ended_at: Some(Utc::now()),
            error: Some(ErrorInfo::new(ErrorCategory::ExternalDependency, "503")),
        });

        let report = graph.diagnose_blocked(&state);
        // "a" is itself ready again (failed steps are retryable); only "b" is blocked.
        assert_eq!(report.blocked.len(), 1);
        assert_eq!(
            report.blocked[0].unmet,
            vec![Unmet::Step {
                step_id: "a".into(),
                condition: StepCondition::Failed("external_dependency".into())
            }]
        );
        assert!(report.to_string().contains("step 'a' (failed: external_dependency)"));
    }
}
