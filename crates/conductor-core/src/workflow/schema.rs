//! Strict, versioned schema validation for workflow documents.
//!
//! Validation runs on the raw `serde_json::Value` (YAML documents are
//! converted first) so unknown fields can be reported with their exact
//! location and the permitted set, instead of being silently dropped by serde.
//! All problems are collected and returned together.

use std::collections::{BTreeSet, HashMap};

use serde_json::{Map, Value};
use thiserror::Error;

use conductor_types::workflow::WorkflowDefinition;

use super::dag::{ExecutionGraph, GraphError};

/// Schema versions this engine understands.
pub const SUPPORTED_SCHEMA_VERSIONS: &[&str] = &["1.0", "1.1"];

/// Version whose legacy fields are still accepted.
const LEGACY_SCHEMA_VERSION: &str = "1.0";

const WORKFLOW_FIELDS: &[&str] = &[
    "schema_version",
    "id",
    "name",
    "description",
    "settings",
    "variables",
    "steps",
    "gates",
];

/// Workflow-level fields only accepted under schema 1.0.
const LEGACY_WORKFLOW_FIELDS: &[&str] = &["auto_detect"];

const SETTINGS_FIELDS: &[&str] = &[
    "max_concurrency",
    "step_timeout_secs",
    "workflow_timeout_secs",
    "retry",
    "checkpoint_every",
    "checkpoint_interval_secs",
    "max_steps",
];

const RETRY_FIELDS: &[&str] = &[
    "max_attempts",
    "backoff",
    "initial_delay_ms",
    "max_delay_ms",
    "jitter",
];

const STEP_FIELDS: &[&str] = &[
    "id",
    "agent",
    "action",
    "description",
    "requires",
    "creates",
    "consumes",
    "inputs",
    "timeout_secs",
    "retry",
    "optional",
];

const GATE_FIELDS: &[&str] = &["id", "after", "artifacts", "blocking", "description"];

const BACKOFF_STRATEGIES: &[&str] = &["fixed", "exponential"];

// ---------------------------------------------------------------------------
// Issues
// ---------------------------------------------------------------------------

/// What is wrong at a location.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IssueKind {
    #[error("missing `schema_version` (supported: {})", .supported.join(", "))]
    MissingVersion { supported: Vec<String> },

    #[error("unsupported schema version '{found}' (supported: {})", .supported.join(", "))]
    UnsupportedVersion { found: String, supported: Vec<String> },

    #[error("unknown field(s) {}; allowed fields are {}", quoted(.fields), quoted(.allowed))]
    UnknownFields { fields: Vec<String>, allowed: Vec<String> },

    #[error("missing required field `{field}`")]
    MissingField { field: String },

    #[error("field `{field}` must be {expected}")]
    InvalidType { field: String, expected: &'static str },

    #[error("field `{field}`: {message}")]
    InvalidValue { field: String, message: String },

    #[error("invalid id '{id}': use letters, digits, '-', '_' or '.', starting with a letter or digit")]
    InvalidId { id: String },

    #[error("duplicate step id '{id}'")]
    DuplicateStep { id: String },

    #[error("duplicate gate id '{id}'")]
    DuplicateGate { id: String },

    #[error("step '{step}' requires itself")]
    SelfReference { step: String },

    #[error("step '{step}' requires unknown step '{missing}'")]
    UnknownDependency { step: String, missing: String },

    #[error("'{owner}' references artifact '{artifact}' that no step creates")]
    UnknownArtifact { owner: String, artifact: String },

    #[error("artifact '{artifact}' is created by more than one step: {}", quoted(.steps))]
    DuplicateProducer { artifact: String, steps: Vec<String> },

    #[error("gate '{gate}' runs after unknown step '{step}'")]
    UnknownGateStep { gate: String, step: String },

    #[error("{0}")]
    Graph(String),
}

fn quoted(items: &[String]) -> String {
    items
        .iter()
        .map(|i| format!("`{i}`"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// A single validation problem and where it was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Path-like location, e.g. `steps[2]` or `settings.retry`.
    pub location: String,
    pub kind: IssueKind,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.location, self.kind)
    }
}

/// Every issue found in a rejected document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationError {
    fn single(location: impl Into<String>, kind: IssueKind) -> Self {
        Self {
            issues: vec![ValidationIssue {
                location: location.into(),
                kind,
            }],
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "workflow definition rejected with {} issue(s):",
            self.issues.len()
        )?;
        for issue in &self.issues {
            write!(f, "\n  - {issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// A definition that passed validation, plus non-fatal findings.
#[derive(Debug, Clone)]
pub struct ValidatedDefinition {
    pub definition: WorkflowDefinition,
    /// Deprecation notices. Never affect execution.
    pub warnings: Vec<String>,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a raw workflow document.
///
/// Checks the schema version, per-object field allow-lists, field types,
/// id uniqueness and references, then builds the dependency graph to reject
/// cycles. Pure: performs no I/O.
pub fn validate(raw: &Value) -> Result<ValidatedDefinition, ValidationError> {
    let Some(root) = raw.as_object() else {
        return Err(ValidationError::single(
            "$",
            IssueKind::InvalidType {
                field: "document".into(),
                expected: "a mapping",
            },
        ));
    };

    let supported: Vec<String> = SUPPORTED_SCHEMA_VERSIONS.iter().map(|v| v.to_string()).collect();
    let version = match root.get("schema_version") {
        None => {
            return Err(ValidationError::single("$", IssueKind::MissingVersion { supported }));
        }
        Some(Value::String(v)) if SUPPORTED_SCHEMA_VERSIONS.contains(&v.as_str()) => v.clone(),
        Some(other) => {
            let found = match other {
                Value::String(s) => s.clone(),
                v => v.to_string(),
            };
            return Err(ValidationError::single(
                "schema_version",
                IssueKind::UnsupportedVersion { found, supported },
            ));
        }
    };

    let mut checker = Checker::default();
    let legacy = version == LEGACY_SCHEMA_VERSION;

    // Workflow level
    let mut workflow_fields: Vec<&str> = WORKFLOW_FIELDS.to_vec();
    if legacy {
        workflow_fields.extend_from_slice(LEGACY_WORKFLOW_FIELDS);
    }
    checker.allow_list("$", root, &workflow_fields);
    if let Some(id) = checker.required_str("$", root, "id") {
        checker.id("id", id);
    }
    checker.optional_str("$", root, "name");
    checker.optional_str("$", root, "description");
    checker.optional_object("$", root, "variables");
    if legacy && root.contains_key("auto_detect") {
        if !matches!(root.get("auto_detect"), Some(Value::Bool(_))) {
            checker.push("$", IssueKind::InvalidType {
                field: "auto_detect".into(),
                expected: "a boolean",
            });
        }
        checker.warnings.push(
            "`auto_detect` is deprecated and ignored; remove it before moving to schema_version 1.1"
                .to_string(),
        );
    }

    if let Some(settings) = checker.optional_object("$", root, "settings") {
        checker.settings(settings);
    }

    // Steps
    let steps = match root.get("steps") {
        None => {
            checker.push("$", IssueKind::MissingField { field: "steps".into() });
            Vec::new()
        }
        Some(Value::Array(items)) if items.is_empty() => {
            checker.push("steps", IssueKind::InvalidValue {
                field: "steps".into(),
                message: "a workflow needs at least one step".into(),
            });
            Vec::new()
        }
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| checker.step(i, item))
            .collect(),
        Some(_) => {
            checker.push("$", IssueKind::InvalidType {
                field: "steps".into(),
                expected: "a list",
            });
            Vec::new()
        }
    };

    // Gates
    let gates = match root.get("gates") {
        None => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| checker.gate(i, item))
            .collect(),
        Some(_) => {
            checker.push("$", IssueKind::InvalidType {
                field: "gates".into(),
                expected: "a list",
            });
            Vec::new()
        }
    };

    checker.references(&steps, &gates);

    if !checker.issues.is_empty() {
        return Err(ValidationError {
            issues: checker.issues,
        });
    }

    let definition: WorkflowDefinition = serde_json::from_value(raw.clone()).map_err(|e| {
        ValidationError::single("$", IssueKind::InvalidValue {
            field: "document".into(),
            message: e.to_string(),
        })
    })?;

    if let Err(err) = ExecutionGraph::build(&definition) {
        let location = match &err {
            GraphError::Cycle { .. } => "steps".to_string(),
            GraphError::UnknownDependency { step, .. } | GraphError::UnknownArtifact { step, .. } => {
                format!("steps.{step}")
            }
        };
        return Err(ValidationError::single(location, IssueKind::Graph(err.to_string())));
    }

    Ok(ValidatedDefinition {
        definition,
        warnings: checker.warnings,
    })
}

/// Re-validate an already typed definition (used on resume).
pub fn revalidate(definition: &WorkflowDefinition) -> Result<ValidatedDefinition, ValidationError> {
    let raw = serde_json::to_value(definition).map_err(|e| {
        ValidationError::single("$", IssueKind::InvalidValue {
            field: "document".into(),
            message: e.to_string(),
        })
    })?;
    validate(&raw)
}

/// JSON Schema of the workflow document, for editor tooling.
pub fn schema_json() -> Value {
    let schema = schemars::schema_for!(WorkflowDefinition);
    serde_json::to_value(schema).unwrap_or(Value::Null)
}

/// Whether `id` is usable as a step, gate or workflow identifier.
pub fn is_valid_id(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

// ---------------------------------------------------------------------------
// Checker
// ---------------------------------------------------------------------------

/// Shallow, borrowed view of a step for cross-reference checks.
struct StepRefs<'a> {
    location: String,
    id: &'a str,
    requires: Vec<&'a str>,
    creates: Vec<&'a str>,
    consumes: Vec<&'a str>,
}

struct GateRefs<'a> {
    location: String,
    id: &'a str,
    after: &'a str,
    artifacts: Vec<&'a str>,
}

#[derive(Default)]
struct Checker {
    issues: Vec<ValidationIssue>,
    warnings: Vec<String>,
}

impl Checker {
    fn push(&mut self, location: impl Into<String>, kind: IssueKind) {
        self.issues.push(ValidationIssue {
            location: location.into(),
            kind,
        });
    }

    fn allow_list(&mut self, location: &str, object: &Map<String, Value>, allowed: &[&str]) {
        let unknown: Vec<String> = object
            .keys()
            .filter(|k| !allowed.contains(&k.as_str()))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            self.push(location, IssueKind::UnknownFields {
                fields: unknown,
                allowed: allowed.iter().map(|a| a.to_string()).collect(),
            });
        }
    }

    fn id(&mut self, location: &str, id: &str) {
        if !is_valid_id(id) {
            self.push(location, IssueKind::InvalidId { id: id.to_string() });
        }
    }

    fn required_str<'a>(
        &mut self,
        location: &str,
        object: &'a Map<String, Value>,
        field: &str,
    ) -> Option<&'a str> {
        match object.get(field) {
            None => {
                self.push(location, IssueKind::MissingField { field: field.into() });
                None
            }
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.as_str()),
            Some(_) => {
                self.push(location, IssueKind::InvalidType {
                    field: field.into(),
                    expected: "a non-empty string",
                });
                None
            }
        }
    }

    fn optional_str(&mut self, location: &str, object: &Map<String, Value>, field: &str) {
        if let Some(value) = object.get(field) {
            if !value.is_string() {
                self.push(location, IssueKind::InvalidType {
                    field: field.into(),
                    expected: "a string",
                });
            }
        }
    }

    fn optional_bool(&mut self, location: &str, object: &Map<String, Value>, field: &str) {
        if let Some(value) = object.get(field) {
            if !value.is_boolean() {
                self.push(location, IssueKind::InvalidType {
                    field: field.into(),
                    expected: "a boolean",
                });
            }
        }
    }

    fn optional_object<'a>(
        &mut self,
        location: &str,
        object: &'a Map<String, Value>,
        field: &str,
    ) -> Option<&'a Map<String, Value>> {
        match object.get(field) {
            None => None,
            Some(Value::Object(map)) => Some(map),
            Some(_) => {
                self.push(location, IssueKind::InvalidType {
                    field: field.into(),
                    expected: "a mapping",
                });
                None
            }
        }
    }

    fn positive_int(&mut self, location: &str, object: &Map<String, Value>, field: &str) {
        if let Some(value) = object.get(field) {
            match value.as_u64() {
                Some(n) if n > 0 => {}
                Some(_) => self.push(location, IssueKind::InvalidValue {
                    field: field.into(),
                    message: "must be greater than zero".into(),
                }),
                None => self.push(location, IssueKind::InvalidType {
                    field: field.into(),
                    expected: "a positive integer",
                }),
            }
        }
    }

    fn string_list<'a>(
        &mut self,
        location: &str,
        object: &'a Map<String, Value>,
        field: &str,
    ) -> Vec<&'a str> {
        match object.get(field) {
            None => Vec::new(),
            Some(Value::Array(items)) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match item.as_str() {
                        Some(s) => out.push(s),
                        None => {
                            self.push(location, IssueKind::InvalidType {
                                field: field.into(),
                                expected: "a list of strings",
                            });
                            return Vec::new();
                        }
                    }
                }
                out
            }
            Some(_) => {
                self.push(location, IssueKind::InvalidType {
                    field: field.into(),
                    expected: "a list of strings",
                });
                Vec::new()
            }
        }
    }

    fn settings(&mut self, settings: &Map<String, Value>) {
        self.allow_list("settings", settings, SETTINGS_FIELDS);
        for field in [
            "max_concurrency",
            "step_timeout_secs",
            "workflow_timeout_secs",
            "checkpoint_every",
            "checkpoint_interval_secs",
            "max_steps",
        ] {
            self.positive_int("settings", settings, field);
        }
        if let Some(retry) = self.optional_object("settings", settings, "retry") {
            self.retry("settings.retry", retry);
        }
    }

    fn retry(&mut self, location: &str, retry: &Map<String, Value>) {
        self.allow_list(location, retry, RETRY_FIELDS);
        self.positive_int(location, retry, "max_attempts");
        self.positive_int(location, retry, "max_delay_ms");
        if let Some(value) = retry.get("initial_delay_ms") {
            if value.as_u64().is_none() {
                self.push(location, IssueKind::InvalidType {
                    field: "initial_delay_ms".into(),
                    expected: "a non-negative integer",
                });
            }
        }
        self.optional_bool(location, retry, "jitter");
        if let Some(value) = retry.get("backoff") {
            match value.as_str() {
                Some(s) if BACKOFF_STRATEGIES.contains(&s) => {}
                _ => self.push(location, IssueKind::InvalidValue {
                    field: "backoff".into(),
                    message: format!("must be one of {}", BACKOFF_STRATEGIES.join(", ")),
                }),
            }
        }
        // Delays are capped at `max_delay_ms`, so `initial_delay_ms` may exceed it.
    }

    fn step<'a>(&mut self, index: usize, item: &'a Value) -> Option<StepRefs<'a>> {
        let mut location = format!("steps[{index}]");
        let Some(step) = item.as_object() else {
            self.push(location, IssueKind::InvalidType {
                field: "step".into(),
                expected: "a mapping",
            });
            return None;
        };
        if let Some(Value::String(id)) = step.get("id") {
            location = format!("steps[{index}] ({id})");
        }

        self.allow_list(&location, step, STEP_FIELDS);
        let id = self.required_str(&location, step, "id");
        if let Some(id) = id {
            self.id(&location, id);
        }
        self.required_str(&location, step, "agent");
        self.required_str(&location, step, "action");
        self.optional_str(&location, step, "description");
        self.optional_object(&location, step, "inputs");
        self.optional_bool(&location, step, "optional");
        self.positive_int(&location, step, "timeout_secs");
        if let Some(retry) = self.optional_object(&location, step, "retry") {
            self.retry(&format!("{location}.retry"), retry);
        }
        let requires = self.string_list(&location, step, "requires");
        let creates = self.string_list(&location, step, "creates");
        let consumes = self.string_list(&location, step, "consumes");
        for artifact in creates.iter().chain(consumes.iter()) {
            self.id(&location, artifact);
        }

        Some(StepRefs {
            location,
            id: id?,
            requires,
            creates,
            consumes,
        })
    }

    fn gate<'a>(&mut self, index: usize, item: &'a Value) -> Option<GateRefs<'a>> {
        let location = format!("gates[{index}]");
        let Some(gate) = item.as_object() else {
            self.push(location, IssueKind::InvalidType {
                field: "gate".into(),
                expected: "a mapping",
            });
            return None;
        };
        self.allow_list(&location, gate, GATE_FIELDS);
        let id = self.required_str(&location, gate, "id");
        if let Some(id) = id {
            self.id(&location, id);
        }
        let after = self.required_str(&location, gate, "after");
        self.optional_bool(&location, gate, "blocking");
        self.optional_str(&location, gate, "description");
        let artifacts = self.string_list(&location, gate, "artifacts");
        Some(GateRefs {
            location,
            id: id?,
            after: after?,
            artifacts,
        })
    }

    fn references(&mut self, steps: &[StepRefs<'_>], gates: &[GateRefs<'_>]) {
        let mut seen = BTreeSet::new();
        for step in steps {
            if !seen.insert(step.id) {
                self.push(step.location.clone(), IssueKind::DuplicateStep {
                    id: step.id.to_string(),
                });
            }
        }

        let mut producers: HashMap<&str, Vec<&str>> = HashMap::new();
        for step in steps {
            for artifact in &step.creates {
                producers.entry(*artifact).or_default().push(step.id);
            }
        }
        let mut duplicated: Vec<_> = producers
            .iter()
            .filter(|(_, steps)| steps.len() > 1)
            .collect();
        duplicated.sort_by_key(|(artifact, _)| **artifact);
        for (artifact, owners) in duplicated {
            self.push("steps", IssueKind::DuplicateProducer {
                artifact: artifact.to_string(),
                steps: owners.iter().map(|s| s.to_string()).collect(),
            });
        }

        for step in steps {
            for dep in &step.requires {
                if *dep == step.id {
                    self.push(step.location.clone(), IssueKind::SelfReference {
                        step: step.id.to_string(),
                    });
                } else if !seen.contains(dep) {
                    self.push(step.location.clone(), IssueKind::UnknownDependency {
                        step: step.id.to_string(),
                        missing: dep.to_string(),
                    });
                }
            }
            for artifact in &step.consumes {
                if !producers.contains_key(artifact) {
                    self.push(step.location.clone(), IssueKind::UnknownArtifact {
                        owner: step.id.to_string(),
                        artifact: artifact.to_string(),
                    });
                }
            }
        }

        let mut gate_ids = BTreeSet::new();
        for gate in gates {
            if !gate_ids.insert(gate.id) {
                self.push(gate.location.clone(), IssueKind::DuplicateGate {
                    id: gate.id.to_string(),
                });
            }
            if !seen.contains(gate.after) {
                self.push(gate.location.clone(), IssueKind::UnknownGateStep {
                    gate: gate.id.to_string(),
                    step: gate.after.to_string(),
                });
            }
            for artifact in &gate.artifacts {
                if !producers.contains_key(artifact) {
                    self.push(gate.location.clone(), IssueKind::UnknownArtifact {
                        owner: gate.id.to_string(),
                        artifact: artifact.to_string(),
                    });
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal() -> Value {
        json!({
            "schema_version": "1.1",
            "id": "pipeline",
            "steps": [
                { "id": "a", "agent": "x", "action": "run" },
                { "id": "b", "agent": "x", "action": "run" },
                { "id": "c", "agent": "y", "action": "run", "requires": ["a", "b"] }
            ]
        })
    }

    fn kinds(err: &ValidationError) -> Vec<&IssueKind> {
        err.issues.iter().map(|i| &i.kind).collect()
    }

    #[test]
    fn valid_document_passes() {
        let validated = validate(&minimal()).unwrap();
        assert_eq!(validated.definition.steps.len(), 3);
        assert!(validated.warnings.is_empty());
    }

    #[test]
    fn unsupported_version_names_supported_set() {
        let mut doc = minimal();
        doc["schema_version"] = json!("2.0");
        let err = validate(&doc).unwrap_err();
        assert!(matches!(
            &err.issues[0].kind,
            IssueKind::UnsupportedVersion { found, supported } if found == "2.0" && supported.len() == 2
        ));
    }

    #[test]
    fn missing_version_rejected() {
        let mut doc = minimal();
        doc.as_object_mut().unwrap().remove("schema_version");
        let err = validate(&doc).unwrap_err();
        assert!(matches!(err.issues[0].kind, IssueKind::MissingVersion { .. }));
    }

    #[test]
    fn unknown_fields_report_offending_and_allowed_sets() {
        let mut doc = minimal();
        doc["owner"] = json!("me");
        doc["steps"][0]["depends_on"] = json!(["b"]);
        doc["settings"] = json!({ "parallelism": 4 });
        let err = validate(&doc).unwrap_err();
        assert_eq!(err.issues.len(), 3, "{err}");

        let step_issue = err
            .issues
            .iter()
            .find(|i| i.location.starts_with("steps[0]"))
            .unwrap();
        match &step_issue.kind {
            IssueKind::UnknownFields { fields, allowed } => {
                assert_eq!(fields, &vec!["depends_on".to_string()]);
                assert!(allowed.contains(&"requires".to_string()));
            }
            other => panic!("unexpected issue: {other:?}"),
        }
        assert!(err.to_string().contains("`parallelism`"));
    }

    #[test]
    fn unknown_requires_names_missing_step() {
        let mut doc = minimal();
        doc["steps"][2]["requires"] = json!(["a", "Z"]);
        let err = validate(&doc).unwrap_err();
        assert!(kinds(&err).iter().any(|k| matches!(
            k,
            IssueKind::UnknownDependency { step, missing } if step == "c" && missing == "Z"
        )));
        assert!(err.to_string().contains("'Z'"));
    }

    #[test]
    fn duplicate_ids_and_self_reference() {
        let doc = json!({
            "schema_version": "1.1",
            "id": "dup",
            "steps": [
                { "id": "a", "agent": "x", "action": "run", "requires": ["a"] },
                { "id": "a", "agent": "x", "action": "run" }
            ]
        });
        let err = validate(&doc).unwrap_err();
        let kinds = kinds(&err);
        assert!(kinds.iter().any(|k| matches!(k, IssueKind::DuplicateStep { id } if id == "a")));
        assert!(kinds.iter().any(|k| matches!(k, IssueKind::SelfReference { step } if step == "a")));
    }

    #[test]
    fn cycle_rejected_at_validation() {
        let doc = json!({
            "schema_version": "1.1",
            "id": "loop",
            "steps": [
                { "id": "a", "agent": "x", "action": "run", "requires": ["c"] },
                { "id": "b", "agent": "x", "action": "run", "requires": ["a"] },
                { "id": "c", "agent": "x", "action": "run", "requires": ["b"] },
                { "id": "d", "agent": "x", "action": "run", "requires": ["c"] }
            ]
        });
        let err = validate(&doc).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("cycle"), "{text}");
        assert!(text.contains("'d'"), "unreachable step should be named: {text}");
    }

    #[test]
    fn artifact_references_checked() {
        let doc = json!({
            "schema_version": "1.1",
            "id": "artifacts",
            "steps": [
                { "id": "a", "agent": "x", "action": "run", "creates": ["report"] },
                { "id": "b", "agent": "x", "action": "run", "creates": ["report"] },
                { "id": "c", "agent": "x", "action": "run", "consumes": ["summary"] }
            ],
            "gates": [
                { "id": "g", "after": "nope", "artifacts": ["report"] }
            ]
        });
        let err = validate(&doc).unwrap_err();
        let kinds = kinds(&err);
        assert!(kinds.iter().any(|k| matches!(k, IssueKind::DuplicateProducer { artifact, .. } if artifact == "report")));
        assert!(kinds.iter().any(|k| matches!(k, IssueKind::UnknownArtifact { artifact, .. } if artifact == "summary")));
        assert!(kinds.iter().any(|k| matches!(k, IssueKind::UnknownGateStep { step, .. } if step == "nope")));
    }

    #[test]
    fn wrong_types_reported() {
        let mut doc = minimal();
        doc["steps"][0]["requires"] = json!("b");
        doc["settings"] = json!({ "max_concurrency": 0, "retry": { "backoff": "linear" } });
        let err = validate(&doc).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("a list of strings"), "{text}");
        assert!(text.contains("greater than zero"), "{text}");
        assert!(text.contains("fixed, exponential"), "{text}");
    }

    #[test]
    fn auto_detect_is_deprecated_in_1_0() {
        let mut doc = minimal();
        doc["schema_version"] = json!("1.0");
        doc["auto_detect"] = json!(true);
        let validated = validate(&doc).unwrap();
        assert_eq!(validated.warnings.len(), 1);
        assert!(validated.warnings[0].contains("auto_detect"));
        assert_eq!(validated.definition.auto_detect, Some(true));
    }

    #[test]
    fn auto_detect_is_unknown_in_1_1() {
        let mut doc = minimal();
        doc["auto_detect"] = json!(true);
        let err = validate(&doc).unwrap_err();
        assert!(matches!(
            &err.issues[0].kind,
            IssueKind::UnknownFields { fields, .. } if fields == &vec!["auto_detect".to_string()]
        ));
    }

    #[test]
    fn invalid_ids_rejected() {
        let mut doc = minimal();
        doc["id"] = json!("../escape");
        let err = validate(&doc).unwrap_err();
        assert!(matches!(err.issues[0].kind, IssueKind::InvalidId { .. }));
        assert!(is_valid_id("lint-report_v2.json"));
        assert!(!is_valid_id("-leading"));
        assert!(!is_valid_id(""));
    }

    #[test]
    fn revalidate_roundtrips_typed_definition() {
        let validated = validate(&minimal()).unwrap();
        assert!(revalidate(&validated.definition).is_ok());
    }

    #[test]
    fn partial_retry_override_survives_revalidation() {
        let mut doc = minimal();
        doc["settings"] = json!({ "retry": { "max_delay_ms": 100 } });
        doc["steps"][0]["retry"] = json!({ "max_delay_ms": 50, "backoff": "fixed" });

        let validated = validate(&doc).unwrap();
        let step_retry = validated.definition.steps[0].retry.as_ref().unwrap();
        assert_eq!(step_retry.initial_delay_ms, 1_000);
        assert_eq!(step_retry.max_delay_ms, 50);
        assert!(revalidate(&validated.definition).is_ok());
    }

    #[test]
    fn schema_json_describes_steps() {
        let schema = schema_json();
        assert!(schema.to_string().contains("requires"));
    }
}
