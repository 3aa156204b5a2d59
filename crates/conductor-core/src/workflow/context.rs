//! Step input resolution and artifact size limits.
//!
//! String values in a step's `inputs` may reference workflow data with
//! `{{ variables.<name> }}`, `{{ artifacts.<id> }}` and `{{ workflow.id }}`.
//! Unknown references are left as written.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use conductor_types::state::WorkflowState;

/// Maximum serialized size of a single artifact value (1 MB).
pub const MAX_ARTIFACT_SIZE: usize = 1_048_576;

/// Read-only view used to resolve templates.
pub struct TemplateContext<'a> {
    workflow_id: &'a str,
    variables: &'a BTreeMap<String, Value>,
    artifacts: BTreeMap<&'a str, &'a Value>,
}

impl<'a> TemplateContext<'a> {
    pub fn from_state(state: &'a WorkflowState) -> Self {
        Self {
            workflow_id: &state.workflow_id,
            variables: &state.variables,
            artifacts: state
                .artifacts
                .iter()
                .map(|(id, a)| (id.as_str(), &a.value))
                .collect(),
        }
    }

    fn lookup(&self, expr: &str) -> Option<Value> {
        if expr == "workflow.id" {
            return Some(Value::String(self.workflow_id.to_string()));
        }
        if let Some(name) = expr.strip_prefix("variables.") {
            return self.variables.get(name).cloned();
        }
        if let Some(id) = expr.strip_prefix("artifacts.") {
            return self.artifacts.get(id).map(|v| (*v).clone());
        }
        None
    }

    /// Resolve every string in `inputs`, descending into arrays and objects.
    pub fn resolve_inputs(&self, inputs: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
        inputs
            .iter()
            .map(|(k, v)| (k.clone(), self.resolve_value(v)))
            .collect()
    }

    pub fn resolve_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => self.resolve_string(s),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.resolve_value(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.resolve_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Resolve one string. A string that is exactly one template yields the
    /// referenced JSON value unchanged; otherwise references are spliced in
    /// as text.
    pub fn resolve_string(&self, template: &str) -> Value {
        if let Some(expr) = sole_template(template) {
            if let Some(value) = self.lookup(expr) {
                return value;
            }
        }

        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find("{{") {
            let Some(len) = rest[start..].find("}}") else {
                break;
            };
            let end = start + len + 2;
            let expr = rest[start + 2..start + len].trim();
            out.push_str(&rest[..start]);
            match self.lookup(expr) {
                Some(value) => out.push_str(&value_to_string(&value)),
                None => out.push_str(&rest[start..end]),
            }
            rest = &rest[end..];
        }
        out.push_str(rest);
        Value::String(out)
    }
}

/// The inner expression when `s` is a single `{{ ... }}` and nothing else.
fn sole_template(s: &str) -> Option<&str> {
    let inner = s.trim().strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner.trim())
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Replace oversized artifact values with a truncation marker.
pub fn cap_artifact(step_id: &str, artifact_id: &str, value: Value) -> Value {
    let size = serde_json::to_string(&value).map(|s| s.len()).unwrap_or(0);
    if size <= MAX_ARTIFACT_SIZE {
        return value;
    }
    tracing::warn!(
        step_id,
        artifact_id,
        size,
        max = MAX_ARTIFACT_SIZE,
        "artifact exceeds size limit, truncating"
    );
    json!({
        "_truncated": true,
        "_original_size": size,
        "_message": format!("artifact exceeded {MAX_ARTIFACT_SIZE} byte limit and was truncated"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_types::state::Artifact;

    fn state() -> WorkflowState {
        let mut state = WorkflowState::new("wf-42");
        state.variables.insert("target".into(), json!("src/"));
        state.variables.insert("depth".into(), json!(3));
        state.artifacts.insert(
            "lint-report".into(),
            Artifact {
                produced_by: "lint".into(),
                attempt: 1,
                value: json!({ "warnings": 2 }),
            },
        );
        state
    }

    #[test]
    fn sole_template_keeps_json_type() {
        let state = state();
        let ctx = TemplateContext::from_state(&state);
        assert_eq!(ctx.resolve_string("{{ variables.depth }}"), json!(3));
        assert_eq!(ctx.resolve_string("{{artifacts.lint-report}}"), json!({ "warnings": 2 }));
    }

    #[test]
    fn embedded_templates_are_spliced() {
        let state = state();
        let ctx = TemplateContext::from_state(&state);
        assert_eq!(
            ctx.resolve_string("run {{ workflow.id }} on {{ variables.target }} x{{ variables.depth }}"),
            json!("run wf-42 on src/ x3")
        );
    }

    #[test]
    fn unknown_references_left_as_written() {
        let state = state();
        let ctx = TemplateContext::from_state(&state);
        assert_eq!(ctx.resolve_string("{{ variables.nope }}"), json!("{{ variables.nope }}"));
        assert_eq!(ctx.resolve_string("a {{ steps.x }} b"), json!("a {{ steps.x }} b"));
        assert_eq!(ctx.resolve_string("open {{ never closed"), json!("open {{ never closed"));
    }

    #[test]
    fn resolves_nested_inputs() {
        let state = state();
        let ctx = TemplateContext::from_state(&state);
        let mut inputs = BTreeMap::new();
        inputs.insert("paths".into(), json!(["{{ variables.target }}", 7]));
        inputs.insert("opts".into(), json!({ "report": "{{ artifacts.lint-report }}" }));
        let resolved = ctx.resolve_inputs(&inputs);
        assert_eq!(resolved["paths"], json!(["src/", 7]));
        assert_eq!(resolved["opts"]["report"]["warnings"], 2);
    }

    #[test]
    fn oversized_artifact_truncated() {
        let big = Value::String("x".repeat(MAX_ARTIFACT_SIZE + 10));
        let capped = cap_artifact("s", "a", big);
        assert_eq!(capped["_truncated"], true);
        assert_eq!(cap_artifact("s", "a", json!(1)), json!(1));
    }
}
