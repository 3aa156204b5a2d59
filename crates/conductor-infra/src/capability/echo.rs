//! In-process echo capability.
//!
//! Recognised inputs:
//! - `outputs`: list of artifact ids to emit; each value is
//!   `{"step", "attempt", "inputs"}`
//! - `fail_times`: fail the first N attempts
//! - `fail_category`: category of those failures (default
//!   `external_dependency`)
//! - `delay_ms`: sleep before answering; honours cancellation

use std::time::Duration;

use serde_json::{Value, json};

use conductor_core::capability::{Capability, CapabilityRequest};
use conductor_types::capability::CapabilityOutput;
use conductor_types::error::{CapabilityError, ErrorCategory};

const CONTROL_INPUTS: [&str; 4] = ["outputs", "fail_times", "fail_category", "delay_ms"];

#[derive(Debug, Default)]
pub struct EchoCapability;

impl EchoCapability {
    pub fn new() -> Self {
        Self
    }
}

impl Capability for EchoCapability {
    fn name(&self) -> &str {
        "echo"
    }

    async fn execute(&self, request: &CapabilityRequest) -> Result<CapabilityOutput, CapabilityError> {
        if let Some(delay) = request.inputs.get("delay_ms").and_then(Value::as_u64) {
            tokio::select! {
                _ = request.cancel.cancelled() => {
                    return Err(CapabilityError::execution("cancelled during delay", true));
                }
                _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
            }
        }

        let fail_times = request
            .inputs
            .get("fail_times")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        if u64::from(request.attempt) <= fail_times {
            let category = match request.inputs.get("fail_category") {
                Some(value) => serde_json::from_value::<ErrorCategory>(value.clone()).map_err(|_| {
                    CapabilityError::validation(format!("unknown fail_category {value}"))
                })?,
                None => ErrorCategory::ExternalDependency,
            };
            return Err(CapabilityError::new(
                category,
                format!("echo: scripted failure {} of {fail_times}", request.attempt),
            ));
        }

        let inputs: serde_json::Map<String, Value> = request
            .inputs
            .iter()
            .filter(|(k, _)| !CONTROL_INPUTS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut output = CapabilityOutput {
            summary: Some(format!("echoed {} input(s)", inputs.len())),
            ..CapabilityOutput::default()
        };
        let outputs = match request.inputs.get("outputs") {
            None => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(other) => {
                return Err(CapabilityError::validation(format!(
                    "echo: 'outputs' must be a list of artifact ids, got {other}"
                )));
            }
        };
        for item in outputs {
            let Some(id) = item.as_str() else {
                return Err(CapabilityError::validation(format!(
                    "echo: artifact id must be a string, got {item}"
                )));
            };
            output = output.with_artifact(
                id,
                json!({
                    "step": request.step_id,
                    "attempt": request.attempt,
                    "inputs": inputs,
                }),
            );
        }
        Ok(output)
    }
}
