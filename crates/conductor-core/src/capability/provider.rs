//! Capability trait definition.
//!
//! Every agent the engine can call implements `Capability`. Uses RPITIT so
//! implementations write plain `async` bodies; `BoxCapability` provides the
//! object-safe wrapper used by the registry.

use std::collections::BTreeMap;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use conductor_types::capability::CapabilityOutput;
use conductor_types::error::CapabilityError;

/// Everything a capability receives for one attempt of one step.
#[derive(Debug, Clone, Serialize)]
pub struct CapabilityRequest {
    pub workflow_id: String,
    pub step_id: String,
    pub agent: String,
    pub action: String,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Step inputs with templates resolved.
    pub inputs: BTreeMap<String, serde_json::Value>,
    /// Artifacts produced so far in this workflow.
    pub artifacts: BTreeMap<String, serde_json::Value>,
    pub variables: BTreeMap<String, serde_json::Value>,
    /// Fires when the step is cancelled (workflow timeout, pause, or a
    /// fatal sibling failure). Long-running work should watch it.
    #[serde(skip)]
    pub cancel: CancellationToken,
}

impl CapabilityRequest {
    /// Convenience accessor for a string input.
    pub fn input_str(&self, key: &str) -> Option<&str> {
        self.inputs.get(key).and_then(|v| v.as_str())
    }
}

/// An agent capability.
///
/// Implementations live in conductor-infra (`EchoCapability`,
/// `ShellCapability`) or in embedding applications.
pub trait Capability: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Perform one attempt of a step.
    fn execute(
        &self,
        request: &CapabilityRequest,
    ) -> impl std::future::Future<Output = Result<CapabilityOutput, CapabilityError>> + Send;
}
