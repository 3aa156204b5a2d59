//! Capability registry: explicit `(agent, action)` lookup populated at
//! startup.

use std::collections::HashMap;
use std::sync::Arc;

use conductor_types::workflow::WorkflowDefinition;

use super::box_capability::BoxCapability;

/// Action wildcard matching any action of an agent.
pub const ANY_ACTION: &str = "*";

/// Registry of capabilities keyed by agent and action.
///
/// An exact `(agent, action)` registration wins over `(agent, "*")`.
#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    capabilities: HashMap<(String, String), Arc<BoxCapability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability for one action. Replaces an existing entry.
    pub fn register(
        &mut self,
        agent: impl Into<String>,
        action: impl Into<String>,
        capability: BoxCapability,
    ) {
        self.capabilities
            .insert((agent.into(), action.into()), Arc::new(capability));
    }

    /// Register a capability for every action of `agent`.
    pub fn register_agent(&mut self, agent: impl Into<String>, capability: BoxCapability) {
        self.register(agent, ANY_ACTION, capability);
    }

    pub fn resolve(&self, agent: &str, action: &str) -> Option<Arc<BoxCapability>> {
        self.capabilities
            .get(&(agent.to_string(), action.to_string()))
            .or_else(|| {
                self.capabilities
                    .get(&(agent.to_string(), ANY_ACTION.to_string()))
            })
            .cloned()
    }

    /// Steps whose `(agent, action)` has no registration, as
    /// `(step_id, agent, action)` in declaration order.
    pub fn missing_for(&self, definition: &WorkflowDefinition) -> Vec<(String, String, String)> {
        definition
            .steps
            .iter()
            .filter(|s| self.resolve(&s.agent, &s.action).is_none())
            .map(|s| (s.id.clone(), s.agent.clone(), s.action.clone()))
            .collect()
    }

    /// Registered `agent/action` names, sorted.
    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .capabilities
            .keys()
            .map(|(agent, action)| format!("{agent}/{action}"))
            .collect();
        names.sort();
        names
    }
}
