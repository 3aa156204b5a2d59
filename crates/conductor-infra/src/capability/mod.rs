//! Reference capabilities and registry wiring.
//!
//! - `echo`: in-process, deterministic; for demos and tests
//! - `shell`: runs a configured command as a subprocess per attempt

pub mod echo;
pub mod shell;

use conductor_core::capability::{BoxCapability, CapabilityRegistry};
use conductor_types::config::EngineConfig;

pub use echo::EchoCapability;
pub use shell::ShellCapability;

/// Agent name the echo capability is registered under.
pub const ECHO_AGENT: &str = "echo";

/// Build the registry for a CLI run: `echo` plus every `[[agents]]` entry.
///
/// A configured agent named `echo` replaces the built-in one.
pub fn build_registry(config: &EngineConfig) -> CapabilityRegistry {
    let mut registry = CapabilityRegistry::new();
    registry.register_agent(ECHO_AGENT, BoxCapability::new(EchoCapability::new()));
    for agent in &config.agents {
        tracing::debug!(agent = %agent.name, command = ?agent.command, "registering shell agent");
        registry.register_agent(agent.name.clone(), BoxCapability::new(ShellCapability::new(agent.clone())));
    }
    registry
}
