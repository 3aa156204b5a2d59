//! Application state wiring concrete infrastructure into core services.
//!
//! The executor is generic over the store; `AppState` pins it to
//! [`AnyStateStore`] so the CLI only deals with concrete types.

use std::path::Path;
use std::sync::Arc;

use conductor_core::event::EventBus;
use conductor_core::workflow::checkpoint::CheckpointManager;
use conductor_core::workflow::executor::DagExecutor;
use conductor_infra::capability::build_registry;
use conductor_infra::crypto::Sha256ContentHasher;
use conductor_infra::store::AnyStateStore;
use conductor_types::config::EngineConfig;

/// Concrete executor type used by the CLI.
pub type ConcreteExecutor = DagExecutor<AnyStateStore>;

/// Shared services for commands that touch workflow state.
pub struct AppState {
    pub executor: Arc<ConcreteExecutor>,
    /// Live events from the executor, for progress output.
    pub events: EventBus,
}

impl AppState {
    /// Open the configured store and assemble the executor.
    pub async fn init(data_dir: &Path, config: &EngineConfig) -> anyhow::Result<Self> {
        let store = AnyStateStore::open(data_dir, &config.store).await?;
        tracing::debug!(
            data_dir = %data_dir.display(),
            backend = ?store.backend(),
            "state store opened"
        );

        let events = EventBus::default();
        let checkpoints = CheckpointManager::new(Arc::new(store), Arc::new(Sha256ContentHasher::new()))
            .with_event_bus(events.clone());
        let registry = Arc::new(build_registry(config));
        tracing::debug!(agents = ?registry.list_names(), "capabilities registered");

        let executor = Arc::new(DagExecutor::new(checkpoints, registry, config));

        Ok(Self { executor, events })
    }

    /// The durable store behind the executor.
    pub fn store(&self) -> &Arc<AnyStateStore> {
        self.executor.checkpoints().store()
    }
}
