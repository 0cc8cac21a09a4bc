use std::sync::Arc;

use anyhow::Result;
use crew_config::ConfigWatcher;
use crew_core::Role;
use crew_orchestrator::OrchestratorRegistry;
use tokio_util::sync::CancellationToken;

/// Shared state behind both transports.
///
/// Owns the config watcher and the orchestrator registry; nothing here is
/// module-level or frozen at startup.
pub struct ServerState {
    role: Role,
    watcher: Arc<ConfigWatcher>,
    registry: OrchestratorRegistry,
    /// Cancelled on server shutdown; propagated into every child run.
    shutdown: CancellationToken,
}

impl ServerState {
    pub fn new(role: Role) -> Result<Self> {
        let watcher = Arc::new(ConfigWatcher::new()?);
        Ok(Self::with_watcher(role, watcher))
    }

    pub fn with_watcher(role: Role, watcher: Arc<ConfigWatcher>) -> Self {
        let registry = OrchestratorRegistry::new(role, watcher.clone());
        Self {
            role,
            watcher,
            registry,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn watcher(&self) -> &Arc<ConfigWatcher> {
        &self.watcher
    }

    pub fn registry(&self) -> &OrchestratorRegistry {
        &self.registry
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}
