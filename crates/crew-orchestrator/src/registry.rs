use std::sync::{Arc, Mutex};

use crew_config::ConfigWatcher;
use crew_core::Role;
use tracing::info;

use crate::orchestrator::Orchestrator;

/// Hands out the orchestrator for a role, rebuilt whenever the config's
/// (code_bin, model) pair changes. Constructed once at daemon startup;
/// nothing here is module-level state.
pub struct OrchestratorRegistry {
    role: Role,
    watcher: Arc<ConfigWatcher>,
    cached: Mutex<Option<CachedEntry>>,
}

struct CachedEntry {
    key: (String, Option<String>),
    orchestrator: Arc<Orchestrator>,
}

impl OrchestratorRegistry {
    pub fn new(role: Role, watcher: Arc<ConfigWatcher>) -> Self {
        Self {
            role,
            watcher,
            cached: Mutex::new(None),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Current orchestrator; cheap when the config is unchanged.
    pub fn orchestrator(&self) -> Arc<Orchestrator> {
        let settings = self.watcher.settings();
        let key = (settings.code_bin(), settings.model_for(self.role));

        let mut cached = self.cached.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = cached.as_ref()
            && entry.key == key
        {
            return entry.orchestrator.clone();
        }

        info!(
            role = %self.role,
            code_bin = %key.0,
            model = ?key.1,
            "building orchestrator for current config"
        );
        let orchestrator = Arc::new(Orchestrator::new(self.role, settings));
        *cached = Some(CachedEntry {
            key,
            orchestrator: orchestrator.clone(),
        });
        orchestrator
    }
}
