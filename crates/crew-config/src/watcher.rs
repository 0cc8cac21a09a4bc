use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::settings::{Settings, default_env_file};

/// Hands out the current [`Settings`], re-reading the env file whenever its
/// mtime changes. A daemon keeps one of these for its lifetime instead of a
/// frozen config snapshot.
#[derive(Debug)]
pub struct ConfigWatcher {
    env_file: Option<PathBuf>,
    state: Mutex<WatchState>,
}

#[derive(Debug)]
struct WatchState {
    mtime: Option<SystemTime>,
    settings: Arc<Settings>,
}

impl ConfigWatcher {
    pub fn new() -> Result<Self> {
        Self::with_env_file(default_env_file())
    }

    pub fn with_env_file(env_file: Option<PathBuf>) -> Result<Self> {
        let settings = Arc::new(Settings::load_from(env_file.clone())?);
        let mtime = env_file.as_deref().and_then(file_mtime);
        Ok(Self {
            env_file,
            state: Mutex::new(WatchState { mtime, settings }),
        })
    }

    /// Current settings; reloads first when the env file changed on disk.
    /// A reload failure keeps the previous settings and logs once.
    pub fn settings(&self) -> Arc<Settings> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let current_mtime = self.env_file.as_deref().and_then(file_mtime);

        if current_mtime != state.mtime {
            match Settings::load_from(self.env_file.clone()) {
                Ok(fresh) => {
                    info!(
                        env_file = ?self.env_file,
                        "config file changed on disk; reloaded settings"
                    );
                    state.settings = Arc::new(fresh);
                    state.mtime = current_mtime;
                }
                Err(e) => {
                    warn!(error = %e, "config reload failed; keeping previous settings");
                }
            }
        } else {
            debug!("config unchanged");
        }

        state.settings.clone()
    }
}

fn file_mtime(path: &std::path::Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
