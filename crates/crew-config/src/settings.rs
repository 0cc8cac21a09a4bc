use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use crew_core::{Role, TaskType};
use tracing::warn;

use crate::env_file::parse_env_file;

/// Web-search backend for the researcher role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SearchProvider {
    #[default]
    DuckDuckGo,
    Serper,
    Perplexity,
}

impl std::str::FromStr for SearchProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "duckduckgo" => Ok(Self::DuckDuckGo),
            "serper" => Ok(Self::Serper),
            "perplexity" => Ok(Self::Perplexity),
            other => Err(format!(
                "Unknown search provider '{other}'. Valid: duckduckgo, serper, perplexity"
            )),
        }
    }
}

/// Cost/quality tie-break when no explicit model is configured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ModelPreference {
    Cost,
    #[default]
    Quality,
}

/// Merged view of the env file and the process environment (env wins).
///
/// Plain data: cheap to clone, no interior mutability. Pick up config edits
/// by loading a fresh value (see [`crate::ConfigWatcher`]).
#[derive(Debug, Clone, Default)]
pub struct Settings {
    values: HashMap<String, String>,
    env_file: Option<PathBuf>,
}

impl Settings {
    /// Load from the default env file (`~/.crew.env`, overridable via
    /// `CREW_ENV_FILE`) overlaid with the process environment.
    pub fn load() -> Result<Self> {
        Self::load_from(default_env_file())
    }

    /// Load from an explicit env file path. A missing file is not an error;
    /// the settings are then environment-only.
    pub fn load_from(env_file: Option<PathBuf>) -> Result<Self> {
        let mut values = HashMap::new();

        if let Some(path) = env_file.as_deref()
            && path.exists()
        {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read env file {}", path.display()))?;
            values.extend(parse_env_file(&content));
        }

        for (key, value) in std::env::vars() {
            values.insert(key, value);
        }

        Ok(Self { values, env_file })
    }

    /// Build directly from key/value pairs (tests, embedding).
    pub fn from_values(values: HashMap<String, String>) -> Self {
        Self {
            values,
            env_file: None,
        }
    }

    pub fn env_file(&self) -> Option<&Path> {
        self.env_file.as_deref()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Child CLI executable, name or path. Defaults to `claude`.
    pub fn code_bin(&self) -> String {
        self.get("CODE_BIN").unwrap_or("claude").to_string()
    }

    /// Model for a role: `MODEL_<ROLE>` first, then the global `MODEL`.
    pub fn model_for(&self, role: Role) -> Option<String> {
        self.get(&format!("MODEL_{}", role.env_key()))
            .or_else(|| self.get("MODEL"))
            .map(str::to_string)
    }

    pub fn search_provider(&self) -> SearchProvider {
        match self.get("SEARCH_PROVIDER") {
            Some(raw) => raw.parse().unwrap_or_else(|e: String| {
                warn!("{e}; falling back to duckduckgo");
                SearchProvider::default()
            }),
            None => SearchProvider::default(),
        }
    }

    /// TCP port for a role daemon: `<ROLE>_PORT` or the role default.
    pub fn port_for(&self, role: Role) -> u16 {
        match self.get(&format!("{}_PORT", role.env_key())) {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!(role = %role, value = raw, "invalid port value; using default");
                role.default_port()
            }),
            None => role.default_port(),
        }
    }

    /// Hard wall-clock cap in seconds for a task type.
    pub fn timeout_secs(&self, task_type: TaskType) -> u64 {
        self.parse_secs("TIMEOUT_SEC")
            .unwrap_or_else(|| task_type.default_max_secs())
    }

    /// Inactivity deadline in seconds for a task type.
    pub fn inactivity_secs(&self, task_type: TaskType) -> u64 {
        self.parse_secs("INACTIVITY_TIMEOUT_SEC")
            .unwrap_or_else(|| task_type.default_inactivity_secs())
    }

    /// `PREFER_COST` / `PREFER_QUALITY`, mutually exclusive; when both are
    /// set (or neither), quality wins.
    pub fn model_preference(&self) -> ModelPreference {
        let cost = self.get_bool("PREFER_COST");
        let quality = self.get_bool("PREFER_QUALITY");
        if cost && !quality {
            ModelPreference::Cost
        } else {
            ModelPreference::Quality
        }
    }

    /// Opaque provider keys handed through to child processes.
    ///
    /// Anything that looks like a credential (`*_API_KEY`, `*_TOKEN`) is
    /// forwarded verbatim; nothing else leaks into the child env.
    pub fn provider_env(&self) -> HashMap<String, String> {
        self.values
            .iter()
            .filter(|(key, _)| key.ends_with("_API_KEY") || key.ends_with("_TOKEN"))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn get_bool(&self, key: &str) -> bool {
        matches!(
            self.get(key).map(str::to_ascii_lowercase).as_deref(),
            Some("1") | Some("true") | Some("yes") | Some("on")
        )
    }

    fn parse_secs(&self, key: &str) -> Option<u64> {
        let raw = self.get(key)?;
        match raw.parse() {
            Ok(secs) => Some(secs),
            Err(_) => {
                warn!(key, value = raw, "invalid seconds value; using default");
                None
            }
        }
    }
}

/// `CREW_ENV_FILE` override, else `~/.crew.env`.
pub(crate) fn default_env_file() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CREW_ENV_FILE") {
        return Some(PathBuf::from(path));
    }
    directories::BaseDirs::new().map(|dirs| dirs.home_dir().join(".crew.env"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> Settings {
        Settings::from_values(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_code_bin_default() {
        assert_eq!(settings(&[]).code_bin(), "claude");
        assert_eq!(settings(&[("CODE_BIN", "aider")]).code_bin(), "aider");
    }

    #[test]
    fn test_model_role_override_beats_global() {
        let s = settings(&[("MODEL", "sonnet"), ("MODEL_CODER", "opus")]);
        assert_eq!(s.model_for(Role::Coder).as_deref(), Some("opus"));
        assert_eq!(s.model_for(Role::Researcher).as_deref(), Some("sonnet"));
    }

    #[test]
    fn test_model_absent_is_none() {
        assert_eq!(settings(&[]).model_for(Role::Coder), None);
    }

    #[test]
    fn test_port_for_role() {
        let s = settings(&[("CODER_PORT", "9000")]);
        assert_eq!(s.port_for(Role::Coder), 9000);
        assert_eq!(s.port_for(Role::Researcher), 8101);
    }

    #[test]
    fn test_invalid_port_falls_back_to_default() {
        let s = settings(&[("CODER_PORT", "not-a-port")]);
        assert_eq!(s.port_for(Role::Coder), 8100);
    }

    #[test]
    fn test_timeout_defaults_per_task_type() {
        let s = settings(&[]);
        assert_eq!(s.timeout_secs(TaskType::Quick), 300);
        assert_eq!(s.timeout_secs(TaskType::Sequential), 900);
        assert_eq!(s.timeout_secs(TaskType::Parallel), 1200);
        assert_eq!(s.inactivity_secs(TaskType::Quick), 60);
        assert_eq!(s.inactivity_secs(TaskType::Parallel), 120);
    }

    #[test]
    fn test_timeout_overrides_apply_to_all_task_types() {
        let s = settings(&[("TIMEOUT_SEC", "30"), ("INACTIVITY_TIMEOUT_SEC", "5")]);
        assert_eq!(s.timeout_secs(TaskType::Sequential), 30);
        assert_eq!(s.inactivity_secs(TaskType::Quick), 5);
    }

    #[test]
    fn test_model_preference_rules() {
        assert_eq!(settings(&[]).model_preference(), ModelPreference::Quality);
        assert_eq!(
            settings(&[("PREFER_COST", "true")]).model_preference(),
            ModelPreference::Cost
        );
        // Both set: tie breaks toward quality.
        assert_eq!(
            settings(&[("PREFER_COST", "1"), ("PREFER_QUALITY", "1")]).model_preference(),
            ModelPreference::Quality
        );
    }

    #[test]
    fn test_search_provider_parse() {
        assert_eq!(
            settings(&[("SEARCH_PROVIDER", "serper")]).search_provider(),
            SearchProvider::Serper
        );
        assert_eq!(
            settings(&[("SEARCH_PROVIDER", "bogus")]).search_provider(),
            SearchProvider::DuckDuckGo
        );
        assert_eq!(settings(&[]).search_provider(), SearchProvider::DuckDuckGo);
    }

    #[test]
    fn test_provider_env_filters_credentials() {
        let s = settings(&[
            ("OPENAI_API_KEY", "sk-x"),
            ("SERPER_TOKEN", "t"),
            ("MODEL", "sonnet"),
        ]);
        let env = s.provider_env();
        assert_eq!(env.len(), 2);
        assert!(env.contains_key("OPENAI_API_KEY"));
        assert!(env.contains_key("SERPER_TOKEN"));
        assert!(!env.contains_key("MODEL"));
    }

    #[test]
    fn test_load_from_missing_file_is_env_only() {
        let s = Settings::load_from(Some(PathBuf::from("/nonexistent/.crew.env"))).unwrap();
        // PATH comes from the process environment.
        assert!(s.get("PATH").is_some());
    }
}
