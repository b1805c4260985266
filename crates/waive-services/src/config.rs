//! User settings persisted as TOML under the platform config directory

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::analysis::DEFAULT_CACHE_CAPACITY;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct WaiveConfig {
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub agent: AgentConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ModelsConfig {
    /// Overrides `<data dir>/Waive/models`
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ToolsConfig {
    /// Extra manifest directories, scanned after the default one
    #[serde(default)]
    pub directories: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self { cache_capacity: DEFAULT_CACHE_CAPACITY }
    }
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AgentConfig {
    /// Apply ready plans without waiting for the user
    #[serde(default)]
    pub auto_apply: bool,
}

impl WaiveConfig {
    pub fn model_storage_dir(&self) -> PathBuf {
        self.models.storage_dir.clone().unwrap_or_else(default_model_storage_dir)
    }
}

pub fn default_model_storage_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Waive")
        .join("models")
}

pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("waive")
        .join("config.toml")
}

pub fn load_config() -> WaiveConfig {
    load_config_from(&config_path())
}

pub fn save_config(config: &WaiveConfig) {
    save_config_to(&config_path(), config);
}

/// Missing or unparseable files yield the defaults
pub fn load_config_from(path: &Path) -> WaiveConfig {
    let Ok(text) = std::fs::read_to_string(path) else {
        return WaiveConfig::default();
    };
    toml::from_str(&text).unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "Ignoring invalid config");
        WaiveConfig::default()
    })
}

pub fn save_config_to(path: &Path, config: &WaiveConfig) {
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let Ok(s) = toml::to_string_pretty(config) else { return };
    if let Err(e) = std::fs::write(path, s) {
        warn!(path = %path.display(), error = %e, "Failed to save config");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_and_invalid_files_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        assert_eq!(load_config_from(&path), WaiveConfig::default());

        std::fs::write(&path, "models = 12").unwrap();
        let config = load_config_from(&path);
        assert_eq!(config.analysis.cache_capacity, DEFAULT_CACHE_CAPACITY);
        assert!(!config.agent.auto_apply);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[agent]\nauto_apply = true\n").unwrap();
        let config = load_config_from(&path);
        assert!(config.agent.auto_apply);
        assert_eq!(config.analysis.cache_capacity, DEFAULT_CACHE_CAPACITY);
        assert_eq!(config.model_storage_dir(), default_model_storage_dir());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = WaiveConfig::default();
        config.models.storage_dir = Some(dir.path().join("models"));
        config.tools.directories.push(dir.path().join("tools"));
        config.analysis.cache_capacity = 8;
        save_config_to(&path, &config);
        assert_eq!(load_config_from(&path), config);
    }
}
