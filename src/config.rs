//! Operator-tunable knobs, loaded from `.ralph/config.yaml`.
//!
//! Every field has a `#[serde(default)]` so a missing file, or a file missing
//! some keys, still produces a usable configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionMode {
    Pr,
    Merge,
}

impl Default for CompletionMode {
    fn default() -> Self {
        CompletionMode::Pr
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    pub grace_period_secs: u64,
    pub verification_timeout_secs: u64,
    pub poll_interval_secs: u64,
    pub iteration_cap: u32,
    pub completion_mode: CompletionMode,
    pub base_branch: String,
    pub agent_command: String,
    pub agent_args: Vec<String>,
    pub seed_dotfiles: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_retries: 5,
            retry_delay_secs: 5,
            grace_period_secs: 5,
            verification_timeout_secs: 60,
            poll_interval_secs: 30,
            iteration_cap: 30,
            completion_mode: CompletionMode::default(),
            base_branch: "main".to_string(),
            agent_command: "claude".to_string(),
            agent_args: Vec::new(),
            seed_dotfiles: vec![".env".to_string()],
        }
    }
}

impl Config {
    /// Loads configuration from `path`, falling back to defaults if the file
    /// does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::load(Path::new("/nonexistent/.ralph/config.yaml")).unwrap();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.completion_mode, CompletionMode::Pr);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "max_retries: 9\ncompletion_mode: merge\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.max_retries, 9);
        assert_eq!(config.completion_mode, CompletionMode::Merge);
        assert_eq!(config.iteration_cap, 30);
        assert_eq!(config.base_branch, "main");
    }
}
