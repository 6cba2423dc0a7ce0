//! Deployment-wide runtime configuration: the knobs spec.md's component
//! designs call out as "configurable per deployment" (step timeout
//! default, concurrency cap, log retention, database location).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn default_step_timeout_secs() -> u64 {
    60
}

fn default_max_concurrent_executions() -> usize {
    10
}

fn default_log_retention_days() -> u32 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_step_timeout_secs")]
    pub default_step_timeout_secs: u64,
    #[serde(default = "default_max_concurrent_executions")]
    pub max_concurrent_executions: usize,
    #[serde(default = "default_log_retention_days")]
    pub log_retention_days: u32,
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    #[serde(default)]
    pub vector_storage_path: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_step_timeout_secs: default_step_timeout_secs(),
            max_concurrent_executions: default_max_concurrent_executions(),
            log_retention_days: default_log_retention_days(),
            db_path: None,
            vector_storage_path: None,
        }
    }
}

impl RuntimeConfig {
    pub fn from_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }

    pub fn resolved_db_path(&self) -> PathBuf {
        self.db_path.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("mimir-aip")
                .join("mimir-aip.db")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_spec_values() {
        let config = RuntimeConfig::default();
        assert_eq!(config.default_step_timeout_secs, 60);
        assert_eq!(config.max_concurrent_executions, 10);
    }
}
