//! Pipeline domain model — the canonical, persisted definition of a
//! pipeline, as distinct from any single execution of it.

use crate::core::config::PipelineConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Descriptive metadata attached to a pipeline, separate from its step
/// graph so the two can be updated independently.
fn default_reentrant() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineMetadata {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub creator: Option<String>,
    /// When false, the Execution Engine enforces a single concurrent
    /// execution of this pipeline. Default is reentrant (true).
    #[serde(default = "default_reentrant")]
    pub reentrant: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineMetadata {
    pub fn new(description: Option<String>, tags: Vec<String>, creator: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            description,
            tags,
            creator,
            reentrant: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A canonical pipeline record as stored by the Pipeline Registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: String,
    pub name: String,
    pub version: u32,
    pub enabled: bool,
    pub metadata: PipelineMetadata,
    pub config: PipelineConfig,
}

impl Pipeline {
    pub fn step_count(&self) -> usize {
        self.config.steps.len()
    }
}
