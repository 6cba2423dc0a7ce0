//! Persistence layer: the single source of truth for pipelines,
//! scheduler jobs, execution logs and stored plugin records.

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::InMemoryPersistence;
#[cfg(feature = "sqlite")]
pub use sqlite::SqlitePersistence;

use crate::core::{ExecutionStatus, Pipeline, PluginKind};
use crate::error::CoreResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Filter applied to `Persistence::list_pipelines`. `Active` means
/// `enabled = true`; `Inactive` covers soft-retired pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineStatusFilter {
    #[default]
    All,
    Active,
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Pipeline,
    Monitoring,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Pipeline => "pipeline",
            JobType::Monitoring => "monitoring",
        }
    }
}

impl std::str::FromStr for JobType {
    type Err = crate::error::CoreError;
    fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "pipeline" => Ok(JobType::Pipeline),
            "monitoring" => Ok(JobType::Monitoring),
            other => Err(crate::error::CoreError::validation(format!("unknown job_type '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerJob {
    pub id: String,
    pub name: String,
    pub job_type: JobType,
    /// Either the target pipeline id or the monitoring job id, depending
    /// on `job_type`.
    pub target_id: String,
    pub cron_expression: String,
    #[serde(default)]
    pub timezone: Option<String>,
    pub enabled: bool,
    #[serde(default)]
    pub next_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = crate::error::CoreError;
    fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(crate::error::CoreError::validation(format!("unknown log level '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default)]
    pub step_name: Option<String>,
    #[serde(default)]
    pub plugin_name: Option<String>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub id: String,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub pipeline_id: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub entries: Vec<ExecutionLogEntry>,
}

impl ExecutionLog {
    pub fn start(id: String, job_id: Option<String>, pipeline_id: Option<String>) -> Self {
        Self {
            id,
            job_id,
            pipeline_id,
            started_at: Utc::now(),
            ended_at: None,
            status: ExecutionStatus::Running,
            entries: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionLogFilter {
    pub job_id: Option<String>,
    pub pipeline_id: Option<String>,
    pub limit: Option<usize>,
}

pub const DEFAULT_LOG_LIMIT: usize = 50;
pub const MAX_LOG_LIMIT: usize = 1000;

impl ExecutionLogFilter {
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LOG_LIMIT).min(MAX_LOG_LIMIT)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredPlugin {
    pub name: String,
    pub kind: PluginKind,
    pub version: String,
    #[serde(default)]
    pub file_path: Option<String>,
    pub built_in: bool,
    pub enabled: bool,
    #[serde(default)]
    pub config: Option<serde_json::Value>,
    #[serde(default)]
    pub input_schema: Option<serde_json::Value>,
}

/// The full persistence contract (spec.md §4.1). Every write failure
/// surfaces as a `CoreError`; the store never retries internally.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn create_pipeline(&self, pipeline: Pipeline) -> CoreResult<Pipeline>;
    async fn get_pipeline(&self, id: &str) -> CoreResult<Pipeline>;
    async fn list_pipelines(&self, filter: PipelineStatusFilter) -> CoreResult<Vec<Pipeline>>;
    async fn update_pipeline(&self, pipeline: Pipeline) -> CoreResult<Pipeline>;
    async fn delete_pipeline(&self, id: &str) -> CoreResult<()>;

    async fn save_job(&self, job: SchedulerJob) -> CoreResult<()>;
    async fn list_jobs(&self) -> CoreResult<Vec<SchedulerJob>>;
    async fn delete_job(&self, id: &str) -> CoreResult<()>;
    async fn set_job_enabled(&self, id: &str, enabled: bool) -> CoreResult<()>;

    async fn create_log(&self, log: ExecutionLog) -> CoreResult<()>;
    async fn append_log_entry(&self, log_id: &str, entry: ExecutionLogEntry) -> CoreResult<()>;
    async fn finalize_log(&self, id: &str, status: ExecutionStatus, ended_at: DateTime<Utc>) -> CoreResult<()>;
    async fn get_log(&self, id: &str) -> CoreResult<ExecutionLog>;
    async fn list_logs(&self, filter: ExecutionLogFilter) -> CoreResult<Vec<ExecutionLog>>;

    async fn upsert_plugin(&self, plugin: StoredPlugin) -> CoreResult<()>;
    async fn list_plugins(&self) -> CoreResult<Vec<StoredPlugin>>;
    async fn delete_plugin(&self, name: &str) -> CoreResult<()>;
    async fn set_plugin_enabled(&self, name: &str, enabled: bool) -> CoreResult<()>;
}
