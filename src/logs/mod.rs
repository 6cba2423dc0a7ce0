//! Execution Log Store: append-only per-execution logs, filterable by
//! job or pipeline. A thin facade over `Persistence`'s log methods —
//! the interesting behaviour (ordering, limit clamping) lives there so
//! both the in-memory and SQLite backends share it.

use crate::core::ExecutionStatus;
use crate::error::CoreResult;
use crate::persistence::{ExecutionLog, ExecutionLogEntry, ExecutionLogFilter, LogLevel, Persistence, MAX_LOG_LIMIT};
use chrono::Utc;
use std::sync::Arc;

pub struct ExecutionLogStore {
    persistence: Arc<dyn Persistence>,
}

impl ExecutionLogStore {
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self { persistence }
    }

    pub async fn open(&self, id: String, job_id: Option<String>, pipeline_id: Option<String>) -> CoreResult<()> {
        self.persistence.create_log(ExecutionLog::start(id, job_id, pipeline_id)).await
    }

    pub async fn append(
        &self,
        log_id: &str,
        level: LogLevel,
        message: impl Into<String>,
        step_name: Option<String>,
        plugin_name: Option<String>,
        data: Option<serde_json::Value>,
    ) -> CoreResult<()> {
        self.persistence
            .append_log_entry(
                log_id,
                ExecutionLogEntry {
                    timestamp: Utc::now(),
                    level,
                    message: message.into(),
                    step_name,
                    plugin_name,
                    data,
                },
            )
            .await
    }

    pub async fn finalize(&self, id: &str, status: ExecutionStatus) -> CoreResult<()> {
        self.persistence.finalize_log(id, status, Utc::now()).await
    }

    pub async fn get(&self, id: &str) -> CoreResult<ExecutionLog> {
        self.persistence.get_log(id).await
    }

    pub async fn list(&self, filter: ExecutionLogFilter) -> CoreResult<Vec<ExecutionLog>> {
        self.persistence.list_logs(filter).await
    }

    /// Crash recovery for logs: any entry still `Running` with no
    /// `ended_at` was left behind by a process that died mid-execution.
    /// Marks it `Failed` with a `process_restart` reason so it doesn't
    /// linger as a phantom "still running" record forever.
    pub async fn sweep_incomplete(&self) -> CoreResult<usize> {
        let stale: Vec<ExecutionLog> = self
            .list(ExecutionLogFilter { limit: Some(MAX_LOG_LIMIT), ..Default::default() })
            .await?
            .into_iter()
            .filter(|log| log.status == ExecutionStatus::Running)
            .collect();

        for log in &stale {
            self.append(
                &log.id,
                LogLevel::Warn,
                "process restarted before this execution finished (process_restart)",
                None,
                None,
                None,
            )
            .await?;
            self.finalize(&log.id, ExecutionStatus::Failed).await?;
        }
        Ok(stale.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryPersistence;

    #[tokio::test]
    async fn open_append_finalize_roundtrips() {
        let store = ExecutionLogStore::new(Arc::new(InMemoryPersistence::new()));
        store.open("log1".to_string(), None, Some("p1".to_string())).await.unwrap();
        store.append("log1", LogLevel::Info, "started", None, None, None).await.unwrap();
        store.finalize("log1", ExecutionStatus::Success).await.unwrap();

        let log = store.get("log1").await.unwrap();
        assert_eq!(log.status, ExecutionStatus::Success);
        assert!(log.ended_at.is_some());
        assert_eq!(log.entries.len(), 1);
    }

    #[tokio::test]
    async fn sweep_marks_dangling_running_logs_failed() {
        let store = ExecutionLogStore::new(Arc::new(InMemoryPersistence::new()));
        store.open("running".to_string(), None, None).await.unwrap();
        store.open("done".to_string(), None, None).await.unwrap();
        store.finalize("done", ExecutionStatus::Success).await.unwrap();

        let swept = store.sweep_incomplete().await.unwrap();
        assert_eq!(swept, 1);

        let running = store.get("running").await.unwrap();
        assert_eq!(running.status, ExecutionStatus::Failed);
        assert!(running.ended_at.is_some());
        assert!(running.entries.iter().any(|e| e.message.contains("process_restart")));

        let done = store.get("done").await.unwrap();
        assert_eq!(done.status, ExecutionStatus::Success);
    }
}
