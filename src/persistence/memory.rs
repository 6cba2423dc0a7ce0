//! In-memory `Persistence` implementation, for tests and ephemeral runs.

use crate::core::{ExecutionStatus, Pipeline};
use crate::error::{CoreError, CoreResult};
use crate::persistence::{
    ExecutionLog, ExecutionLogEntry, ExecutionLogFilter, Persistence, PipelineStatusFilter,
    SchedulerJob, StoredPlugin,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct InMemoryPersistence {
    pipelines: RwLock<HashMap<String, Pipeline>>,
    jobs: RwLock<HashMap<String, SchedulerJob>>,
    logs: RwLock<HashMap<String, ExecutionLog>>,
    plugins: RwLock<HashMap<String, StoredPlugin>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Persistence for InMemoryPersistence {
    async fn create_pipeline(&self, pipeline: Pipeline) -> CoreResult<Pipeline> {
        let mut pipelines = self.pipelines.write().await;
        if pipelines.contains_key(&pipeline.id) {
            return Err(CoreError::Conflict(format!("pipeline '{}' already exists", pipeline.id)));
        }
        pipelines.insert(pipeline.id.clone(), pipeline.clone());
        Ok(pipeline)
    }

    async fn get_pipeline(&self, id: &str) -> CoreResult<Pipeline> {
        self.pipelines
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("pipeline", id))
    }

    async fn list_pipelines(&self, filter: PipelineStatusFilter) -> CoreResult<Vec<Pipeline>> {
        let pipelines = self.pipelines.read().await;
        Ok(pipelines
            .values()
            .filter(|p| match filter {
                PipelineStatusFilter::All => true,
                PipelineStatusFilter::Active => p.enabled,
                PipelineStatusFilter::Inactive => !p.enabled,
            })
            .cloned()
            .collect())
    }

    async fn update_pipeline(&self, pipeline: Pipeline) -> CoreResult<Pipeline> {
        let mut pipelines = self.pipelines.write().await;
        if !pipelines.contains_key(&pipeline.id) {
            return Err(CoreError::not_found("pipeline", pipeline.id.clone()));
        }
        pipelines.insert(pipeline.id.clone(), pipeline.clone());
        Ok(pipeline)
    }

    async fn delete_pipeline(&self, id: &str) -> CoreResult<()> {
        self.pipelines
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| CoreError::not_found("pipeline", id))
    }

    async fn save_job(&self, job: SchedulerJob) -> CoreResult<()> {
        self.jobs.write().await.insert(job.id.clone(), job);
        Ok(())
    }

    async fn list_jobs(&self) -> CoreResult<Vec<SchedulerJob>> {
        Ok(self.jobs.read().await.values().cloned().collect())
    }

    async fn delete_job(&self, id: &str) -> CoreResult<()> {
        self.jobs
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| CoreError::not_found("scheduler_job", id))
    }

    async fn set_job_enabled(&self, id: &str, enabled: bool) -> CoreResult<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(id).ok_or_else(|| CoreError::not_found("scheduler_job", id))?;
        job.enabled = enabled;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn create_log(&self, log: ExecutionLog) -> CoreResult<()> {
        self.logs.write().await.insert(log.id.clone(), log);
        Ok(())
    }

    async fn append_log_entry(&self, log_id: &str, entry: ExecutionLogEntry) -> CoreResult<()> {
        let mut logs = self.logs.write().await;
        let log = logs.get_mut(log_id).ok_or_else(|| CoreError::not_found("execution_log", log_id))?;
        log.entries.push(entry);
        Ok(())
    }

    async fn finalize_log(&self, id: &str, status: ExecutionStatus, ended_at: DateTime<Utc>) -> CoreResult<()> {
        let mut logs = self.logs.write().await;
        let log = logs.get_mut(id).ok_or_else(|| CoreError::not_found("execution_log", id))?;
        log.status = status;
        log.ended_at = Some(ended_at);
        Ok(())
    }

    async fn get_log(&self, id: &str) -> CoreResult<ExecutionLog> {
        self.logs
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("execution_log", id))
    }

    async fn list_logs(&self, filter: ExecutionLogFilter) -> CoreResult<Vec<ExecutionLog>> {
        let logs = self.logs.read().await;
        let mut matched: Vec<ExecutionLog> = logs
            .values()
            .filter(|log| {
                filter.job_id.as_deref().map(|id| log.job_id.as_deref() == Some(id)).unwrap_or(true)
                    && filter
                        .pipeline_id
                        .as_deref()
                        .map(|id| log.pipeline_id.as_deref() == Some(id))
                        .unwrap_or(true)
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        matched.truncate(filter.effective_limit());
        Ok(matched)
    }

    async fn upsert_plugin(&self, plugin: StoredPlugin) -> CoreResult<()> {
        self.plugins.write().await.insert(plugin.name.clone(), plugin);
        Ok(())
    }

    async fn list_plugins(&self) -> CoreResult<Vec<StoredPlugin>> {
        Ok(self.plugins.read().await.values().cloned().collect())
    }

    async fn delete_plugin(&self, name: &str) -> CoreResult<()> {
        self.plugins
            .write()
            .await
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| CoreError::not_found("plugin", name))
    }

    async fn set_plugin_enabled(&self, name: &str, enabled: bool) -> CoreResult<()> {
        let mut plugins = self.plugins.write().await;
        let plugin = plugins.get_mut(name).ok_or_else(|| CoreError::not_found("plugin", name))?;
        plugin.enabled = enabled;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PipelineMetadata;

    fn sample_pipeline(id: &str) -> Pipeline {
        Pipeline {
            id: id.to_string(),
            name: format!("pipeline-{id}"),
            version: 1,
            enabled: true,
            metadata: PipelineMetadata::new(None, Vec::new(), None),
            config: crate::core::PipelineConfig { name: id.to_string(), enabled: true, steps: Vec::new() },
        }
    }

    #[tokio::test]
    async fn create_then_get_roundtrips() {
        let store = InMemoryPersistence::new();
        store.create_pipeline(sample_pipeline("p1")).await.unwrap();
        let loaded = store.get_pipeline("p1").await.unwrap();
        assert_eq!(loaded.id, "p1");
    }

    #[tokio::test]
    async fn create_twice_conflicts() {
        let store = InMemoryPersistence::new();
        store.create_pipeline(sample_pipeline("p1")).await.unwrap();
        assert!(matches!(
            store.create_pipeline(sample_pipeline("p1")).await.unwrap_err(),
            CoreError::Conflict(_)
        ));
    }

    #[tokio::test]
    async fn list_logs_orders_descending_and_respects_limit() {
        let store = InMemoryPersistence::new();
        for i in 0..3 {
            let mut log = ExecutionLog::start(format!("log{i}"), None, Some("p1".to_string()));
            log.started_at = Utc::now() + chrono::Duration::seconds(i);
            store.create_log(log).await.unwrap();
        }
        let logs = store
            .list_logs(ExecutionLogFilter { pipeline_id: Some("p1".to_string()), limit: Some(2), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(logs.len(), 2);
        assert!(logs[0].started_at >= logs[1].started_at);
    }
}
