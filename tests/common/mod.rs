//! Shared harness for the end-to-end scenario tests. Builds the same
//! stack `main.rs` wires together, backed by `InMemoryPersistence` so
//! each test is self-contained and fast.

use mimir_aip_core::execution::{ExecutionEngine, Scheduler};
use mimir_aip_core::logs::ExecutionLogStore;
use mimir_aip_core::persistence::InMemoryPersistence;
use mimir_aip_core::pipelines::PipelineRegistry;
use mimir_aip_core::registry::PluginRegistry;
use mimir_aip_core::{CoreResult, Persistence};
use std::sync::Arc;
use std::time::Duration;

pub struct Harness {
    pub persistence: Arc<dyn Persistence>,
    pub plugins: Arc<PluginRegistry>,
    pub pipelines: Arc<PipelineRegistry>,
    pub logs: Arc<ExecutionLogStore>,
    pub engine: Arc<ExecutionEngine>,
}

impl Harness {
    pub async fn new() -> Self {
        let persistence: Arc<dyn Persistence> = Arc::new(InMemoryPersistence::new());
        let plugins = Arc::new(PluginRegistry::with_builtins().await);
        let pipelines = Arc::new(PipelineRegistry::new(persistence.clone(), plugins.clone()));
        let logs = Arc::new(ExecutionLogStore::new(persistence.clone()));
        let engine = Arc::new(ExecutionEngine::new(
            pipelines.clone(),
            plugins.clone(),
            logs.clone(),
            Duration::from_secs(60),
            10,
        ));
        Self { persistence, plugins, pipelines, logs, engine }
    }

    pub async fn scheduler(&self) -> CoreResult<Arc<Scheduler>> {
        Scheduler::load(self.persistence.clone(), self.engine.clone()).await
    }
}

pub async fn write_csv(dir: &tempfile::TempDir, name: &str, content: &str) -> String {
    let path = dir.path().join(name);
    tokio::fs::write(&path, content).await.unwrap();
    path.to_str().unwrap().to_string()
}
