//! Execution Engine — runs a pipeline by resolving its steps in declared
//! order, dispatching each to the Plugin Registry, and folding the
//! resulting context forward (spec.md §4.5).

use crate::core::{ExecutionStatus, PluginContext};
use crate::error::{CoreError, CoreResult};
use crate::logs::ExecutionLogStore;
use crate::persistence::LogLevel;
use crate::pipelines::PipelineRegistry;
use crate::registry::PluginRegistry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// What one call to [`ExecutionEngine::execute`] produced. `status` is
/// `Failed`/`Cancelled` whenever a step aborted the run; the engine does
/// not propagate step-level failures as `Err` once a log has been
/// opened — the log and this outcome are the surface, matching the
/// engine's "record and surface, never silently recover" policy.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub log_id: String,
    pub status: ExecutionStatus,
    pub context: PluginContext,
}

/// Per-call execution parameters.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Scheduler job id this run belongs to, if any.
    pub job_id: Option<String>,
    /// Direct invocations may run a disabled pipeline; scheduled ones
    /// must not.
    pub allow_disabled: bool,
    /// Caller-supplied starting context (usually empty).
    pub initial_context: PluginContext,
}

/// Runs pipelines: resolves steps in declared order, dispatches to
/// plugins, propagates context, enforces timeouts, records logs.
///
/// A deployment-wide semaphore bounds concurrent pipeline executions; a
/// per-pipeline lock is additionally enforced for pipelines whose
/// metadata marks them non-reentrant (spec.md §4.5, default reentrant).
pub struct ExecutionEngine {
    pipelines: Arc<PipelineRegistry>,
    plugins: Arc<PluginRegistry>,
    logs: Arc<ExecutionLogStore>,
    default_step_timeout: Duration,
    concurrency: Arc<Semaphore>,
    reentrant_locks: AsyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ExecutionEngine {
    pub fn new(
        pipelines: Arc<PipelineRegistry>,
        plugins: Arc<PluginRegistry>,
        logs: Arc<ExecutionLogStore>,
        default_step_timeout: Duration,
        max_concurrent_executions: usize,
    ) -> Self {
        Self {
            pipelines,
            plugins,
            logs,
            default_step_timeout,
            concurrency: Arc::new(Semaphore::new(max_concurrent_executions.max(1))),
            reentrant_locks: AsyncMutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, pipeline_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.reentrant_locks.lock().await;
        locks
            .entry(pipeline_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Executes `pipeline_id` under `cancel`. Cancelling `cancel`
    /// externally aborts the run after the in-flight step completes; it
    /// never interrupts a plugin mid-call (plugins own their own I/O and
    /// must observe the scope passed to them).
    pub async fn execute(
        &self,
        pipeline_id: &str,
        options: ExecuteOptions,
        cancel: CancellationToken,
    ) -> CoreResult<ExecutionOutcome> {
        let _permit = self
            .concurrency
            .acquire()
            .await
            .map_err(|e| CoreError::Fatal(format!("execution semaphore closed: {e}")))?;

        let pipeline = self.pipelines.get(pipeline_id).await?;
        if !pipeline.enabled && !options.allow_disabled {
            return Err(CoreError::Conflict(format!(
                "pipeline '{pipeline_id}' is disabled"
            )));
        }

        let reentrant_guard = if pipeline.metadata.reentrant {
            None
        } else {
            let lock = self.lock_for(pipeline_id).await;
            match lock.try_lock_owned() {
                Ok(guard) => Some(guard),
                Err(_) => {
                    return Err(CoreError::Conflict(format!(
                        "pipeline '{pipeline_id}' is non-reentrant and already executing"
                    )))
                }
            }
        };

        let log_id = uuid::Uuid::new_v4().to_string();
        self.logs
            .open(log_id.clone(), options.job_id.clone(), Some(pipeline.id.clone()))
            .await?;
        self.logs
            .append(
                &log_id,
                LogLevel::Info,
                format!("starting pipeline '{}' ({} steps)", pipeline.name, pipeline.step_count()),
                None,
                None,
                None,
            )
            .await?;
        info!(pipeline = %pipeline.id, log = %log_id, "pipeline execution started");

        let mut context = options.initial_context;
        let mut status = ExecutionStatus::Success;

        for step_config in &pipeline.config.steps {
            if cancel.is_cancelled() {
                status = ExecutionStatus::Cancelled;
                self.logs
                    .append(
                        &log_id,
                        LogLevel::Warn,
                        "execution cancelled externally before next step",
                        Some(step_config.name.clone()),
                        None,
                        None,
                    )
                    .await?;
                break;
            }

            let step = step_config.clone().into_step()?;

            if let Some(input_name) = &step.input {
                let value = context.get(input_name).cloned().ok_or_else(|| {
                    CoreError::Validation(format!(
                        "step '{}': input '{input_name}' was never produced",
                        step.name
                    ))
                })?;
                context.set("_input", value);
            }

            let timeout_secs = step.timeout_secs.unwrap_or_else(|| self.default_step_timeout.as_secs());
            let timeout_duration = Duration::from_secs(timeout_secs.max(1));
            let started = std::time::Instant::now();

            let plugin = match self.plugins.resolve(&step.plugin).await {
                Ok(plugin) => plugin,
                Err(e) => {
                    context.remove("_input");
                    self.fail_entry(&log_id, &step.name, &step.plugin.to_string(), &e).await;
                    if step.continue_on_error {
                        warn!(step = %step.name, "plugin not found, continuing past step");
                        continue;
                    }
                    self.logs.finalize(&log_id, ExecutionStatus::Failed).await?;
                    return Ok(ExecutionOutcome { log_id, status: ExecutionStatus::Failed, context });
                }
            };

            let outcome = tokio::time::timeout(
                timeout_duration,
                plugin.execute(&step.config, &context, cancel.child_token()),
            )
            .await;

            context.remove("_input");

            match outcome {
                Ok(Ok(outcome)) => {
                    if let Some(output_name) = &step.output {
                        context.set(output_name.clone(), outcome.primary.clone());
                    }
                    context.merge(outcome.extra);
                    let elapsed = started.elapsed();
                    self.logs
                        .append(
                            &log_id,
                            LogLevel::Info,
                            format!("step '{}' completed in {:.3}s", step.name, elapsed.as_secs_f64()),
                            Some(step.name.clone()),
                            Some(step.plugin.to_string()),
                            None,
                        )
                        .await?;
                }
                Ok(Err(e)) => {
                    self.fail_entry(&log_id, &step.name, &step.plugin.to_string(), &e).await;
                    if matches!(e, CoreError::Cancelled(_)) {
                        error!(step = %step.name, "step observed cancellation, aborting pipeline");
                        self.logs.finalize(&log_id, ExecutionStatus::Cancelled).await?;
                        return Ok(ExecutionOutcome { log_id, status: ExecutionStatus::Cancelled, context });
                    }
                    if step.continue_on_error {
                        warn!(step = %step.name, error = %e, "step failed, continuing past step");
                        continue;
                    }
                    error!(step = %step.name, error = %e, "step failed, aborting pipeline");
                    self.logs.finalize(&log_id, ExecutionStatus::Failed).await?;
                    return Ok(ExecutionOutcome { log_id, status: ExecutionStatus::Failed, context });
                }
                Err(_elapsed) => {
                    let e = CoreError::Timeout { step: step.name.clone(), timeout_secs };
                    self.fail_entry(&log_id, &step.name, &step.plugin.to_string(), &e).await;
                    if step.continue_on_error {
                        warn!(step = %step.name, "step timed out, continuing past step");
                        continue;
                    }
                    error!(step = %step.name, "step timed out, aborting pipeline");
                    self.logs.finalize(&log_id, ExecutionStatus::Failed).await?;
                    return Ok(ExecutionOutcome { log_id, status: ExecutionStatus::Failed, context });
                }
            }
        }

        self.logs.finalize(&log_id, status).await?;
        info!(pipeline = %pipeline.id, log = %log_id, status = status.as_str(), "pipeline execution finished");
        drop(reentrant_guard);
        Ok(ExecutionOutcome { log_id, status, context })
    }

    async fn fail_entry(&self, log_id: &str, step_name: &str, plugin_name: &str, error: &CoreError) {
        let _ = self
            .logs
            .append(
                log_id,
                LogLevel::Error,
                error.to_string(),
                Some(step_name.to_string()),
                Some(plugin_name.to_string()),
                None,
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{PipelineConfig, PipelineMetadata};
    use crate::persistence::InMemoryPersistence;

    async fn engine() -> (ExecutionEngine, Arc<PipelineRegistry>, Arc<ExecutionLogStore>) {
        let persistence = Arc::new(InMemoryPersistence::new());
        let plugins = Arc::new(PluginRegistry::with_builtins().await);
        let pipelines = Arc::new(PipelineRegistry::new(persistence.clone(), plugins.clone()));
        let logs = Arc::new(ExecutionLogStore::new(persistence));
        let engine = ExecutionEngine::new(pipelines.clone(), plugins, logs.clone(), Duration::from_secs(60), 10);
        (engine, pipelines, logs)
    }

    fn csv_pipeline_config(path: &str) -> PipelineConfig {
        PipelineConfig::from_yaml(&format!(
            r#"
name: csv-ingest
enabled: true
steps:
  - name: s1
    plugin: Input.csv
    config:
      file_path: "{path}"
      has_headers: true
    output: rows
  - name: s2
    plugin: Process.passthrough
    input: rows
    output: forwarded
"#
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn runs_two_step_pipeline_to_success() {
        let (engine, pipelines, _logs) = engine().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.csv");
        tokio::fs::write(&path, "id,content\n1,hello\n").await.unwrap();

        let pipeline = pipelines
            .create(
                PipelineMetadata::new(None, Vec::new(), None),
                csv_pipeline_config(path.to_str().unwrap()),
            )
            .await
            .unwrap();

        let outcome = engine
            .execute(&pipeline.id, ExecuteOptions::default(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.status, ExecutionStatus::Success);
        assert!(outcome.context.get("forwarded").is_some());
    }

    #[tokio::test]
    async fn disabled_pipeline_rejected_unless_allowed() {
        let (engine, pipelines, _logs) = engine().await;
        let mut config = csv_pipeline_config("/tmp/does-not-matter.csv");
        config.enabled = false;
        let pipeline = pipelines
            .create(PipelineMetadata::new(None, Vec::new(), None), config)
            .await
            .unwrap();

        let err = engine
            .execute(&pipeline.id, ExecuteOptions::default(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn missing_input_step_timeout_zero_is_rejected_at_validation() {
        let err = PipelineConfig::from_yaml(
            r#"
name: bad
steps:
  - name: s1
    plugin: Input.csv
    timeout_secs: 0
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("timeout_secs"));
    }

    #[tokio::test]
    async fn step_timeout_fails_pipeline_without_setting_output() {
        struct SleepyPlugin;

        #[async_trait::async_trait]
        impl crate::registry::Plugin for SleepyPlugin {
            fn kind(&self) -> crate::core::PluginKind {
                crate::core::PluginKind::Process
            }
            fn name(&self) -> &str {
                "sleepy"
            }
            fn validate_config(&self, _config: &std::collections::BTreeMap<String, serde_json::Value>) -> Vec<String> {
                Vec::new()
            }
            async fn execute(
                &self,
                _config: &std::collections::BTreeMap<String, serde_json::Value>,
                _context: &PluginContext,
                _cancel: CancellationToken,
            ) -> CoreResult<crate::registry::PluginOutcome> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(crate::registry::PluginOutcome::new(crate::core::ContextValue::from("late")))
            }
        }

        let persistence = Arc::new(InMemoryPersistence::new());
        let plugins = Arc::new(PluginRegistry::new());
        plugins.register(Arc::new(SleepyPlugin)).await;
        let pipelines = Arc::new(PipelineRegistry::new(persistence.clone(), plugins.clone()));
        let logs = Arc::new(ExecutionLogStore::new(persistence));
        let engine = ExecutionEngine::new(pipelines.clone(), plugins, logs.clone(), Duration::from_secs(60), 10);

        let config = PipelineConfig::from_yaml(
            r#"
name: slow
steps:
  - name: s1
    plugin: Process.sleepy
    timeout_secs: 1
    output: result
"#,
        )
        .unwrap();
        let pipeline = pipelines
            .create(PipelineMetadata::new(None, Vec::new(), None), config)
            .await
            .unwrap();

        let outcome = engine
            .execute(&pipeline.id, ExecuteOptions::default(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.status, ExecutionStatus::Failed);
        assert!(outcome.context.get("result").is_none());

        let log = logs.get(&outcome.log_id).await.unwrap();
        assert!(log.entries.iter().any(|e| e.message.contains("timed out")));
    }

    #[tokio::test]
    async fn plugin_observed_cancellation_yields_cancelled_status() {
        struct CancelAwarePlugin;

        #[async_trait::async_trait]
        impl crate::registry::Plugin for CancelAwarePlugin {
            fn kind(&self) -> crate::core::PluginKind {
                crate::core::PluginKind::Process
            }
            fn name(&self) -> &str {
                "cancel_aware"
            }
            fn validate_config(&self, _config: &std::collections::BTreeMap<String, serde_json::Value>) -> Vec<String> {
                Vec::new()
            }
            async fn execute(
                &self,
                _config: &std::collections::BTreeMap<String, serde_json::Value>,
                _context: &PluginContext,
                cancel: CancellationToken,
            ) -> CoreResult<crate::registry::PluginOutcome> {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(5)) => {
                        Ok(crate::registry::PluginOutcome::new(crate::core::ContextValue::from("late")))
                    }
                    _ = cancel.cancelled() => {
                        Err(CoreError::Cancelled("step observed external cancellation".to_string()))
                    }
                }
            }
        }

        let persistence = Arc::new(InMemoryPersistence::new());
        let plugins = Arc::new(PluginRegistry::new());
        plugins.register(Arc::new(CancelAwarePlugin)).await;
        let pipelines = Arc::new(PipelineRegistry::new(persistence.clone(), plugins.clone()));
        let logs = Arc::new(ExecutionLogStore::new(persistence));
        let engine = ExecutionEngine::new(pipelines.clone(), plugins, logs.clone(), Duration::from_secs(60), 10);

        let config = PipelineConfig::from_yaml(
            r#"
name: cancellable
steps:
  - name: s1
    plugin: Process.cancel_aware
    timeout_secs: 30
    output: result
"#,
        )
        .unwrap();
        let pipeline = pipelines
            .create(PipelineMetadata::new(None, Vec::new(), None), config)
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            cancel_clone.cancel();
        });

        let outcome = engine.execute(&pipeline.id, ExecuteOptions::default(), cancel).await.unwrap();
        assert_eq!(outcome.status, ExecutionStatus::Cancelled);
        assert!(outcome.context.get("result").is_none());

        let log = logs.get(&outcome.log_id).await.unwrap();
        assert!(log.entries.iter().any(|e| e.message.contains("cancel")));
    }

    #[tokio::test]
    async fn empty_pipeline_succeeds_immediately() {
        let (engine, pipelines, logs) = engine().await;
        let config = PipelineConfig::from_yaml("name: empty\nsteps: []\n").unwrap();
        let pipeline = pipelines
            .create(PipelineMetadata::new(None, Vec::new(), None), config)
            .await
            .unwrap();

        let outcome = engine
            .execute(&pipeline.id, ExecuteOptions::default(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.status, ExecutionStatus::Success);
        let log = logs.get(&outcome.log_id).await.unwrap();
        assert_eq!(log.entries.len(), 1);
    }
}
