//! Cron-driven scheduler (spec.md §4.6). Persistence is the single
//! source of truth for job state; in-memory timers are derived and
//! rebuilt from it on every startup, never the other way around.

use crate::error::{CoreError, CoreResult};
use crate::execution::engine::{ExecuteOptions, ExecutionEngine, ExecutionOutcome};
use crate::persistence::{JobType, Persistence, SchedulerJob};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Parses a 5-field standard cron expression. The `cron` crate expects a
/// leading seconds field, so a `0 ` is prepended before handing the
/// expression to it; validation still operates on the 5-field form the
/// caller supplied.
fn parse_schedule(expr: &str) -> CoreResult<Schedule> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(CoreError::validation(format!(
            "cron expression '{expr}' must have exactly 5 fields (minute hour day-of-month month day-of-week)"
        )));
    }
    let six_field = format!("0 {expr}");
    Schedule::from_str(&six_field)
        .map_err(|e| CoreError::validation(format!("invalid cron expression '{expr}': {e}")))
}

fn resolve_timezone(timezone: Option<&str>) -> CoreResult<Tz> {
    match timezone {
        None => Ok(chrono_tz::UTC),
        Some(name) => Tz::from_str(name).map_err(|_| CoreError::validation(format!("unknown timezone '{name}'"))),
    }
}

/// Next fire time strictly after `after`, per invariant §8 ("for every
/// scheduler job in state enabled, `next_run > now`").
fn compute_next_run(cron_expression: &str, timezone: Option<&str>, after: DateTime<Utc>) -> CoreResult<DateTime<Utc>> {
    let schedule = parse_schedule(cron_expression)?;
    let tz = resolve_timezone(timezone)?;
    let after_in_tz = after.with_timezone(&tz);
    let next = schedule
        .after(&after_in_tz)
        .next()
        .ok_or_else(|| CoreError::Fatal(format!("cron expression '{cron_expression}' produced no next run")))?;
    Ok(next.with_timezone(&Utc))
}

struct SchedulerState {
    /// Keyed by job id so iteration order is ascending — the tie-break
    /// rule for jobs that fire within the same tick.
    jobs: BTreeMap<String, SchedulerJob>,
    firing: HashSet<String>,
}

pub struct Scheduler {
    persistence: Arc<dyn Persistence>,
    engine: Arc<ExecutionEngine>,
    state: RwLock<SchedulerState>,
    cancel: CancellationToken,
    /// Handles for dispatched-but-not-yet-finished firings, each resolving
    /// to whether that run ended `Cancelled`. `shutdown`/`join_inflight`
    /// awaits these so the process never exits out from under a run its
    /// own shutdown signal interrupted (spec.md §6).
    inflight: tokio::sync::Mutex<Vec<tokio::task::JoinHandle<bool>>>,
}

impl Scheduler {
    /// Loads every job from persistence (crash recovery), recomputes
    /// `next_run` for enabled ones from the current wall clock, arms
    /// nothing yet — call `spawn` to start the tick loop.
    pub async fn load(persistence: Arc<dyn Persistence>, engine: Arc<ExecutionEngine>) -> CoreResult<Arc<Self>> {
        let now = Utc::now();
        let mut jobs = BTreeMap::new();
        for mut job in persistence.list_jobs().await? {
            if job.enabled {
                match compute_next_run(&job.cron_expression, job.timezone.as_deref(), now) {
                    Ok(next_run) => {
                        job.next_run = Some(next_run);
                        job.updated_at = now;
                        persistence.save_job(job.clone()).await?;
                    }
                    Err(e) => {
                        warn!(job = %job.id, error = %e, "disabling scheduler job with invalid cron expression on load");
                        job.enabled = false;
                        job.next_run = None;
                        persistence.save_job(job.clone()).await?;
                    }
                }
            }
            jobs.insert(job.id.clone(), job);
        }

        Ok(Arc::new(Self {
            persistence,
            engine,
            state: RwLock::new(SchedulerState { jobs, firing: HashSet::new() }),
            cancel: CancellationToken::new(),
            inflight: tokio::sync::Mutex::new(Vec::new()),
        }))
    }

    pub async fn create_job(&self, mut job: SchedulerJob) -> CoreResult<SchedulerJob> {
        parse_schedule(&job.cron_expression)?;
        {
            let state = self.state.read().await;
            if state.jobs.contains_key(&job.id) {
                return Err(CoreError::Conflict(format!("scheduler job '{}' already exists", job.id)));
            }
        }
        if job.enabled {
            job.next_run = Some(compute_next_run(&job.cron_expression, job.timezone.as_deref(), Utc::now())?);
        }
        self.persistence.save_job(job.clone()).await?;
        self.state.write().await.jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    pub async fn get(&self, id: &str) -> CoreResult<SchedulerJob> {
        self.state
            .read()
            .await
            .jobs
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("scheduler_job", id))
    }

    pub async fn list(&self) -> Vec<SchedulerJob> {
        self.state.read().await.jobs.values().cloned().collect()
    }

    /// `Enable(id)`: compute a fresh `next_run`, persist, arm.
    pub async fn enable(&self, id: &str) -> CoreResult<()> {
        let mut state = self.state.write().await;
        let job = state.jobs.get_mut(id).ok_or_else(|| CoreError::not_found("scheduler_job", id))?;
        job.enabled = true;
        job.next_run = Some(compute_next_run(&job.cron_expression, job.timezone.as_deref(), Utc::now())?);
        job.updated_at = Utc::now();
        self.persistence.save_job(job.clone()).await?;
        Ok(())
    }

    /// `Disable(id)`: disarm, persist.
    pub async fn disable(&self, id: &str) -> CoreResult<()> {
        let mut state = self.state.write().await;
        let job = state.jobs.get_mut(id).ok_or_else(|| CoreError::not_found("scheduler_job", id))?;
        job.enabled = false;
        job.next_run = None;
        job.updated_at = Utc::now();
        self.persistence.save_job(job.clone()).await?;
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> CoreResult<()> {
        self.persistence.delete_job(id).await?;
        self.state.write().await.jobs.remove(id);
        Ok(())
    }

    /// Runs the job's pipeline immediately, without consuming the
    /// scheduled slot: `last_run`/`next_run` are left untouched.
    pub async fn trigger(&self, id: &str) -> CoreResult<ExecutionOutcome> {
        let job = self.get(id).await?;
        if job.job_type != JobType::Pipeline {
            return Err(CoreError::Validation(format!(
                "scheduler job '{id}' is a monitoring job; only pipeline jobs can be triggered"
            )));
        }
        self.engine
            .execute(
                &job.target_id,
                ExecuteOptions { job_id: Some(job.id.clone()), allow_disabled: false, ..Default::default() },
                CancellationToken::new(),
            )
            .await
    }

    /// Disarms all timers; in-flight executions observe this via the
    /// child cancellation tokens handed to them.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Spawns the background tick loop. Every `tick_interval`, jobs due
    /// to fire are dispatched in ascending id order; `last_run` is
    /// persisted before the execution is launched so a crash mid-run
    /// does not double-fire the same slot (spec.md §4.6, §7).
    pub fn spawn(self: &Arc<Self>, tick_interval: Duration) -> tokio::task::JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick_interval);
            loop {
                tokio::select! {
                    _ = scheduler.cancel.cancelled() => {
                        info!("scheduler shutting down, disarming timers");
                        return;
                    }
                    _ = interval.tick() => {
                        scheduler.tick().await;
                    }
                }
            }
        })
    }

    async fn tick(self: &Arc<Self>) {
        let now = Utc::now();
        let ready: Vec<SchedulerJob> = {
            let state = self.state.read().await;
            state
                .jobs
                .values()
                .filter(|j| {
                    j.enabled
                        && j.job_type == JobType::Pipeline
                        && !state.firing.contains(&j.id)
                        && j.next_run.map(|nr| nr <= now).unwrap_or(false)
                })
                .cloned()
                .collect()
        };

        for job in ready {
            let mut state = self.state.write().await;
            state.firing.insert(job.id.clone());
            if let Some(stored) = state.jobs.get_mut(&job.id) {
                stored.last_run = Some(now);
            }
            drop(state);

            if let Err(e) = self.persistence.save_job(SchedulerJob { last_run: Some(now), ..job.clone() }).await {
                error!(job = %job.id, error = %e, "failed to persist last_run before firing");
            }

            let scheduler = self.clone();
            let job_id = job.id.clone();
            let handle = tokio::spawn(async move {
                let cancelled = scheduler.fire(job).await;
                let mut state = scheduler.state.write().await;
                state.firing.remove(&job_id);
                cancelled
            });
            self.inflight.lock().await.push(handle);
        }
    }

    /// Awaits every firing dispatched so far, pruning the handle list as
    /// it goes. Returns whether any of them ended in a forced
    /// `Cancelled` status — the signal a graceful shutdown uses to pick
    /// its exit code (spec.md §6).
    pub async fn join_inflight(&self) -> bool {
        let handles: Vec<_> = self.inflight.lock().await.drain(..).collect();
        let mut any_cancelled = false;
        for handle in handles {
            if let Ok(cancelled) = handle.await {
                any_cancelled |= cancelled;
            }
        }
        any_cancelled
    }

    async fn fire(self: &Arc<Self>, job: SchedulerJob) -> bool {
        info!(job = %job.id, pipeline = %job.target_id, "scheduler dispatching job");
        let cancel = self.cancel.child_token();
        let result = self
            .engine
            .execute(
                &job.target_id,
                ExecuteOptions { job_id: Some(job.id.clone()), allow_disabled: false, ..Default::default() },
                cancel,
            )
            .await;

        let cancelled = matches!(&result, Ok(outcome) if outcome.status == crate::core::ExecutionStatus::Cancelled);

        if let Err(e) = &result {
            error!(job = %job.id, error = %e, "scheduled pipeline execution did not run");
        }

        let next_run = match compute_next_run(&job.cron_expression, job.timezone.as_deref(), Utc::now()) {
            Ok(next) => Some(next),
            Err(e) => {
                error!(job = %job.id, error = %e, "disabling job after cron computation failed");
                None
            }
        };

        let mut state = self.state.write().await;
        if let Some(stored) = state.jobs.get_mut(&job.id) {
            stored.next_run = next_run;
            stored.enabled = next_run.is_some();
            stored.updated_at = Utc::now();
            let persisted = stored.clone();
            drop(state);
            if let Err(e) = self.persistence.save_job(persisted).await {
                error!(job = %job.id, error = %e, "failed to persist next_run after firing");
            }
        }
        cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{PipelineConfig, PipelineMetadata};
    use crate::logs::ExecutionLogStore;
    use crate::persistence::InMemoryPersistence;
    use crate::pipelines::PipelineRegistry;
    use crate::registry::PluginRegistry;

    async fn harness() -> (Arc<dyn Persistence>, Arc<ExecutionEngine>, String) {
        let persistence: Arc<dyn Persistence> = Arc::new(InMemoryPersistence::new());
        let plugins = Arc::new(PluginRegistry::with_builtins().await);
        let pipelines = Arc::new(PipelineRegistry::new(persistence.clone(), plugins.clone()));
        let logs = Arc::new(ExecutionLogStore::new(persistence.clone()));
        let engine = Arc::new(ExecutionEngine::new(pipelines.clone(), plugins, logs, Duration::from_secs(60), 10));

        let config = PipelineConfig::from_yaml(
            r#"
name: demo
enabled: true
steps:
  - name: s1
    plugin: Process.passthrough
    output: result
"#,
        )
        .unwrap();
        let pipeline = pipelines.create(PipelineMetadata::new(None, Vec::new(), None), config).await.unwrap();
        (persistence, engine, pipeline.id)
    }

    fn sample_job(id: &str, pipeline_id: &str, enabled: bool) -> SchedulerJob {
        let now = Utc::now();
        SchedulerJob {
            id: id.to_string(),
            name: id.to_string(),
            job_type: JobType::Pipeline,
            target_id: pipeline_id.to_string(),
            cron_expression: "*/1 * * * *".to_string(),
            timezone: None,
            enabled,
            next_run: None,
            last_run: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn create_job_rejects_bad_cron() {
        let (persistence, engine, pipeline_id) = harness().await;
        let scheduler = Scheduler::load(persistence, engine).await.unwrap();
        let mut job = sample_job("j1", &pipeline_id, true);
        job.cron_expression = "not a cron".to_string();
        assert!(scheduler.create_job(job).await.is_err());
    }

    #[tokio::test]
    async fn enabled_job_has_next_run_strictly_after_now() {
        let (persistence, engine, pipeline_id) = harness().await;
        let scheduler = Scheduler::load(persistence, engine).await.unwrap();
        let job = scheduler.create_job(sample_job("j1", &pipeline_id, true)).await.unwrap();
        assert!(job.next_run.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn enable_disable_enable_round_trips_to_enabled_with_fresh_next_run() {
        let (persistence, engine, pipeline_id) = harness().await;
        let scheduler = Scheduler::load(persistence, engine).await.unwrap();
        scheduler.create_job(sample_job("j1", &pipeline_id, true)).await.unwrap();

        scheduler.enable("j1").await.unwrap();
        scheduler.disable("j1").await.unwrap();
        scheduler.enable("j1").await.unwrap();

        let job = scheduler.get("j1").await.unwrap();
        assert!(job.enabled);
        assert!(job.next_run.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn load_recovers_jobs_and_recomputes_next_run_past_restart() {
        let (persistence, engine, pipeline_id) = harness().await;
        let mut stale = sample_job("j1", &pipeline_id, true);
        stale.next_run = Some(Utc::now() - chrono::Duration::hours(1));
        persistence.save_job(stale).await.unwrap();
        let mut stale2 = sample_job("j2", &pipeline_id, true);
        stale2.next_run = Some(Utc::now() - chrono::Duration::hours(2));
        persistence.save_job(stale2).await.unwrap();

        let scheduler = Scheduler::load(persistence, engine).await.unwrap();
        let jobs = scheduler.list().await;
        assert_eq!(jobs.len(), 2);
        for job in jobs {
            assert!(job.enabled);
            assert!(job.next_run.unwrap() > Utc::now());
        }
    }

    #[tokio::test]
    async fn trigger_runs_without_touching_last_run_or_next_run() {
        let (persistence, engine, pipeline_id) = harness().await;
        let scheduler = Scheduler::load(persistence, engine).await.unwrap();
        let job = scheduler.create_job(sample_job("j1", &pipeline_id, true)).await.unwrap();
        let next_run_before = job.next_run;

        let outcome = scheduler.trigger("j1").await.unwrap();
        assert_eq!(outcome.status, crate::core::ExecutionStatus::Success);

        let job = scheduler.get("j1").await.unwrap();
        assert_eq!(job.next_run, next_run_before);
        assert!(job.last_run.is_none());
    }

    #[test]
    fn parse_schedule_rejects_wrong_field_count() {
        assert!(parse_schedule("* * * *").is_err());
        assert!(parse_schedule("* * * * * *").is_err());
        assert!(parse_schedule("*/1 * * * *").is_ok());
    }

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
            _context: &crate::core::PluginContext,
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

    /// A shutdown that cancels the scheduler's token before a dispatched
    /// firing finishes must surface that run as `Cancelled`, and
    /// `join_inflight` must report it so the process can exit non-zero
    /// (spec.md §6).
    #[tokio::test]
    async fn fire_reports_cancelled_when_shutdown_races_execution() {
        let persistence: Arc<dyn Persistence> = Arc::new(InMemoryPersistence::new());
        let plugins = Arc::new(PluginRegistry::new());
        plugins.register(Arc::new(CancelAwarePlugin)).await;
        let pipelines = Arc::new(PipelineRegistry::new(persistence.clone(), plugins.clone()));
        let logs = Arc::new(ExecutionLogStore::new(persistence.clone()));
        let engine = Arc::new(ExecutionEngine::new(pipelines.clone(), plugins, logs, Duration::from_secs(60), 10));

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
        let pipeline = pipelines.create(PipelineMetadata::new(None, Vec::new(), None), config).await.unwrap();

        let scheduler = Scheduler::load(persistence, engine).await.unwrap();
        let job = sample_job("j1", &pipeline.id, true);
        scheduler.cancel.cancel();

        let cancelled = scheduler.fire(job).await;
        assert!(cancelled);
    }

    #[tokio::test]
    async fn join_inflight_drains_handles_and_reports_any_cancellation() {
        let (persistence, engine, pipeline_id) = harness().await;
        let scheduler = Scheduler::load(persistence, engine).await.unwrap();
        assert!(!scheduler.join_inflight().await);

        let job = scheduler.create_job(sample_job("j1", &pipeline_id, true)).await.unwrap();
        let scheduler_clone = scheduler.clone();
        let handle = tokio::spawn(async move { scheduler_clone.fire(job).await });
        scheduler.inflight.lock().await.push(handle);

        assert!(!scheduler.join_inflight().await);
        assert!(scheduler.inflight.lock().await.is_empty());
    }
}
