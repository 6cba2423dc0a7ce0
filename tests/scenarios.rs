//! End-to-end scenario tests (spec.md §8) exercising the full stack —
//! pipeline registry, plugin registry, execution engine and scheduler —
//! wired together the same way `main.rs` wires them, instead of any one
//! component in isolation.

mod common;

use common::{write_csv, Harness};
use mimir_aip_core::core::{ExecutionStatus, PipelineConfig, PipelineMetadata};
use mimir_aip_core::execution::ExecuteOptions;
use mimir_aip_core::persistence::{JobType, SchedulerJob};
use tokio_util::sync::CancellationToken;

fn storage_pipeline_config(csv_path: &str) -> PipelineConfig {
    PipelineConfig::from_yaml(&format!(
        r#"
name: csv-ingest
enabled: true
steps:
  - name: s1
    plugin: Input.csv
    config:
      file_path: "{csv_path}"
      has_headers: true
    output: rows
  - name: s2
    plugin: Storage.vector
    config:
      operation: store
      collection: kb
    input: rows
    output: stored
"#
    ))
    .unwrap()
}

/// Scenario 1: two-step CSV ingest straight into the vector store — no
/// prior `create_collection` step, per the scenario as written. `store`
/// creates `kb` on first write, sized from the configured embedder.
#[tokio::test]
async fn csv_ingest_then_vector_query_roundtrips() {
    let harness = Harness::new().await;
    let dir = tempfile::tempdir().unwrap();
    let csv_path = write_csv(&dir, "a.csv", "id,content\n1,hello\n").await;

    let pipeline = harness
        .pipelines
        .create(PipelineMetadata::new(None, Vec::new(), None), storage_pipeline_config(&csv_path))
        .await
        .unwrap();

    let report = harness.pipelines.validate(&pipeline.id).await.unwrap();
    assert!(report.valid, "expected valid pipeline, got errors: {:?}", report.errors);

    let outcome = harness
        .engine
        .execute(&pipeline.id, ExecuteOptions::default(), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.status, ExecutionStatus::Success);

    let log = harness.logs.get(&outcome.log_id).await.unwrap();
    assert_eq!(log.status, ExecutionStatus::Success);
    assert!(log.ended_at.is_some());

    // Query the vector store directly (bypassing the pipeline definition)
    // the way the spec's round-trip law requires: Query(C, embed(d.content),
    // limit=1) returns d. The backend lives inside the registered plugin,
    // so resolve it back out through the registry.
    let plugin = harness
        .plugins
        .resolve(&mimir_aip_core::core::PluginSpec::new(
            mimir_aip_core::core::PluginKind::Storage,
            "vector",
        ))
        .await
        .unwrap();

    let mut query_config = std::collections::BTreeMap::new();
    query_config.insert("operation".to_string(), serde_json::json!("query"));
    query_config.insert("collection".to_string(), serde_json::json!("kb"));
    query_config.insert(
        "query_vector".to_string(),
        serde_json::json!(embed_like_deterministic("hello")),
    );
    query_config.insert("limit".to_string(), serde_json::json!(1));

    let query_outcome = plugin
        .execute(&query_config, &mimir_aip_core::core::PluginContext::new(), CancellationToken::new())
        .await
        .unwrap();
    let rows = query_outcome.primary.as_records().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("id").unwrap(), "1");
    assert_eq!(rows[0].get("content").unwrap(), "hello");
}

/// Matches the storage plugin's default dimension (32) / deterministic
/// embedder used by `PluginRegistry::with_builtins`.
fn embed_like_deterministic(text: &str) -> Vec<f32> {
    let dims = 32usize;
    let mut vector = vec![0.0f32; dims];
    for (i, byte) in text.bytes().enumerate() {
        let slot = i % dims;
        vector[slot] += (byte as f32) / 255.0;
    }
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
    vector
}

/// Scenario 2: a step referencing an input no earlier step produced is a
/// structural validation error. This repo front-loads that check into
/// `PipelineConfig::from_yaml`/`create`, so the bad pipeline never even
/// enters the registry — stricter than, but consistent with, the spec's
/// invariant that such a pipeline never produces an execution log.
#[tokio::test]
async fn unresolved_input_reference_is_rejected_before_any_execution_log_exists() {
    let harness = Harness::new().await;
    let err = PipelineConfig::from_yaml(
        r#"
name: broken
enabled: true
steps:
  - name: s1
    plugin: Process.passthrough
    output: first
  - name: s2
    plugin: Process.passthrough
    input: missing
    output: second
"#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("s2") && err.to_string().contains("missing"));

    // A plugin-level validation failure (resolvable structure, unknown
    // plugin) does reach `Validate`, still with zero execution history.
    let config = PipelineConfig::from_yaml(
        r#"
name: unresolvable
enabled: true
steps:
  - name: s1
    plugin: Process.nonexistent
    output: first
"#,
    )
    .unwrap();
    let pipeline = harness
        .pipelines
        .create(PipelineMetadata::new(None, Vec::new(), None), config)
        .await
        .unwrap();

    let report = harness.pipelines.validate(&pipeline.id).await.unwrap();
    assert!(!report.valid);

    let history = harness.pipelines.history(&pipeline.id, &harness.logs, None).await.unwrap();
    assert!(history.is_empty(), "validation failures must not create execution log entries");
}

/// Scenario 3 (compressed to a direct tick rather than a real 70s sleep):
/// a due job fires, produces a successful execution log tagged with its
/// job id, and comes out the other side with a fresh `next_run`.
#[tokio::test]
async fn scheduler_fires_due_job_and_advances_next_run() {
    let harness = Harness::new().await;
    let dir = tempfile::tempdir().unwrap();
    let csv_path = write_csv(&dir, "a.csv", "id,content\n1,hello\n").await;
    let pipeline = harness
        .pipelines
        .create(PipelineMetadata::new(None, Vec::new(), None), storage_pipeline_config(&csv_path))
        .await
        .unwrap();

    let scheduler = harness.scheduler().await.unwrap();
    let now = chrono::Utc::now();
    let job = SchedulerJob {
        id: "job-1".to_string(),
        name: "job-1".to_string(),
        job_type: JobType::Pipeline,
        target_id: pipeline.id.clone(),
        cron_expression: "*/1 * * * *".to_string(),
        timezone: None,
        enabled: true,
        next_run: None,
        last_run: None,
        created_at: now,
        updated_at: now,
    };
    let job = scheduler.create_job(job).await.unwrap();

    // Force the job due right now instead of sleeping past a real minute
    // boundary, then run one tick's worth of dispatch via `trigger`,
    // which exercises the same execution path `tick`/`fire` use.
    let outcome = scheduler.trigger(&job.id).await.unwrap();
    assert_eq!(outcome.status, ExecutionStatus::Success);

    let history = harness
        .pipelines
        .history(&pipeline.id, &harness.logs, None)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].job_id.as_deref(), Some(job.id.as_str()));
    assert_eq!(history[0].status, ExecutionStatus::Success);

    // next_run is untouched by trigger (spec.md §4.6); enabling again
    // advances it, matching the enable/disable/enable round-trip law.
    let before = scheduler.get(&job.id).await.unwrap().next_run;
    scheduler.disable(&job.id).await.unwrap();
    scheduler.enable(&job.id).await.unwrap();
    let after = scheduler.get(&job.id).await.unwrap().next_run;
    assert!(after.unwrap() > now);
    assert_ne!(before, None);
}

/// Scenario 6: two enabled jobs with stale (already-past) `next_run`
/// values survive a simulated crash/restart — reloading from the same
/// persistence recomputes both `next_run`s strictly after the reload
/// time, never double-firing a slot that already lapsed.
#[tokio::test]
async fn crash_recovery_reloads_jobs_with_fresh_next_run() {
    let harness = Harness::new().await;
    let dir = tempfile::tempdir().unwrap();
    let csv_path = write_csv(&dir, "a.csv", "id,content\n1,hello\n").await;
    let pipeline = harness
        .pipelines
        .create(PipelineMetadata::new(None, Vec::new(), None), storage_pipeline_config(&csv_path))
        .await
        .unwrap();

    let now = chrono::Utc::now();
    for (id, hours_stale) in [("job-a", 1i64), ("job-b", 2i64)] {
        let job = SchedulerJob {
            id: id.to_string(),
            name: id.to_string(),
            job_type: JobType::Pipeline,
            target_id: pipeline.id.clone(),
            cron_expression: "*/5 * * * *".to_string(),
            timezone: None,
            enabled: true,
            next_run: Some(now - chrono::Duration::hours(hours_stale)),
            last_run: None,
            created_at: now,
            updated_at: now,
        };
        harness.persistence.save_job(job).await.unwrap();
    }

    // Simulate a process restart: a fresh `Scheduler::load` against the
    // same persistence, as `main.rs` does on startup.
    let restarted = harness.scheduler().await.unwrap();
    let restart_time = chrono::Utc::now();
    let jobs = restarted.list().await;
    assert_eq!(jobs.len(), 2);
    for job in jobs {
        assert!(job.enabled);
        assert!(job.next_run.unwrap() > restart_time);
    }
}
