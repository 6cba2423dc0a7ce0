use anyhow::{Context, Result};
use mimir_aip_core::cli::commands::{self, LogsCommand, PipelineCommand, SchedulerCommand};
use mimir_aip_core::cli::output::*;
use mimir_aip_core::cli::{Cli, Command};
use mimir_aip_core::config::RuntimeConfig;
use mimir_aip_core::execution::{ExecuteOptions, ExecutionEngine, Scheduler};
use mimir_aip_core::logs::ExecutionLogStore;
use mimir_aip_core::persistence::{
    ExecutionLogFilter, InMemoryPersistence, JobType, Persistence, PipelineStatusFilter, SchedulerJob,
};
use mimir_aip_core::pipelines::PipelineRegistry;
use mimir_aip_core::registry::PluginRegistry;
use mimir_aip_core::{ExecutionStatus, PipelineConfig, PipelineMetadata};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let runtime_config = match &cli.config {
        Some(path) => RuntimeConfig::from_file(std::path::Path::new(path)).context("failed to load runtime config")?,
        None => RuntimeConfig::default(),
    };

    let persistence: Arc<dyn Persistence> = build_persistence(&cli, &runtime_config).await?;

    let plugins = Arc::new(PluginRegistry::with_builtins().await);
    let pipeline_registry = Arc::new(PipelineRegistry::new(persistence.clone(), plugins.clone()));
    let log_store = Arc::new(ExecutionLogStore::new(persistence.clone()));
    let swept = log_store.sweep_incomplete().await?;
    if swept > 0 {
        tracing::warn!(count = swept, "swept dangling running logs left by a prior process");
    }
    let engine = Arc::new(ExecutionEngine::new(
        pipeline_registry.clone(),
        plugins,
        log_store.clone(),
        Duration::from_secs(runtime_config.default_step_timeout_secs),
        runtime_config.max_concurrent_executions,
    ));

    match &cli.command {
        Command::Pipeline(cmd) => run_pipeline_command(cmd, &pipeline_registry, &engine, &log_store).await?,
        Command::Scheduler(cmd) => run_scheduler_command(cmd, &persistence, &engine).await?,
        Command::Logs(cmd) => run_logs_command(cmd, &log_store).await?,
        Command::Serve(args) => run_serve(&persistence, &engine, Duration::from_millis(args.tick_ms)).await?,
    }

    Ok(())
}

#[cfg(feature = "sqlite")]
async fn build_persistence(cli: &Cli, runtime_config: &RuntimeConfig) -> Result<Arc<dyn Persistence>> {
    if cli.in_memory {
        return Ok(Arc::new(InMemoryPersistence::new()));
    }
    let db_path = runtime_config.resolved_db_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let store = mimir_aip_core::persistence::SqlitePersistence::new(
        db_path.to_str().context("db path is not valid UTF-8")?,
    )
    .await
    .context("failed to open sqlite store")?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "sqlite"))]
async fn build_persistence(_cli: &Cli, _runtime_config: &RuntimeConfig) -> Result<Arc<dyn Persistence>> {
    Ok(Arc::new(InMemoryPersistence::new()))
}

async fn run_pipeline_command(
    cmd: &PipelineCommand,
    registry: &Arc<PipelineRegistry>,
    engine: &Arc<ExecutionEngine>,
    log_store: &Arc<ExecutionLogStore>,
) -> Result<()> {
    match cmd {
        PipelineCommand::Create(args) => {
            let config = PipelineConfig::from_file(&args.file).context("failed to load pipeline YAML")?;
            let metadata = PipelineMetadata::new(args.description.clone(), args.tag.clone(), None);
            let pipeline = registry.create(metadata, config).await?;
            println!("{} created pipeline {}", CHECK, style(&pipeline.id).bold());
        }
        PipelineCommand::List(args) => {
            let filter = match args.status {
                commands::StatusArg::All => PipelineStatusFilter::All,
                commands::StatusArg::Active => PipelineStatusFilter::Active,
                commands::StatusArg::Inactive => PipelineStatusFilter::Inactive,
            };
            let pipelines = registry.list(filter).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&pipelines)?);
            } else if pipelines.is_empty() {
                println!("{} no pipelines registered", INFO);
            } else {
                for pipeline in &pipelines {
                    println!("{}", format_pipeline_row(pipeline));
                }
            }
        }
        PipelineCommand::Get(args) => {
            let pipeline = registry.get(&args.id).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&pipeline)?);
            } else {
                println!("{}", format_pipeline_row(&pipeline));
            }
        }
        PipelineCommand::Validate(args) => {
            let report = registry.validate(&args.id).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report.errors)?);
            } else if report.valid {
                println!("{} pipeline '{}' is valid", CHECK, args.id);
            } else {
                println!("{} pipeline '{}' has {} problem(s):", CROSS, args.id, report.errors.len());
                for error in &report.errors {
                    println!("  - {error}");
                }
                std::process::exit(1);
            }
        }
        PipelineCommand::Clone(args) => {
            let cloned = registry.clone_pipeline(&args.id, &args.new_name).await?;
            println!("{} cloned into {} ({})", CHECK, style(&cloned.name).bold(), cloned.id);
        }
        PipelineCommand::Delete(args) => {
            registry.delete(&args.id).await?;
            println!("{} deleted pipeline {}", CHECK, args.id);
        }
        PipelineCommand::Run(args) => {
            let options = ExecuteOptions { allow_disabled: args.allow_disabled, ..Default::default() };
            let outcome = engine.execute(&args.id, options, CancellationToken::new()).await?;
            if args.json {
                println!(
                    "{}",
                    serde_json::json!({ "log_id": outcome.log_id, "status": outcome.status.as_str() })
                );
            } else {
                match outcome.status {
                    ExecutionStatus::Success => {
                        println!("{} pipeline '{}' succeeded (log {})", CHECK, args.id, outcome.log_id)
                    }
                    ExecutionStatus::Failed => {
                        println!("{} pipeline '{}' failed (log {})", CROSS, args.id, outcome.log_id);
                        std::process::exit(1);
                    }
                    ExecutionStatus::Cancelled => {
                        println!("{} pipeline '{}' cancelled (log {})", WARN, args.id, outcome.log_id)
                    }
                    ExecutionStatus::Running => unreachable!("execute() never returns a Running outcome"),
                }
            }
        }
        PipelineCommand::History(args) => {
            let history = registry.history(&args.id, log_store, Some(args.limit)).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&history)?);
            } else if history.is_empty() {
                println!("{} no executions recorded for '{}'", INFO, args.id);
            } else {
                for log in &history {
                    println!("{}", format_log_row(log));
                }
            }
        }
    }
    Ok(())
}

async fn run_scheduler_command(
    cmd: &SchedulerCommand,
    persistence: &Arc<dyn Persistence>,
    engine: &Arc<ExecutionEngine>,
) -> Result<()> {
    let scheduler = Scheduler::load(persistence.clone(), engine.clone()).await?;
    match cmd {
        SchedulerCommand::Create(args) => {
            let now = chrono::Utc::now();
            let job = SchedulerJob {
                id: uuid::Uuid::new_v4().to_string(),
                name: args.name.clone(),
                job_type: JobType::Pipeline,
                target_id: args.pipeline.clone(),
                cron_expression: args.cron.clone(),
                timezone: args.timezone.clone(),
                enabled: !args.disabled,
                next_run: None,
                last_run: None,
                created_at: now,
                updated_at: now,
            };
            let job = scheduler.create_job(job).await?;
            println!("{} created scheduler job {} ({})", CHECK, style(&job.name).bold(), job.id);
        }
        SchedulerCommand::List(args) => {
            let jobs = scheduler.list().await;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&jobs)?);
            } else if jobs.is_empty() {
                println!("{} no scheduler jobs registered", INFO);
            } else {
                for job in &jobs {
                    println!("{}", format_job_row(job));
                }
            }
        }
        SchedulerCommand::Enable(args) => {
            scheduler.enable(&args.id).await?;
            println!("{} enabled job {}", CHECK, args.id);
        }
        SchedulerCommand::Disable(args) => {
            scheduler.disable(&args.id).await?;
            println!("{} disabled job {}", CHECK, args.id);
        }
        SchedulerCommand::Delete(args) => {
            scheduler.delete(&args.id).await?;
            println!("{} deleted job {}", CHECK, args.id);
        }
        SchedulerCommand::Trigger(args) => {
            let outcome = scheduler.trigger(&args.id).await?;
            match outcome.status {
                ExecutionStatus::Success => {
                    println!("{} job '{}' triggered successfully (log {})", CHECK, args.id, outcome.log_id)
                }
                _ => {
                    println!("{} job '{}' did not succeed (log {})", CROSS, args.id, outcome.log_id);
                    std::process::exit(1);
                }
            }
        }
    }
    Ok(())
}

async fn run_logs_command(cmd: &LogsCommand, log_store: &Arc<ExecutionLogStore>) -> Result<()> {
    match cmd {
        LogsCommand::List(args) => {
            let filter = ExecutionLogFilter {
                job_id: args.job.clone(),
                pipeline_id: args.pipeline.clone(),
                limit: args.limit,
            };
            let logs = log_store.list(filter).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&logs)?);
            } else if logs.is_empty() {
                println!("{} no execution logs found", INFO);
            } else {
                for log in &logs {
                    println!("{}", format_log_row(log));
                }
            }
        }
        LogsCommand::Get(args) => {
            let log = log_store.get(&args.id).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&log)?);
            } else {
                println!("{}", format_log_row(&log));
                for entry in &log.entries {
                    println!(
                        "  [{}] {}{}",
                        entry.timestamp.to_rfc3339(),
                        entry.step_name.as_deref().map(|s| format!("{s}: ")).unwrap_or_default(),
                        entry.message
                    );
                }
            }
        }
    }
    Ok(())
}

async fn run_serve(persistence: &Arc<dyn Persistence>, engine: &Arc<ExecutionEngine>, tick_interval: Duration) -> Result<()> {
    let scheduler = Scheduler::load(persistence.clone(), engine.clone()).await?;
    let jobs = scheduler.list().await;
    println!("{} scheduler loaded with {} job(s)", ROCKET, jobs.len());
    let handle = scheduler.spawn(tick_interval);

    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    println!("\n{} shutting down scheduler", INFO);
    scheduler.shutdown();
    let any_cancelled = scheduler.join_inflight().await;
    let _ = handle.await;
    if any_cancelled {
        println!("{} shutdown forced one or more in-flight executions to cancel", WARN);
        std::process::exit(1);
    }
    Ok(())
}
