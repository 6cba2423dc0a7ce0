//! CLI output formatting

use crate::core::{ExecutionStatus, Pipeline};
use crate::persistence::{ExecutionLog, SchedulerJob};
use console::Emoji;

// Re-export style
pub use console::style;

pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Running => style("RUNNING").yellow().to_string(),
        ExecutionStatus::Success => style("SUCCESS").green().to_string(),
        ExecutionStatus::Failed => style("FAILED").red().to_string(),
        ExecutionStatus::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

pub fn format_pipeline_row(pipeline: &Pipeline) -> String {
    let status = if pipeline.enabled { style("enabled").green() } else { style("disabled").dim() };
    format!(
        "{}  {}  v{}  {}  {}",
        style(&pipeline.id[..8]).dim(),
        style(&pipeline.name).bold(),
        pipeline.version,
        status,
        style(format!("{} steps", pipeline.step_count())).dim()
    )
}

pub fn format_job_row(job: &SchedulerJob) -> String {
    let status = if job.enabled { style("enabled").green() } else { style("disabled").dim() };
    let next_run = job.next_run.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".to_string());
    format!(
        "{}  {}  {}  {}  {}  next={}",
        style(&job.id).dim(),
        style(&job.name).bold(),
        job.job_type.as_str(),
        job.cron_expression,
        status,
        next_run
    )
}

pub fn format_log_row(log: &ExecutionLog) -> String {
    let icon = match log.status {
        ExecutionStatus::Success => CHECK,
        ExecutionStatus::Failed => CROSS,
        ExecutionStatus::Running => SPINNER,
        ExecutionStatus::Cancelled => WARN,
    };
    format!(
        "{} {}  {}  started={}",
        icon,
        style(&log.id[..8]).dim(),
        format_status(log.status),
        log.started_at.to_rfc3339()
    )
}
