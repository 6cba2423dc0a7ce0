//! CLI command definitions

use clap::{Args, Subcommand};

#[derive(Debug, Subcommand, Clone)]
pub enum PipelineCommand {
    /// Register a pipeline from a YAML file
    Create(PipelineCreateArgs),
    /// List known pipelines
    List(PipelineListArgs),
    /// Show one pipeline's stored definition
    Get(PipelineIdArgs),
    /// Structurally validate a pipeline and resolve its plugins
    Validate(PipelineIdArgs),
    /// Deep-copy a pipeline under a new name
    Clone(PipelineCloneArgs),
    /// Remove a pipeline
    Delete(PipelineIdArgs),
    /// Execute a pipeline immediately, outside the scheduler
    Run(PipelineRunArgs),
    /// Show recent executions of a pipeline
    History(PipelineHistoryArgs),
}

#[derive(Debug, Args, Clone)]
pub struct PipelineCreateArgs {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long, value_delimiter = ',')]
    pub tag: Vec<String>,
}

#[derive(Debug, Args, Clone)]
pub struct PipelineListArgs {
    /// Only show pipelines matching this status
    #[arg(long, value_enum, default_value_t = StatusArg::All)]
    pub status: StatusArg,
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum StatusArg {
    All,
    Active,
    Inactive,
}

#[derive(Debug, Args, Clone)]
pub struct PipelineIdArgs {
    pub id: String,
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args, Clone)]
pub struct PipelineCloneArgs {
    pub id: String,
    pub new_name: String,
}

#[derive(Debug, Args, Clone)]
pub struct PipelineRunArgs {
    pub id: String,
    /// Run even if the pipeline is marked disabled
    #[arg(long)]
    pub allow_disabled: bool,
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args, Clone)]
pub struct PipelineHistoryArgs {
    pub id: String,
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Subcommand, Clone)]
pub enum SchedulerCommand {
    /// Register a cron job against a pipeline
    Create(SchedulerCreateArgs),
    /// List scheduler jobs
    List(SchedulerListArgs),
    /// Arm a disabled job
    Enable(SchedulerIdArgs),
    /// Disarm a job without deleting it
    Disable(SchedulerIdArgs),
    /// Remove a job
    Delete(SchedulerIdArgs),
    /// Run a job's pipeline immediately without consuming its scheduled slot
    Trigger(SchedulerIdArgs),
}

#[derive(Debug, Args, Clone)]
pub struct SchedulerCreateArgs {
    pub name: String,
    /// Target pipeline id
    #[arg(long)]
    pub pipeline: String,
    /// 5-field cron expression: minute hour day-of-month month day-of-week
    #[arg(long)]
    pub cron: String,
    /// IANA timezone name; defaults to UTC
    #[arg(long)]
    pub timezone: Option<String>,
    #[arg(long)]
    pub disabled: bool,
}

#[derive(Debug, Args, Clone)]
pub struct SchedulerListArgs {
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args, Clone)]
pub struct SchedulerIdArgs {
    pub id: String,
}

#[derive(Debug, Subcommand, Clone)]
pub enum LogsCommand {
    /// List execution logs
    List(LogsListArgs),
    /// Show one execution log in full, including entries
    Get(LogsGetArgs),
}

#[derive(Debug, Args, Clone)]
pub struct LogsListArgs {
    #[arg(long)]
    pub pipeline: Option<String>,
    #[arg(long)]
    pub job: Option<String>,
    #[arg(short, long)]
    pub limit: Option<usize>,
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args, Clone)]
pub struct LogsGetArgs {
    pub id: String,
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args, Clone)]
pub struct ServeArgs {
    /// How often the scheduler checks for due jobs, in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub tick_ms: u64,
}
