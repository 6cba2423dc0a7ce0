//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{LogsCommand, PipelineCommand, SchedulerCommand, ServeArgs};
use std::ffi::OsString;

/// Pipeline orchestration and scheduling core
#[derive(Debug, Parser, Clone)]
#[command(name = "mimir-aip")]
#[command(author = "Mimir-AIP Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Pipeline registry, execution engine and cron scheduler", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the runtime config file (TOML/YAML)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Use an ephemeral in-memory store instead of SQLite
    #[arg(long, global = true)]
    pub in_memory: bool,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Pipeline registry operations
    #[command(subcommand)]
    Pipeline(PipelineCommand),

    /// Scheduler job operations
    #[command(subcommand)]
    Scheduler(SchedulerCommand),

    /// Execution log operations
    #[command(subcommand)]
    Logs(LogsCommand),

    /// Run the scheduler's tick loop until interrupted
    Serve(ServeArgs),
}

impl Cli {
    pub fn from_args() -> Self {
        Self::parse()
    }

    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
