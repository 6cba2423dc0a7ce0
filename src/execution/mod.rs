//! Pipeline execution engine and cron scheduler.

pub mod engine;
pub mod scheduler;

pub use engine::{ExecuteOptions, ExecutionEngine, ExecutionOutcome};
pub use scheduler::Scheduler;
