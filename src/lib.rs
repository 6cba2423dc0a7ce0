//! mimir-aip-core - pipeline orchestration and scheduling core

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod execution;
pub mod logs;
pub mod persistence;
pub mod pipelines;
pub mod registry;
pub mod storage;

pub use core::{ContextValue, ExecutionStatus, Pipeline, PipelineConfig, PipelineMetadata, PluginContext, Step};
pub use error::{CoreError, CoreResult};
pub use execution::ExecutionEngine;
pub use persistence::Persistence;
pub use pipelines::PipelineRegistry;
pub use registry::PluginRegistry;
