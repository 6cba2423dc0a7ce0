//! Core domain models: pipeline, step, plugin spec, execution context and
//! execution-log shapes shared by the registry, engine, scheduler and
//! storage components.

pub mod config;
pub mod context;
pub mod pipeline;
pub mod state;
pub mod step;

pub use config::{PipelineConfig, StepConfig};
pub use context::{ContextValue, PluginContext};
pub use pipeline::{Pipeline, PipelineMetadata};
pub use state::ExecutionStatus;
pub use step::{PluginKind, PluginSpec, Step};
