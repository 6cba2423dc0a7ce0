//! `Process.passthrough` — forwards its declared input unchanged. Useful
//! as a no-op link in a pipeline and as the simplest possible reference
//! plugin for tests.
//!
//! The engine copies the step's resolved `input` value into the context
//! under the reserved `_input` key before calling `execute`; every
//! reference plugin that consumes an input reads it from there.

use crate::core::{ContextValue, PluginContext, PluginKind};
use crate::error::{CoreError, CoreResult};
use crate::registry::{Plugin, PluginOutcome};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

pub struct Passthrough;

#[async_trait]
impl Plugin for Passthrough {
    fn kind(&self) -> PluginKind {
        PluginKind::Process
    }

    fn name(&self) -> &str {
        "passthrough"
    }

    fn validate_config(&self, _config: &BTreeMap<String, serde_json::Value>) -> Vec<String> {
        Vec::new()
    }

    async fn execute(
        &self,
        _config: &BTreeMap<String, serde_json::Value>,
        context: &PluginContext,
        _cancel: CancellationToken,
    ) -> CoreResult<PluginOutcome> {
        let value = context
            .get("_input")
            .cloned()
            .ok_or_else(|| CoreError::validation("Process.passthrough requires a step input"))?;
        Ok(PluginOutcome::new(value))
    }
}
