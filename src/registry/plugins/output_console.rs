//! `Output.console` — writes its input to stdout via `tracing`, mostly
//! useful for smoke-testing pipelines without a real sink.

use crate::core::{ContextValue, PluginContext, PluginKind};
use crate::error::CoreResult;
use crate::registry::{Plugin, PluginOutcome};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

pub struct ConsoleOutput;

#[async_trait]
impl Plugin for ConsoleOutput {
    fn kind(&self) -> PluginKind {
        PluginKind::Output
    }

    fn name(&self) -> &str {
        "console"
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
        let rendered = match context.keys().next() {
            Some(key) => format!("{key} = {:?}", context.get(key)),
            None => "<empty context>".to_string(),
        };
        tracing::info!(target: "mimir_aip_core::output_console", "{rendered}");
        Ok(PluginOutcome::new(ContextValue::from(rendered)))
    }
}
