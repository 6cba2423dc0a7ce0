//! `AI.echo` — a deterministic stand-in for a real model call. Wraps its
//! input in a fixed template rather than calling out to any provider,
//! so pipelines and tests can exercise the AI step kind without network
//! access or API keys.

use crate::core::{ContextValue, PluginContext, PluginKind};
use crate::error::CoreResult;
use crate::registry::{Plugin, PluginOutcome};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

pub struct EchoAi;

#[async_trait]
impl Plugin for EchoAi {
    fn kind(&self) -> PluginKind {
        PluginKind::AI
    }

    fn name(&self) -> &str {
        "echo"
    }

    fn validate_config(&self, _config: &BTreeMap<String, serde_json::Value>) -> Vec<String> {
        Vec::new()
    }

    async fn execute(
        &self,
        config: &BTreeMap<String, serde_json::Value>,
        context: &PluginContext,
        _cancel: CancellationToken,
    ) -> CoreResult<PluginOutcome> {
        let prefix = config
            .get("prefix")
            .and_then(|v| v.as_str())
            .unwrap_or("echo");
        let input = context
            .get("_input")
            .and_then(|v| v.as_scalar_str())
            .map(str::to_string)
            .unwrap_or_default();
        Ok(PluginOutcome::new(ContextValue::from(format!("{prefix}: {input}"))))
    }
}
