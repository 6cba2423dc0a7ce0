//! Plugin Registry: maps `(Type, Name)` to a live plugin instance,
//! resolves `Type.Name` specs and delegates config validation.

pub mod plugins;

use crate::core::{PluginContext, PluginKind, PluginSpec, Step};
use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// What a plugin hands back to the engine after a successful `execute`.
///
/// `primary` becomes the value written under the step's `output` key (if
/// the step declares one); `extra` is merged into the running context
/// as-is, letting a plugin set auxiliary keys beyond its primary result.
#[derive(Debug, Clone)]
pub struct PluginOutcome {
    pub primary: crate::core::ContextValue,
    pub extra: PluginContext,
}

impl PluginOutcome {
    pub fn new(primary: crate::core::ContextValue) -> Self {
        Self { primary, extra: PluginContext::new() }
    }
}

/// A unit of executable behaviour identified by `Type.Name`.
///
/// Every plugin kind (Input, Output, Process/Transform, AI, Storage) shares
/// this one signature; differentiation is purely by registration name.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn kind(&self) -> PluginKind;
    fn name(&self) -> &str;

    fn spec(&self) -> PluginSpec {
        PluginSpec::new(self.kind(), self.name())
    }

    /// Validate a step's config without executing it. Returns a list of
    /// human-readable errors; empty means valid.
    fn validate_config(&self, config: &BTreeMap<String, serde_json::Value>) -> Vec<String>;

    /// Execute under a cancellable scope. Implementations own their I/O and
    /// must observe `cancel` themselves; the engine does not interpose.
    async fn execute(
        &self,
        config: &BTreeMap<String, serde_json::Value>,
        context: &PluginContext,
        cancel: CancellationToken,
    ) -> CoreResult<PluginOutcome>;
}

/// Holds a mapping `(type, name) -> PluginInstance`.
///
/// Mutations (register/unregister) are exclusive with lookups via the
/// underlying `RwLock`; registration is idempotent — a later registration
/// of the same `(type, name)` replaces the earlier one.
pub struct PluginRegistry {
    plugins: RwLock<HashMap<(PluginKind, String), Arc<dyn Plugin>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self { plugins: RwLock::new(HashMap::new()) }
    }

    /// A registry pre-populated with the reference built-in plugins.
    pub async fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(plugins::input_csv::CsvInput)).await;
        registry.register(Arc::new(plugins::output_console::ConsoleOutput)).await;
        registry.register(Arc::new(plugins::process_passthrough::Passthrough)).await;
        registry.register(Arc::new(plugins::ai_echo::EchoAi)).await;
        registry
            .register(Arc::new(crate::storage::plugin::VectorStoragePlugin::new(
                crate::storage::factory::default_backend(),
            )))
            .await;
        registry
    }

    pub async fn register(&self, plugin: Arc<dyn Plugin>) {
        let key = (plugin.kind(), plugin.name().to_string());
        self.plugins.write().await.insert(key, plugin);
    }

    pub async fn resolve(&self, spec: &PluginSpec) -> CoreResult<Arc<dyn Plugin>> {
        let key = (spec.kind, spec.name.clone());
        self.plugins
            .read()
            .await
            .get(&key)
            .cloned()
            .ok_or_else(|| CoreError::not_found("plugin", spec.to_string()))
    }

    /// Delegates to the resolved plugin's own `validate_config`; used by
    /// the Pipeline Registry at validate time. A plugin that fails to
    /// resolve is itself a validation error, not a `NotFound`.
    pub async fn validate_step(&self, step: &Step) -> Vec<String> {
        match self.resolve(&step.plugin).await {
            Ok(plugin) => plugin
                .validate_config(&step.config)
                .into_iter()
                .map(|e| format!("step '{}': {}", step.name, e))
                .collect(),
            Err(_) => vec![format!(
                "step '{}': plugin '{}' does not resolve",
                step.name, step.plugin
            )],
        }
    }

    pub async fn list(&self, kind_filter: Option<PluginKind>) -> Vec<PluginSpec> {
        self.plugins
            .read()
            .await
            .values()
            .map(|p| p.spec())
            .filter(|spec| kind_filter.map(|k| k == spec.kind).unwrap_or(true))
            .collect()
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_unknown_plugin_is_not_found() {
        let registry = PluginRegistry::new();
        let err = registry.resolve(&PluginSpec::new(PluginKind::Input, "missing")).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn register_replaces_same_key() {
        let registry = PluginRegistry::new();
        registry.register(Arc::new(plugins::process_passthrough::Passthrough)).await;
        registry.register(Arc::new(plugins::process_passthrough::Passthrough)).await;
        let specs = registry.list(Some(PluginKind::Process)).await;
        assert_eq!(specs.len(), 1);
    }
}
