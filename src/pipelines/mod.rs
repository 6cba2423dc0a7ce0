//! Pipeline Registry: owns pipeline CRUD, cloning and validation.
//! Structural checks are delegated to `PipelineConfig::validate_structure`;
//! plugin resolution and per-plugin config validation are delegated to
//! the Plugin Registry.

use crate::core::{Pipeline, PipelineConfig, PipelineMetadata};
use crate::error::{CoreError, CoreResult};
use crate::logs::ExecutionLogStore;
use crate::persistence::{ExecutionLog, ExecutionLogFilter, Persistence, PipelineStatusFilter};
use crate::registry::PluginRegistry;
use chrono::Utc;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

pub struct PipelineRegistry {
    persistence: Arc<dyn Persistence>,
    plugins: Arc<PluginRegistry>,
}

impl PipelineRegistry {
    pub fn new(persistence: Arc<dyn Persistence>, plugins: Arc<PluginRegistry>) -> Self {
        Self { persistence, plugins }
    }

    pub async fn create(&self, metadata: PipelineMetadata, config: PipelineConfig) -> CoreResult<Pipeline> {
        config.validate_structure()?;
        self.ensure_name_available(&config.name, None).await?;
        let pipeline = Pipeline {
            id: uuid::Uuid::new_v4().to_string(),
            name: config.name.clone(),
            version: 1,
            enabled: config.enabled,
            metadata,
            config,
        };
        self.persistence.create_pipeline(pipeline).await
    }

    /// Rejects `name` if an active pipeline other than `exclude_id` already
    /// uses it (spec: pipeline name is "unique within active set").
    async fn ensure_name_available(&self, name: &str, exclude_id: Option<&str>) -> CoreResult<()> {
        let active = self.persistence.list_pipelines(PipelineStatusFilter::Active).await?;
        let collides = active
            .iter()
            .any(|p| p.name == name && exclude_id != Some(p.id.as_str()));
        if collides {
            return Err(CoreError::Conflict(format!("pipeline name '{name}' is already in use")));
        }
        Ok(())
    }

    pub async fn get(&self, id: &str) -> CoreResult<Pipeline> {
        self.persistence.get_pipeline(id).await
    }

    pub async fn list(&self, filter: PipelineStatusFilter) -> CoreResult<Vec<Pipeline>> {
        self.persistence.list_pipelines(filter).await
    }

    /// Merges `metadata`/`config` into the stored record, bumping
    /// `version` and `updated_at`. A `None` field is left untouched.
    pub async fn update(
        &self,
        id: &str,
        metadata: Option<PipelineMetadata>,
        config: Option<PipelineConfig>,
    ) -> CoreResult<Pipeline> {
        let mut pipeline = self.get(id).await?;
        if let Some(config) = config {
            config.validate_structure()?;
            if config.name != pipeline.name {
                self.ensure_name_available(&config.name, Some(id)).await?;
            }
            pipeline.name = config.name.clone();
            pipeline.enabled = config.enabled;
            pipeline.config = config;
        }
        if let Some(metadata) = metadata {
            pipeline.metadata = metadata;
        }
        pipeline.metadata.updated_at = Utc::now();
        pipeline.version += 1;
        self.persistence.update_pipeline(pipeline).await
    }

    pub async fn delete(&self, id: &str) -> CoreResult<()> {
        self.persistence.delete_pipeline(id).await
    }

    /// Deep-copies a pipeline under a new name, assigning a fresh id and
    /// resetting `version` to 1.
    pub async fn clone_pipeline(&self, id: &str, new_name: impl Into<String>) -> CoreResult<Pipeline> {
        let source = self.get(id).await?;
        let new_name = new_name.into();
        self.ensure_name_available(&new_name, None).await?;
        let mut config = source.config.clone();
        config.name = new_name.clone();
        let cloned = Pipeline {
            id: uuid::Uuid::new_v4().to_string(),
            name: new_name,
            version: 1,
            enabled: source.enabled,
            metadata: PipelineMetadata::new(
                source.metadata.description.clone(),
                source.metadata.tags.clone(),
                source.metadata.creator.clone(),
            ),
            config,
        };
        self.persistence.create_pipeline(cloned).await
    }

    /// Structural checks plus plugin resolution/config validation,
    /// collected rather than short-circuited — callers see every
    /// problem in one pass. Never mutates state.
    pub async fn validate(&self, id: &str) -> CoreResult<ValidationReport> {
        let pipeline = self.get(id).await?;
        let mut errors = Vec::new();

        if let Err(err) = pipeline.config.validate_structure() {
            match err {
                CoreError::Validation(msg) => errors.push(msg),
                other => return Err(other),
            }
        }

        for step_config in &pipeline.config.steps {
            let step = step_config.clone().into_step()?;
            errors.extend(self.plugins.validate_step(&step).await);
        }

        Ok(ValidationReport { valid: errors.is_empty(), errors })
    }

    pub async fn history(
        &self,
        id: &str,
        logs: &ExecutionLogStore,
        limit: Option<usize>,
    ) -> CoreResult<Vec<ExecutionLog>> {
        logs.list(ExecutionLogFilter { pipeline_id: Some(id.to_string()), limit, ..Default::default() })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryPersistence;

    fn sample_config() -> PipelineConfig {
        PipelineConfig::from_yaml(
            r#"
name: demo
enabled: true
steps:
  - name: s1
    plugin: Input.csv
    config:
      file_path: "/tmp/a.csv"
    output: rows
"#,
        )
        .unwrap()
    }

    async fn registry() -> PipelineRegistry {
        PipelineRegistry::new(
            Arc::new(InMemoryPersistence::new()),
            Arc::new(PluginRegistry::with_builtins().await),
        )
    }

    #[tokio::test]
    async fn create_then_validate_succeeds() {
        let registry = registry().await;
        let pipeline = registry
            .create(PipelineMetadata::new(None, Vec::new(), None), sample_config())
            .await
            .unwrap();
        let report = registry.validate(&pipeline.id).await.unwrap();
        assert!(report.valid, "{:?}", report.errors);
    }

    #[tokio::test]
    async fn validate_reports_unresolvable_plugin() {
        let registry = PipelineRegistry::new(Arc::new(InMemoryPersistence::new()), Arc::new(PluginRegistry::new()));
        let pipeline = registry
            .create(PipelineMetadata::new(None, Vec::new(), None), sample_config())
            .await
            .unwrap();
        let report = registry.validate(&pipeline.id).await.unwrap();
        assert!(!report.valid);
    }

    #[tokio::test]
    async fn create_rejects_duplicate_active_name() {
        let registry = registry().await;
        registry
            .create(PipelineMetadata::new(None, Vec::new(), None), sample_config())
            .await
            .unwrap();
        let err = registry
            .create(PipelineMetadata::new(None, Vec::new(), None), sample_config())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)), "{err:?}");
    }

    #[tokio::test]
    async fn clone_rejects_duplicate_active_name() {
        let registry = registry().await;
        let pipeline = registry
            .create(PipelineMetadata::new(None, Vec::new(), None), sample_config())
            .await
            .unwrap();
        let err = registry.clone_pipeline(&pipeline.id, "demo").await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)), "{err:?}");
    }

    #[tokio::test]
    async fn clone_resets_version_and_assigns_new_id() {
        let registry = registry().await;
        let pipeline = registry
            .create(PipelineMetadata::new(None, Vec::new(), None), sample_config())
            .await
            .unwrap();
        let cloned = registry.clone_pipeline(&pipeline.id, "demo-copy").await.unwrap();
        assert_ne!(cloned.id, pipeline.id);
        assert_eq!(cloned.version, 1);
        assert_eq!(cloned.name, "demo-copy");
    }

    #[tokio::test]
    async fn update_bumps_version() {
        let registry = registry().await;
        let pipeline = registry
            .create(PipelineMetadata::new(None, Vec::new(), None), sample_config())
            .await
            .unwrap();
        let updated = registry.update(&pipeline.id, None, None).await.unwrap();
        assert_eq!(updated.version, 2);
    }
}
