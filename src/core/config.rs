//! Pipeline configuration as loaded from YAML/JSON.

use crate::core::step::{PluginSpec, Step};
use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// A step as spelled in YAML, before its `plugin` string has been parsed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    pub name: String,
    pub plugin: String,
    #[serde(default)]
    pub config: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub continue_on_error: bool,
}

impl StepConfig {
    pub fn into_step(self) -> CoreResult<Step> {
        Ok(Step {
            name: self.name,
            plugin: PluginSpec::parse(&self.plugin)?,
            config: self.config,
            input: self.input,
            output: self.output,
            timeout_secs: self.timeout_secs,
            continue_on_error: self.continue_on_error,
        })
    }
}

/// Top-level pipeline configuration, as it appears inside a pipeline
/// record's `config` field (see spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    pub steps: Vec<StepConfig>,
}

impl PipelineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CoreError::validation(format!("failed to read pipeline file: {e}")))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> CoreResult<Self> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)
            .map_err(|e| CoreError::validation(format!("invalid pipeline YAML: {e}")))?;
        config.validate_structure()?;
        Ok(config)
    }

    /// Structural checks independent of the plugin registry: step-name
    /// uniqueness, output-name uniqueness, input references resolving to
    /// an earlier output, and every step timeout being non-zero.
    ///
    /// Plugin resolution and `ValidateConfig` are deferred to
    /// `PipelineRegistry::validate`, which has access to the registry.
    pub fn validate_structure(&self) -> CoreResult<Vec<String>> {
        let mut errors = Vec::new();
        let mut seen_names = HashSet::new();
        let mut seen_outputs = HashSet::new();
        let mut available_outputs: HashSet<&str> = HashSet::new();

        for step in &self.steps {
            if !seen_names.insert(step.name.as_str()) {
                errors.push(format!("duplicate step name '{}'", step.name));
            }

            if let Some(timeout) = step.timeout_secs {
                if timeout == 0 {
                    errors.push(format!("step '{}' has timeout_secs of 0", step.name));
                }
            }

            if let Some(input) = &step.input {
                if !available_outputs.contains(input.as_str()) {
                    errors.push(format!(
                        "step '{}': input '{}' not produced by any prior step",
                        step.name, input
                    ));
                }
            }

            if let Some(output) = &step.output {
                if !seen_outputs.insert(output.as_str()) {
                    errors.push(format!(
                        "duplicate output name '{}' (written by more than one step)",
                        output
                    ));
                }
                available_outputs.insert(output.as_str());
            }
        }

        if !errors.is_empty() {
            return Err(CoreError::Validation(errors.join("; ")));
        }
        Ok(errors)
    }
}
