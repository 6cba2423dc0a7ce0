//! `Input.csv` — reads a CSV file from disk into `ContextValue::Records`.

use crate::core::{ContextValue, PluginContext, PluginKind};
use crate::error::{CoreError, CoreResult};
use crate::registry::{Plugin, PluginOutcome};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

pub struct CsvInput;

fn config_str<'a>(config: &'a BTreeMap<String, serde_json::Value>, key: &str) -> Option<&'a str> {
    config.get(key).and_then(|v| v.as_str())
}

fn config_bool(config: &BTreeMap<String, serde_json::Value>, key: &str, default: bool) -> bool {
    config.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
}

#[async_trait]
impl Plugin for CsvInput {
    fn kind(&self) -> PluginKind {
        PluginKind::Input
    }

    fn name(&self) -> &str {
        "csv"
    }

    fn validate_config(&self, config: &BTreeMap<String, serde_json::Value>) -> Vec<String> {
        let mut errors = Vec::new();
        if config_str(config, "file_path").is_none() {
            errors.push("missing required string field 'file_path'".to_string());
        }
        errors
    }

    async fn execute(
        &self,
        config: &BTreeMap<String, serde_json::Value>,
        _context: &PluginContext,
        cancel: CancellationToken,
    ) -> CoreResult<PluginOutcome> {
        let file_path = config_str(config, "file_path")
            .ok_or_else(|| CoreError::validation("Input.csv requires 'file_path'"))?
            .to_string();
        let has_headers = config_bool(config, "has_headers", true);

        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled("Input.csv".to_string()));
        }

        let content = tokio::fs::read_to_string(&file_path)
            .await
            .map_err(|e| CoreError::PluginFailure {
                plugin: "Input.csv".to_string(),
                message: format!("failed to read '{file_path}': {e}"),
            })?;

        let mut lines = content.lines();
        let headers: Vec<String> = if has_headers {
            lines
                .next()
                .map(|h| h.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_default()
        } else {
            Vec::new()
        };

        let mut rows = Vec::new();
        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split(',').collect();
            let mut row = BTreeMap::new();
            for (i, field) in fields.iter().enumerate() {
                let key = headers
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| format!("col{i}"));
                row.insert(key, serde_json::Value::String(field.trim().to_string()));
            }
            rows.push(row);
        }

        Ok(PluginOutcome::new(ContextValue::Records(rows)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.csv");
        tokio::fs::write(&path, "name,age\nalice,30\nbob,40\n").await.unwrap();

        let mut config = BTreeMap::new();
        config.insert("file_path".to_string(), serde_json::json!(path.to_str().unwrap()));
        config.insert("has_headers".to_string(), serde_json::json!(true));

        let outcome = CsvInput
            .execute(&config, &PluginContext::new(), CancellationToken::new())
            .await
            .unwrap();
        let rows = outcome.primary.as_records().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("name").unwrap(), "alice");
    }

    #[test]
    fn validate_requires_file_path() {
        let errors = CsvInput.validate_config(&BTreeMap::new());
        assert_eq!(errors.len(), 1);
    }
}
