//! `Storage.vector` — the single dispatch plugin translating a step
//! config into one of the Vector Storage Core operations.

use crate::core::{ContextValue, PluginContext, PluginKind};
use crate::error::{CoreError, CoreResult};
use crate::registry::{Plugin, PluginOutcome};
use crate::storage::{Collection, Document, SimilarityMetric, VectorStorageBackend};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct VectorStoragePlugin {
    backend: Arc<dyn VectorStorageBackend>,
}

impl VectorStoragePlugin {
    pub fn new(backend: Arc<dyn VectorStorageBackend>) -> Self {
        Self { backend }
    }
}

const OPERATIONS: &[&str] = &[
    "store",
    "batch_store",
    "query",
    "delete",
    "get",
    "create_collection",
    "list_collections",
];

fn config_str<'a>(config: &'a BTreeMap<String, serde_json::Value>, key: &str) -> Option<&'a str> {
    config.get(key).and_then(|v| v.as_str())
}

fn require_str<'a>(config: &'a BTreeMap<String, serde_json::Value>, key: &str) -> CoreResult<&'a str> {
    config_str(config, key).ok_or_else(|| CoreError::validation(format!("Storage.vector requires '{key}'")))
}

fn documents_from_config_or_context(
    config: &BTreeMap<String, serde_json::Value>,
    context: &PluginContext,
) -> CoreResult<Vec<Document>> {
    if let Some(raw) = config.get("documents") {
        return serde_json::from_value(raw.clone())
            .map_err(|e| CoreError::validation(format!("invalid 'documents': {e}")));
    }
    if let Some(ContextValue::Records(rows)) = context.get("_input") {
        return rows
            .iter()
            .map(|row| {
                let id = row
                    .get("id")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| CoreError::validation("input row is missing an 'id' field"))?
                    .to_string();
                let content = row
                    .get("content")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let metadata = row.clone();
                Ok(Document { id, content, metadata, embedding: None })
            })
            .collect();
    }
    Err(CoreError::validation(
        "Storage.vector store operation requires 'documents' in config or a prior step's output",
    ))
}

#[async_trait]
impl Plugin for VectorStoragePlugin {
    fn kind(&self) -> PluginKind {
        PluginKind::Storage
    }

    fn name(&self) -> &str {
        "vector"
    }

    fn validate_config(&self, config: &BTreeMap<String, serde_json::Value>) -> Vec<String> {
        let mut errors = Vec::new();
        match config_str(config, "operation") {
            None => errors.push("missing required string field 'operation'".to_string()),
            Some(op) if !OPERATIONS.contains(&op) => {
                errors.push(format!("unknown operation '{op}', expected one of {OPERATIONS:?}"))
            }
            _ => {}
        }
        if config_str(config, "collection").is_none() {
            errors.push("missing required string field 'collection'".to_string());
        }
        errors
    }

    async fn execute(
        &self,
        config: &BTreeMap<String, serde_json::Value>,
        context: &PluginContext,
        _cancel: CancellationToken,
    ) -> CoreResult<PluginOutcome> {
        let operation = require_str(config, "operation")?;
        let collection = require_str(config, "collection")?;

        match operation {
            "create_collection" => {
                let dimension = config.get("dimension").and_then(|v| v.as_u64()).unwrap_or(32) as usize;
                let similarity = config
                    .get("similarity")
                    .and_then(|v| v.as_str())
                    .map(|s| match s {
                        "euclidean" => SimilarityMetric::Euclidean,
                        "dot" => SimilarityMetric::Dot,
                        "manhattan" => SimilarityMetric::Manhattan,
                        _ => SimilarityMetric::Cosine,
                    })
                    .unwrap_or_default();
                let persist = config.get("persist").and_then(|v| v.as_bool()).unwrap_or(false);
                self.backend
                    .create_collection(Collection { name: collection.to_string(), dimension, similarity, persist })
                    .await?;
                Ok(PluginOutcome::new(ContextValue::Scalar(serde_json::json!(true))))
            }
            "list_collections" => {
                let collections = self.backend.list_collections().await?;
                let rows = collections
                    .into_iter()
                    .map(|c| {
                        let mut row = BTreeMap::new();
                        row.insert("name".to_string(), serde_json::json!(c.name));
                        row.insert("dimension".to_string(), serde_json::json!(c.dimension));
                        row
                    })
                    .collect();
                Ok(PluginOutcome::new(ContextValue::Records(rows)))
            }
            "store" | "batch_store" => {
                let documents = documents_from_config_or_context(config, context)?;
                self.backend.store(collection, documents, None).await?;
                Ok(PluginOutcome::new(ContextValue::Scalar(serde_json::json!(true))))
            }
            "delete" => {
                let ids: Vec<String> = config
                    .get("ids")
                    .and_then(|v| v.as_array())
                    .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                    .ok_or_else(|| CoreError::validation("Storage.vector delete requires 'ids' array"))?;
                self.backend.delete(collection, ids).await?;
                Ok(PluginOutcome::new(ContextValue::Scalar(serde_json::json!(true))))
            }
            "get" => {
                let id = require_str(config, "id")?;
                let document = self.backend.get_document(collection, id).await?;
                let mut row = document.metadata.clone();
                row.insert("id".to_string(), serde_json::json!(document.id));
                row.insert("content".to_string(), serde_json::json!(document.content));
                Ok(PluginOutcome::new(ContextValue::Record(row)))
            }
            "query" => {
                let limit = config.get("limit").and_then(|v| v.as_u64()).unwrap_or(10) as usize;
                let query_vector: Vec<f32> = match config.get("query_vector") {
                    Some(v) => serde_json::from_value(v.clone())
                        .map_err(|e| CoreError::validation(format!("invalid 'query_vector': {e}")))?,
                    None => {
                        return Err(CoreError::validation(
                            "Storage.vector query requires 'query_vector'",
                        ))
                    }
                };
                let filters: Option<BTreeMap<String, serde_json::Value>> = config
                    .get("filters")
                    .map(|v| serde_json::from_value(v.clone()))
                    .transpose()
                    .map_err(|e| CoreError::validation(format!("invalid 'filters': {e}")))?;
                let results = self.backend.query(collection, query_vector, limit, filters).await?;
                let rows = results
                    .into_iter()
                    .map(|r| {
                        let mut row = r.document.metadata.clone();
                        row.insert("id".to_string(), serde_json::json!(r.document.id));
                        row.insert("content".to_string(), serde_json::json!(r.document.content));
                        row.insert("score".to_string(), serde_json::json!(r.score));
                        row
                    })
                    .collect();
                Ok(PluginOutcome::new(ContextValue::Records(rows)))
            }
            other => Err(CoreError::validation(format!("unknown Storage.vector operation '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::factory::default_backend;

    fn plugin() -> VectorStoragePlugin {
        VectorStoragePlugin::new(default_backend())
    }

    #[tokio::test]
    async fn create_then_store_then_query_roundtrips() {
        let plugin = plugin();
        let mut config = BTreeMap::new();
        config.insert("operation".to_string(), serde_json::json!("create_collection"));
        config.insert("collection".to_string(), serde_json::json!("kb"));
        config.insert("dimension".to_string(), serde_json::json!(8));
        plugin.execute(&config, &PluginContext::new(), CancellationToken::new()).await.unwrap();

        let mut store_config = BTreeMap::new();
        store_config.insert("operation".to_string(), serde_json::json!("store"));
        store_config.insert("collection".to_string(), serde_json::json!("kb"));
        store_config.insert(
            "documents".to_string(),
            serde_json::json!([{"id": "a", "content": "hello world"}]),
        );
        plugin.execute(&store_config, &PluginContext::new(), CancellationToken::new()).await.unwrap();

        let mut get_config = BTreeMap::new();
        get_config.insert("operation".to_string(), serde_json::json!("get"));
        get_config.insert("collection".to_string(), serde_json::json!("kb"));
        get_config.insert("id".to_string(), serde_json::json!("a"));
        let outcome = plugin.execute(&get_config, &PluginContext::new(), CancellationToken::new()).await.unwrap();
        match outcome.primary {
            ContextValue::Record(row) => assert_eq!(row.get("content").unwrap(), "hello world"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_unknown_operation() {
        let mut config = BTreeMap::new();
        config.insert("operation".to_string(), serde_json::json!("teleport"));
        config.insert("collection".to_string(), serde_json::json!("kb"));
        let errors = plugin().validate_config(&config);
        assert_eq!(errors.len(), 1);
    }
}
