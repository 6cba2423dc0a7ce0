//! Vector Storage Core: a backend-agnostic interface, a factory that
//! selects an implementation by config, and a dispatch plugin wiring it
//! into the Plugin Registry as `Storage.vector`.

pub mod embedded;
pub mod embedding;
pub mod factory;
pub mod plugin;

use crate::error::CoreResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityMetric {
    Cosine,
    Euclidean,
    Dot,
    Manhattan,
}

impl Default for SimilarityMetric {
    fn default() -> Self {
        SimilarityMetric::Cosine
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    pub name: String,
    pub dimension: usize,
    #[serde(default)]
    pub similarity: SimilarityMetric,
    #[serde(default)]
    pub persist: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub document: Document,
    /// Similarity for cosine/dot (higher is better), distance for
    /// euclidean/manhattan (lower is better) — callers interpret this
    /// against the collection's configured metric.
    pub score: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendStats {
    pub collections: usize,
    pub documents: usize,
}

/// Backend-agnostic vector store contract (spec.md §4.8).
#[async_trait]
pub trait VectorStorageBackend: Send + Sync {
    async fn create_collection(&self, collection: Collection) -> CoreResult<()>;
    async fn delete_collection(&self, name: &str) -> CoreResult<()>;
    async fn list_collections(&self) -> CoreResult<Vec<Collection>>;

    /// `embeddings`, if given, must be the same length as `documents` and
    /// is paired positionally. Repeated ids within the collection upsert.
    async fn store(
        &self,
        collection: &str,
        documents: Vec<Document>,
        embeddings: Option<Vec<Vec<f32>>>,
    ) -> CoreResult<()>;

    async fn query(
        &self,
        collection: &str,
        query_vector: Vec<f32>,
        limit: usize,
        filters: Option<BTreeMap<String, serde_json::Value>>,
    ) -> CoreResult<Vec<QueryResult>>;

    async fn delete(&self, collection: &str, ids: Vec<String>) -> CoreResult<()>;

    async fn get_document(&self, collection: &str, id: &str) -> CoreResult<Document>;

    async fn update_metadata(
        &self,
        collection: &str,
        id: &str,
        metadata: BTreeMap<String, serde_json::Value>,
    ) -> CoreResult<()>;

    async fn health(&self) -> CoreResult<()>;
    async fn stats(&self) -> CoreResult<BackendStats>;
    async fn close(&self) -> CoreResult<()>;
}
