//! Reference `VectorStorageBackend`: fully in-memory, with optional
//! gzip-compressed disk persistence and optional AES-GCM encrypted
//! backups. Intended as the backend proving the extension model, not as
//! a production-scale vector index.

use crate::error::{CoreError, CoreResult};
use crate::storage::embedding::EmbeddingService;
use crate::storage::{BackendStats, Collection, Document, QueryResult, SimilarityMetric};
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key};
use async_trait::async_trait;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CollectionData {
    collection: Collection,
    documents: BTreeMap<String, Document>,
}

/// On-disk persistence options for the embedded backend. `encryption_key`
/// is an AES-256 key used to wrap the gzip-compressed snapshot; absent by
/// default (plain gzip).
pub struct PersistenceOptions {
    pub path: PathBuf,
    pub encryption_key: Option<[u8; 32]>,
}

pub struct EmbeddedBackend {
    data: RwLock<HashMap<String, CollectionData>>,
    embedder: Arc<dyn EmbeddingService>,
    persistence: Option<PersistenceOptions>,
}

impl EmbeddedBackend {
    pub fn new(embedder: Arc<dyn EmbeddingService>) -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            embedder,
            persistence: None,
        }
    }

    pub fn with_persistence(mut self, options: PersistenceOptions) -> CoreResult<Self> {
        if options.path.exists() {
            let loaded = Self::load_snapshot(&options)?;
            self.data = RwLock::new(loaded);
        }
        self.persistence = Some(options);
        Ok(self)
    }

    fn load_snapshot(options: &PersistenceOptions) -> CoreResult<HashMap<String, CollectionData>> {
        let raw = std::fs::read(&options.path)
            .map_err(|e| CoreError::Fatal(format!("failed to read vector snapshot: {e}")))?;

        let compressed = if let Some(key) = &options.encryption_key {
            decrypt(&raw, key)?
        } else {
            raw
        };

        let mut decoder = GzDecoder::new(&compressed[..]);
        let mut json = String::new();
        decoder
            .read_to_string(&mut json)
            .map_err(|e| CoreError::Fatal(format!("failed to decompress vector snapshot: {e}")))?;

        serde_json::from_str(&json)
            .map_err(|e| CoreError::Fatal(format!("corrupt vector snapshot: {e}")))
    }

    async fn persist(&self) -> CoreResult<()> {
        let Some(options) = &self.persistence else {
            return Ok(());
        };
        let snapshot = self.data.read().await;
        let json = serde_json::to_string(&*snapshot)
            .map_err(|e| CoreError::Fatal(format!("failed to serialize vector snapshot: {e}")))?;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(json.as_bytes())
            .map_err(|e| CoreError::Fatal(format!("failed to compress vector snapshot: {e}")))?;
        let compressed = encoder
            .finish()
            .map_err(|e| CoreError::Fatal(format!("failed to finalize vector snapshot: {e}")))?;

        let bytes = if let Some(key) = &options.encryption_key {
            encrypt(&compressed, key)?
        } else {
            compressed
        };

        if let Some(parent) = options.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CoreError::Fatal(format!("failed to create snapshot directory: {e}")))?;
        }
        std::fs::write(&options.path, bytes)
            .map_err(|e| CoreError::Fatal(format!("failed to write vector snapshot: {e}")))
    }
}

fn encrypt(plaintext: &[u8], key: &[u8; 32]) -> CoreResult<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| CoreError::Fatal(format!("failed to encrypt vector snapshot: {e}")))?;
    let mut out = nonce.to_vec();
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn decrypt(bytes: &[u8], key: &[u8; 32]) -> CoreResult<Vec<u8>> {
    if bytes.len() < 12 {
        return Err(CoreError::Fatal("encrypted vector snapshot is truncated".to_string()));
    }
    let (nonce_bytes, ciphertext) = bytes.split_at(12);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(nonce_bytes.into(), ciphertext)
        .map_err(|e| CoreError::Fatal(format!("failed to decrypt vector snapshot: {e}")))
}

fn score(metric: SimilarityMetric, a: &[f32], b: &[f32]) -> f32 {
    match metric {
        SimilarityMetric::Cosine => {
            let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
            let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
            let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm_a == 0.0 || norm_b == 0.0 {
                0.0
            } else {
                dot / (norm_a * norm_b)
            }
        }
        SimilarityMetric::Dot => a.iter().zip(b).map(|(x, y)| x * y).sum(),
        SimilarityMetric::Euclidean => a
            .iter()
            .zip(b)
            .map(|(x, y)| (x - y).powi(2))
            .sum::<f32>()
            .sqrt(),
        SimilarityMetric::Manhattan => a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum(),
    }
}

/// Higher-is-better metrics sort descending; distance metrics sort
/// ascending. Ties break on document id, lexicographically.
fn higher_is_better(metric: SimilarityMetric) -> bool {
    matches!(metric, SimilarityMetric::Cosine | SimilarityMetric::Dot)
}

#[async_trait]
impl crate::storage::VectorStorageBackend for EmbeddedBackend {
    async fn create_collection(&self, collection: Collection) -> CoreResult<()> {
        let mut data = self.data.write().await;
        data.entry(collection.name.clone()).or_insert_with(|| CollectionData {
            collection,
            documents: BTreeMap::new(),
        });
        drop(data);
        self.persist().await
    }

    async fn delete_collection(&self, name: &str) -> CoreResult<()> {
        let mut data = self.data.write().await;
        data.remove(name);
        drop(data);
        self.persist().await
    }

    async fn list_collections(&self) -> CoreResult<Vec<Collection>> {
        let data = self.data.read().await;
        Ok(data.values().map(|c| c.collection.clone()).collect())
    }

    async fn store(
        &self,
        collection: &str,
        documents: Vec<Document>,
        embeddings: Option<Vec<Vec<f32>>>,
    ) -> CoreResult<()> {
        if let Some(embeddings) = &embeddings {
            if embeddings.len() != documents.len() {
                return Err(CoreError::validation(
                    "embeddings length must match documents length",
                ));
            }
        }

        let mut to_embed = Vec::new();
        let mut resolved: Vec<(Document, Option<Vec<f32>>)> = Vec::new();
        for (i, mut document) in documents.into_iter().enumerate() {
            let embedding = embeddings
                .as_ref()
                .map(|e| e[i].clone())
                .or_else(|| document.embedding.take());
            if embedding.is_none() {
                to_embed.push(document.content.clone());
            }
            resolved.push((document, embedding));
        }

        let mut computed = self.embedder.embed_texts(&to_embed).await?.into_iter();
        let mut finished = Vec::with_capacity(resolved.len());
        for (mut document, embedding) in resolved {
            document.embedding = Some(match embedding {
                Some(v) => v,
                None => computed
                    .next()
                    .ok_or_else(|| CoreError::Fatal("embedding computation returned too few vectors".to_string()))?,
            });
            finished.push(document);
        }

        let mut data = self.data.write().await;
        let entry = data.entry(collection.to_string()).or_insert_with(|| CollectionData {
            collection: Collection {
                name: collection.to_string(),
                dimension: self.embedder.dimensions(),
                similarity: SimilarityMetric::default(),
                persist: self.persistence.is_some(),
            },
            documents: BTreeMap::new(),
        });
        for document in finished {
            entry.documents.insert(document.id.clone(), document);
        }
        drop(data);
        self.persist().await
    }

    async fn query(
        &self,
        collection: &str,
        query_vector: Vec<f32>,
        limit: usize,
        filters: Option<BTreeMap<String, serde_json::Value>>,
    ) -> CoreResult<Vec<QueryResult>> {
        let data = self.data.read().await;
        let entry = data
            .get(collection)
            .ok_or_else(|| CoreError::not_found("collection", collection))?;
        let metric = entry.collection.similarity;

        let mut results: Vec<QueryResult> = entry
            .documents
            .values()
            .filter(|doc| match &filters {
                None => true,
                Some(filters) => filters
                    .iter()
                    .all(|(k, v)| doc.metadata.get(k) == Some(v)),
            })
            .filter_map(|doc| {
                doc.embedding
                    .as_ref()
                    .map(|embedding| QueryResult {
                        document: doc.clone(),
                        score: score(metric, &query_vector, embedding),
                    })
            })
            .collect();

        let ascending = !higher_is_better(metric);
        results.sort_by(|a, b| {
            let ordering = a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal);
            let ordering = if ascending { ordering } else { ordering.reverse() };
            ordering.then_with(|| a.document.id.cmp(&b.document.id))
        });
        results.truncate(limit);
        Ok(results)
    }

    async fn delete(&self, collection: &str, ids: Vec<String>) -> CoreResult<()> {
        let mut data = self.data.write().await;
        let entry = data
            .get_mut(collection)
            .ok_or_else(|| CoreError::not_found("collection", collection))?;
        for id in ids {
            entry.documents.remove(&id);
        }
        drop(data);
        self.persist().await
    }

    async fn get_document(&self, collection: &str, id: &str) -> CoreResult<Document> {
        let data = self.data.read().await;
        let entry = data
            .get(collection)
            .ok_or_else(|| CoreError::not_found("collection", collection))?;
        entry
            .documents
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("document", id))
    }

    async fn update_metadata(
        &self,
        collection: &str,
        id: &str,
        metadata: BTreeMap<String, serde_json::Value>,
    ) -> CoreResult<()> {
        let mut data = self.data.write().await;
        let entry = data
            .get_mut(collection)
            .ok_or_else(|| CoreError::not_found("collection", collection))?;
        let document = entry
            .documents
            .get_mut(id)
            .ok_or_else(|| CoreError::not_found("document", id))?;
        document.metadata = metadata;
        drop(data);
        self.persist().await
    }

    async fn health(&self) -> CoreResult<()> {
        Ok(())
    }

    async fn stats(&self) -> CoreResult<BackendStats> {
        let data = self.data.read().await;
        Ok(BackendStats {
            collections: data.len(),
            documents: data.values().map(|c| c.documents.len()).sum(),
        })
    }

    async fn close(&self) -> CoreResult<()> {
        self.persist().await
    }
}
