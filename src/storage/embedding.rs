//! Embedding service abstraction. The storage plugin holds one of these
//! and falls back to a deterministic, hash-derived vector when none is
//! configured — good enough for tests and reference deployments, not for
//! semantic search quality.

use crate::error::CoreResult;
use async_trait::async_trait;

#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn embed_text(&self, text: &str) -> CoreResult<Vec<f32>>;
    async fn embed_texts(&self, texts: &[String]) -> CoreResult<Vec<Vec<f32>>>;
    fn dimensions(&self) -> usize;
    fn provider(&self) -> &str;
}

/// Hashes each text into a fixed-dimension vector. Same text always
/// produces the same vector; different texts are very unlikely to
/// collide completely, which is enough for exercising the storage
/// pipeline without a real model dependency.
pub struct DeterministicEmbedding {
    dimensions: usize,
}

impl DeterministicEmbedding {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

impl Default for DeterministicEmbedding {
    fn default() -> Self {
        Self::new(32)
    }
}

#[async_trait]
impl EmbeddingService for DeterministicEmbedding {
    async fn embed_text(&self, text: &str) -> CoreResult<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimensions];
        for (i, byte) in text.bytes().enumerate() {
            let slot = i % self.dimensions;
            vector[slot] += (byte as f32) / 255.0;
        }
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in vector.iter_mut() {
                *v /= norm;
            }
        }
        Ok(vector)
    }

    async fn embed_texts(&self, texts: &[String]) -> CoreResult<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed_text(text).await?);
        }
        Ok(out)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn provider(&self) -> &str {
        "deterministic"
    }
}
