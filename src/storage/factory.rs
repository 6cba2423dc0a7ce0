//! Selects a `VectorStorageBackend` implementation by a `type` string.
//! Unknown types fail config validation rather than silently falling
//! back to a default.

use crate::error::{CoreError, CoreResult};
use crate::storage::embedded::{EmbeddedBackend, PersistenceOptions};
use crate::storage::embedding::DeterministicEmbedding;
use crate::storage::VectorStorageBackend;
use std::path::PathBuf;
use std::sync::Arc;

/// Config accepted by `build`. `backend_type` is currently only
/// `"embedded"` — the reference implementation — but the shape leaves
/// room for registering additional backends without touching callers.
#[derive(Debug, Clone, Default)]
pub struct BackendConfig {
    pub backend_type: String,
    pub persist_path: Option<PathBuf>,
    pub encryption_key: Option<[u8; 32]>,
    pub embedding_dimensions: usize,
}

pub fn build(config: BackendConfig) -> CoreResult<Arc<dyn VectorStorageBackend>> {
    match config.backend_type.as_str() {
        "embedded" | "" => {
            let dimensions = if config.embedding_dimensions == 0 { 32 } else { config.embedding_dimensions };
            let embedder = Arc::new(DeterministicEmbedding::new(dimensions));
            let backend = EmbeddedBackend::new(embedder);
            let backend = match config.persist_path {
                Some(path) => backend.with_persistence(PersistenceOptions {
                    path,
                    encryption_key: config.encryption_key,
                })?,
                None => backend,
            };
            Ok(Arc::new(backend))
        }
        other => Err(CoreError::validation(format!(
            "unknown vector storage backend type '{other}'"
        ))),
    }
}

/// A ready-to-use in-memory backend with no persistence, for wiring into
/// `PluginRegistry::with_builtins` and for tests.
pub fn default_backend() -> Arc<dyn VectorStorageBackend> {
    build(BackendConfig {
        backend_type: "embedded".to_string(),
        ..Default::default()
    })
    .expect("embedded backend construction is infallible")
}
