//! Local inference via fastembed (ONNX, no network after first download).
//!
//! Dense: nomic-embed-text-v1.5 (768-d, 8192 token context). Sparse: SPLADE,
//! loaded lazily and independently — a missing sparse model degrades hybrid
//! search to dense-only (spec §4.1), it does not fail construction.

use fastembed::{
    EmbeddingModel, InitOptions, SparseInitOptions, SparseModel, SparseTextEmbedding, TextEmbedding,
};
use std::sync::{Mutex, OnceLock};

use super::{EmbedSide, EmbeddingError, EmbeddingService, SparseVector, DENSE_DIMENSIONS};

fn cache_dir() -> std::path::PathBuf {
    if let Ok(path) = std::env::var("FASTEMBED_CACHE_PATH") {
        return std::path::PathBuf::from(path);
    }
    if let Some(dirs) = directories::ProjectDirs::from("dev", "engram", "core") {
        return dirs.cache_dir().join("fastembed");
    }
    std::path::PathBuf::from(".fastembed_cache")
}

/// `fastembed`-backed [`EmbeddingService`]. Model handles load once behind a
/// `OnceLock` and are thread-safe after that (spec §5, §9).
pub struct FastEmbedService {
    dense: OnceLock<Result<Mutex<TextEmbedding>, String>>,
    sparse: OnceLock<Result<Mutex<SparseTextEmbedding>, String>>,
}

impl Default for FastEmbedService {
    fn default() -> Self {
        Self::new()
    }
}

impl FastEmbedService {
    pub fn new() -> Self {
        Self { dense: OnceLock::new(), sparse: OnceLock::new() }
    }

    fn dense_model(&self) -> Result<std::sync::MutexGuard<'_, TextEmbedding>, EmbeddingError> {
        let result = self.dense.get_or_init(|| {
            let dir = cache_dir();
            if let Err(e) = std::fs::create_dir_all(&dir) {
                tracing::warn!("failed to create embedding cache dir {dir:?}: {e}");
            }
            let options = InitOptions::new(EmbeddingModel::NomicEmbedTextV15)
                .with_show_download_progress(true)
                .with_cache_dir(dir);
            TextEmbedding::try_new(options)
                .map(Mutex::new)
                .map_err(|e| format!("failed to initialize nomic-embed-text-v1.5: {e}"))
        });
        match result {
            Ok(m) => m.lock().map_err(|e| EmbeddingError::ModelInit(format!("lock poisoned: {e}"))),
            Err(e) => Err(EmbeddingError::ModelInit(e.clone())),
        }
    }

    fn sparse_model(&self) -> Result<std::sync::MutexGuard<'_, SparseTextEmbedding>, EmbeddingError> {
        let result = self.sparse.get_or_init(|| {
            let dir = cache_dir();
            let options = SparseInitOptions::new(SparseModel::SPLADEPPV1)
                .with_show_download_progress(true)
                .with_cache_dir(dir);
            SparseTextEmbedding::try_new(options)
                .map(Mutex::new)
                .map_err(|e| format!("failed to initialize SPLADE++ sparse model: {e}"))
        });
        match result {
            Ok(m) => m.lock().map_err(|e| EmbeddingError::ModelInit(format!("lock poisoned: {e}"))),
            Err(e) => Err(EmbeddingError::ModelInit(e.clone())),
        }
    }

    fn prefixed(text: &str, side: EmbedSide) -> String {
        match side {
            EmbedSide::Document => format!("search_document: {text}"),
            EmbedSide::Query => format!("search_query: {text}"),
        }
    }
}

impl EmbeddingService for FastEmbedService {
    fn dense(&self, text: &str, side: EmbedSide) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("text cannot be empty".into()));
        }
        let prefixed = Self::prefixed(text, side);
        let mut model = self.dense_model()?;
        let embeddings = model
            .embed(vec![prefixed], None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("no embedding returned".into()))
    }

    fn sparse(&self, text: &str) -> Result<Option<SparseVector>, EmbeddingError> {
        if text.trim().is_empty() {
            return Ok(None);
        }
        let mut model = match self.sparse_model() {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!("sparse model unavailable, degrading to dense-only: {e}");
                return Ok(None);
            }
        };
        let embeddings = model
            .embed(vec![text], None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;
        Ok(embeddings.into_iter().next().map(|e| SparseVector {
            indices: e.indices,
            values: e.values,
        }))
    }

    fn dimensions(&self) -> usize {
        DENSE_DIMENSIONS
    }
}
