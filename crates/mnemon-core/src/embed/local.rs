//! Primary Embedding Provider
//!
//! Local inference with fastembed (nomic-embed-text-v1.5, 768 dimensions,
//! 8192 token context). The model is process-global behind a `OnceLock`;
//! initialization happens on first use and its failure is remembered so
//! every later call can fall back cheaply.

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::{Mutex, MutexGuard, OnceLock};

use super::EmbeddingError;

/// Native dimension of the primary provider
pub const PRIMARY_DIMENSIONS: usize = 768;

/// Model identifier reported in embedding rows
pub const PRIMARY_MODEL: &str = "nomic-ai/nomic-embed-text-v1.5";

static MODEL: OnceLock<Result<Mutex<TextEmbedding>, String>> = OnceLock::new();

fn cache_dir() -> std::path::PathBuf {
    if let Ok(path) = std::env::var("FASTEMBED_CACHE_PATH") {
        return std::path::PathBuf::from(path);
    }
    std::path::PathBuf::from(".fastembed_cache")
}

fn model() -> Result<MutexGuard<'static, TextEmbedding>, EmbeddingError> {
    let result = MODEL.get_or_init(|| {
        let dir = cache_dir();
        if let Err(e) = std::fs::create_dir_all(&dir) {
            tracing::warn!("failed to create model cache dir {:?}: {}", dir, e);
        }

        let options = InitOptions::new(EmbeddingModel::NomicEmbedTextV15)
            .with_show_download_progress(false)
            .with_cache_dir(dir);

        TextEmbedding::try_new(options)
            .map(Mutex::new)
            .map_err(|e| format!("primary embedding model init failed: {e}"))
    });

    match result {
        Ok(m) => m
            .lock()
            .map_err(|e| EmbeddingError::Provider(format!("model lock poisoned: {e}"))),
        Err(e) => Err(EmbeddingError::Provider(e.clone())),
    }
}

/// Whether the primary model is loadable right now.
pub fn is_available() -> bool {
    model().is_ok()
}

/// Embed one text with the primary model. The caller has already
/// normalized and truncated the input.
pub fn embed(text: &str) -> Result<Vec<f32>, EmbeddingError> {
    let mut m = model()?;
    let mut vectors = m
        .embed(vec![text], None)
        .map_err(|e| EmbeddingError::Provider(e.to_string()))?;

    vectors
        .pop()
        .ok_or_else(|| EmbeddingError::Provider("no embedding produced".to_string()))
}
