//! Embedding Provider
//!
//! `text -> Vec<f32>` with two implementations behind one front:
//!
//! - **Primary**: local model inference (feature `embeddings`); may fail
//!   at init or per call.
//! - **Fallback**: deterministic hashing projection; always available.
//!
//! On primary failure the embedder falls back automatically and logs the
//! provider change once. Results are cached in an LRU keyed by a stable
//! hash of the normalized input text.

pub mod hashing;

#[cfg(feature = "embeddings")]
mod local;

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::ProviderKind;
pub use hashing::{FALLBACK_DIMENSIONS, fit_dimensions, fnv1a, hash_embedding, l2_normalize};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Provider token limit; input is truncated before embedding
pub const MAX_INPUT_TOKENS: usize = 8192;

/// Rough chars-per-token heuristic shared with the context injector
pub const CHARS_PER_TOKEN: usize = 4;

/// Model identifier reported for fallback embeddings
pub const FALLBACK_MODEL: &str = "hash-ngram-v1";

// ============================================================================
// ERROR TYPE
// ============================================================================

/// Embedding error
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum EmbeddingError {
    /// Provider failed (init, inference, lock)
    #[error("provider failed: {0}")]
    Provider(String),
    /// Input unusable even for the fallback
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

// ============================================================================
// EMBEDDER
// ============================================================================

/// Embedding front: provider selection, normalization, truncation, cache.
pub struct Embedder {
    requested: ProviderKind,
    dimensions: usize,
    cache: Mutex<LruCache<u64, Vec<f32>>>,
    /// Set on the first primary failure so the provider change is logged once
    fell_back: AtomicBool,
}

impl Embedder {
    /// Build an embedder. `dimensions_override` comes from
    /// `EMBEDDING_DIMENSIONS`; `None` keeps the provider's native size.
    pub fn new(
        requested: ProviderKind,
        dimensions_override: Option<usize>,
        cache_capacity: usize,
    ) -> Self {
        let native = match requested {
            #[cfg(feature = "embeddings")]
            ProviderKind::Primary => local::PRIMARY_DIMENSIONS,
            #[cfg(not(feature = "embeddings"))]
            ProviderKind::Primary => FALLBACK_DIMENSIONS,
            ProviderKind::Fallback => FALLBACK_DIMENSIONS,
        };
        let dimensions = dimensions_override.unwrap_or(native);
        let capacity = NonZeroUsize::new(cache_capacity.max(1)).expect("capacity >= 1");

        Self {
            requested,
            dimensions,
            cache: Mutex::new(LruCache::new(capacity)),
            fell_back: AtomicBool::new(false),
        }
    }

    /// The dimension every produced vector has
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Name of the model that would serve the next call
    pub fn model_name(&self) -> &'static str {
        #[cfg(feature = "embeddings")]
        if self.requested == ProviderKind::Primary && !self.fell_back.load(Ordering::Relaxed) {
            return local::PRIMARY_MODEL;
        }
        FALLBACK_MODEL
    }

    /// Whether any provider can serve calls. The fallback always can.
    pub fn is_available(&self) -> bool {
        true
    }

    /// Embed a text. Never fails for non-empty input: primary errors are
    /// recovered by the fallback projection.
    pub fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let normalized = normalize_text(text);
        if normalized.is_empty() {
            return Err(EmbeddingError::InvalidInput("empty text".to_string()));
        }
        let truncated = truncate_chars(&normalized, MAX_INPUT_TOKENS * CHARS_PER_TOKEN);

        let key = fnv1a(truncated.as_bytes());
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(hit) = cache.get(&key) {
                return Ok(hit.clone());
            }
        }

        let vector = self.embed_uncached(truncated);

        if let Ok(mut cache) = self.cache.lock() {
            cache.put(key, vector.clone());
        }
        Ok(vector)
    }

    fn embed_uncached(&self, text: &str) -> Vec<f32> {
        #[cfg(feature = "embeddings")]
        if self.requested == ProviderKind::Primary {
            match local::embed(text) {
                Ok(vector) => return fit_dimensions(vector, self.dimensions),
                Err(e) => {
                    if !self.fell_back.swap(true, Ordering::Relaxed) {
                        tracing::warn!("primary embedding provider failed, using fallback: {}", e);
                    }
                }
            }
        }
        hash_embedding(text, self.dimensions)
    }
}

// ============================================================================
// TEXT PREPROCESSING
// ============================================================================

/// Lowercase and collapse whitespace; the cache key is computed over this.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Truncate at a char boundary
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

// ============================================================================
// SIMILARITY
// ============================================================================

/// Cosine similarity; 0 when shapes differ or a vector is zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = (norm_a * norm_b).sqrt();
    if denom > 0.0 { dot / denom } else { 0.0 }
}

/// Serialize a vector to little-endian bytes for the embedding blob column
pub fn vector_to_bytes(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Parse an embedding blob; `None` when the length is not a multiple of 4
pub fn vector_from_bytes(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

// ============================================================================
// TESTS
// ============================================================================
