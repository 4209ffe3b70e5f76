//! Search Module
//!
//! Candidate generation and fusion:
//! - lexical candidates from the FTS index (query preprocessing lives here)
//! - vector candidates from the HNSW index (feature `vector-search`)
//! - hybrid orchestration with per-query adaptive weights

mod hybrid;
pub mod query;

#[cfg(feature = "vector-search")]
pub mod vector;

pub use hybrid::{HybridConfig, HybridSearch};
pub use query::{
    DEFAULT_WEIGHTS, adaptive_weights, fts_match_expr, normalize_query, sanitize_tokens,
};

/// Similarity cutoff used during hybrid candidate generation
#[cfg(not(feature = "vector-search"))]
pub const HYBRID_THRESHOLD: f64 = 0.5;
#[cfg(feature = "vector-search")]
pub use vector::{HYBRID_THRESHOLD, VECTOR_THRESHOLD};
