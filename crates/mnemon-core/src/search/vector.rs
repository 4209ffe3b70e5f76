//! Vector Candidate Generation
//!
//! HNSW approximate nearest-neighbor index over item embeddings
//! (USearch, cosine metric). Similarity is normalized to
//! `clamp(1 - distance, 0, 1)` at this boundary; everything downstream
//! consumes [0, 1].

use std::collections::HashMap;
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Similarity cutoff used during hybrid candidate generation
pub const HYBRID_THRESHOLD: f64 = 0.5;

/// Similarity cutoff for pure vector calls
pub const VECTOR_THRESHOLD: f64 = 0.7;

/// HNSW connectivity (higher = better recall, more memory)
const CONNECTIVITY: usize = 16;
const EXPANSION_ADD: usize = 128;
const EXPANSION_SEARCH: usize = 64;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Vector search error
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum VectorSearchError {
    #[error("index creation failed: {0}")]
    IndexCreation(String),
    #[error("failed to add vector: {0}")]
    IndexAdd(String),
    #[error("search failed: {0}")]
    IndexSearch(String),
    #[error("invalid dimensions: expected {expected}, got {got}")]
    InvalidDimensions { expected: usize, got: usize },
}

// ============================================================================
// VECTOR ENGINE
// ============================================================================

/// In-memory HNSW index keyed by memory id
pub struct VectorEngine {
    index: Index,
    dimensions: usize,
    key_to_id: HashMap<String, u64>,
    id_to_key: HashMap<u64, String>,
    next_id: u64,
}

impl VectorEngine {
    pub fn new(dimensions: usize) -> Result<Self, VectorSearchError> {
        let options = IndexOptions {
            dimensions,
            metric: MetricKind::Cos,
            quantization: ScalarKind::F32,
            connectivity: CONNECTIVITY,
            expansion_add: EXPANSION_ADD,
            expansion_search: EXPANSION_SEARCH,
            multi: false,
        };

        let index =
            Index::new(&options).map_err(|e| VectorSearchError::IndexCreation(e.to_string()))?;

        Ok(Self {
            index,
            dimensions,
            key_to_id: HashMap::new(),
            id_to_key: HashMap::new(),
            next_id: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.index.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn contains(&self, key: &str) -> bool {
        self.key_to_id.contains_key(key)
    }

    fn check_dimensions(&self, vector: &[f32]) -> Result<(), VectorSearchError> {
        if vector.len() != self.dimensions {
            return Err(VectorSearchError::InvalidDimensions {
                expected: self.dimensions,
                got: vector.len(),
            });
        }
        Ok(())
    }

    /// Insert or replace the vector for a memory id.
    pub fn add(&mut self, key: &str, vector: &[f32]) -> Result<(), VectorSearchError> {
        self.check_dimensions(vector)?;

        if let Some(&existing) = self.key_to_id.get(key) {
            self.index
                .remove(existing)
                .map_err(|e| VectorSearchError::IndexAdd(e.to_string()))?;
            self.reserve_for_one()?;
            self.index
                .add(existing, vector)
                .map_err(|e| VectorSearchError::IndexAdd(e.to_string()))?;
            return Ok(());
        }

        self.reserve_for_one()?;
        let id = self.next_id;
        self.next_id += 1;
        self.index
            .add(id, vector)
            .map_err(|e| VectorSearchError::IndexAdd(e.to_string()))?;
        self.key_to_id.insert(key.to_string(), id);
        self.id_to_key.insert(id, key.to_string());
        Ok(())
    }

    // usearch requires reserve() before add() or it may fault
    fn reserve_for_one(&self) -> Result<(), VectorSearchError> {
        let capacity = self.index.capacity();
        if self.index.size() >= capacity {
            let next = std::cmp::max(capacity * 2, 16);
            self.index
                .reserve(next)
                .map_err(|e| VectorSearchError::IndexCreation(e.to_string()))?;
        }
        Ok(())
    }

    /// Remove a memory id; returns whether it was present.
    pub fn remove(&mut self, key: &str) -> Result<bool, VectorSearchError> {
        match self.key_to_id.remove(key) {
            Some(id) => {
                self.id_to_key.remove(&id);
                self.index
                    .remove(id)
                    .map_err(|e| VectorSearchError::IndexAdd(e.to_string()))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Nearest neighbors above `threshold`, as `(memory_id, similarity)`
    /// with similarity in [0, 1].
    pub fn search(
        &self,
        query: &[f32],
        limit: usize,
        threshold: f64,
    ) -> Result<Vec<(String, f64)>, VectorSearchError> {
        self.check_dimensions(query)?;

        if self.is_empty() {
            return Ok(vec![]);
        }

        let matches = self
            .index
            .search(query, limit)
            .map_err(|e| VectorSearchError::IndexSearch(e.to_string()))?;

        let mut results = Vec::with_capacity(matches.keys.len());
        for (key, distance) in matches.keys.iter().zip(matches.distances.iter()) {
            if let Some(memory_id) = self.id_to_key.get(key) {
                let similarity = (1.0 - *distance as f64).clamp(0.0, 1.0);
                if similarity >= threshold {
                    results.push((memory_id.clone(), similarity));
                }
            }
        }

        Ok(results)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const DIMS: usize = 64;

    fn test_vector(seed: f32) -> Vec<f32> {
        let mut v: Vec<f32> = (0..DIMS)
            .map(|i| ((i as f32 + seed) / DIMS as f32).sin())
            .collect();
        crate::embed::l2_normalize(&mut v);
        v
    }

    #[test]
    fn test_add_and_search() {
        let mut engine = VectorEngine::new(DIMS).unwrap();
        engine.add("mem_1", &test_vector(1.0)).unwrap();
        engine.add("mem_2", &test_vector(2.0)).unwrap();
        engine.add("mem_3", &test_vector(50.0)).unwrap();

        assert_eq!(engine.len(), 3);
        let results = engine.search(&test_vector(1.0), 3, 0.0).unwrap();
        assert_eq!(results[0].0, "mem_1");
        assert!(results[0].1 > 0.99);
    }

    #[test]
    fn test_similarity_in_unit_range() {
        let mut engine = VectorEngine::new(DIMS).unwrap();
        for i in 0..10 {
            engine.add(&format!("mem_{i}"), &test_vector(i as f32)).unwrap();
        }
        for (_, similarity) in engine.search(&test_vector(3.0), 10, 0.0).unwrap() {
            assert!((0.0..=1.0).contains(&similarity));
        }
    }

    #[test]
    fn test_threshold_filters() {
        let mut engine = VectorEngine::new(DIMS).unwrap();
        engine.add("near", &test_vector(1.0)).unwrap();
        engine.add("far", &test_vector(400.0)).unwrap();

        let all = engine.search(&test_vector(1.0), 10, 0.0).unwrap();
        let strict = engine.search(&test_vector(1.0), 10, 0.99).unwrap();
        assert!(all.len() >= strict.len());
        assert!(strict.iter().any(|(k, _)| k == "near"));
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let mut engine = VectorEngine::new(DIMS).unwrap();
        let wrong = vec![1.0f32; DIMS + 1];
        assert!(matches!(
            engine.add("mem_1", &wrong),
            Err(VectorSearchError::InvalidDimensions { .. })
        ));
        assert!(engine.search(&wrong, 5, 0.0).is_err());
    }

    #[test]
    fn test_remove_and_update() {
        let mut engine = VectorEngine::new(DIMS).unwrap();
        engine.add("mem_1", &test_vector(1.0)).unwrap();
        assert!(engine.contains("mem_1"));

        // Replacing keeps the count stable
        engine.add("mem_1", &test_vector(2.0)).unwrap();
        assert_eq!(engine.len(), 1);

        assert!(engine.remove("mem_1").unwrap());
        assert!(!engine.remove("mem_1").unwrap());
        assert!(!engine.contains("mem_1"));
    }

    #[test]
    fn test_empty_index_returns_nothing() {
        let engine = VectorEngine::new(DIMS).unwrap();
        assert!(engine.search(&test_vector(1.0), 5, 0.0).unwrap().is_empty());
    }
}
