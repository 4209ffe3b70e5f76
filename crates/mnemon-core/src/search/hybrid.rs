//! Hybrid Search
//!
//! Orchestrates lexical and vector candidate generation, fuses with the
//! ranking engine, and keeps per-query adaptive-weight and hit
//! statistics.
//!
//! Fusion per merged candidate:
//!
//! ```text
//! score = w_text*text_rank + w_vec*similarity + 0.3*rank_scalar
//! ```
//!
//! where the rank scalar combines recency/importance/usage minus the
//! duplication penalty against results already selected. Ordering is
//! deterministic for a fixed database state and query.

use chrono::Utc;
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use crate::embed::Embedder;
use crate::error::Result;
use crate::memory::{CandidateScore, MemoryItem, ScoredMemory, SearchFilters};
use crate::rank;
use crate::stats::SearchStatsRegistry;
use crate::store::{CandidatePlan, Store};

use super::HYBRID_THRESHOLD;
use super::query::{adaptive_weights, fts_match_expr, normalize_query, sanitize_tokens};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Hybrid search configuration
#[derive(Debug, Clone)]
pub struct HybridConfig {
    /// Each side is asked for `multiplier * limit` candidates
    pub candidate_multiplier: usize,
    /// Weight of the rank scalar added on top of the lexical/vector mix
    pub rank_scalar_weight: f64,
    /// Capacity of the per-query weight memo
    pub weight_memo_capacity: usize,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            candidate_multiplier: 2,
            rank_scalar_weight: 0.3,
            weight_memo_capacity: 256,
        }
    }
}

// ============================================================================
// HYBRID SEARCH
// ============================================================================

/// Hybrid searcher over one store/embedder pair
pub struct HybridSearch {
    store: Arc<Store>,
    embedder: Arc<Embedder>,
    config: HybridConfig,
    weight_memo: Mutex<LruCache<String, (f64, f64)>>,
    stats: Arc<SearchStatsRegistry>,
}

impl HybridSearch {
    pub fn new(store: Arc<Store>, embedder: Arc<Embedder>, stats: Arc<SearchStatsRegistry>) -> Self {
        Self::with_config(store, embedder, stats, HybridConfig::default())
    }

    pub fn with_config(
        store: Arc<Store>,
        embedder: Arc<Embedder>,
        stats: Arc<SearchStatsRegistry>,
        config: HybridConfig,
    ) -> Self {
        let capacity =
            NonZeroUsize::new(config.weight_memo_capacity.max(1)).expect("capacity >= 1");
        Self {
            store,
            embedder,
            config,
            weight_memo: Mutex::new(LruCache::new(capacity)),
            stats,
        }
    }

    /// Memoized adaptive weights for a normalized query
    pub fn weights_for(&self, normalized: &str) -> (f64, f64) {
        if let Ok(mut memo) = self.weight_memo.lock() {
            if let Some(hit) = memo.get(normalized) {
                return *hit;
            }
            let weights = adaptive_weights(normalized);
            memo.put(normalized.to_string(), weights);
            return weights;
        }
        adaptive_weights(normalized)
    }

    /// Run the hybrid pipeline. `weights` overrides the adaptive mix
    /// (values are renormalized to sum to 1).
    pub fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: usize,
        weights: Option<(f64, f64)>,
    ) -> Result<Vec<ScoredMemory>> {
        let normalized = normalize_query(query);
        if normalized.is_empty() && filters.is_empty() {
            return Ok(vec![]);
        }

        let (w_text, w_vec) = match weights {
            Some((t, v)) if t + v > 0.0 => (t / (t + v), v / (t + v)),
            _ => self.weights_for(&normalized),
        };

        let tokens = sanitize_tokens(&normalized);
        let fetch = limit.max(1) * self.config.candidate_multiplier.max(1);
        let plan = CandidatePlan {
            match_all: tokens.is_empty(),
            fts_expr: fts_match_expr(&tokens),
            terms: tokens,
            filters: filters.clone(),
            limit: fetch,
        };

        // Both candidate generators run concurrently; the vector side
        // embeds the query first and is skipped entirely when that fails.
        let embed_query = self.store.vector_available() && !normalized.is_empty();
        let (text_result, vector_hits) = std::thread::scope(|scope| {
            let text_handle = scope.spawn(|| self.store.text_candidates(&plan));

            let vector_hits = if embed_query {
                match self.embedder.embed(&normalized) {
                    Ok(vector) => self
                        .store
                        .vector_candidates(&vector, filters, fetch, HYBRID_THRESHOLD)
                        .unwrap_or_else(|e| {
                            tracing::warn!("vector candidates failed: {}", e);
                            vec![]
                        }),
                    Err(e) => {
                        tracing::warn!("query embedding failed, text-only search: {}", e);
                        vec![]
                    }
                }
            } else {
                vec![]
            };

            let text_result = match text_handle.join() {
                Ok(result) => result,
                Err(_) => Err(crate::error::EngineError::Fatal(
                    "text candidate thread panicked".into(),
                )),
            };
            (text_result, vector_hits)
        });
        let text_hits = text_result?;

        let text_count = text_hits.len();
        let vector_count = vector_hits.len();

        // Merge by id, keeping the strongest evidence from each side
        let mut merged: HashMap<String, (MemoryItem, Option<f64>, Option<f64>)> = HashMap::new();
        for (item, rank) in text_hits {
            merged.insert(item.id.clone(), (item, Some(rank), None));
        }
        for (item, similarity) in vector_hits {
            merged
                .entry(item.id.clone())
                .and_modify(|entry| entry.2 = Some(similarity))
                .or_insert((item, None, Some(similarity)));
        }

        let now = Utc::now();
        let mut candidates: Vec<(MemoryItem, CandidateScore, rank::RankFeatures, f64)> = merged
            .into_values()
            .map(|(item, text_rank, similarity)| {
                let candidate = match (text_rank, similarity) {
                    (Some(rank), Some(similarity)) => CandidateScore::Hybrid { rank, similarity },
                    (Some(rank), None) => CandidateScore::Text { rank },
                    (None, Some(similarity)) => CandidateScore::Vector { similarity },
                    (None, None) => CandidateScore::Text { rank: 0.0 },
                };
                let base = w_text * text_rank.unwrap_or(0.0) + w_vec * similarity.unwrap_or(0.0);
                let features = rank::item_features(&item, now);
                (item, candidate, features, base)
            })
            .collect();

        // First pass: order without the duplication penalty
        candidates.sort_by(|a, b| {
            let a_score = a.3 + self.config.rank_scalar_weight * rank::auxiliary_scalar(&a.2);
            let b_score = b.3 + self.config.rank_scalar_weight * rank::auxiliary_scalar(&b.2);
            rank::compare_scored(a_score, &a.0, b_score, &b.0)
        });

        // Second pass: greedy selection, penalizing near-duplicates of
        // what was already taken
        let mut selected: Vec<String> = Vec::new();
        let mut results: Vec<ScoredMemory> = Vec::new();
        for (item, candidate, mut features, base) in candidates {
            let selected_refs: Vec<&str> = selected.iter().map(|s| s.as_str()).collect();
            features.duplication_penalty = rank::duplication_penalty(&item.content, &selected_refs);
            let score = base + self.config.rank_scalar_weight * rank::auxiliary_scalar(&features);
            selected.push(item.content.clone());
            results.push(ScoredMemory {
                item,
                score,
                candidate,
            });
        }

        results.sort_by(|a, b| rank::compare_scored(a.score, &a.item, b.score, &b.item));
        results.truncate(limit);

        self.stats.record(&normalized, text_count, vector_count);
        Ok(results)
    }
}

// ============================================================================
// TESTS
// ============================================================================
