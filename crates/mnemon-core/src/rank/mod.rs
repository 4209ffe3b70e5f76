//! Ranking Engine
//!
//! Pure feature computation and weighted scoring over search candidates.
//! No I/O: the store hands rows in, scores come out.
//!
//! Final score (weights overridable):
//!
//! ```text
//! score = 0.50*relevance + 0.20*recency + 0.20*importance + 0.10*usage
//!         - 0.15*duplication_penalty
//! ```
//!
//! Ordering is by descending score, ties broken by `created_at` desc then
//! id ascending, which makes result ordering deterministic for a fixed
//! database state.

use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::memory::{MemoryItem, MemoryType};

// ============================================================================
// WEIGHTS
// ============================================================================

/// Linear ranking weights
#[derive(Debug, Clone, Copy)]
pub struct RankWeights {
    pub relevance: f64,
    pub recency: f64,
    pub importance: f64,
    pub usage: f64,
    /// Subtracted, not added
    pub duplication: f64,
}

impl Default for RankWeights {
    fn default() -> Self {
        Self {
            relevance: 0.50,
            recency: 0.20,
            importance: 0.20,
            usage: 0.10,
            duplication: 0.15,
        }
    }
}

/// Per-candidate feature vector, every component in [0, 1]
#[derive(Debug, Clone, Copy, Default)]
pub struct RankFeatures {
    pub relevance: f64,
    pub recency: f64,
    pub importance: f64,
    pub usage: f64,
    pub duplication_penalty: f64,
}

// ============================================================================
// FEATURES
// ============================================================================

/// Recency half-life in days per memory type
pub fn half_life_days(memory_type: MemoryType) -> f64 {
    match memory_type {
        MemoryType::Working => 2.0,
        MemoryType::Episodic => 30.0,
        MemoryType::Procedural => 90.0,
        MemoryType::Semantic => 180.0,
    }
}

/// `exp(-ln2 * age_days / half_life)`; newer items score strictly higher
pub fn recency_feature(age_days: f64, memory_type: MemoryType) -> f64 {
    let half_life = half_life_days(memory_type);
    (-std::f64::consts::LN_2 * age_days.max(0.0) / half_life).exp()
}

/// Stored importance plus a small type boost and a pinned boost, clipped.
/// Semantic knowledge outranks procedural outranks episodic outranks
/// working, all else equal.
pub fn importance_feature(item: &MemoryItem) -> f64 {
    let type_boost = match item.memory_type {
        MemoryType::Semantic => 0.10,
        MemoryType::Procedural => 0.075,
        MemoryType::Episodic => 0.05,
        MemoryType::Working => 0.025,
    };
    let pin_boost = if item.pinned { 0.2 } else { 0.0 };
    (item.importance + type_boost + pin_boost).clamp(0.0, 1.0)
}

/// Empirical ceiling for the log-counter mix
const USAGE_CEILING: f64 = 10.0;

/// Usage floor when no signal exists
const USAGE_FLOOR: f64 = 0.1;

/// Usage signal: the better of access recency and a log-scaled counter
/// mix, floored at 0.1. Monotone in every counter.
pub fn usage_feature(item: &MemoryItem, now: DateTime<Utc>) -> f64 {
    let access = (-item.days_since_access(now) / 30.0).exp();
    let counters = ((1.0 + item.view_count as f64).ln()
        + 2.0 * (1.0 + item.cite_count as f64).ln()
        + 0.5 * (1.0 + item.edit_count as f64).ln())
        / USAGE_CEILING;

    access.max(counters.clamp(0.0, 1.0)).max(USAGE_FLOOR).min(1.0)
}

// ============================================================================
// DUPLICATION PENALTY
// ============================================================================

fn char_trigrams(text: &str) -> HashSet<String> {
    let lowered = text.to_lowercase();
    let chars: Vec<char> = lowered.chars().collect();
    if chars.is_empty() {
        return HashSet::new();
    }
    let window = chars.len().min(3);
    chars
        .windows(window)
        .map(|w| w.iter().collect::<String>())
        .collect()
}

/// Character 3-gram Jaccard similarity in [0, 1]
pub fn trigram_jaccard(a: &str, b: &str) -> f64 {
    let ga = char_trigrams(a);
    let gb = char_trigrams(b);
    if ga.is_empty() || gb.is_empty() {
        return 0.0;
    }
    let intersection = ga.intersection(&gb).count() as f64;
    let union = (ga.len() + gb.len()) as f64 - intersection;
    if union == 0.0 { 0.0 } else { intersection / union }
}

/// Max similarity between `content` and the already-selected contents.
/// Zero when the selection is empty.
pub fn duplication_penalty(content: &str, selected: &[&str]) -> f64 {
    selected
        .iter()
        .map(|s| trigram_jaccard(content, s))
        .fold(0.0, f64::max)
}

// ============================================================================
// SCORING
// ============================================================================

/// Weighted linear score; may be negative
pub fn final_score(features: &RankFeatures, weights: &RankWeights) -> f64 {
    weights.relevance * features.relevance
        + weights.recency * features.recency
        + weights.importance * features.importance
        + weights.usage * features.usage
        - weights.duplication * features.duplication_penalty
}

/// Context scalar used by hybrid fusion when the native FTS rank drives
/// the text side: recency/importance/usage minus the duplication penalty,
/// renormalized so the result stays in roughly [-0.3, 1].
pub fn auxiliary_scalar(features: &RankFeatures) -> f64 {
    0.4 * features.recency + 0.4 * features.importance + 0.2 * features.usage
        - 0.3 * features.duplication_penalty
}

/// Assemble the non-relevance features for an item
pub fn item_features(item: &MemoryItem, now: DateTime<Utc>) -> RankFeatures {
    RankFeatures {
        relevance: 0.0,
        recency: recency_feature(item.age_days(now), item.memory_type),
        importance: importance_feature(item),
        usage: usage_feature(item, now),
        duplication_penalty: 0.0,
    }
}

/// Deterministic ordering: score desc, created_at desc, id asc
pub fn compare_scored(
    a_score: f64,
    a_item: &MemoryItem,
    b_score: f64,
    b_item: &MemoryItem,
) -> std::cmp::Ordering {
    b_score
        .partial_cmp(&a_score)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| b_item.created_at.cmp(&a_item.created_at))
        .then_with(|| a_item.id.cmp(&b_item.id))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::PrivacyScope;

    fn item(memory_type: MemoryType, importance: f64, pinned: bool) -> MemoryItem {
        let now = Utc::now();
        MemoryItem {
            id: "mem_0_test".to_string(),
            memory_type,
            content: "test".to_string(),
            importance,
            privacy_scope: PrivacyScope::Private,
            created_at: now,
            last_accessed: now,
            pinned,
            tags: vec![],
            source: None,
            project_id: None,
            user_id: None,
            agent_id: None,
            view_count: 0,
            cite_count: 0,
            edit_count: 0,
            deleted_at: None,
            review_interval_days: 1,
            next_review_at: None,
            review_count: 0,
            success_count: 0,
            has_embedding: false,
            embedding_model: None,
        }
    }

    #[test]
    fn test_spec_worked_example() {
        // {relevance:0.9, recency:0.8, importance:0.6, usage:0.4, dup:0.2} -> 0.74
        let features = RankFeatures {
            relevance: 0.9,
            recency: 0.8,
            importance: 0.6,
            usage: 0.4,
            duplication_penalty: 0.2,
        };
        let score = final_score(&features, &RankWeights::default());
        assert!((score - 0.74).abs() < 1e-5);
    }

    #[test]
    fn test_weight_law() {
        // finalScore(f) - finalScore(g) = sum w_i*(f_i - g_i) - w_dup*(dup_f - dup_g)
        let w = RankWeights::default();
        let f = RankFeatures {
            relevance: 0.7,
            recency: 0.3,
            importance: 0.9,
            usage: 0.2,
            duplication_penalty: 0.5,
        };
        let g = RankFeatures {
            relevance: 0.1,
            recency: 0.8,
            importance: 0.4,
            usage: 0.6,
            duplication_penalty: 0.0,
        };
        let lhs = final_score(&f, &w) - final_score(&g, &w);
        let rhs = w.relevance * (f.relevance - g.relevance)
            + w.recency * (f.recency - g.recency)
            + w.importance * (f.importance - g.importance)
            + w.usage * (f.usage - g.usage)
            - w.duplication * (f.duplication_penalty - g.duplication_penalty);
        assert!((lhs - rhs).abs() < 1e-9);
    }

    #[test]
    fn test_recency_monotone_in_age() {
        for t in MemoryType::ALL {
            let newer = recency_feature(1.0, t);
            let older = recency_feature(10.0, t);
            assert!(newer > older, "recency must fall with age for {t}");
        }
    }

    #[test]
    fn test_recency_half_life() {
        // At exactly one half-life the feature is 0.5
        let r = recency_feature(30.0, MemoryType::Episodic);
        assert!((r - 0.5).abs() < 1e-9);
        let r = recency_feature(2.0, MemoryType::Working);
        assert!((r - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_usage_monotone_in_views() {
        let now = Utc::now();
        let mut a = item(MemoryType::Semantic, 0.5, false);
        a.last_accessed = now - chrono::Duration::days(365);
        a.created_at = a.last_accessed;
        let mut prev = usage_feature(&a, now);
        for views in [1, 2, 5, 20, 100, 1000] {
            a.view_count = views;
            let next = usage_feature(&a, now);
            assert!(next >= prev, "usage dropped at view_count={views}");
            prev = next;
        }
    }

    #[test]
    fn test_usage_floor() {
        let now = Utc::now();
        let mut a = item(MemoryType::Semantic, 0.5, false);
        a.last_accessed = now - chrono::Duration::days(3650);
        a.created_at = a.last_accessed;
        assert!((usage_feature(&a, now) - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_importance_pinned_boost() {
        let plain = item(MemoryType::Semantic, 0.5, false);
        let pinned = item(MemoryType::Semantic, 0.5, true);
        let diff = importance_feature(&pinned) - importance_feature(&plain);
        assert!((diff - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_importance_type_order() {
        let semantic = importance_feature(&item(MemoryType::Semantic, 0.5, false));
        let procedural = importance_feature(&item(MemoryType::Procedural, 0.5, false));
        let episodic = importance_feature(&item(MemoryType::Episodic, 0.5, false));
        let working = importance_feature(&item(MemoryType::Working, 0.5, false));
        assert!(semantic > procedural && procedural > episodic && episodic > working);
    }

    #[test]
    fn test_importance_clipped() {
        let boosted = item(MemoryType::Semantic, 0.95, true);
        assert!(importance_feature(&boosted) <= 1.0);
    }

    #[test]
    fn test_trigram_jaccard() {
        assert!((trigram_jaccard("hello world", "hello world") - 1.0).abs() < 1e-9);
        assert_eq!(trigram_jaccard("hello", ""), 0.0);
        let near = trigram_jaccard("the search engine", "the search engines");
        let far = trigram_jaccard("the search engine", "completely unrelated");
        assert!(near > far);
    }

    #[test]
    fn test_duplication_penalty_empty_selection() {
        assert_eq!(duplication_penalty("anything", &[]), 0.0);
    }

    #[test]
    fn test_compare_scored_tiebreaks() {
        let mut a = item(MemoryType::Semantic, 0.5, false);
        let mut b = item(MemoryType::Semantic, 0.5, false);
        a.id = "mem_1_aaaaaaaa".to_string();
        b.id = "mem_1_bbbbbbbb".to_string();
        let t = Utc::now();
        a.created_at = t;
        b.created_at = t;

        // Same score, same created_at: id ascending
        assert_eq!(compare_scored(0.5, &a, 0.5, &b), std::cmp::Ordering::Less);

        // Newer created_at wins the tie
        b.created_at = t + chrono::Duration::seconds(5);
        assert_eq!(
            compare_scored(0.5, &a, 0.5, &b),
            std::cmp::Ordering::Greater
        );

        // Score dominates everything
        assert_eq!(compare_scored(0.9, &a, 0.5, &b), std::cmp::Ordering::Less);
    }
}
