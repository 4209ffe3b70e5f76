//! Forgetting Engine
//!
//! Computes a per-item forget score and classifies deletion/review
//! candidates:
//!
//! ```text
//! F = 0.35*(1-recency) + 0.25*(1-usage) + 0.20*duplication_ratio
//!     - 0.15*importance - 0.30*pinned
//! ```
//!
//! Classification is advisory. The batch scheduler re-reads every
//! candidate inside its write transaction and re-checks the invariants
//! (notably `pinned`) before acting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::memory::{MemoryItem, MemoryType};
use crate::rank;

// ============================================================================
// WEIGHTS
// ============================================================================

/// Forget-score weights and thresholds
#[derive(Debug, Clone, Copy)]
pub struct ForgetWeights {
    pub recency: f64,
    pub usage: f64,
    pub duplication: f64,
    pub importance: f64,
    pub pinned: f64,
    /// `should_forget` and soft-delete/review selection
    pub soft_threshold: f64,
    /// Hard-delete selection in the cleanup job
    pub hard_threshold: f64,
}

impl Default for ForgetWeights {
    fn default() -> Self {
        Self {
            recency: 0.35,
            usage: 0.25,
            duplication: 0.20,
            importance: 0.15,
            pinned: 0.30,
            soft_threshold: 0.6,
            hard_threshold: 0.8,
        }
    }
}

/// Inputs to the forget score
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForgetFeatures {
    pub recency: f64,
    pub usage: f64,
    pub duplication_ratio: f64,
    pub importance: f64,
    pub pinned: bool,
}

/// One analyzed candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForgetAnalysis {
    pub memory_id: String,
    pub score: f64,
    pub should_forget: bool,
    pub reason: String,
    pub features: ForgetFeatures,
}

// ============================================================================
// SCORING
// ============================================================================

/// The forget score; higher means more forgettable. May be negative for
/// pinned or very important items.
pub fn forget_score(features: &ForgetFeatures, weights: &ForgetWeights) -> f64 {
    let pinned_bit = if features.pinned { 1.0 } else { 0.0 };
    weights.recency * (1.0 - features.recency) + weights.usage * (1.0 - features.usage)
        + weights.duplication * features.duplication_ratio
        - weights.importance * features.importance
        - weights.pinned * pinned_bit
}

/// Human-readable reason derived from which inputs crossed thresholds
fn reason_for(features: &ForgetFeatures, score: f64) -> String {
    let mut parts = Vec::new();
    if features.recency < 0.3 {
        parts.push("stale".to_string());
    }
    if features.usage < 0.2 {
        parts.push("rarely used".to_string());
    }
    if features.duplication_ratio > 0.7 {
        parts.push("duplicated".to_string());
    }
    if features.importance < 0.3 {
        parts.push("low importance".to_string());
    }
    if !features.pinned {
        parts.push("not pinned".to_string());
    }
    if parts.is_empty() {
        format!("high score (F={score:.2})")
    } else {
        parts.join(", ")
    }
}

/// Build the feature vector for one item. `duplication_ratio` is the
/// share of other same-type items in the corpus (first approximation of
/// content-level duplication).
pub fn item_features(
    item: &MemoryItem,
    type_counts: &HashMap<MemoryType, i64>,
    total_items: i64,
    now: DateTime<Utc>,
) -> ForgetFeatures {
    let same_type = type_counts.get(&item.memory_type).copied().unwrap_or(1);
    let duplication_ratio = if total_items > 0 {
        ((same_type - 1).max(0)) as f64 / total_items as f64
    } else {
        0.0
    };

    ForgetFeatures {
        recency: rank::recency_feature(item.age_days(now), item.memory_type),
        usage: rank::usage_feature(item, now),
        duplication_ratio,
        importance: item.importance,
        pinned: item.pinned,
    }
}

/// Analyze a batch of items, sorted by forget score descending.
pub fn analyze_candidates(
    items: &[MemoryItem],
    weights: &ForgetWeights,
    now: DateTime<Utc>,
) -> Vec<ForgetAnalysis> {
    let total = items.len() as i64;
    let mut type_counts: HashMap<MemoryType, i64> = HashMap::new();
    for item in items {
        *type_counts.entry(item.memory_type).or_insert(0) += 1;
    }

    let mut analyses: Vec<ForgetAnalysis> = items
        .iter()
        .map(|item| {
            let features = item_features(item, &type_counts, total, now);
            let score = forget_score(&features, weights);
            ForgetAnalysis {
                memory_id: item.id.clone(),
                should_forget: score >= weights.soft_threshold,
                reason: reason_for(&features, score),
                score,
                features,
            }
        })
        .collect();

    analyses.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.memory_id.cmp(&b.memory_id))
    });
    analyses
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::PrivacyScope;
    use chrono::Duration;

    fn item(
        id: &str,
        age_days: i64,
        importance: f64,
        views: i64,
        pinned: bool,
        now: DateTime<Utc>,
    ) -> MemoryItem {
        let created = now - Duration::days(age_days);
        MemoryItem {
            id: id.to_string(),
            memory_type: MemoryType::Episodic,
            content: format!("content {id}"),
            importance,
            privacy_scope: PrivacyScope::Private,
            created_at: created,
            last_accessed: created,
            pinned,
            tags: vec![],
            source: None,
            project_id: None,
            user_id: None,
            agent_id: None,
            view_count: views,
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
    fn test_pin_dominance() {
        // Identical items except pinned: score differs by exactly the pin weight
        let weights = ForgetWeights::default();
        let base = ForgetFeatures {
            recency: 0.4,
            usage: 0.3,
            duplication_ratio: 0.2,
            importance: 0.5,
            pinned: false,
        };
        let pinned = ForgetFeatures {
            pinned: true,
            ..base
        };
        let diff = forget_score(&base, &weights) - forget_score(&pinned, &weights);
        assert!((diff - weights.pinned).abs() < 1e-9);
    }

    #[test]
    fn test_threshold_law() {
        let weights = ForgetWeights::default();
        let now = Utc::now();
        let items = vec![
            item("mem_1_old", 400, 0.1, 0, false, now),
            item("mem_2_new", 1, 0.9, 10, false, now),
        ];
        for analysis in analyze_candidates(&items, &weights, now) {
            assert_eq!(
                analysis.should_forget,
                analysis.score >= weights.soft_threshold
            );
        }
    }

    #[test]
    fn test_scenario_ordering() {
        // A: 1 year old, importance 0.2, never viewed, unpinned
        // B: 1 day old, importance 0.8, pinned
        // C: 30 days old, importance 0.4, viewed twice
        let now = Utc::now();
        let items = vec![
            item("mem_a", 365, 0.2, 0, false, now),
            item("mem_b", 1, 0.8, 0, true, now),
            item("mem_c", 30, 0.4, 2, false, now),
        ];
        let analyses = analyze_candidates(&items, &ForgetWeights::default(), now);
        let score = |id: &str| {
            analyses
                .iter()
                .find(|a| a.memory_id == id)
                .map(|a| a.score)
                .unwrap()
        };

        let (fa, fb, fc) = (score("mem_a"), score("mem_b"), score("mem_c"));
        assert!(fa > fc && fc > fb);
        assert!(fa >= 0.6, "F_A = {fa}");
        assert!(fb < 0.3, "F_B = {fb}");

        // Sorted descending, so A comes first
        assert_eq!(analyses[0].memory_id, "mem_a");
    }

    #[test]
    fn test_reason_mentions_crossed_thresholds() {
        let now = Utc::now();
        let items = vec![item("mem_a", 365, 0.1, 0, false, now)];
        let analyses = analyze_candidates(&items, &ForgetWeights::default(), now);
        let reason = &analyses[0].reason;
        assert!(reason.contains("stale"), "reason was: {reason}");
        assert!(reason.contains("low importance"), "reason was: {reason}");
    }

    #[test]
    fn test_unpinned_stands_alone_as_reason() {
        // Nothing else crosses a threshold; being unpinned still does
        let features = ForgetFeatures {
            recency: 1.0,
            usage: 1.0,
            duplication_ratio: 0.0,
            importance: 1.0,
            pinned: false,
        };
        let score = forget_score(&features, &ForgetWeights::default());
        assert!(score < 0.0);
        assert_eq!(reason_for(&features, score), "not pinned");
    }

    #[test]
    fn test_reason_fallback_is_score() {
        let features = ForgetFeatures {
            recency: 0.5,
            usage: 0.5,
            duplication_ratio: 0.5,
            importance: 0.5,
            pinned: true,
        };
        let score = forget_score(&features, &ForgetWeights::default());
        assert!(reason_for(&features, score).starts_with("high score"));
    }

    #[test]
    fn test_duplication_ratio_counts_same_type() {
        let now = Utc::now();
        let items = vec![
            item("mem_1", 10, 0.5, 0, false, now),
            item("mem_2", 10, 0.5, 0, false, now),
            item("mem_3", 10, 0.5, 0, false, now),
        ];
        let analyses = analyze_candidates(&items, &ForgetWeights::default(), now);
        for a in &analyses {
            assert!((a.features.duplication_ratio - 2.0 / 3.0).abs() < 1e-9);
        }
    }
}
