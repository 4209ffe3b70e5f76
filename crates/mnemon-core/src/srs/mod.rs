//! Spaced-Repetition Scheduler
//!
//! Grows per-item review intervals from feedback features:
//!
//! ```text
//! new = ceil(current * (1 + 0.6*importance + 0.4*usage
//!                         + 0.5*helpful - 0.7*bad))
//! ```
//!
//! clamped to at least one day. Recall probability decays exponentially
//! with time since review; a memory is due when it drops below the
//! review threshold.

use serde::{Deserialize, Serialize};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Review is due when recall probability falls below this
pub const REVIEW_THRESHOLD: f64 = 0.7;

/// Success rate above which intervals are stretched
const STRETCH_RATE: f64 = 0.8;
/// Success rate below which intervals are shrunk
const SHRINK_RATE: f64 = 0.5;

// ============================================================================
// FEATURES
// ============================================================================

/// Inputs to interval growth, all in [0, 1]
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewFeatures {
    pub importance: f64,
    pub usage: f64,
    pub helpful_feedback: f64,
    pub bad_feedback: f64,
}

// ============================================================================
// SCHEDULING
// ============================================================================

/// Next review interval in whole days, always >= 1
pub fn next_interval(current_interval_days: i64, features: &ReviewFeatures) -> i64 {
    let multiplier = 1.0 + 0.6 * features.importance + 0.4 * features.usage
        + 0.5 * features.helpful_feedback
        - 0.7 * features.bad_feedback;
    let new = (current_interval_days.max(1) as f64 * multiplier).ceil() as i64;
    new.max(1)
}

/// Probability of successful recall `elapsed_days` after the last review
pub fn recall_probability(elapsed_days: f64, interval_days: i64) -> f64 {
    let interval = interval_days.max(1) as f64;
    (-elapsed_days.max(0.0) / interval).exp()
}

/// Whether a review is due under the default threshold
pub fn is_due(elapsed_days: f64, interval_days: i64) -> bool {
    recall_probability(elapsed_days, interval_days) < REVIEW_THRESHOLD
}

/// Adaptive correction from a recent recall history: stretch intervals
/// when recall is reliably succeeding, shrink them when it is failing.
pub fn adapt_interval(interval_days: i64, successes: i64, reviews: i64) -> i64 {
    if reviews == 0 {
        return interval_days.max(1);
    }
    let rate = successes as f64 / reviews as f64;
    let adjusted = if rate > STRETCH_RATE {
        interval_days as f64 * 1.2
    } else if rate < SHRINK_RATE {
        interval_days as f64 * 0.8
    } else {
        interval_days as f64
    };
    (adjusted.round() as i64).max(1)
}

// ============================================================================
// TESTS
// ============================================================================
