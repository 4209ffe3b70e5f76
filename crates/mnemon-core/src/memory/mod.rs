//! Memory module - core types and result shapes

mod item;

pub use item::{
    FeedbackEvent, FeedbackKind, LinkRelation, MemoryItem, MemoryLink, MemoryPatch, MemoryType,
    PrivacyScope, RememberInput, SearchFilters, WorkingMemoryBuffer, new_memory_id, normalize_tags,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// SEARCH RESULT SHAPES
// ============================================================================

/// How a candidate was produced. Tagged so the ranking engine always
/// receives fully specified features instead of duck-typed rows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum CandidateScore {
    /// Lexical match only; `rank` is the normalized FTS score in [0, 1]
    Text { rank: f64 },
    /// Vector match only; `similarity` in [0, 1]
    Vector { similarity: f64 },
    /// Found by both sides of the hybrid search
    Hybrid { rank: f64, similarity: f64 },
}

impl CandidateScore {
    /// Best available relevance signal in [0, 1]
    pub fn relevance(&self) -> f64 {
        match self {
            CandidateScore::Text { rank } => *rank,
            CandidateScore::Vector { similarity } => *similarity,
            CandidateScore::Hybrid { rank, similarity } => rank.max(*similarity),
        }
    }
}

/// A ranked search hit
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredMemory {
    #[serde(flatten)]
    pub item: MemoryItem,
    /// Final fused score; may be negative
    pub score: f64,
    pub candidate: CandidateScore,
}

/// Aggregate statistics over the store
#[non_exhaustive]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub total_items: i64,
    pub by_type: std::collections::BTreeMap<String, i64>,
    pub pinned_items: i64,
    pub soft_deleted_items: i64,
    pub items_with_embeddings: i64,
    pub items_due_for_review: i64,
    pub database_bytes: u64,
    pub oldest_memory: Option<DateTime<Utc>>,
    pub newest_memory: Option<DateTime<Utc>>,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_relevance() {
        assert_eq!(CandidateScore::Text { rank: 0.4 }.relevance(), 0.4);
        assert_eq!(CandidateScore::Vector { similarity: 0.8 }.relevance(), 0.8);
        assert_eq!(
            CandidateScore::Hybrid {
                rank: 0.4,
                similarity: 0.8
            }
            .relevance(),
            0.8
        );
    }
}
