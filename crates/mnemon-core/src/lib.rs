//! # Mnemon Core
//!
//! Embedded long-term memory engine for AI agents:
//!
//! - **Typed memory items** (working / episodic / semantic / procedural)
//!   with importance, privacy scopes, tags, links, and usage counters
//! - **Hybrid search**: FTS5 lexical + HNSW vector candidates fused with
//!   per-query adaptive weights and a deterministic ranking formula
//! - **Forgetting**: time/usage-decayed forget scores with advisory
//!   classification and a re-verifying batch cleanup
//! - **Spaced repetition**: feedback-driven review intervals
//! - **Context injection**: budgeted prompt fragments for LLM runtimes
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mnemon_core::{Config, Engine, MemoryType, RememberInput, SearchFilters};
//!
//! # fn main() -> mnemon_core::Result<()> {
//! let engine = Engine::open(Config::default())?;
//!
//! let item = engine.remember(&RememberInput::new(
//!     "PostgreSQL connection pooling is capped at 100",
//!     MemoryType::Semantic,
//! ))?;
//!
//! let recalled = engine.recall("connection pooling", &SearchFilters::default(), None)?;
//! assert!(recalled.items.iter().any(|i| i.id == item.id));
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `embeddings` (default): local primary embedding provider; the
//!   hashing fallback is always available
//! - `vector-search` (default): HNSW vector index
//! - `bundled-sqlite` (default): bundled SQLite with FTS5

#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod batch;
pub mod config;
pub mod embed;
pub mod engine;
pub mod error;
pub mod events;
pub mod forget;
pub mod inject;
pub mod memory;
pub mod rank;
pub mod search;
pub mod srs;
pub mod stats;
pub mod store;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use config::{Config, ConfigError, ForgetTtlHours, ProviderKind};
pub use error::{EngineError, Result};

pub use memory::{
    CandidateScore, FeedbackEvent, FeedbackKind, LinkRelation, MemoryItem, MemoryLink,
    MemoryPatch, MemoryStats, MemoryType, PrivacyScope, RememberInput, ScoredMemory,
    SearchFilters, WorkingMemoryBuffer,
};

pub use engine::{
    CleanupReport, Engine, ExportFormat, ExportResult, ForgetOutcome, HybridSearchResult,
    InjectOptions, RecallResult,
};

pub use store::{CandidatePlan, CleanupCounts, Store};

pub use embed::{Embedder, EmbeddingError};

pub use search::{HybridConfig, HybridSearch, adaptive_weights, normalize_query};

pub use forget::{ForgetAnalysis, ForgetFeatures, ForgetWeights};

pub use srs::{ReviewFeatures, adapt_interval, next_interval, recall_probability};

pub use inject::{ContextType, InjectedMessage, InjectionResult};

pub use events::{EngineEvent, EventBus};

pub use batch::{BatchConfig, BatchScheduler, MonitorSample};

pub use stats::{
    ErrorCategory, ErrorLog, ErrorRecord, ErrorSeverity, LatencyPercentiles, MetricsRegistry,
    QueryStats, SearchStatsRegistry,
};

pub use rank::{RankFeatures, RankWeights};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        Config, Engine, EngineError, EngineEvent, FeedbackKind, LinkRelation, MemoryItem,
        MemoryPatch, MemoryType, PrivacyScope, RememberInput, Result, ScoredMemory, SearchFilters,
    };
}
