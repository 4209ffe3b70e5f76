//! Engine Root
//!
//! Owns the store, embedder, search pipeline, event bus, and metrics,
//! and exposes the operations the tool dispatcher routes to. Every
//! method is blocking; async callers offload to a worker task.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::embed::Embedder;
use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, EventBus};
use crate::forget::{self, ForgetWeights};
use crate::inject::{self, ContextType, InjectionResult};
use crate::memory::{
    FeedbackKind, LinkRelation, MemoryItem, MemoryPatch, MemoryStats, MemoryType, RememberInput,
    ScoredMemory, SearchFilters,
};
use crate::search::HybridSearch;
use crate::stats::MetricsRegistry;
use crate::store::{CleanupCounts, Store};

// ============================================================================
// RESULT SHAPES
// ============================================================================

/// Result of a `recall` call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecallResult {
    pub items: Vec<MemoryItem>,
    pub total_count: usize,
    /// Milliseconds spent searching
    pub query_time: f64,
}

/// Result of a `hybrid_search` call, scores included
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HybridSearchResult {
    pub items: Vec<ScoredMemory>,
    pub total_count: usize,
    pub query_time: f64,
    pub search_type: String,
}

/// Result of a `forget` call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForgetOutcome {
    pub success: bool,
    pub message: String,
}

/// Export formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
    Markdown,
}

impl ExportFormat {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            "markdown" | "md" => Ok(ExportFormat::Markdown),
            other => Err(EngineError::Validation(format!(
                "unknown export format: {other}"
            ))),
        }
    }
}

/// Result of an `export` call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportResult {
    pub data: String,
    pub count: usize,
}

/// Options for `inject_context`. The wire names mix conventions; they
/// are preserved exactly for client compatibility. No
/// `deny_unknown_fields` here: the dispatcher flattens this struct into
/// the tool arguments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InjectOptions {
    pub token_budget: Option<usize>,
    pub max_memories: Option<usize>,
    #[serde(rename = "contextType")]
    pub context_type: Option<ContextType>,
    #[serde(rename = "memoryTypes")]
    pub memory_types: Option<Vec<MemoryType>>,
    #[serde(rename = "recentDays")]
    pub recent_days: Option<i64>,
    #[serde(rename = "importanceThreshold")]
    pub importance_threshold: Option<f64>,
    #[serde(rename = "pinnedOnly")]
    pub pinned_only: Option<bool>,
}

/// Report from one cleanup run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub examined: usize,
    pub hard_deleted: usize,
    pub soft_deleted: usize,
    pub skipped: usize,
    pub buffers_evicted: usize,
    pub purged: usize,
    pub duration_ms: u64,
    pub errors: Vec<String>,
}

// ============================================================================
// ENGINE
// ============================================================================

/// Root of the memory engine; each component receives its collaborators
/// here, at construction.
pub struct Engine {
    config: Config,
    store: Arc<Store>,
    embedder: Arc<Embedder>,
    search: HybridSearch,
    events: EventBus,
    metrics: MetricsRegistry,
    forget_weights: ForgetWeights,
}

impl Engine {
    /// Open the engine against the configured database.
    pub fn open(config: Config) -> Result<Self> {
        let embedder = Arc::new(Embedder::new(
            config.embedding_provider,
            config.embedding_dimensions,
            config.embedding_cache_size,
        ));
        let store = Arc::new(Store::open(&config.db_path, embedder.dimensions())?);
        let metrics = MetricsRegistry::default();
        let search = HybridSearch::new(store.clone(), embedder.clone(), metrics.search.clone());

        tracing::info!(
            db = %config.db_path.display(),
            dimensions = embedder.dimensions(),
            model = embedder.model_name(),
            vector_index = store.vector_available(),
            "memory engine ready"
        );

        Ok(Self {
            config,
            store,
            embedder,
            search,
            events: EventBus::default(),
            metrics,
            forget_weights: ForgetWeights::default(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Clamp a requested limit into [1, SEARCH_MAX_LIMIT], defaulting to
    /// SEARCH_DEFAULT_LIMIT.
    pub fn effective_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.config.search_default_limit)
            .clamp(1, self.config.search_max_limit)
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Store a new memory. The embedding is generated after the insert;
    /// failure there leaves the item text-searchable.
    pub fn remember(&self, input: &RememberInput) -> Result<MemoryItem> {
        let item = self.store.insert(input)?;
        self.embed_item(&item.id, &item.content);
        self.events.emit(EngineEvent::Created {
            memory_id: item.id.clone(),
        });
        self.store.get(&item.id)
    }

    fn embed_item(&self, id: &str, content: &str) {
        match self.embedder.embed(content) {
            Ok(vector) => {
                if let Err(e) = self
                    .store
                    .put_embedding(id, &vector, self.embedder.model_name())
                {
                    tracing::warn!("failed to store embedding for {}: {}", id, e);
                }
            }
            Err(e) => tracing::warn!("failed to embed {}: {}", id, e),
        }
    }

    pub fn get(&self, id: &str) -> Result<MemoryItem> {
        self.store.get(id)
    }

    /// Apply a whitelisted patch; content changes re-embed.
    pub fn update(&self, id: &str, patch: &MemoryPatch) -> Result<MemoryItem> {
        let item = self.store.update(id, patch)?;
        if patch.content.is_some() {
            self.embed_item(id, &item.content);
        }
        self.events.emit(EngineEvent::Updated {
            memory_id: id.to_string(),
        });
        self.store.get(id)
    }

    /// Soft or hard delete. Hard deletion requires the confirm flag.
    pub fn forget(&self, id: &str, hard: bool, confirm: bool) -> Result<ForgetOutcome> {
        if hard {
            self.store.hard_delete(id, confirm)?;
            self.events.emit(EngineEvent::Deleted {
                memory_id: id.to_string(),
                hard: true,
            });
            Ok(ForgetOutcome {
                success: true,
                message: format!("기억이 완전히 삭제되었습니다: {id}"),
            })
        } else {
            self.store.soft_delete(id)?;
            self.events.emit(EngineEvent::Deleted {
                memory_id: id.to_string(),
                hard: false,
            });
            Ok(ForgetOutcome {
                success: true,
                message: format!("기억이 삭제되었습니다: {id}"),
            })
        }
    }

    pub fn pin(&self, id: &str) -> Result<MemoryItem> {
        let item = self.store.pin(id)?;
        self.events.emit(EngineEvent::Pinned {
            memory_id: id.to_string(),
        });
        Ok(item)
    }

    pub fn unpin(&self, id: &str) -> Result<MemoryItem> {
        let item = self.store.unpin(id)?;
        self.events.emit(EngineEvent::Unpinned {
            memory_id: id.to_string(),
        });
        Ok(item)
    }

    pub fn link(&self, source_id: &str, target_id: &str, relation: LinkRelation) -> Result<()> {
        self.store.link(source_id, target_id, relation)
    }

    pub fn unlink(&self, source_id: &str, target_id: &str, relation: LinkRelation) -> Result<bool> {
        self.store.unlink(source_id, target_id, relation)
    }

    /// Links touching a memory, either direction.
    pub fn links_for(&self, id: &str) -> Result<Vec<crate::memory::MemoryLink>> {
        self.store.links_for(id)
    }

    /// Full feedback log for a memory.
    pub fn feedback_history(&self, id: &str) -> Result<Vec<crate::memory::FeedbackEvent>> {
        self.store.feedback_history(id)
    }

    pub fn feedback(
        &self,
        id: &str,
        event: FeedbackKind,
        score: Option<f64>,
    ) -> Result<MemoryItem> {
        if let Some(score) = score {
            if !(0.0..=1.0).contains(&score) {
                return Err(EngineError::Validation(format!(
                    "score must be in [0, 1], got {score}"
                )));
            }
        }
        self.store.record_feedback(id, event, score)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Plain recall: hybrid search, items without score detail. Recalled
    /// items get their `last_accessed` bumped.
    pub fn recall(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: Option<usize>,
    ) -> Result<RecallResult> {
        let started = Instant::now();
        let limit = self.effective_limit(limit);
        let scored = self.search.search(query, filters, limit, None)?;

        let ids: Vec<String> = scored.iter().map(|s| s.item.id.clone()).collect();
        if let Err(e) = self.store.mark_accessed(&ids) {
            tracing::warn!("failed to mark access: {}", e);
        }

        let elapsed = started.elapsed().as_secs_f64() * 1000.0;
        self.metrics.latency.record_ms(elapsed);
        Ok(RecallResult {
            total_count: scored.len(),
            items: scored.into_iter().map(|s| s.item).collect(),
            query_time: elapsed,
        })
    }

    /// Hybrid search with explicit weight overrides and score detail.
    pub fn hybrid_search(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: Option<usize>,
        text_weight: Option<f64>,
        vector_weight: Option<f64>,
    ) -> Result<HybridSearchResult> {
        let started = Instant::now();
        let limit = self.effective_limit(limit);
        let weights = match (text_weight, vector_weight) {
            (None, None) => None,
            (t, v) => {
                let t = t.unwrap_or(crate::search::DEFAULT_WEIGHTS.0);
                let v = v.unwrap_or(crate::search::DEFAULT_WEIGHTS.1);
                if t < 0.0 || v < 0.0 || t + v <= 0.0 {
                    return Err(EngineError::Validation(
                        "search weights must be non-negative and not both zero".into(),
                    ));
                }
                Some((t, v))
            }
        };
        let items = self.search.search(query, filters, limit, weights)?;

        let elapsed = started.elapsed().as_secs_f64() * 1000.0;
        self.metrics.latency.record_ms(elapsed);
        Ok(HybridSearchResult {
            total_count: items.len(),
            items,
            query_time: elapsed,
            search_type: "hybrid".to_string(),
        })
    }

    /// Export live rows in the requested format.
    pub fn export(&self, format: ExportFormat, filters: &SearchFilters) -> Result<ExportResult> {
        let items = self.store.export_items(filters)?;
        let count = items.len();
        let data = match format {
            ExportFormat::Json => serde_json::to_string_pretty(&items)
                .map_err(|e| EngineError::Fatal(e.to_string()))?,
            ExportFormat::Csv => export_csv(&items),
            ExportFormat::Markdown => export_markdown(&items),
        };
        Ok(ExportResult { data, count })
    }

    /// Build a budgeted context fragment for prompt injection.
    pub fn inject_context(&self, query: &str, options: &InjectOptions) -> Result<InjectionResult> {
        let token_budget = options.token_budget.unwrap_or(inject::DEFAULT_TOKEN_BUDGET);
        let max_memories = options
            .max_memories
            .unwrap_or(inject::DEFAULT_MAX_MEMORIES)
            .clamp(1, self.config.search_max_limit);

        let mut filters = SearchFilters {
            memory_types: options.memory_types.clone(),
            pinned: options.pinned_only.filter(|p| *p),
            ..Default::default()
        };
        if let Some(days) = options.recent_days {
            filters.time_from = Some(Utc::now() - Duration::days(days.max(0)));
        }

        let mut candidates = self.search.search(query, &filters, max_memories, None)?;
        if let Some(floor) = options.importance_threshold {
            candidates.retain(|c| c.item.importance >= floor);
        }

        Ok(inject::build_context(
            query,
            options.context_type.unwrap_or_default(),
            &candidates,
            token_budget,
        ))
    }

    pub fn stats(&self) -> Result<MemoryStats> {
        self.store.stats()
    }

    // ------------------------------------------------------------------
    // Maintenance (called from the batch scheduler)
    // ------------------------------------------------------------------

    /// One cleanup pass: analyze, partition, apply under the write lock,
    /// evict expired buffers, purge audit-expired rows, checkpoint.
    pub fn run_cleanup(&self) -> CleanupReport {
        let started = Instant::now();
        let now = Utc::now();
        let mut report = CleanupReport::default();

        let items = match self.store.all_items(false) {
            Ok(items) => items,
            Err(e) => {
                report.errors.push(format!("scan failed: {e}"));
                report.duration_ms = started.elapsed().as_millis() as u64;
                return report;
            }
        };
        report.examined = items.len();

        let analyses = forget::analyze_candidates(&items, &self.forget_weights, now);
        let ttl = &self.config.forget_ttl_hours;

        let mut hard: Vec<String> = Vec::new();
        let mut soft: Vec<String> = Vec::new();
        for analysis in &analyses {
            if analysis.score >= self.forget_weights.hard_threshold && !analysis.features.pinned {
                hard.push(analysis.memory_id.clone());
            } else if analysis.score >= self.forget_weights.soft_threshold {
                soft.push(analysis.memory_id.clone());
            }
        }

        match self.store.apply_cleanup(&hard, &soft, ttl, now) {
            Ok(CleanupCounts {
                hard_deleted,
                soft_deleted,
                skipped,
            }) => {
                report.hard_deleted = hard_deleted;
                report.soft_deleted = soft_deleted;
                report.skipped = skipped;
            }
            Err(e) => report.errors.push(format!("apply failed: {e}")),
        }

        match self.store.evict_expired_buffers(now) {
            Ok(n) => report.buffers_evicted = n,
            Err(e) => report.errors.push(format!("buffer eviction failed: {e}")),
        }

        if self.config.audit_ttl_hours >= 0 {
            let cutoff = now - Duration::hours(self.config.audit_ttl_hours);
            match self.store.purge_soft_deleted(cutoff) {
                Ok(n) => report.purged = n,
                Err(e) => report.errors.push(format!("purge failed: {e}")),
            }
        }

        if let Err(e) = self.store.checkpoint() {
            report.errors.push(format!("checkpoint failed: {e}"));
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            examined = report.examined,
            hard = report.hard_deleted,
            soft = report.soft_deleted,
            purged = report.purged,
            "cleanup pass finished"
        );
        report
    }
}

// ============================================================================
// EXPORT FORMATTERS
// ============================================================================

fn csv_escape(field: &str) -> String {
    if field.contains(['"', ',', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn export_csv(items: &[MemoryItem]) -> String {
    let mut out = String::from(
        "id,type,content,importance,privacy_scope,created_at,pinned,tags\n",
    );
    for item in items {
        out.push_str(&format!(
            "{},{},{},{},{},{},{},{}\n",
            item.id,
            item.memory_type,
            csv_escape(&item.content),
            item.importance,
            item.privacy_scope,
            item.created_at.to_rfc3339(),
            item.pinned,
            csv_escape(&item.tags.join(";")),
        ));
    }
    out
}

fn export_markdown(items: &[MemoryItem]) -> String {
    let mut out = String::from("# Memory Export\n\n");
    for item in items {
        out.push_str(&format!(
            "## {} ({})\n\n{}\n\n- importance: {:.2}\n- created: {}\n- tags: {}\n\n",
            item.id,
            item.memory_type,
            item.content,
            item.importance,
            item.created_at.to_rfc3339(),
            if item.tags.is_empty() {
                "-".to_string()
            } else {
                item.tags.join(", ")
            },
        ));
    }
    out
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderKind;
    use tempfile::TempDir;

    fn open_engine() -> (TempDir, Engine) {
        let dir = TempDir::new().unwrap();
        let config = Config {
            db_path: dir.path().join("memory.db"),
            embedding_provider: ProviderKind::Fallback,
            ..Config::default()
        };
        (dir, Engine::open(config).unwrap())
    }

    #[test]
    fn test_remember_embeds_and_emits() {
        let (_dir, engine) = open_engine();
        let mut rx = engine.events().subscribe();

        let item = engine
            .remember(&RememberInput::new("engine round trip", MemoryType::Semantic))
            .unwrap();
        assert!(item.id.starts_with("mem_"));
        assert!(item.has_embedding);

        assert_eq!(
            rx.try_recv().unwrap(),
            EngineEvent::Created {
                memory_id: item.id.clone()
            }
        );
    }

    #[test]
    fn test_update_reembeds_content() {
        let (_dir, engine) = open_engine();
        let item = engine
            .remember(&RememberInput::new("original text", MemoryType::Semantic))
            .unwrap();

        let patch = MemoryPatch {
            content: Some("replacement text".into()),
            ..Default::default()
        };
        let updated = engine.update(&item.id, &patch).unwrap();
        assert_eq!(updated.content, "replacement text");
        assert!(updated.has_embedding);
    }

    #[test]
    fn test_forget_messages() {
        let (_dir, engine) = open_engine();
        let a = engine
            .remember(&RememberInput::new("soft target", MemoryType::Working))
            .unwrap();
        let b = engine
            .remember(&RememberInput::new("hard target", MemoryType::Working))
            .unwrap();

        let soft = engine.forget(&a.id, false, false).unwrap();
        assert!(soft.success);
        assert!(soft.message.contains("삭제"));

        let hard = engine.forget(&b.id, true, true).unwrap();
        assert!(hard.message.contains("완전히 삭제"));
        assert!(matches!(
            engine.get(&b.id),
            Err(EngineError::NotFound(_))
        ));

        // Missing confirm
        let c = engine
            .remember(&RememberInput::new("third", MemoryType::Working))
            .unwrap();
        assert!(matches!(
            engine.forget(&c.id, true, false),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn test_effective_limit_clamps() {
        let (_dir, engine) = open_engine();
        assert_eq!(engine.effective_limit(None), 10);
        assert_eq!(engine.effective_limit(Some(5)), 5);
        assert_eq!(engine.effective_limit(Some(500)), 50);
        assert_eq!(engine.effective_limit(Some(0)), 1);
    }

    #[test]
    fn test_recall_roundtrip() {
        let (_dir, engine) = open_engine();
        let item = engine
            .remember(&RememberInput::new(
                "검색 가능한 테스트 기억",
                MemoryType::Semantic,
            ))
            .unwrap();

        let result = engine
            .recall("테스트 기억", &SearchFilters::default(), None)
            .unwrap();
        assert!(result.items.iter().any(|i| i.id == item.id));
        assert_eq!(result.total_count, result.items.len());
    }

    #[test]
    fn test_hybrid_search_shape() {
        let (_dir, engine) = open_engine();
        engine
            .remember(&RememberInput::new("hybrid shape probe", MemoryType::Semantic))
            .unwrap();

        let result = engine
            .hybrid_search("hybrid shape", &SearchFilters::default(), None, None, None)
            .unwrap();
        assert_eq!(result.search_type, "hybrid");
        assert!(!result.items.is_empty());

        assert!(matches!(
            engine.hybrid_search("q", &SearchFilters::default(), None, Some(-1.0), Some(0.5)),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn test_export_formats() {
        let (_dir, engine) = open_engine();
        let mut input = RememberInput::new("exported, \"quoted\" content", MemoryType::Semantic);
        input.tags = vec!["a".into(), "b".into()];
        engine.remember(&input).unwrap();

        let json = engine
            .export(ExportFormat::Json, &SearchFilters::default())
            .unwrap();
        assert_eq!(json.count, 1);
        assert!(json.data.contains("exported"));

        let csv = engine
            .export(ExportFormat::Csv, &SearchFilters::default())
            .unwrap();
        assert!(csv.data.starts_with("id,type,content"));
        assert!(csv.data.contains("\"exported, \"\"quoted\"\" content\""));

        let md = engine
            .export(ExportFormat::Markdown, &SearchFilters::default())
            .unwrap();
        assert!(md.data.starts_with("# Memory Export"));
        assert!(md.data.contains("a, b"));
    }

    #[test]
    fn test_inject_context() {
        let (_dir, engine) = open_engine();
        engine
            .remember(&RememberInput::new(
                "the deploy pipeline uses blue-green rollout",
                MemoryType::Procedural,
            ))
            .unwrap();

        let result = engine
            .inject_context("deploy pipeline", &InjectOptions::default())
            .unwrap();
        assert_eq!(result.content.len(), 1);
        assert_eq!(result.content[0].role, "system");
        assert!(result.content[0].text.contains("blue-green"));
    }

    #[test]
    fn test_inject_context_empty() {
        let (_dir, engine) = open_engine();
        let result = engine
            .inject_context("nothing stored about this", &InjectOptions::default())
            .unwrap();
        assert_eq!(result.included, 0);
        assert_eq!(result.content[0].text, inject::NO_MEMORIES_MESSAGE);
    }

    #[test]
    fn test_cleanup_idempotent() {
        let (_dir, engine) = open_engine();
        engine
            .remember(&RememberInput::new("fresh and important", MemoryType::Semantic))
            .unwrap();

        let first = engine.run_cleanup();
        assert!(first.errors.is_empty());
        let second = engine.run_cleanup();
        assert_eq!(second.hard_deleted, 0);
        assert_eq!(second.soft_deleted, 0);
        assert!(second.errors.is_empty());
    }
}
