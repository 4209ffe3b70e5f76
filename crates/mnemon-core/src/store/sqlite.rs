//! SQLite Store
//!
//! Owns every persistent row and both companion indexes (FTS5 mirror via
//! triggers, HNSW vector index rebuilt in memory at open). All other
//! components go through this API; none of them see a database handle.
//!
//! Concurrency: one writer connection behind a mutex, one reader
//! connection for snapshot reads under WAL. Transient `SQLITE_BUSY` is
//! retried with exponential backoff (5 attempts, 10 -> 160 ms) before
//! surfacing as `Busy`.

use chrono::{DateTime, Duration, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params, params_from_iter};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::config::ForgetTtlHours;
use crate::embed::{vector_from_bytes, vector_to_bytes};
use crate::error::{EngineError, Result};
use crate::memory::{
    FeedbackEvent, FeedbackKind, LinkRelation, MemoryItem, MemoryLink, MemoryPatch, MemoryStats,
    MemoryType, PrivacyScope, RememberInput, SearchFilters, WorkingMemoryBuffer, new_memory_id,
    normalize_tags,
};
use crate::srs;

#[cfg(feature = "vector-search")]
use crate::search::vector::{VectorEngine, VectorSearchError};

// ============================================================================
// RETRY POLICY
// ============================================================================

const BUSY_RETRIES: u32 = 5;
const BUSY_BASE_DELAY_MS: u64 = 10;

// ============================================================================
// QUERY PLAN
// ============================================================================

/// Opaque plan handed to the store by the search components
#[derive(Debug, Clone)]
pub struct CandidatePlan {
    /// Query normalized to nothing: return newest rows under the filters
    pub match_all: bool,
    /// FTS5 MATCH expression (quoted tokens)
    pub fts_expr: String,
    /// Raw tokens for the LIKE fallback scan
    pub terms: Vec<String>,
    pub filters: SearchFilters,
    pub limit: usize,
}

/// Counters from one cleanup application
#[derive(Debug, Clone, Copy, Default)]
pub struct CleanupCounts {
    pub hard_deleted: usize,
    pub soft_deleted: usize,
    /// Candidates that failed re-verification under the lock
    pub skipped: usize,
}

// ============================================================================
// STORE
// ============================================================================

const ITEM_COLUMNS: &str = "m.id, m.memory_type, m.content, m.importance, m.privacy_scope, \
     m.created_at, m.last_accessed, m.pinned, m.tags, m.source, m.project_id, m.user_id, \
     m.agent_id, m.view_count, m.cite_count, m.edit_count, m.deleted_at, \
     m.review_interval_days, m.next_review_at, m.review_count, m.success_count, \
     m.has_embedding, m.embedding_model";

/// The persistent store
///
/// All methods take `&self`; interior mutability makes the store
/// `Send + Sync` so the dispatcher can share an `Arc<Store>`.
pub struct Store {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    path: PathBuf,
    #[cfg(feature = "vector-search")]
    vectors: Mutex<Option<VectorEngine>>,
    dimensions: usize,
}

impl Store {
    /// Per-connection PRAGMAs. WAL keeps readers non-blocking; the
    /// cache (16 MiB) and mmap window (64 MiB) are sized for a
    /// per-agent store of short text rows, not a shared database.
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;
             PRAGMA cache_size = -16384;
             PRAGMA temp_store = MEMORY;
             PRAGMA mmap_size = 67108864;
             PRAGMA wal_autocheckpoint = 1000;",
        )?;
        Ok(())
    }

    /// Open (or create) the store at `path`. `dimensions` sizes the
    /// vector index and must match the embedder.
    pub fn open(path: &Path, dimensions: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let writer = Connection::open(path)
            .map_err(|e| EngineError::Fatal(format!("cannot open database: {e}")))?;
        Self::configure_connection(&writer)?;
        super::migrations::apply_migrations(&writer)?;

        let reader = Connection::open(path)
            .map_err(|e| EngineError::Fatal(format!("cannot open database: {e}")))?;
        Self::configure_connection(&reader)?;

        #[cfg(feature = "vector-search")]
        let vectors = match VectorEngine::new(dimensions) {
            Ok(engine) => Some(engine),
            Err(e) => {
                tracing::warn!("vector index unavailable: {}", e);
                None
            }
        };

        let store = Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            path: path.to_path_buf(),
            #[cfg(feature = "vector-search")]
            vectors: Mutex::new(vectors),
            dimensions,
        };

        #[cfg(feature = "vector-search")]
        store.load_vector_index()?;

        Ok(store)
    }

    /// The embedding dimension this store was opened with
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    // ------------------------------------------------------------------
    // Lock and retry plumbing
    // ------------------------------------------------------------------

    fn write<T>(&self, f: impl Fn(&mut Connection) -> Result<T>) -> Result<T> {
        let mut delay = BUSY_BASE_DELAY_MS;
        for attempt in 0..BUSY_RETRIES {
            let result = {
                let mut conn = self
                    .writer
                    .lock()
                    .map_err(|_| EngineError::Fatal("writer lock poisoned".into()))?;
                f(&mut conn)
            };
            match result {
                Err(EngineError::Busy(_)) if attempt + 1 < BUSY_RETRIES => {
                    std::thread::sleep(std::time::Duration::from_millis(delay));
                    delay *= 2;
                }
                other => return other,
            }
        }
        Err(EngineError::Busy("write retry budget exhausted".into()))
    }

    fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self
            .reader
            .lock()
            .map_err(|_| EngineError::Fatal("reader lock poisoned".into()))?;
        f(&conn)
    }

    // ------------------------------------------------------------------
    // Row mapping
    // ------------------------------------------------------------------

    fn parse_ts(idx: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    idx,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
    }

    fn parse_ts_opt(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
        raw.map(|s| Self::parse_ts(idx, s)).transpose()
    }

    fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryItem> {
        let type_raw: String = row.get(1)?;
        let scope_raw: String = row.get(4)?;
        let tags_raw: String = row.get(8)?;

        Ok(MemoryItem {
            id: row.get(0)?,
            memory_type: MemoryType::parse(&type_raw).unwrap_or_default(),
            content: row.get(2)?,
            importance: row.get(3)?,
            privacy_scope: PrivacyScope::parse(&scope_raw).unwrap_or_default(),
            created_at: Self::parse_ts(5, row.get(5)?)?,
            last_accessed: Self::parse_ts(6, row.get(6)?)?,
            pinned: row.get::<_, i64>(7)? != 0,
            tags: serde_json::from_str(&tags_raw).unwrap_or_default(),
            source: row.get(9)?,
            project_id: row.get(10)?,
            user_id: row.get(11)?,
            agent_id: row.get(12)?,
            view_count: row.get(13)?,
            cite_count: row.get(14)?,
            edit_count: row.get(15)?,
            deleted_at: Self::parse_ts_opt(16, row.get(16)?)?,
            review_interval_days: row.get(17)?,
            next_review_at: Self::parse_ts_opt(18, row.get(18)?)?,
            review_count: row.get(19)?,
            success_count: row.get(20)?,
            has_embedding: row.get::<_, i64>(21)? != 0,
            embedding_model: row.get(22)?,
        })
    }

    // ------------------------------------------------------------------
    // CRUD
    // ------------------------------------------------------------------

    /// Insert a new memory and return the committed row.
    pub fn insert(&self, input: &RememberInput) -> Result<MemoryItem> {
        input.validate()?;

        let now = Utc::now();
        let id = new_memory_id(now);
        let tags = normalize_tags(input.tags.clone());
        let tags_json =
            serde_json::to_string(&tags).map_err(|e| EngineError::Fatal(e.to_string()))?;

        self.write(|conn| {
            conn.execute(
                "INSERT INTO memories (
                    id, memory_type, content, importance, privacy_scope,
                    created_at, last_accessed, tags, source, project_id, user_id, agent_id
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    id,
                    input.memory_type.as_str(),
                    input.content,
                    input.importance,
                    input.privacy_scope.as_str(),
                    now.to_rfc3339(),
                    now.to_rfc3339(),
                    tags_json,
                    input.source,
                    input.project_id,
                    input.user_id,
                    input.agent_id,
                ],
            )?;
            Ok(())
        })?;

        self.get(&id)
    }

    /// Fetch by id, including soft-deleted rows (audit visibility).
    pub fn get(&self, id: &str) -> Result<MemoryItem> {
        self.read(|conn| {
            conn.query_row(
                &format!("SELECT {ITEM_COLUMNS} FROM memories m WHERE m.id = ?1"),
                params![id],
                Self::row_to_item,
            )
            .optional()?
            .ok_or_else(|| EngineError::NotFound(id.to_string()))
        })
    }

    /// Apply a whitelisted patch. Content changes bump `edit_count`;
    /// FTS rows follow via the update triggers.
    pub fn update(&self, id: &str, patch: &MemoryPatch) -> Result<MemoryItem> {
        patch.validate()?;
        if patch.is_empty() {
            return self.get(id);
        }

        self.write(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let exists: Option<String> = tx
                .query_row(
                    "SELECT id FROM memories WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_none() {
                return Err(EngineError::NotFound(id.to_string()));
            }

            let mut sets: Vec<String> = Vec::new();
            let mut values: Vec<Value> = Vec::new();

            if let Some(content) = &patch.content {
                sets.push("content = ?".into());
                values.push(Value::Text(content.clone()));
                sets.push("edit_count = edit_count + 1".into());
            }
            if let Some(memory_type) = patch.memory_type {
                sets.push("memory_type = ?".into());
                values.push(Value::Text(memory_type.as_str().to_string()));
            }
            if let Some(tags) = &patch.tags {
                let tags_json = serde_json::to_string(&normalize_tags(tags.clone()))
                    .map_err(|e| EngineError::Fatal(e.to_string()))?;
                sets.push("tags = ?".into());
                values.push(Value::Text(tags_json));
            }
            if let Some(importance) = patch.importance {
                sets.push("importance = ?".into());
                values.push(Value::Real(importance));
            }
            if let Some(pinned) = patch.pinned {
                sets.push("pinned = ?".into());
                values.push(Value::Integer(pinned as i64));
            }
            if let Some(scope) = patch.privacy_scope {
                sets.push("privacy_scope = ?".into());
                values.push(Value::Text(scope.as_str().to_string()));
            }
            if let Some(source) = &patch.source {
                sets.push("source = ?".into());
                values.push(Value::Text(source.clone()));
            }
            if let Some(project_id) = &patch.project_id {
                sets.push("project_id = ?".into());
                values.push(Value::Text(project_id.clone()));
            }

            values.push(Value::Text(id.to_string()));
            let sql = format!(
                "UPDATE memories SET {} WHERE id = ?{}",
                sets.join(", "),
                values.len()
            );
            // Positional placeholders must be renumbered after the dynamic build
            let sql = renumber_placeholders(&sql);
            tx.execute(&sql, params_from_iter(values))?;

            tx.commit()?;
            Ok(())
        })?;

        self.get(id)
    }

    /// Mark as deleted-for-search; the row stays for the audit TTL.
    /// Repeats are no-ops.
    pub fn soft_delete(&self, id: &str) -> Result<()> {
        let now = Utc::now();
        let changed = self.write(|conn| {
            let n = conn.execute(
                "UPDATE memories SET deleted_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
                params![now.to_rfc3339(), id],
            )?;
            if n == 0 {
                // Distinguish "already soft-deleted" from "missing"
                let exists: Option<String> = conn
                    .query_row(
                        "SELECT id FROM memories WHERE id = ?1",
                        params![id],
                        |row| row.get(0),
                    )
                    .optional()?;
                if exists.is_none() {
                    return Err(EngineError::NotFound(id.to_string()));
                }
            }
            Ok(n)
        })?;

        #[cfg(feature = "vector-search")]
        if changed > 0 {
            self.vector_remove(id);
        }
        let _ = changed;
        Ok(())
    }

    /// Remove the row and every dependent row. Requires an explicit
    /// confirm flag; pinned rows are refused.
    pub fn hard_delete(&self, id: &str, confirm: bool) -> Result<()> {
        if !confirm {
            return Err(EngineError::Validation(
                "hard delete requires confirm=true".into(),
            ));
        }

        self.write(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let pinned: Option<i64> = tx
                .query_row(
                    "SELECT pinned FROM memories WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            match pinned {
                None => return Err(EngineError::NotFound(id.to_string())),
                Some(p) if p != 0 => {
                    return Err(EngineError::Conflict(format!(
                        "memory {id} is pinned; unpin before hard delete"
                    )));
                }
                Some(_) => {}
            }

            tx.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
            tx.commit()?;
            Ok(())
        })?;

        #[cfg(feature = "vector-search")]
        self.vector_remove(id);
        Ok(())
    }

    /// Idempotent pin
    pub fn pin(&self, id: &str) -> Result<MemoryItem> {
        self.set_pinned(id, true)
    }

    /// Idempotent unpin
    pub fn unpin(&self, id: &str) -> Result<MemoryItem> {
        self.set_pinned(id, false)
    }

    fn set_pinned(&self, id: &str, pinned: bool) -> Result<MemoryItem> {
        self.write(|conn| {
            let n = conn.execute(
                "UPDATE memories SET pinned = ?1 WHERE id = ?2",
                params![pinned as i64, id],
            )?;
            if n == 0 {
                return Err(EngineError::NotFound(id.to_string()));
            }
            Ok(())
        })?;
        self.get(id)
    }

    /// Create a typed link. The triple is unique; duplicates are conflicts.
    pub fn link(&self, source_id: &str, target_id: &str, relation: LinkRelation) -> Result<()> {
        let now = Utc::now();
        self.write(|conn| {
            for id in [source_id, target_id] {
                let exists: Option<String> = conn
                    .query_row(
                        "SELECT id FROM memories WHERE id = ?1 AND deleted_at IS NULL",
                        params![id],
                        |row| row.get(0),
                    )
                    .optional()?;
                if exists.is_none() {
                    return Err(EngineError::NotFound(id.to_string()));
                }
            }

            conn.execute(
                "INSERT INTO memory_links (source_id, target_id, relation, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![source_id, target_id, relation.as_str(), now.to_rfc3339()],
            )
            .map_err(|e| match EngineError::from_sqlite(e) {
                EngineError::Conflict(_) => EngineError::Conflict(format!(
                    "link {source_id} -[{}]-> {target_id} already exists",
                    relation.as_str()
                )),
                other => other,
            })?;
            Ok(())
        })
    }

    /// Links where the memory is source or target, oldest first.
    pub fn links_for(&self, id: &str) -> Result<Vec<MemoryLink>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT source_id, target_id, relation, created_at FROM memory_links
                 WHERE source_id = ?1 OR target_id = ?1
                 ORDER BY created_at ASC",
            )?;
            let rows = stmt
                .query_map(params![id], |row| {
                    let relation_raw: String = row.get(2)?;
                    Ok(MemoryLink {
                        source_id: row.get(0)?,
                        target_id: row.get(1)?,
                        relation: LinkRelation::parse(&relation_raw)
                            .unwrap_or(LinkRelation::Duplicates),
                        created_at: Self::parse_ts(3, row.get(3)?)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    /// The append-only feedback log for one memory, oldest first.
    pub fn feedback_history(&self, id: &str) -> Result<Vec<FeedbackEvent>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT memory_id, event, score, created_at FROM feedback_events
                 WHERE memory_id = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt
                .query_map(params![id], |row| {
                    let event_raw: String = row.get(1)?;
                    Ok(FeedbackEvent {
                        memory_id: row.get(0)?,
                        event: FeedbackKind::parse(&event_raw).unwrap_or(FeedbackKind::Used),
                        score: row.get(2)?,
                        created_at: Self::parse_ts(3, row.get(3)?)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    /// Remove a link; returns whether one existed.
    pub fn unlink(&self, source_id: &str, target_id: &str, relation: LinkRelation) -> Result<bool> {
        self.write(|conn| {
            let n = conn.execute(
                "DELETE FROM memory_links
                 WHERE source_id = ?1 AND target_id = ?2 AND relation = ?3",
                params![source_id, target_id, relation.as_str()],
            )?;
            Ok(n > 0)
        })
    }

    /// Append a feedback event, bump the matching counters, and advance
    /// the review schedule.
    pub fn record_feedback(
        &self,
        id: &str,
        event: FeedbackKind,
        score: Option<f64>,
    ) -> Result<MemoryItem> {
        let now = Utc::now();
        self.write(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let item = tx
                .query_row(
                    &format!("SELECT {ITEM_COLUMNS} FROM memories m WHERE m.id = ?1"),
                    params![id],
                    Self::row_to_item,
                )
                .optional()?
                .ok_or_else(|| EngineError::NotFound(id.to_string()))?;

            tx.execute(
                "INSERT INTO feedback_events (memory_id, event, score, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![id, event.as_str(), score, now.to_rfc3339()],
            )?;

            let (view_inc, cite_inc, edit_inc) = match event {
                FeedbackKind::Used => (1, 0, 0),
                FeedbackKind::Helpful => (0, 1, 0),
                FeedbackKind::Edited => (0, 0, 1),
                FeedbackKind::Neglected | FeedbackKind::NotHelpful => (0, 0, 0),
            };

            let features = srs::ReviewFeatures {
                importance: item.importance,
                usage: crate::rank::usage_feature(&item, now),
                helpful_feedback: match event {
                    FeedbackKind::Helpful => score.unwrap_or(1.0).clamp(0.0, 1.0),
                    _ => 0.0,
                },
                bad_feedback: match event {
                    FeedbackKind::NotHelpful => score.unwrap_or(1.0).clamp(0.0, 1.0),
                    FeedbackKind::Neglected => 0.5,
                    _ => 0.0,
                },
            };

            let success_inc = matches!(event, FeedbackKind::Used | FeedbackKind::Helpful) as i64;
            let interval = srs::next_interval(item.review_interval_days, &features);
            let interval = srs::adapt_interval(
                interval,
                item.success_count + success_inc,
                item.review_count + 1,
            );
            let next_review = now + Duration::days(interval);

            let touch_access = matches!(event, FeedbackKind::Used);
            tx.execute(
                "UPDATE memories SET
                    view_count = view_count + ?1,
                    cite_count = cite_count + ?2,
                    edit_count = edit_count + ?3,
                    review_count = review_count + 1,
                    success_count = success_count + ?4,
                    review_interval_days = ?5,
                    next_review_at = ?6,
                    last_accessed = CASE WHEN ?7 THEN ?8 ELSE last_accessed END
                 WHERE id = ?9",
                params![
                    view_inc,
                    cite_inc,
                    edit_inc,
                    success_inc,
                    interval,
                    next_review.to_rfc3339(),
                    touch_access,
                    now.to_rfc3339(),
                    id,
                ],
            )?;

            tx.commit()?;
            Ok(())
        })?;

        self.get(id)
    }

    /// Bump `last_accessed` on recalled items
    pub fn mark_accessed(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let now = Utc::now().to_rfc3339();
        self.write(|conn| {
            let placeholders = vec!["?"; ids.len()].join(", ");
            let sql = format!(
                "UPDATE memories SET last_accessed = ? WHERE id IN ({placeholders})"
            );
            let mut values: Vec<Value> = Vec::with_capacity(ids.len() + 1);
            values.push(Value::Text(now.clone()));
            values.extend(ids.iter().map(|id| Value::Text(id.clone())));
            conn.execute(&sql, params_from_iter(values))?;
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Candidate generation
    // ------------------------------------------------------------------

    fn filter_sql(filters: &SearchFilters, clauses: &mut Vec<String>, values: &mut Vec<Value>) {
        if let Some(types) = &filters.memory_types {
            let placeholders = vec!["?"; types.len()].join(", ");
            clauses.push(format!("m.memory_type IN ({placeholders})"));
            values.extend(types.iter().map(|t| Value::Text(t.as_str().to_string())));
        }
        if let Some(scopes) = &filters.privacy_scopes {
            let placeholders = vec!["?"; scopes.len()].join(", ");
            clauses.push(format!("m.privacy_scope IN ({placeholders})"));
            values.extend(scopes.iter().map(|s| Value::Text(s.as_str().to_string())));
        }
        if let Some(pinned) = filters.pinned {
            clauses.push("m.pinned = ?".into());
            values.push(Value::Integer(pinned as i64));
        }
        if let Some(from) = filters.time_from {
            clauses.push("m.created_at >= ?".into());
            values.push(Value::Text(from.to_rfc3339()));
        }
        if let Some(to) = filters.time_to {
            clauses.push("m.created_at <= ?".into());
            values.push(Value::Text(to.to_rfc3339()));
        }
        if let Some(project_id) = &filters.project_id {
            clauses.push("m.project_id = ?".into());
            values.push(Value::Text(project_id.clone()));
        }
    }

    fn filters_match(item: &MemoryItem, filters: &SearchFilters) -> bool {
        if let Some(ids) = &filters.ids {
            if !ids.contains(&item.id) {
                return false;
            }
        }
        if let Some(types) = &filters.memory_types {
            if !types.contains(&item.memory_type) {
                return false;
            }
        }
        if let Some(scopes) = &filters.privacy_scopes {
            if !scopes.contains(&item.privacy_scope) {
                return false;
            }
        }
        if let Some(pinned) = filters.pinned {
            if item.pinned != pinned {
                return false;
            }
        }
        if let Some(from) = filters.time_from {
            if item.created_at < from {
                return false;
            }
        }
        if let Some(to) = filters.time_to {
            if item.created_at > to {
                return false;
            }
        }
        if let Some(project_id) = &filters.project_id {
            if item.project_id.as_deref() != Some(project_id.as_str()) {
                return false;
            }
        }
        true
    }

    /// Lexical candidates with a normalized rank in [0, 1]. An id filter
    /// bypasses lexical matching; a match-all plan returns the newest
    /// rows under the filters with rank 0.
    pub fn text_candidates(&self, plan: &CandidatePlan) -> Result<Vec<(MemoryItem, f64)>> {
        if let Some(ids) = &plan.filters.ids {
            return self.fetch_by_ids(ids, &plan.filters);
        }
        if plan.match_all {
            return self.newest_under_filters(&plan.filters, plan.limit);
        }

        match self.fts_candidates(plan) {
            Ok(rows) => Ok(rows),
            Err(e) => {
                tracing::debug!("FTS unavailable, falling back to LIKE scan: {}", e);
                self.like_candidates(plan)
            }
        }
    }

    fn fetch_by_ids(&self, ids: &[String], filters: &SearchFilters) -> Result<Vec<(MemoryItem, f64)>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        self.read(|conn| {
            let placeholders = vec!["?"; ids.len()].join(", ");
            let sql = format!(
                "SELECT {ITEM_COLUMNS} FROM memories m
                 WHERE m.id IN ({placeholders}) AND m.deleted_at IS NULL"
            );
            let mut stmt = conn.prepare(&sql)?;
            let values: Vec<Value> = ids.iter().map(|id| Value::Text(id.clone())).collect();
            let rows = stmt
                .query_map(params_from_iter(values), Self::row_to_item)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows
                .into_iter()
                .filter(|item| Self::filters_match(item, filters))
                .map(|item| (item, 0.0))
                .collect())
        })
    }

    fn newest_under_filters(
        &self,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<(MemoryItem, f64)>> {
        self.read(|conn| {
            let mut clauses = vec!["m.deleted_at IS NULL".to_string()];
            let mut values: Vec<Value> = Vec::new();
            Self::filter_sql(filters, &mut clauses, &mut values);
            values.push(Value::Integer(limit as i64));

            let sql = format!(
                "SELECT {ITEM_COLUMNS} FROM memories m
                 WHERE {}
                 ORDER BY m.created_at DESC, m.id ASC
                 LIMIT ?",
                clauses.join(" AND ")
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(values), Self::row_to_item)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows.into_iter().map(|item| (item, 0.0)).collect())
        })
    }

    /// Empirical ceiling for bm25 magnitudes
    const FTS_RANK_CEILING: f64 = 100.0;

    fn fts_candidates(&self, plan: &CandidatePlan) -> Result<Vec<(MemoryItem, f64)>> {
        self.read(|conn| {
            let mut clauses = vec![
                "memories_fts MATCH ?".to_string(),
                "m.deleted_at IS NULL".to_string(),
            ];
            let mut values: Vec<Value> = vec![Value::Text(plan.fts_expr.clone())];
            Self::filter_sql(&plan.filters, &mut clauses, &mut values);
            values.push(Value::Integer(plan.limit as i64));

            let sql = format!(
                "SELECT {ITEM_COLUMNS}, bm25(memories_fts) AS score
                 FROM memories_fts
                 JOIN memories m ON m.rowid = memories_fts.rowid
                 WHERE {}
                 ORDER BY score ASC, m.created_at DESC, m.id ASC
                 LIMIT ?",
                clauses.join(" AND ")
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(values), |row| {
                    let item = Self::row_to_item(row)?;
                    let raw: f64 = row.get(23)?;
                    Ok((item, raw))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(rows
                .into_iter()
                .map(|(item, raw)| {
                    let rank = (raw.abs() / Self::FTS_RANK_CEILING).min(1.0);
                    (item, rank)
                })
                .collect())
        })
    }

    fn like_candidates(&self, plan: &CandidatePlan) -> Result<Vec<(MemoryItem, f64)>> {
        self.read(|conn| {
            let mut clauses = vec!["m.deleted_at IS NULL".to_string()];
            let mut values: Vec<Value> = Vec::new();

            for term in &plan.terms {
                clauses.push(
                    "(m.content LIKE ? OR m.tags LIKE ? OR COALESCE(m.source, '') LIKE ?)".into(),
                );
                let pattern = format!("%{term}%");
                values.push(Value::Text(pattern.clone()));
                values.push(Value::Text(pattern.clone()));
                values.push(Value::Text(pattern));
            }
            Self::filter_sql(&plan.filters, &mut clauses, &mut values);
            values.push(Value::Integer(plan.limit as i64));

            let sql = format!(
                "SELECT {ITEM_COLUMNS} FROM memories m
                 WHERE {}
                 ORDER BY m.created_at DESC, m.id ASC
                 LIMIT ?",
                clauses.join(" AND ")
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(values), Self::row_to_item)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows.into_iter().map(|item| (item, 0.0)).collect())
        })
    }

    // ------------------------------------------------------------------
    // Vector index
    // ------------------------------------------------------------------

    /// Whether the ANN index is loaded and usable
    pub fn vector_available(&self) -> bool {
        #[cfg(feature = "vector-search")]
        {
            self.vectors
                .lock()
                .map(|guard| guard.is_some())
                .unwrap_or(false)
        }
        #[cfg(not(feature = "vector-search"))]
        {
            false
        }
    }

    /// Nearest-neighbor candidates above `threshold`, post-filtered.
    /// Returns empty when the index is unavailable.
    pub fn vector_candidates(
        &self,
        query: &[f32],
        filters: &SearchFilters,
        limit: usize,
        threshold: f64,
    ) -> Result<Vec<(MemoryItem, f64)>> {
        #[cfg(feature = "vector-search")]
        {
            if query.len() != self.dimensions {
                return Err(EngineError::Validation(format!(
                    "query vector has {} dimensions, index expects {}",
                    query.len(),
                    self.dimensions
                )));
            }

            let hits = {
                let guard = self
                    .vectors
                    .lock()
                    .map_err(|_| EngineError::Fatal("vector index lock poisoned".into()))?;
                let Some(engine) = guard.as_ref() else {
                    return Ok(vec![]);
                };
                // Over-fetch so post-filtering can still fill the limit
                match engine.search(query, limit.saturating_mul(4).max(limit), threshold) {
                    Ok(hits) => hits,
                    Err(VectorSearchError::InvalidDimensions { expected, got }) => {
                        return Err(EngineError::Validation(format!(
                            "query vector has {got} dimensions, index expects {expected}"
                        )));
                    }
                    Err(e) => {
                        tracing::warn!("vector search failed: {}", e);
                        return Ok(vec![]);
                    }
                }
            };

            let mut results = Vec::new();
            for (id, similarity) in hits {
                if results.len() >= limit {
                    break;
                }
                match self.get(&id) {
                    Ok(item) if item.is_live() && Self::filters_match(&item, filters) => {
                        results.push((item, similarity));
                    }
                    Ok(_) => {}
                    Err(EngineError::NotFound(_)) => {}
                    Err(e) => return Err(e),
                }
            }
            Ok(results)
        }
        #[cfg(not(feature = "vector-search"))]
        {
            let _ = (query, filters, limit, threshold);
            Ok(vec![])
        }
    }

    /// Store an item's embedding and add it to the live index.
    pub fn put_embedding(&self, id: &str, vector: &[f32], model: &str) -> Result<()> {
        if vector.len() != self.dimensions {
            return Err(EngineError::Validation(format!(
                "embedding has {} dimensions, store expects {}",
                vector.len(),
                self.dimensions
            )));
        }

        let now = Utc::now();
        let blob = vector_to_bytes(vector);
        self.write(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let updated = tx.execute(
                "UPDATE memories SET has_embedding = 1, embedding_model = ?1 WHERE id = ?2",
                params![model, id],
            )?;
            if updated == 0 {
                return Err(EngineError::NotFound(id.to_string()));
            }
            tx.execute(
                "INSERT OR REPLACE INTO memory_embeddings
                    (memory_id, embedding, dimensions, model, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, blob, vector.len() as i64, model, now.to_rfc3339()],
            )?;
            tx.commit()?;
            Ok(())
        })?;

        #[cfg(feature = "vector-search")]
        {
            let mut guard = self
                .vectors
                .lock()
                .map_err(|_| EngineError::Fatal("vector index lock poisoned".into()))?;
            if let Some(engine) = guard.as_mut() {
                if let Err(e) = engine.add(id, vector) {
                    tracing::warn!("failed to index embedding for {}: {}", id, e);
                }
            }
        }
        Ok(())
    }

    #[cfg(feature = "vector-search")]
    fn vector_remove(&self, id: &str) {
        if let Ok(mut guard) = self.vectors.lock() {
            if let Some(engine) = guard.as_mut() {
                let _ = engine.remove(id);
            }
        }
    }

    /// Rebuild the in-memory index from the embeddings of live rows.
    #[cfg(feature = "vector-search")]
    fn load_vector_index(&self) -> Result<()> {
        let rows: Vec<(String, Vec<u8>)> = self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT e.memory_id, e.embedding
                 FROM memory_embeddings e
                 JOIN memories m ON m.id = e.memory_id
                 WHERE m.deleted_at IS NULL",
            )?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;

        let mut guard = self
            .vectors
            .lock()
            .map_err(|_| EngineError::Fatal("vector index lock poisoned".into()))?;
        let Some(engine) = guard.as_mut() else {
            return Ok(());
        };
        for (id, blob) in rows {
            match vector_from_bytes(&blob) {
                Some(vector) if vector.len() == self.dimensions => {
                    if let Err(e) = engine.add(&id, &vector) {
                        tracing::warn!("failed to load embedding for {}: {}", id, e);
                    }
                }
                _ => tracing::warn!("skipping stale embedding for {}", id),
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Bulk reads
    // ------------------------------------------------------------------

    /// Every row, optionally including soft-deleted ones
    pub fn all_items(&self, include_deleted: bool) -> Result<Vec<MemoryItem>> {
        self.read(|conn| {
            let sql = if include_deleted {
                format!("SELECT {ITEM_COLUMNS} FROM memories m ORDER BY m.created_at ASC")
            } else {
                format!(
                    "SELECT {ITEM_COLUMNS} FROM memories m
                     WHERE m.deleted_at IS NULL ORDER BY m.created_at ASC"
                )
            };
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], Self::row_to_item)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    /// Live rows under the export filters, newest first
    pub fn export_items(&self, filters: &SearchFilters) -> Result<Vec<MemoryItem>> {
        self.read(|conn| {
            let mut clauses = vec!["m.deleted_at IS NULL".to_string()];
            let mut values: Vec<Value> = Vec::new();
            Self::filter_sql(filters, &mut clauses, &mut values);

            let sql = format!(
                "SELECT {ITEM_COLUMNS} FROM memories m
                 WHERE {}
                 ORDER BY m.created_at DESC, m.id ASC",
                clauses.join(" AND ")
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(values), Self::row_to_item)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows
                .into_iter()
                .filter(|item| Self::filters_match(item, filters))
                .collect())
        })
    }

    /// Aggregate statistics
    pub fn stats(&self) -> Result<MemoryStats> {
        let now = Utc::now();
        self.read(|conn| {
            let mut stats = MemoryStats::default();

            conn.query_row(
                "SELECT
                    COUNT(*) FILTER (WHERE deleted_at IS NULL),
                    COUNT(*) FILTER (WHERE deleted_at IS NOT NULL),
                    COUNT(*) FILTER (WHERE pinned != 0 AND deleted_at IS NULL),
                    COUNT(*) FILTER (WHERE has_embedding != 0 AND deleted_at IS NULL),
                    COUNT(*) FILTER (WHERE next_review_at IS NOT NULL
                                     AND next_review_at <= ?1 AND deleted_at IS NULL),
                    MIN(created_at) FILTER (WHERE deleted_at IS NULL),
                    MAX(created_at) FILTER (WHERE deleted_at IS NULL)
                 FROM memories",
                params![now.to_rfc3339()],
                |row| {
                    stats.total_items = row.get(0)?;
                    stats.soft_deleted_items = row.get(1)?;
                    stats.pinned_items = row.get(2)?;
                    stats.items_with_embeddings = row.get(3)?;
                    stats.items_due_for_review = row.get(4)?;
                    let oldest: Option<String> = row.get(5)?;
                    let newest: Option<String> = row.get(6)?;
                    stats.oldest_memory = Self::parse_ts_opt(5, oldest)?;
                    stats.newest_memory = Self::parse_ts_opt(6, newest)?;
                    Ok(())
                },
            )?;

            let mut stmt = conn.prepare(
                "SELECT memory_type, COUNT(*) FROM memories
                 WHERE deleted_at IS NULL GROUP BY memory_type",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            for (memory_type, count) in rows {
                stats.by_type.insert(memory_type, count);
            }

            stats.database_bytes = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
            Ok(stats)
        })
    }

    // ------------------------------------------------------------------
    // Working-memory buffers
    // ------------------------------------------------------------------

    pub fn put_buffer(&self, buffer: &WorkingMemoryBuffer) -> Result<()> {
        let items_json = serde_json::to_string(&buffer.items)
            .map_err(|e| EngineError::Fatal(e.to_string()))?;
        self.write(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO working_memory_buffers
                    (session_id, items, token_budget, expires_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    buffer.session_id,
                    items_json,
                    buffer.token_budget,
                    buffer.expires_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_buffer(&self, session_id: &str) -> Result<Option<WorkingMemoryBuffer>> {
        self.read(|conn| {
            conn.query_row(
                "SELECT session_id, items, token_budget, expires_at
                 FROM working_memory_buffers WHERE session_id = ?1",
                params![session_id],
                |row| {
                    let items_raw: String = row.get(1)?;
                    Ok(WorkingMemoryBuffer {
                        session_id: row.get(0)?,
                        items: serde_json::from_str(&items_raw).unwrap_or_default(),
                        token_budget: row.get(2)?,
                        expires_at: Self::parse_ts(3, row.get(3)?)?,
                    })
                },
            )
            .optional()
            .map_err(EngineError::from)
        })
    }

    /// Drop expired buffers; returns how many were evicted.
    pub fn evict_expired_buffers(&self, now: DateTime<Utc>) -> Result<usize> {
        self.write(|conn| {
            let n = conn.execute(
                "DELETE FROM working_memory_buffers WHERE expires_at <= ?1",
                params![now.to_rfc3339()],
            )?;
            Ok(n)
        })
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Apply a cleanup batch inside one write transaction, re-verifying
    /// every candidate under the lock. Pinned rows are never hard
    /// deleted; hard deletion also requires the item to be unused for
    /// longer than its type TTL (negative TTL means never).
    pub fn apply_cleanup(
        &self,
        hard: &[String],
        soft: &[String],
        ttl: &ForgetTtlHours,
        now: DateTime<Utc>,
    ) -> Result<CleanupCounts> {
        let counts = self.write(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let mut counts = CleanupCounts::default();

            for id in hard {
                let row = tx
                    .query_row(
                        &format!("SELECT {ITEM_COLUMNS} FROM memories m WHERE m.id = ?1"),
                        params![id],
                        Self::row_to_item,
                    )
                    .optional()?;
                let Some(item) = row else {
                    counts.skipped += 1;
                    continue;
                };
                let ttl_hours = ttl_for_type(ttl, item.memory_type);
                let expired = ttl_hours >= 0
                    && item.days_since_access(now) * 24.0 > ttl_hours as f64;
                if item.pinned || !expired {
                    counts.skipped += 1;
                    continue;
                }
                tx.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
                counts.hard_deleted += 1;
            }

            for id in soft {
                let row: Option<(i64, Option<String>)> = tx
                    .query_row(
                        "SELECT pinned, deleted_at FROM memories WHERE id = ?1",
                        params![id],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?;
                match row {
                    Some((0, None)) => {
                        tx.execute(
                            "UPDATE memories SET deleted_at = ?1 WHERE id = ?2",
                            params![now.to_rfc3339(), id],
                        )?;
                        counts.soft_deleted += 1;
                    }
                    _ => counts.skipped += 1,
                }
            }

            tx.commit()?;
            Ok(counts)
        })?;

        #[cfg(feature = "vector-search")]
        for id in hard.iter().chain(soft.iter()) {
            self.vector_remove(id);
        }

        Ok(counts)
    }

    /// Remove soft-deleted rows past the audit TTL
    pub fn purge_soft_deleted(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.write(|conn| {
            let n = conn.execute(
                "DELETE FROM memories WHERE deleted_at IS NOT NULL AND deleted_at <= ?1",
                params![cutoff.to_rfc3339()],
            )?;
            Ok(n)
        })
    }

    /// Truncate the WAL; called from the batch loop, never mid-request.
    pub fn checkpoint(&self) -> Result<()> {
        self.write(|conn| {
            conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
            Ok(())
        })
    }
}

/// TTL hours for one memory type
pub fn ttl_for_type(ttl: &ForgetTtlHours, memory_type: MemoryType) -> i64 {
    match memory_type {
        MemoryType::Working => ttl.working,
        MemoryType::Episodic => ttl.episodic,
        MemoryType::Semantic => ttl.semantic,
        MemoryType::Procedural => ttl.procedural,
    }
}

/// Rewrite positional `?` placeholders to `?1..?n` so dynamically built
/// statements stay unambiguous.
fn renumber_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut n = 0;
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '?' && !chars.peek().is_some_and(|d| d.is_ascii_digit()) {
            n += 1;
            out.push('?');
            out.push_str(&n.to_string());
        } else {
            out.push(c);
        }
    }
    out
}

// ============================================================================
// TESTS
// ============================================================================
