//! Database Migrations
//!
//! Versioned schema definitions applied at open time by the writer
//! connection. Triggers keep the FTS virtual table in sync with the
//! primary table; the vector index is rebuilt in memory from the
//! embeddings table instead.

use rusqlite::Connection;

use crate::error::{EngineError, Result};

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub up: &'static str,
}

/// Migration definitions, in order
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial schema: memories, embeddings, links, feedback, FTS5",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "Working-memory session buffers",
        up: MIGRATION_V2_UP,
    },
];

/// V1: primary tables and the FTS mirror
const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS memories (
    id TEXT PRIMARY KEY,
    memory_type TEXT NOT NULL DEFAULT 'semantic'
        CHECK (memory_type IN ('working', 'episodic', 'semantic', 'procedural')),
    content TEXT NOT NULL,
    importance REAL NOT NULL DEFAULT 0.5
        CHECK (importance >= 0.0 AND importance <= 1.0),
    privacy_scope TEXT NOT NULL DEFAULT 'private'
        CHECK (privacy_scope IN ('private', 'team', 'public')),
    created_at TEXT NOT NULL,
    last_accessed TEXT NOT NULL,
    pinned INTEGER NOT NULL DEFAULT 0,
    tags TEXT NOT NULL DEFAULT '[]',
    source TEXT,
    project_id TEXT,
    user_id TEXT,
    agent_id TEXT,

    -- Usage counters, driven by feedback events
    view_count INTEGER NOT NULL DEFAULT 0,
    cite_count INTEGER NOT NULL DEFAULT 0,
    edit_count INTEGER NOT NULL DEFAULT 0,

    -- Soft-delete marker; live rows have NULL
    deleted_at TEXT,

    -- Spaced-repetition state
    review_interval_days INTEGER NOT NULL DEFAULT 1,
    next_review_at TEXT,
    review_count INTEGER NOT NULL DEFAULT 0,
    success_count INTEGER NOT NULL DEFAULT 0,

    -- Embedding metadata
    has_embedding INTEGER NOT NULL DEFAULT 0,
    embedding_model TEXT
);

CREATE INDEX IF NOT EXISTS idx_memories_created ON memories(created_at);
CREATE INDEX IF NOT EXISTS idx_memories_type ON memories(memory_type);
CREATE INDEX IF NOT EXISTS idx_memories_deleted ON memories(deleted_at);
CREATE INDEX IF NOT EXISTS idx_memories_pinned ON memories(pinned);
CREATE INDEX IF NOT EXISTS idx_memories_next_review ON memories(next_review_at);

-- Embeddings, one row per item, binary f32 little-endian blob
CREATE TABLE IF NOT EXISTS memory_embeddings (
    memory_id TEXT PRIMARY KEY REFERENCES memories(id) ON DELETE CASCADE,
    embedding BLOB NOT NULL,
    dimensions INTEGER NOT NULL,
    model TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- Directed typed links, unique per triple
CREATE TABLE IF NOT EXISTS memory_links (
    source_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
    target_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
    relation TEXT NOT NULL
        CHECK (relation IN ('cause_of', 'derived_from', 'duplicates', 'contradicts')),
    created_at TEXT NOT NULL,
    PRIMARY KEY (source_id, target_id, relation)
);

CREATE INDEX IF NOT EXISTS idx_links_target ON memory_links(target_id);

-- Append-only feedback log
CREATE TABLE IF NOT EXISTS feedback_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    memory_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
    event TEXT NOT NULL
        CHECK (event IN ('used', 'edited', 'neglected', 'helpful', 'not_helpful')),
    score REAL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_feedback_memory ON feedback_events(memory_id);

-- FTS5 mirror of (content, tags, source), external content
CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
    content,
    tags,
    source,
    content='memories',
    content_rowid='rowid'
);

-- Triggers keep the FTS index coherent with the primary table
CREATE TRIGGER IF NOT EXISTS memories_ai AFTER INSERT ON memories BEGIN
    INSERT INTO memories_fts(rowid, content, tags, source)
    VALUES (NEW.rowid, NEW.content, NEW.tags, NEW.source);
END;

CREATE TRIGGER IF NOT EXISTS memories_ad AFTER DELETE ON memories BEGIN
    INSERT INTO memories_fts(memories_fts, rowid, content, tags, source)
    VALUES ('delete', OLD.rowid, OLD.content, OLD.tags, OLD.source);
END;

CREATE TRIGGER IF NOT EXISTS memories_au AFTER UPDATE ON memories BEGIN
    INSERT INTO memories_fts(memories_fts, rowid, content, tags, source)
    VALUES ('delete', OLD.rowid, OLD.content, OLD.tags, OLD.source);
    INSERT INTO memories_fts(rowid, content, tags, source)
    VALUES (NEW.rowid, NEW.content, NEW.tags, NEW.source);
END;

-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);
"#;

/// V2: ephemeral session buffers
const MIGRATION_V2_UP: &str = r#"
CREATE TABLE IF NOT EXISTS working_memory_buffers (
    session_id TEXT PRIMARY KEY,
    items TEXT NOT NULL DEFAULT '[]',
    token_budget INTEGER NOT NULL DEFAULT 1200,
    expires_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_buffers_expires ON working_memory_buffers(expires_at);
"#;

/// Apply any migrations newer than the stored schema version.
pub fn apply_migrations(conn: &Connection) -> Result<()> {
    // schema_version may not exist yet on a fresh database
    let current: u32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    for migration in MIGRATIONS {
        if migration.version <= current {
            continue;
        }
        tracing::info!(
            version = migration.version,
            "applying migration: {}",
            migration.description
        );
        conn.execute_batch(migration.up)
            .map_err(|e| EngineError::Fatal(format!(
                "migration v{} failed: {e}",
                migration.version
            )))?;
        conn.execute(
            "INSERT OR REPLACE INTO schema_version (version, applied_at) VALUES (?1, datetime('now'))",
            [migration.version],
        )?;
    }

    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_ordered_and_unique() {
        let mut last = 0;
        for migration in MIGRATIONS {
            assert!(migration.version > last, "migrations out of order");
            last = migration.version;
        }
    }

    #[test]
    fn test_apply_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        apply_migrations(&conn).unwrap();
        apply_migrations(&conn).unwrap();

        let version: u32 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, MIGRATIONS.last().unwrap().version);
    }
}
