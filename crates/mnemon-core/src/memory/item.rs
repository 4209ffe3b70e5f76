//! Memory Item - the primary entity
//!
//! A typed text fragment with metadata, usage counters, and review
//! scheduling state. Ids are opaque strings prefixed `mem_`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

// ============================================================================
// CLOSED ENUMS
// ============================================================================

/// Memory type, drawn from a closed set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    /// Scratch state for the current task; decays within days
    Working,
    /// What happened - events, conversations
    Episodic,
    /// What is known - facts, concepts
    #[default]
    Semantic,
    /// How to do things - skills, procedures
    Procedural,
}

impl MemoryType {
    /// All members, in display order
    pub const ALL: [MemoryType; 4] = [
        MemoryType::Working,
        MemoryType::Episodic,
        MemoryType::Semantic,
        MemoryType::Procedural,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Working => "working",
            MemoryType::Episodic => "episodic",
            MemoryType::Semantic => "semantic",
            MemoryType::Procedural => "procedural",
        }
    }

    /// Strict parse; unknown names are validation errors.
    pub fn parse(s: &str) -> Result<Self, EngineError> {
        match s.to_lowercase().as_str() {
            "working" => Ok(MemoryType::Working),
            "episodic" => Ok(MemoryType::Episodic),
            "semantic" => Ok(MemoryType::Semantic),
            "procedural" => Ok(MemoryType::Procedural),
            other => Err(EngineError::Validation(format!(
                "unknown memory type: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Privacy scope, drawn from a closed set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PrivacyScope {
    #[default]
    Private,
    Team,
    Public,
}

impl PrivacyScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrivacyScope::Private => "private",
            PrivacyScope::Team => "team",
            PrivacyScope::Public => "public",
        }
    }

    pub fn parse(s: &str) -> Result<Self, EngineError> {
        match s.to_lowercase().as_str() {
            "private" => Ok(PrivacyScope::Private),
            "team" => Ok(PrivacyScope::Team),
            "public" => Ok(PrivacyScope::Public),
            other => Err(EngineError::Validation(format!(
                "unknown privacy scope: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for PrivacyScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Directed link relation between two memories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkRelation {
    CauseOf,
    DerivedFrom,
    Duplicates,
    Contradicts,
}

impl LinkRelation {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkRelation::CauseOf => "cause_of",
            LinkRelation::DerivedFrom => "derived_from",
            LinkRelation::Duplicates => "duplicates",
            LinkRelation::Contradicts => "contradicts",
        }
    }

    pub fn parse(s: &str) -> Result<Self, EngineError> {
        match s.to_lowercase().as_str() {
            "cause_of" => Ok(LinkRelation::CauseOf),
            "derived_from" => Ok(LinkRelation::DerivedFrom),
            "duplicates" => Ok(LinkRelation::Duplicates),
            "contradicts" => Ok(LinkRelation::Contradicts),
            other => Err(EngineError::Validation(format!(
                "unknown relation type: {other}"
            ))),
        }
    }
}

/// Feedback event kind, append-only log entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    Used,
    Edited,
    Neglected,
    Helpful,
    NotHelpful,
}

impl FeedbackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackKind::Used => "used",
            FeedbackKind::Edited => "edited",
            FeedbackKind::Neglected => "neglected",
            FeedbackKind::Helpful => "helpful",
            FeedbackKind::NotHelpful => "not_helpful",
        }
    }

    pub fn parse(s: &str) -> Result<Self, EngineError> {
        match s.to_lowercase().as_str() {
            "used" => Ok(FeedbackKind::Used),
            "edited" => Ok(FeedbackKind::Edited),
            "neglected" => Ok(FeedbackKind::Neglected),
            "helpful" => Ok(FeedbackKind::Helpful),
            "not_helpful" => Ok(FeedbackKind::NotHelpful),
            other => Err(EngineError::Validation(format!(
                "unknown feedback event: {other}"
            ))),
        }
    }
}

// ============================================================================
// MEMORY ITEM
// ============================================================================

/// A memory item
///
/// Lifecycle: `Live -> SoftDeleted -> HardDeleted`. Soft-deleted rows keep
/// `deleted_at` set and drop out of candidate generation; hard deletion
/// removes the row and cascades to embeddings, links, and feedback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryItem {
    /// Opaque id, prefix `mem_`
    pub id: String,
    pub memory_type: MemoryType,
    pub content: String,
    /// Stored importance in [0, 1]
    pub importance: f64,
    pub privacy_scope: PrivacyScope,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub pinned: bool,
    /// Ordered, duplicate-free
    pub tags: Vec<String>,
    pub source: Option<String>,
    pub project_id: Option<String>,
    pub user_id: Option<String>,
    pub agent_id: Option<String>,

    // Usage counters, driven by feedback events
    pub view_count: i64,
    pub cite_count: i64,
    pub edit_count: i64,

    /// Soft-delete marker; `None` for live rows
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,

    // Review scheduling (spaced repetition)
    pub review_interval_days: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_review_at: Option<DateTime<Utc>>,
    pub review_count: i64,
    pub success_count: i64,

    // Embedding metadata
    pub has_embedding: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
}

impl MemoryItem {
    /// Whole days since creation (fractional)
    pub fn age_days(&self, now: DateTime<Utc>) -> f64 {
        (now - self.created_at).num_seconds().max(0) as f64 / 86_400.0
    }

    /// Days since the item was last accessed (fractional)
    pub fn days_since_access(&self, now: DateTime<Utc>) -> f64 {
        (now - self.last_accessed).num_seconds().max(0) as f64 / 86_400.0
    }

    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// Allocate a fresh memory id: `mem_{unix_millis}_{uuid prefix}`
pub fn new_memory_id(now: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("mem_{}_{}", now.timestamp_millis(), &suffix[..8])
}

/// Drop duplicate tags while preserving first-seen order.
pub fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    tags.into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

// ============================================================================
// INPUT TYPES
// ============================================================================

/// Input for creating a new memory. Field names are the wire names.
///
/// `deny_unknown_fields` prevents field injection through the tool surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RememberInput {
    pub content: String,
    #[serde(rename = "type", default)]
    pub memory_type: MemoryType,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_importance")]
    pub importance: f64,
    pub source: Option<String>,
    #[serde(default)]
    pub privacy_scope: PrivacyScope,
    pub project_id: Option<String>,
    pub user_id: Option<String>,
    pub agent_id: Option<String>,
}

fn default_importance() -> f64 {
    0.5
}

impl RememberInput {
    pub fn new(content: impl Into<String>, memory_type: MemoryType) -> Self {
        Self {
            content: content.into(),
            memory_type,
            tags: vec![],
            importance: 0.5,
            source: None,
            privacy_scope: PrivacyScope::default(),
            project_id: None,
            user_id: None,
            agent_id: None,
        }
    }

    /// Invariant checks shared by every write path.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.content.trim().is_empty() {
            return Err(EngineError::Validation("content must not be empty".into()));
        }
        if !(0.0..=1.0).contains(&self.importance) {
            return Err(EngineError::Validation(format!(
                "importance must be in [0, 1], got {}",
                self.importance
            )));
        }
        Ok(())
    }
}

/// Whitelisted update patch. Fields outside this set cannot be changed
/// through the tool surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryPatch {
    pub content: Option<String>,
    #[serde(rename = "type")]
    pub memory_type: Option<MemoryType>,
    pub tags: Option<Vec<String>>,
    pub importance: Option<f64>,
    pub pinned: Option<bool>,
    pub privacy_scope: Option<PrivacyScope>,
    pub source: Option<String>,
    pub project_id: Option<String>,
}

impl MemoryPatch {
    pub fn is_empty(&self) -> bool {
        self.content.is_none()
            && self.memory_type.is_none()
            && self.tags.is_none()
            && self.importance.is_none()
            && self.pinned.is_none()
            && self.privacy_scope.is_none()
            && self.source.is_none()
            && self.project_id.is_none()
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if let Some(content) = &self.content {
            if content.trim().is_empty() {
                return Err(EngineError::Validation("content must not be empty".into()));
            }
        }
        if let Some(importance) = self.importance {
            if !(0.0..=1.0).contains(&importance) {
                return Err(EngineError::Validation(format!(
                    "importance must be in [0, 1], got {importance}"
                )));
            }
        }
        Ok(())
    }
}

/// Search filters, composed into candidate queries
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchFilters {
    /// Restrict to these ids; bypasses lexical matching entirely
    pub ids: Option<Vec<String>>,
    #[serde(rename = "types")]
    pub memory_types: Option<Vec<MemoryType>>,
    pub privacy_scopes: Option<Vec<PrivacyScope>>,
    pub pinned: Option<bool>,
    pub time_from: Option<DateTime<Utc>>,
    pub time_to: Option<DateTime<Utc>>,
    pub project_id: Option<String>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.ids.is_none()
            && self.memory_types.is_none()
            && self.privacy_scopes.is_none()
            && self.pinned.is_none()
            && self.time_from.is_none()
            && self.time_to.is_none()
            && self.project_id.is_none()
    }
}

// ============================================================================
// RELATED ROWS
// ============================================================================

/// A directed, typed link between two memories. Unique per triple.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryLink {
    pub source_id: String,
    pub target_id: String,
    pub relation: LinkRelation,
    pub created_at: DateTime<Utc>,
}

/// One row of the append-only feedback log
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackEvent {
    pub memory_id: String,
    pub event: FeedbackKind,
    pub score: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// Session-keyed ephemeral buffer of memory ids
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkingMemoryBuffer {
    pub session_id: String,
    pub items: Vec<String>,
    pub token_budget: i64,
    pub expires_at: DateTime<Utc>,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_roundtrip() {
        for t in MemoryType::ALL {
            assert_eq!(MemoryType::parse(t.as_str()).unwrap(), t);
        }
        assert!(MemoryType::parse("emotional").is_err());
    }

    #[test]
    fn test_scope_and_relation_parse() {
        assert_eq!(PrivacyScope::parse("team").unwrap(), PrivacyScope::Team);
        assert!(PrivacyScope::parse("global").is_err());
        assert_eq!(
            LinkRelation::parse("derived_from").unwrap(),
            LinkRelation::DerivedFrom
        );
        assert!(LinkRelation::parse("related").is_err());
    }

    #[test]
    fn test_memory_id_shape() {
        let id = new_memory_id(Utc::now());
        assert!(id.starts_with("mem_"));
        let parts: Vec<&str> = id.splitn(3, '_').collect();
        assert_eq!(parts.len(), 3);
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 8);
    }

    #[test]
    fn test_normalize_tags_dedupes_in_order() {
        let tags = vec![
            "rust".to_string(),
            "memory".to_string(),
            "rust".to_string(),
            "  ".to_string(),
            "search".to_string(),
        ];
        assert_eq!(normalize_tags(tags), vec!["rust", "memory", "search"]);
    }

    #[test]
    fn test_remember_input_validation() {
        let mut input = RememberInput::new("hello", MemoryType::Semantic);
        assert!(input.validate().is_ok());

        input.importance = 1.5;
        assert!(input.validate().is_err());

        input.importance = 0.5;
        input.content = "   ".to_string();
        assert!(input.validate().is_err());
    }

    #[test]
    fn test_remember_input_deny_unknown_fields() {
        let json = r#"{"content": "test", "type": "semantic"}"#;
        assert!(serde_json::from_str::<RememberInput>(json).is_ok());

        let json = r#"{"content": "test", "type": "semantic", "evil": 1}"#;
        assert!(serde_json::from_str::<RememberInput>(json).is_err());
    }

    #[test]
    fn test_patch_whitelist() {
        // view_count is not part of the whitelist and must be rejected
        let json = r#"{"view_count": 99}"#;
        assert!(serde_json::from_str::<MemoryPatch>(json).is_err());

        let json = r#"{"importance": 0.9, "pinned": true}"#;
        let patch: MemoryPatch = serde_json::from_str(json).unwrap();
        assert!(!patch.is_empty());
        assert!(patch.validate().is_ok());
    }
}
