//! End-to-end engine scenarios against a real on-disk database.
//!
//! The fallback embedder keeps these hermetic: no model download, fully
//! deterministic vectors.

use chrono::Utc;
use mnemon_core::{
    Config, Engine, EngineError, FeedbackKind, ForgetWeights, MemoryType, ProviderKind,
    RememberInput, ReviewFeatures, SearchFilters, adaptive_weights, forget, next_interval,
    rank::{RankFeatures, RankWeights, final_score},
};
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
fn store_recall_forget_roundtrip() {
    let (_dir, engine) = open_engine();

    let mut input = RememberInput::new("검색 가능한 테스트 기억", MemoryType::Semantic);
    input.importance = 0.8;
    let item = engine.remember(&input).unwrap();
    assert!(item.id.starts_with("mem_"));

    // remember -> get yields the written content exactly
    let fetched = engine.get(&item.id).unwrap();
    assert_eq!(fetched.content, "검색 가능한 테스트 기억");

    let recalled = engine
        .recall("테스트 기억", &SearchFilters::default(), None)
        .unwrap();
    assert!(recalled.items.iter().any(|i| i.id == item.id));

    let outcome = engine.forget(&item.id, true, true).unwrap();
    assert!(outcome.success);
    assert!(outcome.message.contains("완전히 삭제"));

    assert!(matches!(
        engine.get(&item.id),
        Err(EngineError::NotFound(_))
    ));
    let recalled = engine
        .recall("테스트 기억", &SearchFilters::default(), None)
        .unwrap();
    assert!(!recalled.items.iter().any(|i| i.id == item.id));
}

#[test]
fn forget_score_ordering_scenario() {
    // A: 1 year old, importance 0.2, unviewed, unpinned
    // B: 1 day old, importance 0.8, pinned
    // C: 30 days old, importance 0.4, viewed twice
    let now = Utc::now();
    let base = |id: &str, age_days: i64, importance: f64, views: i64, pinned: bool| {
        let created = now - chrono::Duration::days(age_days);
        mnemon_core::MemoryItem {
            id: id.to_string(),
            memory_type: MemoryType::Episodic,
            content: format!("item {id}"),
            importance,
            privacy_scope: mnemon_core::PrivacyScope::Private,
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
    };
    let items = vec![
        base("mem_a", 365, 0.2, 0, false),
        base("mem_b", 1, 0.8, 0, true),
        base("mem_c", 30, 0.4, 2, false),
    ];

    let analyses = forget::analyze_candidates(&items, &ForgetWeights::default(), now);
    let score = |id: &str| {
        analyses
            .iter()
            .find(|a| a.memory_id == id)
            .map(|a| a.score)
            .unwrap()
    };

    let (fa, fb, fc) = (score("mem_a"), score("mem_b"), score("mem_c"));
    assert!(fa > fc && fc > fb, "expected F_A > F_C > F_B, got {fa} {fc} {fb}");
    assert!(fa >= 0.6);
    assert!(fb < 0.3);
}

#[test]
fn spaced_repetition_scenario() {
    let features = ReviewFeatures {
        importance: 0.8,
        usage: 0.6,
        helpful_feedback: 0.4,
        bad_feedback: 0.2,
    };
    assert_eq!(next_interval(7, &features), 13);
    assert_eq!(next_interval(7, &ReviewFeatures::default()), 7);
}

#[test]
fn ranking_weights_scenario() {
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
fn hybrid_adaptive_weights_scenario() {
    let (w_text, w_vec) = adaptive_weights("api");
    assert!((w_text - 0.2).abs() < 0.01);
    assert!((w_vec - 0.8).abs() < 0.01);

    let (w_text, w_vec) = adaptive_weights("how to implement authentication flow");
    assert!((w_text - 0.6).abs() < 0.01);
    assert!((w_vec - 0.4).abs() < 0.01);
}

#[test]
fn batch_cleanup_idempotence_scenario() {
    let (_dir, engine) = open_engine();
    for i in 0..5 {
        engine
            .remember(&RememberInput::new(
                format!("recent well-kept memory {i}"),
                MemoryType::Semantic,
            ))
            .unwrap();
    }

    let first = engine.run_cleanup();
    assert!(first.errors.is_empty());

    let second = engine.run_cleanup();
    assert_eq!(second.hard_deleted, 0);
    assert_eq!(second.soft_deleted, 0);
    assert!(second.errors.is_empty());
}

#[test]
fn update_then_search_finds_new_content() {
    let (_dir, engine) = open_engine();
    let item = engine
        .remember(&RememberInput::new("initial draft wording", MemoryType::Semantic))
        .unwrap();

    let patch = mnemon_core::MemoryPatch {
        content: Some("final polished phrasing".into()),
        ..Default::default()
    };
    engine.update(&item.id, &patch).unwrap();

    let hits = engine
        .recall("polished phrasing", &SearchFilters::default(), None)
        .unwrap();
    assert!(hits.items.iter().any(|i| i.id == item.id));

    let stale = engine
        .recall("initial draft", &SearchFilters::default(), None)
        .unwrap();
    assert!(!stale.items.iter().any(|i| i.id == item.id));
}

#[test]
fn pin_protects_from_cleanup_and_is_idempotent() {
    let (_dir, engine) = open_engine();
    let item = engine
        .remember(&RememberInput::new("load-bearing fact", MemoryType::Working))
        .unwrap();

    engine.pin(&item.id).unwrap();
    let again = engine.pin(&item.id).unwrap();
    assert!(again.pinned);

    // Hard delete on a pinned item is rejected
    assert!(matches!(
        engine.forget(&item.id, true, true),
        Err(EngineError::Conflict(_))
    ));

    let unpinned = engine.unpin(&item.id).unwrap();
    assert!(!unpinned.pinned);
    let again = engine.unpin(&item.id).unwrap();
    assert!(!again.pinned);
}

#[test]
fn feedback_drives_counters_and_reviews() {
    let (_dir, engine) = open_engine();
    let item = engine
        .remember(&RememberInput::new("often-used memory", MemoryType::Semantic))
        .unwrap();

    engine.feedback(&item.id, FeedbackKind::Used, None).unwrap();
    engine.feedback(&item.id, FeedbackKind::Used, None).unwrap();
    let after = engine
        .feedback(&item.id, FeedbackKind::Helpful, Some(1.0))
        .unwrap();

    assert_eq!(after.view_count, 2);
    assert_eq!(after.cite_count, 1);
    assert_eq!(after.review_count, 3);
    assert!(after.next_review_at.is_some());
    assert!(after.review_interval_days >= 1);

    // Score outside [0, 1] is rejected
    assert!(matches!(
        engine.feedback(&item.id, FeedbackKind::Helpful, Some(1.5)),
        Err(EngineError::Validation(_))
    ));
}

#[test]
fn hybrid_search_is_deterministic_across_runs() {
    let (_dir, engine) = open_engine();
    for i in 0..12 {
        engine
            .remember(&RememberInput::new(
                format!("deterministic ordering probe number {i}"),
                MemoryType::Semantic,
            ))
            .unwrap();
    }

    let run = || {
        engine
            .hybrid_search(
                "deterministic ordering probe",
                &SearchFilters::default(),
                Some(5),
                None,
                None,
            )
            .unwrap()
            .items
            .into_iter()
            .map(|s| s.item.id)
            .collect::<Vec<_>>()
    };
    assert_eq!(run(), run());
}

#[test]
fn embedding_dimension_invariant() {
    let (_dir, engine) = open_engine();
    let item = engine
        .remember(&RememberInput::new("dimension probe", MemoryType::Semantic))
        .unwrap();
    assert!(item.has_embedding);

    // Every embedded item carries the store's configured dimension
    assert_eq!(engine.store().dimensions(), 768);
}

#[test]
fn link_roundtrip_and_unique_triple() {
    let (_dir, engine) = open_engine();
    let a = engine
        .remember(&RememberInput::new("root cause", MemoryType::Episodic))
        .unwrap();
    let b = engine
        .remember(&RememberInput::new("incident report", MemoryType::Episodic))
        .unwrap();

    engine
        .link(&a.id, &b.id, mnemon_core::LinkRelation::CauseOf)
        .unwrap();
    assert!(matches!(
        engine.link(&a.id, &b.id, mnemon_core::LinkRelation::CauseOf),
        Err(EngineError::Conflict(_))
    ));

    let links = engine.links_for(&a.id).unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].target_id, b.id);

    assert!(engine
        .unlink(&a.id, &b.id, mnemon_core::LinkRelation::CauseOf)
        .unwrap());
    assert!(engine.links_for(&a.id).unwrap().is_empty());
}

#[test]
fn feedback_log_is_append_only() {
    let (_dir, engine) = open_engine();
    let item = engine
        .remember(&RememberInput::new("graded memory", MemoryType::Semantic))
        .unwrap();

    engine.feedback(&item.id, FeedbackKind::Used, None).unwrap();
    engine
        .feedback(&item.id, FeedbackKind::NotHelpful, Some(0.2))
        .unwrap();

    let history = engine.feedback_history(&item.id).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].event, FeedbackKind::Used);
    assert_eq!(history[1].event, FeedbackKind::NotHelpful);
}
