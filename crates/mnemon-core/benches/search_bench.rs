//! Search-path microbenchmarks: ranking, fallback embedding, and the
//! hybrid pipeline over a seeded store.

use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;

use mnemon_core::{
    Embedder, HybridSearch, MemoryType, ProviderKind, RememberInput, SearchFilters,
    SearchStatsRegistry, Store,
    rank::{RankFeatures, RankWeights, final_score, trigram_jaccard},
};

fn bench_ranking(c: &mut Criterion) {
    let weights = RankWeights::default();
    let features = RankFeatures {
        relevance: 0.7,
        recency: 0.4,
        importance: 0.6,
        usage: 0.3,
        duplication_penalty: 0.1,
    };
    c.bench_function("rank/final_score", |b| {
        b.iter(|| final_score(black_box(&features), black_box(&weights)))
    });

    let a = "the hybrid search pipeline fuses lexical and vector candidates";
    let d = "vector candidates come from an approximate nearest neighbor index";
    c.bench_function("rank/trigram_jaccard", |b| {
        b.iter(|| trigram_jaccard(black_box(a), black_box(d)))
    });
}

fn bench_fallback_embedding(c: &mut Criterion) {
    let embedder = Embedder::new(ProviderKind::Fallback, None, 1);
    let text = "embedding throughput probe with a sentence of realistic length";
    c.bench_function("embed/fallback", |b| {
        b.iter(|| embedder.embed(black_box(text)).unwrap())
    });
}

fn bench_hybrid_search(c: &mut Criterion) {
    let dir = tempfile::TempDir::new().unwrap();
    let embedder = Arc::new(Embedder::new(ProviderKind::Fallback, None, 1000));
    let store =
        Arc::new(Store::open(&dir.path().join("bench.db"), embedder.dimensions()).unwrap());
    let stats = Arc::new(SearchStatsRegistry::default());

    for i in 0..200 {
        let item = store
            .insert(&RememberInput::new(
                format!("benchmark corpus entry {i} about search and retrieval"),
                MemoryType::Semantic,
            ))
            .unwrap();
        let vector = embedder.embed(&item.content).unwrap();
        store
            .put_embedding(&item.id, &vector, "hash-ngram-v1")
            .unwrap();
    }

    let search = HybridSearch::new(store, embedder, stats);
    c.bench_function("search/hybrid_200", |b| {
        b.iter(|| {
            search
                .search(
                    black_box("search and retrieval"),
                    &SearchFilters::default(),
                    10,
                    None,
                )
                .unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_ranking,
    bench_fallback_embedding,
    bench_hybrid_search
);
criterion_main!(benches);
