//! Benchmarks for revision replay and commit.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

use revkb::config::StoreConfig;
use revkb::engine::Engine;
use revkb::store::log::RevisionLog;
use revkb::term::{ContextKey, Term, Triple, TriplePattern};

fn triple(i: usize) -> Triple {
    Triple::new(
        Term::iri(format!("http://example.org/s{}", i % 97)),
        Term::iri("http://example.org/p"),
        Term::literal(format!("value {i}")),
    )
}

fn bench_engine(dir: &std::path::Path) -> Engine {
    Engine::open(
        StoreConfig::new(dir)
            .with_create(true)
            .with_sync_writes(false),
    )
    .unwrap()
}

/// A context with 50 revisions of 100 triples each, every fifth one a removal.
fn seeded_store() -> (tempfile::TempDir, ContextKey) {
    let dir = tempfile::TempDir::new().unwrap();
    let ctx = ContextKey::named("bench");
    let engine = bench_engine(dir.path());
    for rev in 0..50 {
        if rev % 5 == 4 {
            let victim = triple((rev - 1) * 100);
            engine.remove(&TriplePattern::from(&victim), &ctx).unwrap();
        } else {
            for i in 0..100 {
                engine.add(triple(rev * 100 + i), &ctx).unwrap();
            }
        }
        engine.commit().unwrap();
    }
    (dir, ctx)
}

fn bench_replay(c: &mut Criterion) {
    let (dir, ctx) = seeded_store();
    let log = RevisionLog::new(dir.path(), false);

    c.bench_function("replay_50_revisions", |bench| {
        bench.iter(|| black_box(log.replay(&ctx).unwrap()))
    });

    c.bench_function("replay_collapsed", |bench| {
        let engine = bench_engine(dir.path());
        engine.collapse(&ctx).unwrap();
        bench.iter(|| black_box(log.replay(&ctx).unwrap()))
    });
}

fn bench_commit(c: &mut Criterion) {
    c.bench_function("commit_1000_triples", |bench| {
        bench.iter_batched(
            || {
                let dir = tempfile::TempDir::new().unwrap();
                let engine = bench_engine(dir.path());
                let ctx = ContextKey::named("bench");
                for i in 0..1000 {
                    engine.add(triple(i), &ctx).unwrap();
                }
                (dir, engine)
            },
            |(_dir, engine)| black_box(engine.commit().unwrap()),
            BatchSize::PerIteration,
        )
    });
}

fn bench_query(c: &mut Criterion) {
    let (dir, ctx) = seeded_store();
    let engine = bench_engine(dir.path());
    let pattern = TriplePattern::new(Some(Term::iri("http://example.org/s7")), None, None);

    c.bench_function("query_cached_context", |bench| {
        bench.iter(|| black_box(engine.triples(&pattern, Some(&ctx)).count()))
    });
}

criterion_group!(benches, bench_replay, bench_commit, bench_query);
criterion_main!(benches);
