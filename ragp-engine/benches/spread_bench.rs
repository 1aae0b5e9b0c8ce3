// ragp-engine/benches/spread_bench.rs
// Spread-step throughput over a synthetic fan-out graph

use criterion::{criterion_group, criterion_main, Criterion};
use ragp_engine::{EngineConfig, GraphEngine, NodeDef, NodeKind};
use tempfile::TempDir;

fn seeded_engine(fanout: u64) -> (TempDir, GraphEngine) {
    let dir = TempDir::new().expect("tempdir");
    let cfg = EngineConfig::default();
    let engine = GraphEngine::open(dir.path(), cfg).expect("open engine");

    let defs: Vec<NodeDef> = (0..=fanout)
        .map(|id| NodeDef {
            id,
            kind: if id == 0 {
                NodeKind::Sensor
            } else {
                NodeKind::Context
            },
            label: None,
        })
        .collect();
    engine.ensure_innate_registry(&defs).expect("registry");
    for receiver in 1..=fanout {
        engine.update_weight(0, receiver, 0.6).expect("seed edge");
    }
    engine.consolidate().expect("consolidate seed graph");
    (dir, engine)
}

fn bench_spread_step(c: &mut Criterion) {
    let (_dir, engine) = seeded_engine(64);
    c.bench_function("spread_step_fanout_64", |b| {
        b.iter(|| {
            engine
                .spread_activation(std::hint::black_box(0), 1.0)
                .expect("spread");
        });
    });
}

fn bench_cached_read(c: &mut Criterion) {
    let (_dir, engine) = seeded_engine(64);
    engine.get_connections(0).expect("warm the cache");
    c.bench_function("get_connections_cached_64", |b| {
        b.iter(|| {
            engine
                .get_connections(std::hint::black_box(0))
                .expect("read");
        });
    });
}

criterion_group!(benches, bench_spread_step, bench_cached_read);
criterion_main!(benches);
