//! Property tests: weight range, delta dominance over base, replay
//! equivalence, and registry closure after migration.

use proptest::prelude::*;
use ragp_engine::{EngineConfig, GraphEngine, NodeDef, NodeKind};
use std::collections::HashMap;
use tempfile::TempDir;

const NODES: u64 = 6;

fn all_defs() -> Vec<NodeDef> {
    (1..=NODES)
        .map(|id| NodeDef {
            id,
            kind: if id == NODES {
                NodeKind::Action
            } else {
                NodeKind::Context
            },
            label: None,
        })
        .collect()
}

fn open_engine(dir: &TempDir, registry_version: u16) -> GraphEngine {
    let mut cfg = EngineConfig::default();
    cfg.registry_version = registry_version;
    let engine = GraphEngine::open(dir.path(), cfg).expect("open engine");
    engine
}

/// Weights that stay clear of the consolidation prune threshold, so the
/// in-memory model and the store agree after any interleaving.
fn weight_strategy() -> impl Strategy<Value = f32> {
    prop_oneof![Just(0.0f32), Just(-0.3f32), 0.05f32..1.5f32]
}

fn op_strategy() -> impl Strategy<Value = (u64, u64, f32, bool)> {
    (1..=NODES, 1..=NODES, weight_strategy(), any::<bool>())
}

fn view_of(engine: &GraphEngine, sender: u64) -> HashMap<u64, f32> {
    engine
        .get_connections(sender)
        .expect("read view")
        .into_iter()
        .map(|syn| (syn.receiver, syn.weight))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 16,
        .. ProptestConfig::default()
    })]

    /// P2 + P3: every surfaced weight is in [0, 1], and the view always
    /// equals base ∪ delta with the newest write winning, regardless of
    /// where a consolidation lands in the sequence.
    #[test]
    fn prop_view_matches_last_write_model(ops in prop::collection::vec(op_strategy(), 1..30)) {
        let dir = TempDir::new().expect("tempdir");
        let engine = open_engine(&dir, 1);
        engine.ensure_innate_registry(&all_defs()).expect("registry");

        let mut model: HashMap<(u64, u64), f32> = HashMap::new();
        for (sender, receiver, weight, consolidate) in ops {
            engine.update_weight(sender, receiver, weight).expect("update");
            let clamped = weight.clamp(0.0, 1.0);
            if clamped == 0.0 {
                model.remove(&(sender, receiver));
            } else {
                model.insert((sender, receiver), clamped);
            }
            if consolidate {
                engine.consolidate().expect("consolidate");
            }

            for probe in 1..=NODES {
                let view = view_of(&engine, probe);
                for (&receiver, &weight) in &view {
                    prop_assert!((0.0..=1.0).contains(&weight),
                        "weight {} for {}->{} escaped [0,1]", weight, probe, receiver);
                }
                let expected: HashMap<u64, f32> = model
                    .iter()
                    .filter(|((s, _), _)| *s == probe)
                    .map(|((_, r), w)| (*r, *w))
                    .collect();
                prop_assert_eq!(view, expected, "view diverged for sender {}", probe);
            }
        }

        // Replay equivalence: dropping the engine mid-delta and reopening
        // must reconstruct the same logical graph.
        drop(engine);
        let reopened = open_engine(&dir, 1);
        for probe in 1..=NODES {
            let expected: HashMap<u64, f32> = model
                .iter()
                .filter(|((s, _), _)| *s == probe)
                .map(|((_, r), w)| (*r, *w))
                .collect();
            prop_assert_eq!(view_of(&reopened, probe), expected,
                "replayed view diverged for sender {}", probe);
        }
    }

    /// P1: after a migration to a smaller registry, every edge endpoint in
    /// the surviving graph is a registry member.
    #[test]
    fn prop_migration_preserves_registry_closure(ops in prop::collection::vec(op_strategy(), 1..25)) {
        let dir = TempDir::new().expect("tempdir");
        {
            let engine = open_engine(&dir, 1);
            engine.ensure_innate_registry(&all_defs()).expect("registry");
            for (sender, receiver, weight, consolidate) in ops {
                engine.update_weight(sender, receiver, weight).expect("update");
                if consolidate {
                    engine.consolidate().expect("consolidate");
                }
            }
        }

        let survivors: Vec<NodeDef> = all_defs().into_iter().take(3).collect();
        let engine = open_engine(&dir, 2);
        engine.ensure_innate_registry(&survivors).expect("migrate");

        for probe in 1..=3u64 {
            for syn in engine.get_connections(probe).expect("read") {
                prop_assert!(syn.receiver >= 1 && syn.receiver <= 3,
                    "edge {}->{} escaped the registry", probe, syn.receiver);
            }
        }
        for gone in 4..=NODES {
            prop_assert!(engine.get_connections(gone).is_err(),
                "dropped node {} still readable", gone);
        }
    }
}
