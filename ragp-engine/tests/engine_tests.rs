//! Engine integration tests: cold boot, write/reread/consolidate, kernel
//! boundaries, and cache transparency.

use ragp_engine::{EngineConfig, EngineError, GraphEngine, NodeDef, NodeKind, Synapse};
use std::fs;
use tempfile::TempDir;

fn defs(nodes: &[(u64, NodeKind)]) -> Vec<NodeDef> {
    nodes
        .iter()
        .map(|&(id, kind)| NodeDef {
            id,
            kind,
            label: None,
        })
        .collect()
}

fn three_node_engine(dir: &TempDir) -> GraphEngine {
    let engine = GraphEngine::open(dir.path(), EngineConfig::default()).expect("open engine");
    engine
        .ensure_innate_registry(&defs(&[
            (1, NodeKind::Sensor),
            (2, NodeKind::Context),
            (3, NodeKind::Action),
        ]))
        .expect("registry");
    engine
}

#[test]
fn test_cold_boot_empty_store() {
    let dir = TempDir::new().expect("tempdir");
    let engine = three_node_engine(&dir);
    let status = engine.status();
    assert_eq!(status.nodes, 3);
    assert_eq!(status.chunks, 0);
    assert_eq!(status.delta_records, 0);
    assert_eq!(status.global_tick, 0);
    assert_eq!(status.registry_version, 1);
    assert!(!status.degraded);
    assert!(!status.runtime.async_on);
}

#[test]
fn test_write_reread_and_consolidate() {
    let dir = TempDir::new().expect("tempdir");
    let engine = three_node_engine(&dir);

    engine.update_weight(1, 2, 0.5).expect("update");
    assert_eq!(
        engine.get_connections(1).expect("read"),
        vec![Synapse::new(2, 0.5, 1)],
        "first write on a fresh engine lands at tick 1"
    );
    assert_eq!(engine.status().delta_records, 1);

    engine.consolidate().expect("consolidate");
    assert_eq!(engine.status().delta_records, 0);
    assert_eq!(
        fs::metadata(dir.path().join("delta.bin")).expect("stat").len(),
        0
    );
    assert_eq!(
        engine.get_connections(1).expect("read after consolidate"),
        vec![Synapse::new(2, 0.5, 1)],
        "consolidation is a fixpoint of the graph view"
    );
}

#[test]
fn test_unknown_nodes_rejected_at_every_boundary() {
    let dir = TempDir::new().expect("tempdir");
    let engine = three_node_engine(&dir);
    assert!(matches!(
        engine.get_connections(99),
        Err(EngineError::UnknownNode(99))
    ));
    assert!(matches!(
        engine.update_weight(1, 99, 0.5),
        Err(EngineError::UnknownNode(99))
    ));
    assert!(matches!(
        engine.spread_activation(99, 1.0),
        Err(EngineError::UnknownNode(99))
    ));
    assert!(matches!(
        engine.compute_cd(99),
        Err(EngineError::UnknownNode(99))
    ));
}

#[test]
fn test_weight_boundaries() {
    let dir = TempDir::new().expect("tempdir");
    let engine = three_node_engine(&dir);

    assert!(matches!(
        engine.update_weight(1, 2, f32::NAN),
        Err(EngineError::NonFinite(_, _))
    ));
    assert!(matches!(
        engine.spread_activation(1, f32::INFINITY),
        Err(EngineError::NonFinite(_, _))
    ));

    engine.update_weight(1, 2, 1.5).expect("clamped high");
    assert_eq!(engine.get_connections(1).expect("read")[0].weight, 1.0);
    engine.update_weight(1, 2, -0.5).expect("clamped low");
    assert_eq!(
        engine.get_connections(1).expect("read"),
        Vec::new(),
        "a clamped-to-zero weight is a tombstone"
    );
}

#[test]
fn test_tombstone_survives_consolidation() {
    let dir = TempDir::new().expect("tempdir");
    let engine = three_node_engine(&dir);
    engine.update_weight(1, 2, 0.8).expect("update");
    engine.consolidate().expect("materialize");
    engine.update_weight(1, 2, 0.0).expect("tombstone");
    assert_eq!(engine.get_connections(1).expect("read"), Vec::new());
    engine.consolidate().expect("consolidate tombstone");
    assert_eq!(engine.get_connections(1).expect("read"), Vec::new());
    assert_eq!(engine.status().chunks, 0, "empty chunk removed");
}

#[test]
fn test_delta_replay_restores_unconsolidated_writes() {
    let dir = TempDir::new().expect("tempdir");
    {
        let engine = three_node_engine(&dir);
        engine.update_weight(1, 2, 0.6).expect("update");
        engine.update_weight(2, 3, 0.4).expect("update");
        // Dropped without consolidation: both writes live only in the delta.
    }
    let engine = GraphEngine::open(dir.path(), EngineConfig::default()).expect("reopen");
    assert_eq!(engine.status().delta_records, 2);
    assert_eq!(
        engine.get_connections(1).expect("read")[0].weight,
        0.6,
        "replayed delta must be visible"
    );
    assert_eq!(
        engine.status().global_tick,
        2,
        "tick resumes past the highest persisted value"
    );
    engine.update_weight(1, 3, 0.3).expect("post-replay write");
    assert_eq!(engine.get_connections(1).expect("read").len(), 2);
}

#[test]
fn test_cache_transparency() {
    // The same operation sequence against a cached and a bypassed engine
    // must produce identical views at every step.
    let dir_cached = TempDir::new().expect("tempdir");
    let dir_bypass = TempDir::new().expect("tempdir");
    let cached = three_node_engine(&dir_cached);
    let bypass = {
        let mut cfg = EngineConfig::default();
        cfg.cache.bypass = true;
        let engine = GraphEngine::open(dir_bypass.path(), cfg).expect("open");
        engine
            .ensure_innate_registry(&defs(&[
                (1, NodeKind::Sensor),
                (2, NodeKind::Context),
                (3, NodeKind::Action),
            ]))
            .expect("registry");
        engine
    };

    let script: &[(u64, u64, f32)] = &[
        (1, 2, 0.5),
        (1, 3, 0.7),
        (1, 2, 0.9),
        (2, 3, 0.1),
        (1, 3, 0.0),
    ];
    for &(sender, receiver, weight) in script {
        cached.update_weight(sender, receiver, weight).expect("cached");
        bypass.update_weight(sender, receiver, weight).expect("bypass");
        for probe in [1u64, 2, 3] {
            assert_eq!(
                cached.get_connections(probe).expect("cached read"),
                bypass.get_connections(probe).expect("bypass read"),
                "views diverged after ({}, {}, {})",
                sender,
                receiver,
                weight
            );
        }
    }
    cached.consolidate().expect("consolidate");
    bypass.consolidate().expect("consolidate");
    for probe in [1u64, 2, 3] {
        assert_eq!(
            cached.get_connections(probe).expect("cached read"),
            bypass.get_connections(probe).expect("bypass read")
        );
    }
}

#[test]
fn test_sync_spread_and_action_scoring() {
    let dir = TempDir::new().expect("tempdir");
    let mut cfg = EngineConfig::default();
    cfg.action_costs.insert("3".into(), 0.1);
    let engine = GraphEngine::open(dir.path(), cfg).expect("open");
    engine
        .ensure_innate_registry(&defs(&[
            (1, NodeKind::Sensor),
            (2, NodeKind::Context),
            (3, NodeKind::Action),
        ]))
        .expect("registry");

    engine.update_weight(1, 3, 0.8).expect("sensor -> action");
    engine.spread_activation(1, 1.0).expect("spread");

    let scored = engine.compute_cd(1).expect("score");
    assert_eq!(scored.len(), 1, "only action nodes are candidates");
    let (action, score) = scored[0];
    assert_eq!(action, 3);
    assert!(
        score > 0.0,
        "incoming activation should outweigh the action cost, got {}",
        score
    );

    let status = engine.status();
    assert!(status.active_nodes >= 1);
    assert!(status.global_tick >= 2);
}

#[test]
fn test_hebbian_learning_forms_edges() {
    let dir = TempDir::new().expect("tempdir");
    let engine = three_node_engine(&dir);
    // Co-activate 1 then 2 inside the temporal window, repeatedly.
    for _ in 0..5 {
        engine.spread_activation(1, 1.0).expect("spread 1");
        engine.spread_activation(2, 1.0).expect("spread 2");
    }
    let learned = engine.get_connections(1).expect("read");
    assert!(
        learned.iter().any(|syn| syn.receiver == 2 && syn.weight > 0.0),
        "co-activation inside the window must form 1 -> 2, got {:?}",
        learned
    );
}

#[test]
fn test_node_labels_come_from_config() {
    let dir = TempDir::new().expect("tempdir");
    let mut cfg = EngineConfig::default();
    cfg.labels.insert("1".into(), "mic_peak".into());
    let engine = GraphEngine::open(dir.path(), cfg).expect("open");
    engine
        .ensure_innate_registry(&defs(&[(1, NodeKind::Sensor), (2, NodeKind::Context)]))
        .expect("registry");
    assert_eq!(
        engine.node_label(1).expect("label"),
        Some("mic_peak".to_owned())
    );
    assert_eq!(engine.node_label(2).expect("label"), None);
}

#[test]
fn test_storage_directory_is_exclusive() {
    let dir = TempDir::new().expect("tempdir");
    let _engine = three_node_engine(&dir);
    let second = GraphEngine::open(dir.path(), EngineConfig::default());
    assert!(second.is_err(), "second engine on the same dir must fail");
}

#[test]
fn test_reset_storage_wipes_state() {
    let dir = TempDir::new().expect("tempdir");
    {
        let engine = three_node_engine(&dir);
        engine.update_weight(1, 2, 0.5).expect("update");
        engine.consolidate().expect("consolidate");
    }
    let mut cfg = EngineConfig::default();
    cfg.reset_storage = true;
    let engine = GraphEngine::open(dir.path(), cfg).expect("open with reset");
    assert_eq!(engine.status().nodes, 0);
    assert_eq!(engine.status().chunks, 0);
}

#[test]
fn test_registry_version_bump_migrates_persisted_graph() {
    let dir = TempDir::new().expect("tempdir");
    {
        let engine = three_node_engine(&dir);
        engine.update_weight(1, 2, 0.5).expect("update");
        engine.update_weight(2, 3, 0.7).expect("update");
        engine.consolidate().expect("consolidate");
    }
    let mut cfg = EngineConfig::default();
    cfg.registry_version = 2;
    let engine = GraphEngine::open(dir.path(), cfg).expect("reopen");
    let migrated = engine
        .ensure_innate_registry(&defs(&[(1, NodeKind::Sensor), (2, NodeKind::Context)]))
        .expect("migrate");
    assert!(migrated);
    let status = engine.status();
    assert_eq!(status.nodes, 2);
    assert_eq!(status.registry_version, 2);
    assert_eq!(
        engine.get_connections(1).expect("read"),
        vec![Synapse::new(2, 0.5, 1)]
    );
    assert!(matches!(
        engine.get_connections(3),
        Err(EngineError::UnknownNode(3))
    ));
}
