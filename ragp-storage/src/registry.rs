// ragp-storage/src/registry.rs
// Innate registry: the versioned, authoritative set of valid node IDs

use crate::base::ChunkedBase;
use crate::delta::DeltaLog;
use crate::error::{StorageError, StorageResult};
use crate::types::{NodeId, NodeKind, Synapse, Tick};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::info;

/// One registry node as declared by the embedder's seed config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDef {
    pub id: NodeId,
    pub kind: NodeKind,
    #[serde(default)]
    pub label: Option<String>,
}

impl From<NodeId> for NodeDef {
    fn from(id: NodeId) -> Self {
        Self {
            id,
            kind: NodeKind::Internal,
            label: None,
        }
    }
}

/// The authoritative set of valid node IDs with their kinds and optional
/// semantic labels. Nodes exist only through this registry; unknown IDs are
/// rejected at every public API boundary.
#[derive(Debug, Clone)]
pub struct InnateRegistry {
    version: u16,
    kinds: HashMap<NodeId, NodeKind>,
    labels: HashMap<NodeId, String>,
}

impl InnateRegistry {
    pub fn new(version: u16, defs: &[NodeDef]) -> Self {
        let mut kinds = HashMap::with_capacity(defs.len());
        let mut labels = HashMap::new();
        for def in defs {
            kinds.insert(def.id, def.kind);
            if let Some(label) = &def.label {
                labels.insert(def.id, label.clone());
            }
        }
        Self {
            version,
            kinds,
            labels,
        }
    }

    /// Reconstruct the registry persisted in the base store's node index.
    /// Labels live only in config and are re-attached by the engine.
    pub fn from_store(base: &ChunkedBase) -> Self {
        Self {
            version: base.registry_version(),
            kinds: base.nodes().collect(),
            labels: HashMap::new(),
        }
    }

    pub fn version(&self) -> u16 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.kinds.contains_key(&id)
    }

    pub fn kind(&self, id: NodeId) -> Option<NodeKind> {
        self.kinds.get(&id).copied()
    }

    pub fn label(&self, id: NodeId) -> Option<&str> {
        self.labels.get(&id).map(String::as_str)
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.kinds.keys().copied()
    }

    /// Action nodes, the candidate set for scoring.
    pub fn actions(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.kinds
            .iter()
            .filter(|(_, kind)| **kind == NodeKind::Action)
            .map(|(id, _)| *id)
    }

    pub fn defs(&self) -> Vec<(NodeId, NodeKind)> {
        let mut defs: Vec<(NodeId, NodeKind)> =
            self.kinds.iter().map(|(id, kind)| (*id, *kind)).collect();
        defs.sort_by_key(|(id, _)| *id);
        defs
    }
}

/// Bring the persisted store in line with `registry`.
///
/// When the stored node set or registry version differs, migration runs:
/// the still-valid delta records are folded into the effective edge table,
/// every edge with an endpoint outside the new registry is pruned, the base
/// is rebuilt atomically, and the delta is truncated. The old state stays on
/// disk until the new manifest rename. Returns `true` when a migration ran.
///
/// Fails with [`StorageError::MigrationConflict`] (leaving the store
/// untouched) when a protected node would be dropped.
pub fn reconcile(
    base: &mut ChunkedBase,
    delta: &mut DeltaLog,
    registry: &InnateRegistry,
    protected: &[NodeId],
) -> StorageResult<bool> {
    let stored_ids: Vec<NodeId> = base.nodes().map(|(id, _)| id).collect();
    let same_version = base.registry_version() == registry.version();
    let same_nodes = stored_ids.len() == registry.len()
        && stored_ids.iter().all(|id| registry.contains(*id));
    if same_version && same_nodes {
        return Ok(false);
    }

    // Pure additions keep every existing edge; no rewrite of chunk data.
    let only_additions = stored_ids.iter().all(|id| registry.contains(*id));
    if only_additions {
        base.install_nodes(&registry.defs(), registry.version())?;
        info!(
            nodes = registry.len(),
            version = registry.version(),
            "registry extended in place"
        );
        return Ok(true);
    }

    for &node in protected {
        if base.contains(node) && !registry.contains(node) {
            return Err(StorageError::MigrationConflict(node));
        }
    }

    // Effective view (base + delta, LWW by tick) filtered to the new set.
    let mut edges: BTreeMap<NodeId, Vec<Synapse>> = BTreeMap::new();
    let mut dropped = 0usize;
    for &sender in &stored_ids {
        if !registry.contains(sender) {
            dropped += 1;
            continue;
        }
        let mut merged: BTreeMap<NodeId, (f32, Tick)> = base
            .read_outgoing(sender)?
            .into_iter()
            .map(|syn| (syn.receiver, (syn.weight, syn.tick)))
            .collect();
        if let Some(overlay) = delta.overlay_for(sender) {
            for (&receiver, &(weight, tick)) in overlay {
                match merged.get(&receiver) {
                    Some(&(_, existing)) if existing > tick => {}
                    _ => {
                        merged.insert(receiver, (weight, tick));
                    }
                }
            }
        }
        let list: Vec<Synapse> = merged
            .into_iter()
            .filter(|(receiver, (weight, _))| registry.contains(*receiver) && *weight > 0.0)
            .map(|(receiver, (weight, tick))| Synapse::new(receiver, weight, tick))
            .collect();
        if !list.is_empty() {
            edges.insert(sender, list);
        }
    }

    base.rebuild(&registry.defs(), registry.version(), &edges)?;
    delta.truncate()?;
    info!(
        nodes = registry.len(),
        dropped,
        version = registry.version(),
        "registry migration complete"
    );
    Ok(true)
}
