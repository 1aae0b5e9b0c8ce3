// ragp-engine/src/graph.rs
// SynapseGraph: the effective graph view over base + delta, with the hybrid
// cache in front. Shared by the engine handle and every shard worker.

use crate::cache::HybridCache;
use crate::error::{EngineError, EngineResult};
use crate::status::CacheStatus;
use parking_lot::{Mutex, RwLock};
use ragp_storage::{
    merge_delta, reconcile, ChunkedBase, DeltaLog, InnateRegistry, MergeStats, NodeId, NodeKind,
    StorageError, Synapse, Tick,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Read/write surface over the persistent graph.
///
/// Lock discipline: the registry lock is never held across another lock
/// except by `migrate`, and every other path acquires cache → base → delta
/// in that order, so the cache mutex serializes read-miss fills against
/// writes and no ABBA ordering exists.
pub struct SynapseGraph {
    base: RwLock<ChunkedBase>,
    delta: Mutex<DeltaLog>,
    cache: Mutex<HybridCache>,
    registry: RwLock<InnateRegistry>,
    cache_bypass: bool,
    degraded: AtomicBool,
}

impl SynapseGraph {
    pub fn new(
        base: ChunkedBase,
        delta: DeltaLog,
        cache: HybridCache,
        registry: InnateRegistry,
        cache_bypass: bool,
    ) -> Self {
        Self {
            base: RwLock::new(base),
            delta: Mutex::new(delta),
            cache: Mutex::new(cache),
            registry: RwLock::new(registry),
            cache_bypass,
            degraded: AtomicBool::new(false),
        }
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.registry.read().contains(node)
    }

    pub fn kind(&self, node: NodeId) -> Option<NodeKind> {
        self.registry.read().kind(node)
    }

    pub fn label(&self, node: NodeId) -> Option<String> {
        self.registry.read().label(node).map(str::to_owned)
    }

    pub fn registry_version(&self) -> u16 {
        self.registry.read().version()
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.registry.read().ids().collect()
    }

    pub fn action_nodes(&self) -> Vec<NodeId> {
        let mut actions: Vec<NodeId> = self.registry.read().actions().collect();
        actions.sort_unstable();
        actions
    }

    pub fn node_count(&self) -> usize {
        self.registry.read().len()
    }

    pub fn chunk_count(&self) -> usize {
        self.base.read().chunk_count()
    }

    pub fn delta_records(&self) -> u64 {
        self.delta.lock().records()
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    pub fn ensure_known(&self, node: NodeId) -> EngineResult<()> {
        if self.contains(node) {
            Ok(())
        } else {
            Err(EngineError::UnknownNode(node))
        }
    }

    /// Effective outgoing synapses of `sender`: base overlaid with delta,
    /// materialized as a stable snapshot, sorted by receiver.
    pub fn outgoing(&self, sender: NodeId) -> EngineResult<Arc<Vec<Synapse>>> {
        self.ensure_known(sender)?;
        if self.cache_bypass {
            return Ok(Arc::new(self.load_effective(sender)?));
        }
        let mut cache = self.cache.lock();
        if let Some(hit) = cache.get(sender) {
            return Ok(hit);
        }
        let list = Arc::new(self.load_effective(sender)?);
        cache.insert(sender, Arc::clone(&list));
        Ok(list)
    }

    /// Current effective weight of one edge, if present.
    pub fn weight_of(&self, sender: NodeId, receiver: NodeId) -> Option<f32> {
        self.outgoing(sender).ok().and_then(|list| {
            list.iter()
                .find(|syn| syn.receiver == receiver)
                .map(|syn| syn.weight)
        })
    }

    fn load_effective(&self, sender: NodeId) -> EngineResult<Vec<Synapse>> {
        let base_list = {
            let base = self.base.read();
            match base.read_outgoing(sender) {
                Ok(list) => list,
                Err(StorageError::Io(err)) => {
                    self.degraded.store(true, Ordering::Relaxed);
                    warn!(sender, %err, "base read failed, engine degraded");
                    return Err(StorageError::Io(err).into());
                }
                Err(err) => return Err(err.into()),
            }
        };
        let delta = self.delta.lock();
        Ok(overlay(base_list, delta.overlay_for(sender)))
    }

    /// The single write path: clamp, append to delta, invalidate the cache
    /// entry. Caller has already validated registry membership and
    /// finiteness.
    pub fn apply_update(
        &self,
        sender: NodeId,
        receiver: NodeId,
        weight: f32,
        tick: Tick,
    ) -> EngineResult<()> {
        let clamped = weight.clamp(0.0, 1.0);
        let mut cache = self.cache.lock();
        let mut delta = self.delta.lock();
        delta.append(sender, receiver, clamped, tick)?;
        cache.invalidate(sender);
        Ok(())
    }

    pub fn sync_delta(&self) -> EngineResult<()> {
        self.delta.lock().sync()?;
        Ok(())
    }

    /// Storage half of consolidation: merge delta into base, truncate the
    /// log, purge the cache. Returns the senders to re-warm.
    pub fn consolidate_storage(&self, prune_below: f32) -> EngineResult<(MergeStats, Vec<NodeId>)> {
        let mut cache = self.cache.lock();
        let mut base = self.base.write();
        let mut delta = self.delta.lock();
        delta.sync()?;
        let stats = merge_delta(&mut base, &delta, prune_below)?;
        delta.truncate()?;
        cache.purge();
        Ok((stats, cache.pin_set()))
    }

    /// Swap in a new registry, migrating the persisted state when the node
    /// set or version changed. Returns `true` when a migration ran.
    pub fn migrate(&self, registry: InnateRegistry, protected: &[NodeId]) -> EngineResult<bool> {
        let mut current = self.registry.write();
        let mut cache = self.cache.lock();
        let mut base = self.base.write();
        let mut delta = self.delta.lock();
        let changed = reconcile(&mut base, &mut delta, &registry, protected)?;
        *current = registry;
        if changed {
            cache.purge();
        }
        Ok(changed)
    }

    /// Adjacency snapshot for one shard: every owned sender with at least
    /// one effective outgoing synapse.
    pub fn snapshot_shard(
        &self,
        shard: usize,
        shard_count: usize,
    ) -> EngineResult<HashMap<NodeId, Vec<Synapse>>> {
        let owned: Vec<NodeId> = self
            .node_ids()
            .into_iter()
            .filter(|id| (*id % shard_count as u64) as usize == shard)
            .collect();
        let mut adjacency = HashMap::new();
        for id in owned {
            let list = self.outgoing(id)?;
            if !list.is_empty() {
                adjacency.insert(id, (*list).clone());
            }
        }
        Ok(adjacency)
    }

    pub fn cache_status(&self) -> CacheStatus {
        let cache = self.cache.lock();
        let (hits, misses, evictions) = cache.counters();
        CacheStatus {
            pinned_nodes: cache.pinned_nodes(),
            lru_nodes: cache.lru_nodes(),
            cache_budget_mb: cache.budget_bytes() as f64 / (1024.0 * 1024.0),
            cache_bytes_est_mb: cache.bytes_est() as f64 / (1024.0 * 1024.0),
            hits,
            misses,
            evictions,
        }
    }

    /// Highest tick present anywhere in the persisted state.
    pub fn persisted_max_tick(&self) -> EngineResult<Tick> {
        let base_max = self.base.read().max_tick()?;
        let delta_max = self.delta.lock().max_tick();
        Ok(base_max.max(delta_max))
    }
}

/// Apply the delta overlay: delta wins at `tick ≥ base tick`, a zero weight
/// removes the edge.
fn overlay(
    base_list: Vec<Synapse>,
    delta: Option<&BTreeMap<NodeId, (f32, Tick)>>,
) -> Vec<Synapse> {
    let mut merged: BTreeMap<NodeId, Synapse> = base_list
        .into_iter()
        .map(|syn| (syn.receiver, syn))
        .collect();
    if let Some(overlay) = delta {
        for (&receiver, &(weight, tick)) in overlay {
            match merged.get(&receiver) {
                Some(existing) if existing.tick > tick => {}
                _ => {
                    merged.insert(receiver, Synapse::new(receiver, weight, tick));
                }
            }
        }
    }
    merged
        .into_values()
        .filter(|syn| syn.weight > 0.0)
        .collect()
}
