// ragp-engine/src/cache.rs
// Hybrid synapse cache: pinned hot set + byte-budgeted LRU of recent senders

use crate::config::CacheConfig;
use ragp_storage::format::CHUNK_RECORD_LEN;
use ragp_storage::{NodeId, Synapse};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Fixed per-entry overhead on top of the record payload.
const ENTRY_OVERHEAD: u64 = 64;

fn entry_bytes(len: usize) -> u64 {
    (len * CHUNK_RECORD_LEN) as u64 + ENTRY_OVERHEAD
}

/// Resolve the byte budget: `clamp(available_ram * ram_fraction, min, max)`.
pub fn resolve_budget(cfg: &CacheConfig) -> u64 {
    let mut sys = sysinfo::System::new();
    sys.refresh_memory();
    let available = sys.available_memory();
    let want = (available as f64 * cfg.ram_fraction as f64) as u64;
    let budget = want.clamp(cfg.ram_min_mb * 1024 * 1024, cfg.ram_max_mb * 1024 * 1024);
    debug!(
        available_mb = available / (1024 * 1024),
        budget_mb = budget / (1024 * 1024),
        "cache budget resolved"
    );
    budget
}

/// Two-tier cache of effective outgoing-synapse lists.
///
/// The pinned tier holds configured hot senders plus any sender whose
/// access count crosses the promotion threshold; it is only emptied by an
/// explicit purge. The LRU tier holds everything else and evicts by
/// estimated bytes against the remainder of the budget.
///
/// This is a performance layer only: the graph view returns identical
/// results whether a read hits the cache or not.
pub struct HybridCache {
    budget_bytes: u64,
    pin_budget: u64,
    promote_after: u32,
    pinned_ids: HashSet<NodeId>,
    pinned: HashMap<NodeId, Arc<Vec<Synapse>>>,
    lru: lru::LruCache<NodeId, Arc<Vec<Synapse>>>,
    access: HashMap<NodeId, u32>,
    pinned_bytes: u64,
    lru_bytes: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl HybridCache {
    pub fn new(budget_bytes: u64, cfg: &CacheConfig) -> Self {
        let pin_budget = (budget_bytes as f64 * cfg.pin_fraction as f64) as u64;
        Self {
            budget_bytes,
            pin_budget,
            promote_after: cfg.promote_after,
            pinned_ids: cfg.pinned_nodes.iter().copied().collect(),
            pinned: HashMap::new(),
            lru: lru::LruCache::unbounded(),
            access: HashMap::new(),
            pinned_bytes: 0,
            lru_bytes: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    pub fn get(&mut self, node: NodeId) -> Option<Arc<Vec<Synapse>>> {
        if let Some(list) = self.pinned.get(&node) {
            self.hits += 1;
            return Some(Arc::clone(list));
        }
        if let Some(list) = self.lru.get(&node) {
            self.hits += 1;
            return Some(Arc::clone(list));
        }
        self.misses += 1;
        *self.access.entry(node).or_insert(0) += 1;
        None
    }

    pub fn insert(&mut self, node: NodeId, list: Arc<Vec<Synapse>>) {
        let size = entry_bytes(list.len());
        let hot = self.pinned_ids.contains(&node)
            || self.access.get(&node).copied().unwrap_or(0) >= self.promote_after;
        if hot && self.pinned_bytes + size <= self.pin_budget {
            if let Some(old) = self.pinned.insert(node, list) {
                self.pinned_bytes -= entry_bytes(old.len());
            }
            self.pinned_ids.insert(node);
            self.pinned_bytes += size;
            return;
        }

        if let Some(old) = self.lru.put(node, list) {
            self.lru_bytes -= entry_bytes(old.len());
        }
        self.lru_bytes += size;
        let lru_budget = self.budget_bytes.saturating_sub(self.pin_budget);
        while self.lru_bytes > lru_budget {
            match self.lru.pop_lru() {
                Some((_, old)) => {
                    self.lru_bytes -= entry_bytes(old.len());
                    self.evictions += 1;
                }
                None => break,
            }
        }
    }

    /// Drop the entry for `node` after a weight update. Pin membership is
    /// kept, so the next read refills the pinned tier.
    pub fn invalidate(&mut self, node: NodeId) {
        if let Some(old) = self.pinned.remove(&node) {
            self.pinned_bytes -= entry_bytes(old.len());
        }
        if let Some(old) = self.lru.pop(&node) {
            self.lru_bytes -= entry_bytes(old.len());
        }
    }

    /// Empty both tiers. Pin membership and the byte budget survive.
    pub fn purge(&mut self) {
        self.pinned.clear();
        self.lru.clear();
        self.access.clear();
        self.pinned_bytes = 0;
        self.lru_bytes = 0;
    }

    /// Senders to re-warm after a purge.
    pub fn pin_set(&self) -> Vec<NodeId> {
        self.pinned_ids.iter().copied().collect()
    }

    pub fn unpin(&mut self, node: NodeId) {
        self.pinned_ids.remove(&node);
        if let Some(old) = self.pinned.remove(&node) {
            self.pinned_bytes -= entry_bytes(old.len());
        }
    }

    pub fn pinned_nodes(&self) -> usize {
        self.pinned.len()
    }

    pub fn lru_nodes(&self) -> usize {
        self.lru.len()
    }

    pub fn budget_bytes(&self) -> u64 {
        self.budget_bytes
    }

    pub fn bytes_est(&self) -> u64 {
        self.pinned_bytes + self.lru_bytes
    }

    pub fn counters(&self) -> (u64, u64, u64) {
        (self.hits, self.misses, self.evictions)
    }
}
