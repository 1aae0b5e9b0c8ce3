// ragp-engine/src/status.rs
// Read-only aggregation of storage, cache, and runtime counters

use crate::runtime::ingress::GuardMode;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    pub pinned_nodes: usize,
    pub lru_nodes: usize,
    pub cache_budget_mb: f64,
    pub cache_bytes_est_mb: f64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RuntimeStatus {
    pub async_on: bool,
    pub shards: usize,
    pub global_queue_len: usize,
    pub per_shard_queue_len: Vec<usize>,
    pub processed_total: u64,
    pub per_shard_processed: Vec<u64>,
    pub processed_per_sec: f64,
    pub guard_mode: GuardMode,
    pub dropped_total: u64,
    pub coalesced_total: u64,
    pub hop_total: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub nodes: usize,
    pub chunks: usize,
    pub delta_records: u64,
    pub active_nodes: usize,
    pub global_tick: u32,
    pub registry_version: u16,
    pub degraded: bool,
    pub cache: CacheStatus,
    pub runtime: RuntimeStatus,
}

impl EngineStatus {
    /// JSON form for republication over the tool-protocol surface.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
