// ragp-engine/src/config.rs
// TOML-based configuration with environment variable overrides

use crate::error::{EngineError, EngineResult};
use ragp_storage::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::Path;

/// Environment variables prefixed `RAGP_` override config file values.
pub const ENV_PREFIX: &str = "RAGP_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    PinnedLru,
}

/// How repeated `(node, source)` submissions inside one batch combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoalescePolicy {
    Max,
    Sum,
    Last,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub policy: CachePolicy,
    /// Fraction of available RAM usable by the cache.
    pub ram_fraction: f32,
    pub ram_min_mb: u64,
    pub ram_max_mb: u64,
    /// Fraction of the budget reserved for the pinned tier.
    pub pin_fraction: f32,
    /// Access count past which a sender is promoted into the pinned tier.
    pub promote_after: u32,
    /// Senders pinned at startup; also the protected set during migration.
    pub pinned_nodes: Vec<NodeId>,
    /// Bypass the cache entirely. The graph view must return identical
    /// results either way; this exists for verification, not tuning.
    pub bypass: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            policy: CachePolicy::PinnedLru,
            ram_fraction: 0.25,
            ram_min_mb: 256,
            ram_max_mb: 1536,
            pin_fraction: 0.35,
            promote_after: 64,
            pinned_nodes: Vec::new(),
            bypass: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Multiplicative decay per tick, in (0, 1).
    pub decay_gamma: f32,
    /// Activations below this are dropped; spread contributions below it
    /// are not dispatched.
    pub activation_floor: f32,
    /// Activation level past which a hop target re-spreads.
    pub spread_threshold: f32,
    /// Hebbian learning rate (eta).
    pub learn_rate: f32,
    /// Minimum co-activation level for Hebbian pairing.
    pub learn_threshold: f32,
    /// Weight assigned to newly formed synapses before reinforcement.
    pub baseline_weight: f32,
    /// Reward scalar applied to every Hebbian update.
    pub reward: f32,
    /// Temporal window capacity in entries.
    pub window_capacity: usize,
    /// Maximum tick distance for two window entries to count as co-active.
    pub window_ticks: u32,
    /// Action candidates returned by scoring.
    pub top_k: usize,
    /// Consolidation drops edges below this weight.
    pub prune_threshold: f32,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            decay_gamma: 0.90,
            activation_floor: 1e-4,
            spread_threshold: 0.5,
            learn_rate: 0.05,
            learn_threshold: 0.2,
            baseline_weight: 0.1,
            reward: 1.0,
            window_capacity: 64,
            window_ticks: 16,
            top_k: 5,
            prune_threshold: 0.01,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Shard count; 0 picks from the CPU count.
    pub shards: usize,
    /// Global queue length that escalates the guard mode.
    pub high_water: usize,
    /// Global queue length that de-escalates the guard mode.
    pub low_water: usize,
    /// Hop budget for cross-shard propagation.
    pub hop_ttl: u8,
    pub coalesce: CoalescePolicy,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            shards: 0,
            high_water: 4096,
            low_water: 1024,
            hop_ttl: 3,
            coalesce: CoalescePolicy::Max,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Wipe the storage directory on boot.
    pub reset_storage: bool,
    /// Registry version; a change against the stored version triggers
    /// migration.
    pub registry_version: u16,
    /// Highest node ID the registry is allowed to declare.
    pub node_max: NodeId,
    /// Boot the async runtime together with the engine.
    pub async_boot: bool,
    /// Senders per synapse chunk file.
    pub chunk_span: u32,
    pub cache: CacheConfig,
    pub kernel: KernelConfig,
    pub runtime: RuntimeConfig,
    /// Per-action scoring costs, keyed by node ID.
    pub action_costs: BTreeMap<String, f32>,
    pub action_cost_default: f32,
    /// Semantic labels, keyed by node ID. Opaque to the engine.
    pub labels: BTreeMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reset_storage: false,
            registry_version: 1,
            node_max: 220,
            async_boot: false,
            chunk_span: 100,
            cache: CacheConfig::default(),
            kernel: KernelConfig::default(),
            runtime: RuntimeConfig::default(),
            action_costs: BTreeMap::new(),
            action_cost_default: 0.0,
            labels: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    /// Shard count after resolving the auto setting.
    pub fn effective_shards(&self) -> usize {
        if self.runtime.shards == 0 {
            num_cpus::get().clamp(1, 16)
        } else {
            self.runtime.shards.clamp(1, 64)
        }
    }

    /// Action cost table with numeric keys. Key validity is checked by
    /// [`EngineConfig::validate`].
    pub fn resolved_action_costs(&self) -> BTreeMap<NodeId, f32> {
        self.action_costs
            .iter()
            .filter_map(|(key, &cost)| key.parse::<NodeId>().ok().map(|id| (id, cost)))
            .collect()
    }

    /// Label table with numeric keys.
    pub fn resolved_labels(&self) -> BTreeMap<NodeId, String> {
        self.labels
            .iter()
            .filter_map(|(key, label)| key.parse::<NodeId>().ok().map(|id| (id, label.clone())))
            .collect()
    }

    pub fn validate(&self) -> EngineResult<()> {
        let k = &self.kernel;
        if !(k.decay_gamma > 0.0 && k.decay_gamma < 1.0) {
            return Err(EngineError::InvalidConfig(format!(
                "decay_gamma must be in (0, 1), got {}",
                k.decay_gamma
            )));
        }
        for (name, value) in [
            ("activation_floor", k.activation_floor),
            ("spread_threshold", k.spread_threshold),
            ("learn_rate", k.learn_rate),
            ("learn_threshold", k.learn_threshold),
            ("baseline_weight", k.baseline_weight),
            ("reward", k.reward),
            ("prune_threshold", k.prune_threshold),
        ] {
            if !value.is_finite() {
                return Err(EngineError::InvalidConfig(format!(
                    "{} must be finite, got {}",
                    name, value
                )));
            }
        }
        if k.window_capacity == 0
            || k.top_k == 0
            || self.runtime.hop_ttl == 0
            || self.chunk_span == 0
        {
            return Err(EngineError::InvalidConfig(
                "window_capacity, top_k, hop_ttl, and chunk_span must be positive".into(),
            ));
        }
        let c = &self.cache;
        if !(c.ram_fraction > 0.0 && c.ram_fraction <= 1.0) {
            return Err(EngineError::InvalidConfig(format!(
                "cache ram_fraction must be in (0, 1], got {}",
                c.ram_fraction
            )));
        }
        if !(c.pin_fraction >= 0.0 && c.pin_fraction < 1.0) {
            return Err(EngineError::InvalidConfig(format!(
                "cache pin_fraction must be in [0, 1), got {}",
                c.pin_fraction
            )));
        }
        if c.ram_min_mb > c.ram_max_mb {
            return Err(EngineError::InvalidConfig(
                "cache ram_min_mb exceeds ram_max_mb".into(),
            ));
        }
        if self.runtime.low_water >= self.runtime.high_water {
            return Err(EngineError::InvalidConfig(
                "low_water must be below high_water".into(),
            ));
        }
        for key in self.action_costs.keys().chain(self.labels.keys()) {
            if key.parse::<NodeId>().is_err() {
                return Err(EngineError::InvalidConfig(format!(
                    "non-numeric node key {:?}",
                    key
                )));
            }
        }
        Ok(())
    }
}

/// Load configuration: file (when present) → environment overrides →
/// validation. A missing path yields defaults plus overrides.
pub fn load_config(path: Option<&Path>) -> EngineResult<EngineConfig> {
    let mut cfg = match path {
        Some(path) if path.exists() => {
            let raw = std::fs::read_to_string(path)?;
            toml::from_str(&raw)
                .map_err(|e| EngineError::InvalidConfig(format!("{}: {}", path.display(), e)))?
        }
        _ => EngineConfig::default(),
    };
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(cfg)
}

/// Merge `RAGP_*` environment variables into the config. Unparsable values
/// are ignored rather than fatal; the subsequent validation still applies.
pub fn apply_env_overrides(cfg: &mut EngineConfig) {
    override_parse(&mut cfg.reset_storage, "RESET_STORAGE");
    override_parse(&mut cfg.registry_version, "REGISTRY_VERSION");
    override_parse(&mut cfg.node_max, "NODE_MAX");
    override_parse(&mut cfg.async_boot, "ASYNC");
    override_parse(&mut cfg.runtime.shards, "SHARDS");
    override_parse(&mut cfg.runtime.high_water, "HIGH_WATER");
    override_parse(&mut cfg.runtime.low_water, "LOW_WATER");
    override_parse(&mut cfg.cache.ram_fraction, "CACHE_RAM_FRACTION");
    override_parse(&mut cfg.cache.ram_min_mb, "CACHE_RAM_MIN_MB");
    override_parse(&mut cfg.cache.ram_max_mb, "CACHE_RAM_MAX_MB");
    override_parse(&mut cfg.cache.pin_fraction, "CACHE_PIN_FRACTION");
}

fn override_parse<T: std::str::FromStr>(slot: &mut T, key: &str) {
    if let Ok(raw) = env::var(format!("{}{}", ENV_PREFIX, key)) {
        if let Ok(value) = raw.parse::<T>() {
            *slot = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        EngineConfig::default().validate().expect("defaults are valid");
    }

    #[test]
    fn test_rejects_gamma_outside_unit_interval() {
        let mut cfg = EngineConfig::default();
        cfg.kernel.decay_gamma = 1.0;
        assert!(cfg.validate().is_err());
        cfg.kernel.decay_gamma = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_inverted_water_marks() {
        let mut cfg = EngineConfig::default();
        cfg.runtime.low_water = 5000;
        cfg.runtime.high_water = 100;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_resolves_numeric_tables() {
        let mut cfg = EngineConfig::default();
        cfg.action_costs.insert("12".into(), 0.25);
        cfg.labels.insert("12".into(), "reach".into());
        assert_eq!(cfg.resolved_action_costs().get(&12), Some(&0.25));
        assert_eq!(cfg.resolved_labels().get(&12).map(String::as_str), Some("reach"));
    }
}
