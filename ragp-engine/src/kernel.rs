// ragp-engine/src/kernel.rs
// Activation kernel: spreading, decay, temporal window, Hebbian formation,
// action scoring. Single-threaded within its owner (engine or shard).

use crate::config::EngineConfig;
use crate::error::EngineResult;
use ragp_storage::{NodeId, Synapse, Tick};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Tunables shared by the sync kernel and every shard kernel.
#[derive(Debug, Clone)]
pub struct KernelParams {
    pub gamma: f32,
    pub floor: f32,
    pub spread_threshold: f32,
    pub eta: f32,
    pub learn_threshold: f32,
    pub baseline: f32,
    pub reward: f32,
    pub window_capacity: usize,
    pub window_ticks: u32,
    pub top_k: usize,
    pub hop_ttl: u8,
    pub action_costs: BTreeMap<NodeId, f32>,
    pub action_cost_default: f32,
}

impl KernelParams {
    pub fn from_config(cfg: &EngineConfig) -> Self {
        let k = &cfg.kernel;
        Self {
            gamma: k.decay_gamma,
            floor: k.activation_floor,
            spread_threshold: k.spread_threshold,
            eta: k.learn_rate,
            learn_threshold: k.learn_threshold,
            baseline: k.baseline_weight,
            reward: k.reward,
            window_capacity: k.window_capacity,
            window_ticks: k.window_ticks,
            top_k: k.top_k,
            hop_ttl: cfg.runtime.hop_ttl,
            action_costs: cfg.resolved_action_costs(),
            action_cost_default: cfg.action_cost_default,
        }
    }

    pub fn action_cost(&self, action: NodeId) -> f32 {
        self.action_costs
            .get(&action)
            .copied()
            .unwrap_or(self.action_cost_default)
    }
}

#[derive(Debug, Clone, Copy)]
struct WindowEntry {
    node: NodeId,
    activation: f32,
    tick: Tick,
}

/// A proposed synapse write coming out of Hebbian formation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeUpdate {
    pub sender: NodeId,
    pub receiver: NodeId,
    pub weight: f32,
}

/// In-memory activation state. Never persisted; reconstructable from the
/// stimulus history.
pub struct ActivationKernel {
    params: KernelParams,
    activation: HashMap<NodeId, f32>,
    window: VecDeque<WindowEntry>,
}

impl ActivationKernel {
    pub fn new(params: KernelParams) -> Self {
        Self {
            activation: HashMap::new(),
            window: VecDeque::with_capacity(params.window_capacity),
            params,
        }
    }

    pub fn params(&self) -> &KernelParams {
        &self.params
    }

    /// Apply an external stimulus. Returns the node's new level.
    pub fn inject(&mut self, node: NodeId, strength: f32, tick: Tick) -> f32 {
        self.apply(node, strength, tick)
    }

    /// Apply a cross-shard hop contribution. Returns the node's new level.
    pub fn bump(&mut self, node: NodeId, contribution: f32, tick: Tick) -> f32 {
        self.apply(node, contribution, tick)
    }

    fn apply(&mut self, node: NodeId, amount: f32, tick: Tick) -> f32 {
        let slot = self.activation.entry(node).or_insert(0.0);
        *slot = (*slot + amount).max(0.0);
        let level = *slot;
        if self.window.len() == self.params.window_capacity {
            // Overflow drops the oldest entry, never blocks.
            self.window.pop_front();
        }
        self.window.push_back(WindowEntry {
            node,
            activation: level,
            tick,
        });
        level
    }

    /// Multiplicative decay; levels under the floor are removed.
    pub fn decay(&mut self) {
        let gamma = self.params.gamma;
        let floor = self.params.floor;
        self.activation.retain(|_, level| {
            *level *= gamma;
            *level >= floor
        });
    }

    pub fn activation(&self, node: NodeId) -> f32 {
        self.activation.get(&node).copied().unwrap_or(0.0)
    }

    pub fn active(&self) -> Vec<(NodeId, f32)> {
        self.activation.iter().map(|(n, a)| (*n, *a)).collect()
    }

    pub fn active_count(&self) -> usize {
        self.activation.len()
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    /// Per-receiver contributions for one spread step from `sender`.
    /// Contributions below the floor are not worth a hop.
    pub fn contributions(&self, sender: NodeId, synapses: &[Synapse]) -> Vec<(NodeId, f32)> {
        let level = self.activation(sender);
        if level <= 0.0 {
            return Vec::new();
        }
        synapses
            .iter()
            .filter_map(|syn| {
                let contribution = level * syn.weight;
                (contribution >= self.params.floor).then_some((syn.receiver, contribution))
            })
            .collect()
    }

    /// Hebbian formation over the temporal window: for every ordered pair of
    /// distinct nodes co-present within `window_ticks` and above the
    /// learning threshold, propose `Δw = η · act_pre · act_post · reward`.
    /// New edges start from the baseline weight; existing ones (resolved via
    /// `existing`) are reinforced. Results are clamped into [0, 1] and
    /// deduplicated per pass, first pairing wins.
    pub fn hebbian<F>(&self, existing: F) -> Vec<EdgeUpdate>
    where
        F: Fn(NodeId, NodeId) -> Option<f32>,
    {
        let mut seen: HashMap<(NodeId, NodeId), ()> = HashMap::new();
        let mut updates = Vec::new();
        for i in 0..self.window.len() {
            let pre = self.window[i];
            if pre.activation < self.params.learn_threshold {
                continue;
            }
            for j in (i + 1)..self.window.len() {
                let post = self.window[j];
                if post.node == pre.node || post.activation < self.params.learn_threshold {
                    continue;
                }
                if post.tick.saturating_sub(pre.tick) > self.params.window_ticks {
                    continue;
                }
                if seen.insert((pre.node, post.node), ()).is_some() {
                    continue;
                }
                let dw = self.params.eta * pre.activation * post.activation * self.params.reward;
                let base = existing(pre.node, post.node).unwrap_or(self.params.baseline);
                updates.push(EdgeUpdate {
                    sender: pre.node,
                    receiver: post.node,
                    weight: (base + dw).clamp(0.0, 1.0),
                });
            }
        }
        updates
    }
}

/// Score action candidates: `cd = Σ incoming activation · weight − cost`.
/// Ties break toward the smaller node ID; the top `k` survive.
pub fn score_actions<F>(
    active: &[(NodeId, f32)],
    actions: &[NodeId],
    params: &KernelParams,
    mut outgoing: F,
) -> EngineResult<Vec<(NodeId, f32)>>
where
    F: FnMut(NodeId) -> EngineResult<Vec<Synapse>>,
{
    let candidates: std::collections::HashSet<NodeId> = actions.iter().copied().collect();
    let mut incoming: HashMap<NodeId, f32> = HashMap::new();
    for &(source, level) in active {
        if level <= 0.0 {
            continue;
        }
        for syn in outgoing(source)? {
            if candidates.contains(&syn.receiver) {
                *incoming.entry(syn.receiver).or_insert(0.0) += level * syn.weight;
            }
        }
    }

    let mut scored: Vec<(NodeId, f32)> = actions
        .iter()
        .map(|&action| {
            let sum = incoming.get(&action).copied().unwrap_or(0.0);
            (action, sum - params.action_cost(action))
        })
        .collect();
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    scored.truncate(params.top_k);
    Ok(scored)
}
