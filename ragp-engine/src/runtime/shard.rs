// ragp-engine/src/runtime/shard.rs
// Shard worker: single-consumer actor owning one partition of the node space

use crate::graph::SynapseGraph;
use crate::kernel::{ActivationKernel, KernelParams};
use crate::runtime::{RuntimeMetrics, ShardMsg, ShardReport};
use ragp_storage::{NodeId, NodeKind, Synapse, Tick};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Owns the activation slice, temporal window, and adjacency snapshot of
/// every node with `node % shard_count == id`. All state is private to the
/// actor; the only suspension point is the inbox receive.
pub(crate) struct ShardWorker {
    id: usize,
    graph: Arc<SynapseGraph>,
    tick: Arc<AtomicU32>,
    kernel: ActivationKernel,
    adjacency: HashMap<NodeId, Vec<Synapse>>,
    peers: Vec<mpsc::UnboundedSender<ShardMsg>>,
    metrics: Arc<RuntimeMetrics>,
}

impl ShardWorker {
    pub(crate) fn new(
        id: usize,
        graph: Arc<SynapseGraph>,
        tick: Arc<AtomicU32>,
        params: KernelParams,
        adjacency: HashMap<NodeId, Vec<Synapse>>,
        peers: Vec<mpsc::UnboundedSender<ShardMsg>>,
        metrics: Arc<RuntimeMetrics>,
    ) -> Self {
        Self {
            id,
            graph,
            tick,
            kernel: ActivationKernel::new(params),
            adjacency,
            peers,
            metrics,
        }
    }

    pub(crate) async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<ShardMsg>) {
        while let Some(msg) = inbox.recv().await {
            self.metrics.shards[self.id]
                .queue_len
                .fetch_sub(1, Ordering::Relaxed);
            match msg {
                ShardMsg::Stimulus { node, strength, .. } => self.on_stimulus(node, strength),
                ShardMsg::Hop {
                    to, contribution, ttl, ..
                } => self.on_hop(to, contribution, ttl),
                ShardMsg::UpdateEdge {
                    sender,
                    receiver,
                    weight,
                    tick,
                } => self.on_update(sender, receiver, weight, tick),
                ShardMsg::Flush { ack } => {
                    let _ = ack.send(self.report());
                }
                ShardMsg::Refresh { adjacency } => {
                    self.adjacency = adjacency;
                }
                ShardMsg::Stop => break,
            }
            self.metrics.shards[self.id]
                .active_nodes
                .store(self.kernel.active_count(), Ordering::Relaxed);
        }
        debug!(shard = self.id, "shard worker exited");
    }

    /// One ingest/learn cycle: ingest → spread → score → learn → decay,
    /// all against the shared monotonic tick.
    fn on_stimulus(&mut self, node: NodeId, strength: f32) {
        let tick = self.tick.fetch_add(1, Ordering::Relaxed) + 1;
        let level = self.kernel.inject(node, strength, tick);
        self.spread(node, self.kernel.params().hop_ttl);
        self.observe_action(node, level);
        self.learn(tick);
        self.kernel.decay();
        self.metrics.shards[self.id]
            .processed
            .fetch_add(1, Ordering::Relaxed);
        self.metrics.processed_total.fetch_add(1, Ordering::Relaxed);
    }

    fn on_hop(&mut self, to: NodeId, contribution: f32, ttl: u8) {
        let tick = self.tick.load(Ordering::Relaxed);
        let level = self.kernel.bump(to, contribution, tick);
        self.observe_action(to, level);
        if level >= self.kernel.params().spread_threshold && ttl > 0 {
            self.spread(to, ttl);
        }
    }

    /// Dispatch hop messages carrying `ttl - 1` to the owners of every
    /// receiver worth reaching.
    fn spread(&mut self, node: NodeId, ttl: u8) {
        if ttl == 0 {
            return;
        }
        let Some(synapses) = self.adjacency.get(&node) else {
            return;
        };
        let hops = self.kernel.contributions(node, synapses);
        for (receiver, contribution) in hops {
            let owner = self.owner(receiver);
            self.metrics.hop_total.fetch_add(1, Ordering::Relaxed);
            self.metrics.shards[owner]
                .queue_len
                .fetch_add(1, Ordering::Relaxed);
            let _ = self.peers[owner].send(ShardMsg::Hop {
                from: node,
                to: receiver,
                contribution,
                ttl: ttl - 1,
            });
        }
    }

    /// Hebbian pass over the shard-local window. Updates for senders owned
    /// elsewhere are routed as `UpdateEdge`; own senders apply in place.
    fn learn(&mut self, tick: Tick) {
        let adjacency = &self.adjacency;
        let updates = self.kernel.hebbian(|sender, receiver| {
            adjacency
                .get(&sender)
                .and_then(|list| list.iter().find(|syn| syn.receiver == receiver))
                .map(|syn| syn.weight)
        });
        for update in updates {
            let owner = self.owner(update.sender);
            if owner == self.id {
                self.on_update(update.sender, update.receiver, update.weight, tick);
            } else {
                self.metrics.shards[owner]
                    .queue_len
                    .fetch_add(1, Ordering::Relaxed);
                let _ = self.peers[owner].send(ShardMsg::UpdateEdge {
                    sender: update.sender,
                    receiver: update.receiver,
                    weight: update.weight,
                    tick,
                });
            }
        }
    }

    /// Serialized write path for senders this shard owns: persist through
    /// the graph, then patch the local snapshot so later spreads see it.
    fn on_update(&mut self, sender: NodeId, receiver: NodeId, weight: f32, tick: Tick) {
        if let Err(err) = self.graph.apply_update(sender, receiver, weight, tick) {
            warn!(%err, sender, receiver, "edge update failed");
            return;
        }
        let clamped = weight.clamp(0.0, 1.0);
        if clamped == 0.0 {
            if let Some(list) = self.adjacency.get_mut(&sender) {
                list.retain(|syn| syn.receiver != receiver);
                if list.is_empty() {
                    self.adjacency.remove(&sender);
                }
            }
            return;
        }
        let list = self.adjacency.entry(sender).or_default();
        match list.iter_mut().find(|syn| syn.receiver == receiver) {
            Some(slot) => {
                slot.weight = clamped;
                slot.tick = tick;
            }
            None => {
                list.push(Synapse::new(receiver, clamped, tick));
                list.sort_by_key(|syn| syn.receiver);
            }
        }
    }

    fn observe_action(&self, node: NodeId, level: f32) {
        if level >= self.kernel.params().spread_threshold
            && self.graph.kind(node) == Some(NodeKind::Action)
        {
            debug!(action = node, level, "action threshold crossed");
        }
    }

    fn report(&self) -> ShardReport {
        ShardReport {
            shard: self.id,
            active: self.kernel.active(),
            window_len: self.kernel.window_len(),
        }
    }

    fn owner(&self, node: NodeId) -> usize {
        (node % self.peers.len() as u64) as usize
    }
}
