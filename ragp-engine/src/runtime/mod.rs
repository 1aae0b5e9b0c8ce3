// ragp-engine/src/runtime/mod.rs
// Sharded asynchronous activation runtime: N single-consumer inbox actors
// owning disjoint sender partitions, routed by `sender % shard_count`

pub mod ingress;
pub(crate) mod shard;

use crate::error::{EngineError, EngineResult};
use crate::graph::SynapseGraph;
use crate::kernel::KernelParams;
use crate::runtime::ingress::GuardMode;
use crate::status::RuntimeStatus;
use ragp_storage::{NodeId, Synapse, Tick};
use self::shard::ShardWorker;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tracing::info;

/// Shard inbox protocol. FIFO per shard; `Flush` is the only cross-shard
/// barrier. `Refresh` installs a rebuilt adjacency snapshot after
/// consolidation or migration.
#[derive(Debug)]
pub(crate) enum ShardMsg {
    Stimulus {
        node: NodeId,
        strength: f32,
        #[allow(dead_code)]
        ts: u64,
    },
    Hop {
        #[allow(dead_code)]
        from: NodeId,
        to: NodeId,
        contribution: f32,
        ttl: u8,
    },
    UpdateEdge {
        sender: NodeId,
        receiver: NodeId,
        weight: f32,
        tick: Tick,
    },
    Flush {
        ack: oneshot::Sender<ShardReport>,
    },
    Refresh {
        adjacency: HashMap<NodeId, Vec<Synapse>>,
    },
    Stop,
}

/// What a shard hands back at the Flush barrier.
#[derive(Debug, Clone, Default)]
pub(crate) struct ShardReport {
    #[allow(dead_code)]
    pub shard: usize,
    pub active: Vec<(NodeId, f32)>,
    #[allow(dead_code)]
    pub window_len: usize,
}

pub(crate) struct ShardMetrics {
    pub queue_len: AtomicUsize,
    pub processed: AtomicU64,
    pub active_nodes: AtomicUsize,
}

pub(crate) struct RuntimeMetrics {
    pub shards: Vec<ShardMetrics>,
    pub processed_total: AtomicU64,
    pub dropped_total: AtomicU64,
    pub coalesced_total: AtomicU64,
    pub hop_total: AtomicU64,
    guard: AtomicU8,
    started: Instant,
}

impl RuntimeMetrics {
    fn new(shard_count: usize) -> Self {
        Self {
            shards: (0..shard_count)
                .map(|_| ShardMetrics {
                    queue_len: AtomicUsize::new(0),
                    processed: AtomicU64::new(0),
                    active_nodes: AtomicUsize::new(0),
                })
                .collect(),
            processed_total: AtomicU64::new(0),
            dropped_total: AtomicU64::new(0),
            coalesced_total: AtomicU64::new(0),
            hop_total: AtomicU64::new(0),
            guard: AtomicU8::new(GuardMode::Normal.as_u8()),
            started: Instant::now(),
        }
    }

    pub fn global_queue_len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.queue_len.load(Ordering::Relaxed))
            .sum()
    }

    pub fn guard_mode(&self) -> GuardMode {
        GuardMode::from_u8(self.guard.load(Ordering::Relaxed))
    }

    pub fn set_guard(&self, mode: GuardMode) {
        self.guard.store(mode.as_u8(), Ordering::Relaxed);
    }

    pub fn active_nodes(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.active_nodes.load(Ordering::Relaxed))
            .sum()
    }

    pub fn status(&self, async_on: bool) -> RuntimeStatus {
        let per_shard_queue_len: Vec<usize> = self
            .shards
            .iter()
            .map(|s| s.queue_len.load(Ordering::Relaxed))
            .collect();
        let per_shard_processed: Vec<u64> = self
            .shards
            .iter()
            .map(|s| s.processed.load(Ordering::Relaxed))
            .collect();
        let processed_total = self.processed_total.load(Ordering::Relaxed);
        let elapsed = self.started.elapsed().as_secs_f64().max(1e-6);
        RuntimeStatus {
            async_on,
            shards: self.shards.len(),
            global_queue_len: per_shard_queue_len.iter().sum(),
            per_shard_queue_len,
            processed_total,
            per_shard_processed,
            processed_per_sec: processed_total as f64 / elapsed,
            guard_mode: self.guard_mode(),
            dropped_total: self.dropped_total.load(Ordering::Relaxed),
            coalesced_total: self.coalesced_total.load(Ordering::Relaxed),
            hop_total: self.hop_total.load(Ordering::Relaxed),
        }
    }
}

/// Handle over the shard tasks and their tokio runtime. Owned by the
/// engine; dropped (after `stop`) when the runtime is shut down.
pub(crate) struct AsyncRuntime {
    rt: tokio::runtime::Runtime,
    txs: Vec<mpsc::UnboundedSender<ShardMsg>>,
    handles: Vec<tokio::task::JoinHandle<()>>,
    pub metrics: Arc<RuntimeMetrics>,
    shard_count: usize,
}

impl AsyncRuntime {
    pub fn start(
        graph: Arc<SynapseGraph>,
        tick: Arc<AtomicU32>,
        params: KernelParams,
        shard_count: usize,
    ) -> EngineResult<Self> {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(shard_count)
            .thread_name("ragp-shard")
            .enable_all()
            .build()?;
        let metrics = Arc::new(RuntimeMetrics::new(shard_count));

        let mut txs = Vec::with_capacity(shard_count);
        let mut rxs = Vec::with_capacity(shard_count);
        for _ in 0..shard_count {
            let (tx, rx) = mpsc::unbounded_channel();
            txs.push(tx);
            rxs.push(rx);
        }

        let mut handles = Vec::with_capacity(shard_count);
        for (id, rx) in rxs.into_iter().enumerate() {
            let adjacency = graph.snapshot_shard(id, shard_count)?;
            let worker = ShardWorker::new(
                id,
                Arc::clone(&graph),
                Arc::clone(&tick),
                params.clone(),
                adjacency,
                txs.clone(),
                Arc::clone(&metrics),
            );
            handles.push(rt.spawn(worker.run(rx)));
        }
        info!(shards = shard_count, "async runtime started");
        Ok(Self {
            rt,
            txs,
            handles,
            metrics,
            shard_count,
        })
    }

    pub fn shard_count(&self) -> usize {
        self.shard_count
    }

    pub fn owner(&self, node: NodeId) -> usize {
        (node % self.shard_count as u64) as usize
    }

    pub(crate) fn send(&self, shard: usize, msg: ShardMsg) -> EngineResult<()> {
        self.metrics.shards[shard]
            .queue_len
            .fetch_add(1, Ordering::Relaxed);
        self.txs[shard].send(msg).map_err(|_| {
            self.metrics.shards[shard]
                .queue_len
                .fetch_sub(1, Ordering::Relaxed);
            EngineError::RuntimeStopped
        })?;
        Ok(())
    }

    /// Barrier: every shard drains its inbox up to this point and reports.
    pub(crate) fn flush(&self) -> EngineResult<Vec<ShardReport>> {
        let mut pending = Vec::with_capacity(self.shard_count);
        for shard in 0..self.shard_count {
            let (ack, rx) = oneshot::channel();
            self.send(shard, ShardMsg::Flush { ack })?;
            pending.push(rx);
        }
        let reports = self.rt.block_on(async move {
            let mut reports = Vec::with_capacity(pending.len());
            for rx in pending {
                if let Ok(report) = rx.await {
                    reports.push(report);
                }
            }
            reports
        });
        Ok(reports)
    }

    /// Install rebuilt adjacency snapshots, one per shard.
    pub(crate) fn refresh(
        &self,
        mut snapshots: Vec<HashMap<NodeId, Vec<Synapse>>>,
    ) -> EngineResult<()> {
        for shard in (0..self.shard_count).rev() {
            let adjacency = snapshots.pop().unwrap_or_default();
            self.send(shard, ShardMsg::Refresh { adjacency })?;
        }
        Ok(())
    }

    /// Graceful shutdown: every shard drains its inbox and exits.
    pub(crate) fn stop(self) -> EngineResult<()> {
        for shard in 0..self.shard_count {
            let _ = self.send(shard, ShardMsg::Stop);
        }
        let handles = self.handles;
        self.rt.block_on(async {
            for handle in handles {
                let _ = handle.await;
            }
        });
        info!("async runtime stopped");
        Ok(())
    }
}
