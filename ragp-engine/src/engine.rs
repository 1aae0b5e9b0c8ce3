// ragp-engine/src/engine.rs
// GraphEngine: the long-lived handle over storage, cache, kernel, and the
// sharded runtime. One engine per storage directory; no ambient globals.

use crate::cache::{self, HybridCache};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::graph::SynapseGraph;
use crate::kernel::{score_actions, ActivationKernel, KernelParams};
use crate::runtime::ingress::{self, coalesce_batch, GuardMode, StimulusEvent, SubmitReport};
use crate::runtime::{AsyncRuntime, ShardMsg};
use crate::status::{EngineStatus, RuntimeStatus};
use parking_lot::Mutex;
use ragp_storage::{
    ChunkedBase, DeltaLog, DirLock, InnateRegistry, NodeDef, NodeId, Synapse, DELTA_FILE,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

pub struct GraphEngine {
    pub(crate) cfg: EngineConfig,
    pub(crate) graph: Arc<SynapseGraph>,
    pub(crate) params: KernelParams,
    tick: Arc<AtomicU32>,
    /// Synchronous-fallback kernel, used when the async runtime is off.
    kernel: Mutex<ActivationKernel>,
    pub(crate) runtime: Mutex<Option<AsyncRuntime>>,
    /// Lock-free mirror of `runtime.is_some()`, readable while the runtime
    /// mutex is held across a consolidation barrier.
    runtime_on: AtomicBool,
    runtime_was_started: AtomicBool,
    pub(crate) consolidating: AtomicBool,
    pub(crate) ingress_paused: AtomicBool,
    /// Stimuli queued at the front-end while a consolidation barrier holds.
    pub(crate) pending: Mutex<Vec<StimulusEvent>>,
    high_water: AtomicUsize,
    low_water: AtomicUsize,
    next_shards: AtomicUsize,
    _dir_lock: DirLock,
}

impl GraphEngine {
    /// Open (or create) the engine over `dir`. Takes an exclusive lock on
    /// the directory, replays the delta log, and resumes the monotonic tick
    /// from the highest persisted value.
    pub fn open(dir: &Path, cfg: EngineConfig) -> EngineResult<Self> {
        cfg.validate()?;
        if cfg.reset_storage && dir.exists() {
            info!(dir = %dir.display(), "reset_storage set, wiping storage directory");
            std::fs::remove_dir_all(dir)?;
        }
        let dir_lock = DirLock::acquire(dir)?;

        let base = ChunkedBase::open(dir, cfg.chunk_span, cfg.registry_version)?;
        let (delta, replay) = DeltaLog::open(&dir.join(DELTA_FILE))?;

        let labels = cfg.resolved_labels();
        let defs: Vec<NodeDef> = base
            .nodes()
            .map(|(id, kind)| NodeDef {
                id,
                kind,
                label: labels.get(&id).cloned(),
            })
            .collect();
        let registry = InnateRegistry::new(base.registry_version(), &defs);

        let budget = cache::resolve_budget(&cfg.cache);
        let hybrid = HybridCache::new(budget, &cfg.cache);
        let graph = Arc::new(SynapseGraph::new(
            base,
            delta,
            hybrid,
            registry,
            cfg.cache.bypass,
        ));
        let tick0 = graph.persisted_max_tick()?;
        info!(
            nodes = graph.node_count(),
            chunks = graph.chunk_count(),
            replayed_records = replay.records,
            truncated_bytes = replay.truncated_bytes,
            registry_version = graph.registry_version(),
            tick = tick0,
            "engine opened"
        );

        let params = KernelParams::from_config(&cfg);
        let engine = Self {
            graph,
            params: params.clone(),
            tick: Arc::new(AtomicU32::new(tick0)),
            kernel: Mutex::new(ActivationKernel::new(params)),
            runtime: Mutex::new(None),
            runtime_on: AtomicBool::new(false),
            runtime_was_started: AtomicBool::new(false),
            consolidating: AtomicBool::new(false),
            ingress_paused: AtomicBool::new(false),
            pending: Mutex::new(Vec::new()),
            high_water: AtomicUsize::new(cfg.runtime.high_water),
            low_water: AtomicUsize::new(cfg.runtime.low_water),
            next_shards: AtomicUsize::new(cfg.effective_shards()),
            cfg,
            _dir_lock: dir_lock,
        };
        if engine.cfg.async_boot {
            engine.start_async_runtime()?;
        }
        Ok(engine)
    }

    /// Aggregate status across storage, cache, kernel, and runtime.
    pub fn status(&self) -> EngineStatus {
        let (runtime_active, runtime_status) = {
            let runtime = self.runtime.lock();
            match runtime.as_ref() {
                Some(rt) => (rt.metrics.active_nodes(), rt.metrics.status(true)),
                None => (0, RuntimeStatus::default()),
            }
        };
        EngineStatus {
            nodes: self.graph.node_count(),
            chunks: self.graph.chunk_count(),
            delta_records: self.graph.delta_records(),
            active_nodes: self.kernel.lock().active_count() + runtime_active,
            global_tick: self.tick.load(Ordering::Relaxed),
            registry_version: self.graph.registry_version(),
            degraded: self.graph.is_degraded(),
            cache: self.graph.cache_status(),
            runtime: runtime_status,
        }
    }

    /// Effective outgoing synapses of `sender`, delta overlaid on base.
    pub fn get_connections(&self, sender: NodeId) -> EngineResult<Vec<Synapse>> {
        Ok((*self.graph.outgoing(sender)?).clone())
    }

    /// Semantic label of a node, when the config declares one.
    pub fn node_label(&self, node: NodeId) -> EngineResult<Option<String>> {
        self.graph.ensure_known(node)?;
        Ok(self.graph.label(node))
    }

    /// Synchronous fallback: inject and run one full ingest/learn cycle on
    /// the engine-owned kernel, without the actor runtime.
    pub fn spread_activation(&self, node: NodeId, strength: f32) -> EngineResult<()> {
        self.graph.ensure_known(node)?;
        ensure_finite("strength", strength)?;
        let mut kernel = self.kernel.lock();
        let tick = self.tick.fetch_add(1, Ordering::Relaxed) + 1;
        kernel.inject(node, strength, tick);

        let outgoing = self.graph.outgoing(node)?;
        for (receiver, contribution) in kernel.contributions(node, &outgoing) {
            kernel.bump(receiver, contribution, tick);
        }

        let updates = kernel.hebbian(|sender, receiver| self.graph.weight_of(sender, receiver));
        for update in updates {
            self.graph
                .apply_update(update.sender, update.receiver, update.weight, tick)?;
        }
        kernel.decay();
        Ok(())
    }

    /// Async ingress for one stimulus. Requires a running runtime; refused
    /// under the `drop` guard regime.
    pub fn submit_stimulus(
        &self,
        node: NodeId,
        strength: f32,
        source: &str,
        ts: u64,
    ) -> EngineResult<()> {
        let report = self.submit_stimuli(vec![StimulusEvent {
            node,
            strength,
            source: source.to_owned(),
            ts,
        }])?;
        if report.dropped > 0 {
            return Err(EngineError::QueueFull);
        }
        Ok(())
    }

    /// Async ingress for a batch. Duplicate `(node, source)` submissions are
    /// coalesced by the configured policy before routing; under the `drop`
    /// regime the surviving events are refused and counted.
    pub fn submit_stimuli(&self, batch: Vec<StimulusEvent>) -> EngineResult<SubmitReport> {
        for event in &batch {
            self.graph.ensure_known(event.node)?;
            ensure_finite("strength", event.strength)?;
        }
        let (events, coalesced) = coalesce_batch(batch, self.cfg.runtime.coalesce);

        if self.ingress_paused.load(Ordering::SeqCst) {
            if !self.runtime_on.load(Ordering::SeqCst) {
                return Err(self.runtime_gone());
            }
            let accepted = events.len();
            self.pending.lock().extend(events);
            return Ok(SubmitReport {
                accepted,
                coalesced,
                dropped: 0,
            });
        }

        let runtime = self.runtime.lock();
        let rt = runtime.as_ref().ok_or_else(|| self.runtime_gone())?;
        rt.metrics
            .coalesced_total
            .fetch_add(coalesced as u64, Ordering::Relaxed);
        let guard = ingress::update_guard(
            &rt.metrics,
            self.high_water.load(Ordering::Relaxed),
            self.low_water.load(Ordering::Relaxed),
        );
        if guard == GuardMode::Drop {
            let dropped = events.len();
            rt.metrics
                .dropped_total
                .fetch_add(dropped as u64, Ordering::Relaxed);
            return Ok(SubmitReport {
                accepted: 0,
                coalesced,
                dropped,
            });
        }

        let mut accepted = 0;
        for event in events {
            rt.send(
                rt.owner(event.node),
                ShardMsg::Stimulus {
                    node: event.node,
                    strength: event.strength,
                    ts: event.ts,
                },
            )?;
            accepted += 1;
        }
        Ok(SubmitReport {
            accepted,
            coalesced,
            dropped: 0,
        })
    }

    /// Score action candidates for `context`: `cd = Σ incoming activation ×
    /// weight − cost(action)`, top-K, ties toward the smaller node ID. The
    /// context node is treated as activated at 1.0 when it currently is not,
    /// so a cold engine can still be queried.
    pub fn compute_cd(&self, context: NodeId) -> EngineResult<Vec<(NodeId, f32)>> {
        self.graph.ensure_known(context)?;
        let mut active: HashMap<NodeId, f32> = HashMap::new();
        {
            let runtime = self.runtime.lock();
            if let Some(rt) = runtime.as_ref() {
                for report in rt.flush()? {
                    for (node, level) in report.active {
                        *active.entry(node).or_insert(0.0) += level;
                    }
                }
            }
        }
        for (node, level) in self.kernel.lock().active() {
            *active.entry(node).or_insert(0.0) += level;
        }
        active.entry(context).or_insert(1.0);

        let actions = self.graph.action_nodes();
        let snapshot: Vec<(NodeId, f32)> = active.into_iter().collect();
        score_actions(&snapshot, &actions, &self.params, |sender| {
            self.graph.outgoing(sender).map(|list| (*list).clone())
        })
    }

    /// Explicit weight update. NaN/Inf are rejected, out-of-range weights
    /// clamped into [0, 1]; a zero weight tombstones the edge. Advances the
    /// global tick and stamps the record with the new value.
    pub fn update_weight(
        &self,
        sender: NodeId,
        receiver: NodeId,
        weight: f32,
    ) -> EngineResult<()> {
        self.graph.ensure_known(sender)?;
        self.graph.ensure_known(receiver)?;
        ensure_finite("weight", weight)?;
        let tick = self.tick.fetch_add(1, Ordering::Relaxed) + 1;
        self.graph.apply_update(sender, receiver, weight, tick)
    }

    /// Declare the registry. On a version or node-set change the persisted
    /// graph migrates: edges between still-valid nodes survive, the rest are
    /// pruned, and the delta is folded in first so nothing valid is lost.
    pub fn ensure_innate_registry(&self, nodes: &[NodeDef]) -> EngineResult<bool> {
        for def in nodes {
            if def.id > self.cfg.node_max {
                return Err(EngineError::NodeOutOfRange(def.id, self.cfg.node_max));
            }
        }
        let labels = self.cfg.resolved_labels();
        let defs: Vec<NodeDef> = nodes
            .iter()
            .cloned()
            .map(|mut def| {
                if def.label.is_none() {
                    def.label = labels.get(&def.id).cloned();
                }
                def
            })
            .collect();
        let registry = InnateRegistry::new(self.cfg.registry_version, &defs);
        let changed = self
            .graph
            .migrate(registry, &self.cfg.cache.pinned_nodes)?;
        if changed {
            let runtime = self.runtime.lock();
            if let Some(rt) = runtime.as_ref() {
                self.rebuild_shard_snapshots(rt)?;
            }
        }
        Ok(changed)
    }

    /// Rebuild and install every shard's adjacency snapshot from the
    /// current graph view.
    pub(crate) fn rebuild_shard_snapshots(&self, rt: &AsyncRuntime) -> EngineResult<()> {
        let shard_count = rt.shard_count();
        let mut snapshots = Vec::with_capacity(shard_count);
        for shard in 0..shard_count {
            snapshots.push(self.graph.snapshot_shard(shard, shard_count)?);
        }
        rt.refresh(snapshots)
    }

    /// Boot the shard actors. Idempotent while running.
    pub fn start_async_runtime(&self) -> EngineResult<()> {
        let mut runtime = self.runtime.lock();
        if runtime.is_some() {
            return Ok(());
        }
        let shards = self.next_shards.load(Ordering::Relaxed);
        let rt = AsyncRuntime::start(
            Arc::clone(&self.graph),
            Arc::clone(&self.tick),
            self.params.clone(),
            shards,
        )?;
        *runtime = Some(rt);
        self.runtime_on.store(true, Ordering::SeqCst);
        self.runtime_was_started.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Drain every shard and shut the actors down. Subsequent submissions
    /// fail fast with `RuntimeStopped`.
    pub fn stop_async_runtime(&self) -> EngineResult<()> {
        let rt = self
            .runtime
            .lock()
            .take()
            .ok_or(EngineError::RuntimeNotStarted)?;
        self.runtime_on.store(false, Ordering::SeqCst);
        rt.stop()
    }

    /// Adjust the backpressure policy. Water marks apply immediately; a
    /// shard-count change takes effect at the next runtime start, because
    /// repartitioning live shards would break single-owner serialization.
    pub fn set_async_policy(
        &self,
        shards: usize,
        high_water: usize,
        low_water: usize,
    ) -> EngineResult<()> {
        if shards == 0 {
            return Err(EngineError::InvalidConfig("shards must be positive".into()));
        }
        if low_water >= high_water {
            return Err(EngineError::InvalidConfig(
                "low_water must be below high_water".into(),
            ));
        }
        self.next_shards.store(shards.clamp(1, 64), Ordering::Relaxed);
        self.high_water.store(high_water, Ordering::Relaxed);
        self.low_water.store(low_water, Ordering::Relaxed);
        match self.shard_count() {
            Some(current) if current != shards => {
                warn!(shards, "shard count change applies at the next runtime start");
            }
            _ => {}
        }
        Ok(())
    }

    /// Runtime counters; requires a running runtime.
    pub fn get_async_metrics(&self) -> EngineResult<RuntimeStatus> {
        self.runtime
            .lock()
            .as_ref()
            .map(|rt| rt.metrics.status(true))
            .ok_or(EngineError::RuntimeNotStarted)
    }

    fn shard_count(&self) -> Option<usize> {
        self.runtime.lock().as_ref().map(|rt| rt.shard_count())
    }

    fn runtime_gone(&self) -> EngineError {
        if self.runtime_was_started.load(Ordering::SeqCst) {
            EngineError::RuntimeStopped
        } else {
            EngineError::RuntimeNotStarted
        }
    }
}

impl Drop for GraphEngine {
    fn drop(&mut self) {
        if let Some(rt) = self.runtime.get_mut().take() {
            let _ = rt.stop();
        }
        let _ = self.graph.sync_delta();
    }
}

fn ensure_finite(name: &'static str, value: f32) -> EngineResult<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(EngineError::NonFinite(name, value))
    }
}
