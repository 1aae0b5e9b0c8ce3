// ragp-engine/src/consolidate.rs
// Consolidation coordinator: the barrier between the actor runtime and the
// storage layer

use crate::engine::GraphEngine;
use crate::error::{EngineError, EngineResult};
use crate::runtime::ShardMsg;
use ragp_storage::MergeStats;
use std::sync::atomic::Ordering;
use tracing::info;

impl GraphEngine {
    /// Merge the delta log into the chunked base and truncate it.
    ///
    /// Sequence: pause ingress → Flush every shard and await the acks →
    /// merge delta into base (last-write-wins, tombstones removed, weights
    /// below the prune threshold dropped) → atomic chunk and manifest
    /// rewrite → truncate `delta.bin` → rebuild per-shard adjacency
    /// snapshots → purge and re-warm the cache → resume ingress and replay
    /// stimuli queued at the front-end during the barrier.
    ///
    /// A crash before the manifest rename leaves the old base intact and
    /// the delta un-truncated; the next startup replays it.
    pub fn consolidate(&self) -> EngineResult<MergeStats> {
        if self.consolidating.swap(true, Ordering::SeqCst) {
            return Err(EngineError::ConsolidateBusy);
        }
        let result = self.consolidate_inner();
        self.ingress_paused.store(false, Ordering::SeqCst);
        self.consolidating.store(false, Ordering::SeqCst);
        result
    }

    fn consolidate_inner(&self) -> EngineResult<MergeStats> {
        self.ingress_paused.store(true, Ordering::SeqCst);

        // The runtime guard is held across the whole barrier so no stimulus
        // can slip into a shard between the flush and the snapshot rebuild.
        // One flush round drains every inbox up to its barrier marker, but
        // shards emit hops and edge updates while draining; a hop chain
        // shortens its ttl at every round, so ttl + 2 rounds quiesce fully.
        let runtime = self.runtime.lock();
        if let Some(rt) = runtime.as_ref() {
            for _ in 0..self.params.hop_ttl as usize + 2 {
                rt.flush()?;
            }
        }

        let (stats, pins) = self
            .graph
            .consolidate_storage(self.cfg.kernel.prune_threshold)?;

        if let Some(rt) = runtime.as_ref() {
            self.rebuild_shard_snapshots(rt)?;
            // Settle: every shard has installed its snapshot once this
            // round completes, so post-barrier traffic sees the new base.
            rt.flush()?;
        }

        // Re-warm the pinned set; stale pins are simply skipped.
        for node in pins {
            let _ = self.graph.outgoing(node);
        }

        self.ingress_paused.store(false, Ordering::SeqCst);
        if let Some(rt) = runtime.as_ref() {
            let queued = std::mem::take(&mut *self.pending.lock());
            for event in queued {
                rt.send(
                    rt.owner(event.node),
                    ShardMsg::Stimulus {
                        node: event.node,
                        strength: event.strength,
                        ts: event.ts,
                    },
                )?;
            }
        }

        info!(
            senders = stats.senders_merged,
            edges = stats.edges_written,
            pruned = stats.edges_pruned,
            "consolidation complete"
        );
        Ok(stats)
    }
}
