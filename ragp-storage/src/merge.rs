// ragp-storage/src/merge.rs
// Merge the delta overlay into the chunked base (storage half of consolidation)

use crate::base::ChunkedBase;
use crate::delta::DeltaLog;
use crate::error::StorageResult;
use crate::types::{NodeId, Synapse};
use std::collections::BTreeMap;
use tracing::info;

#[derive(Debug, Clone, Copy, Default)]
pub struct MergeStats {
    pub senders_merged: usize,
    pub edges_written: usize,
    pub edges_pruned: usize,
}

/// Fold every pending delta record into its sender's base chunk,
/// last-write-wins by tick. A zero weight is a tombstone; weights below
/// `prune_below` are dropped as well.
///
/// The caller truncates the delta only after this returns: a crash inside
/// the merge leaves the old manifest as the commit point and the full delta
/// for replay, and re-merging the same records is idempotent under the tick
/// ordering.
pub fn merge_delta(
    base: &mut ChunkedBase,
    delta: &DeltaLog,
    prune_below: f32,
) -> StorageResult<MergeStats> {
    let mut stats = MergeStats::default();
    if delta.is_empty() {
        return Ok(stats);
    }

    let mut updates: BTreeMap<NodeId, Vec<Synapse>> = BTreeMap::new();
    for (&sender, overlay) in delta.index() {
        let mut merged: BTreeMap<NodeId, Synapse> = base
            .read_outgoing(sender)?
            .into_iter()
            .map(|syn| (syn.receiver, syn))
            .collect();
        for (&receiver, &(weight, tick)) in overlay {
            match merged.get(&receiver) {
                Some(existing) if existing.tick > tick => {}
                _ => {
                    merged.insert(receiver, Synapse::new(receiver, weight, tick));
                }
            }
        }

        let before = merged.len();
        let list: Vec<Synapse> = merged
            .into_values()
            .filter(|syn| syn.weight > 0.0 && syn.weight >= prune_below)
            .collect();
        stats.edges_pruned += before - list.len();
        stats.edges_written += list.len();
        stats.senders_merged += 1;
        updates.insert(sender, list);
    }

    base.rewrite_senders(&updates)?;
    info!(
        senders = stats.senders_merged,
        edges = stats.edges_written,
        pruned = stats.edges_pruned,
        "delta merged into base"
    );
    Ok(stats)
}
