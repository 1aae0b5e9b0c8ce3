// ragp-engine/src/runtime/ingress.rs
// Ingress front-end: batch coalescing and hysteretic guard-mode transitions

use crate::config::CoalescePolicy;
use crate::runtime::RuntimeMetrics;
use ragp_storage::NodeId;
use serde::Serialize;
use std::collections::HashMap;
use tracing::info;

/// One external stimulus submission.
#[derive(Debug, Clone)]
pub struct StimulusEvent {
    pub node: NodeId,
    pub strength: f32,
    pub source: String,
    pub ts: u64,
}

/// Outcome of a batch submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitReport {
    pub accepted: usize,
    pub coalesced: usize,
    pub dropped: usize,
}

/// Ingress backpressure regime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardMode {
    #[default]
    Normal,
    Coalesce,
    Drop,
}

impl GuardMode {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            GuardMode::Normal => 0,
            GuardMode::Coalesce => 1,
            GuardMode::Drop => 2,
        }
    }

    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            1 => GuardMode::Coalesce,
            2 => GuardMode::Drop,
            _ => GuardMode::Normal,
        }
    }
}

/// Merge duplicate `(node, source)` submissions inside one batch according
/// to the configured policy. First-seen order of unique keys is preserved.
/// Returns the surviving events and the number merged away.
pub fn coalesce_batch(
    batch: Vec<StimulusEvent>,
    policy: CoalescePolicy,
) -> (Vec<StimulusEvent>, usize) {
    let mut order: Vec<(NodeId, String)> = Vec::new();
    let mut merged: HashMap<(NodeId, String), StimulusEvent> = HashMap::new();
    let mut coalesced = 0usize;
    for event in batch {
        let key = (event.node, event.source.clone());
        match merged.get_mut(&key) {
            Some(kept) => {
                coalesced += 1;
                match policy {
                    CoalescePolicy::Max => kept.strength = kept.strength.max(event.strength),
                    CoalescePolicy::Sum => kept.strength += event.strength,
                    CoalescePolicy::Last => {
                        kept.strength = event.strength;
                        kept.ts = event.ts;
                    }
                }
            }
            None => {
                order.push(key.clone());
                merged.insert(key, event);
            }
        }
    }
    let events = order
        .into_iter()
        .filter_map(|key| merged.remove(&key))
        .collect();
    (events, coalesced)
}

/// Re-evaluate the guard mode against the current global queue length.
///
/// Escalation: `normal → coalesce` past the high-water mark, `coalesce →
/// drop` past twice the high-water mark. De-escalation steps back down one
/// level at a time — `drop → coalesce` below high water, `coalesce →
/// normal` below low water — so the mode cannot flap around one threshold.
pub(crate) fn update_guard(metrics: &RuntimeMetrics, high: usize, low: usize) -> GuardMode {
    let queued = metrics.global_queue_len();
    let current = metrics.guard_mode();
    let next = match current {
        GuardMode::Normal if queued > high => GuardMode::Coalesce,
        GuardMode::Coalesce if queued > high.saturating_mul(2) => GuardMode::Drop,
        GuardMode::Coalesce if queued < low => GuardMode::Normal,
        GuardMode::Drop if queued < high => GuardMode::Coalesce,
        _ => current,
    };
    if next != current {
        metrics.set_guard(next);
        info!(?current, ?next, queued, "guard mode transition");
    }
    next
}
