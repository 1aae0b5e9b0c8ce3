// ragp-storage/src/types.rs
// Shared identifiers and record types for the graph store

use serde::{Deserialize, Serialize};

/// Node identifier. IDs are assigned by the innate registry and never minted
/// at runtime.
pub type NodeId = u64;

/// Monotonic engine tick. Advances once per ingest/learn cycle.
pub type Tick = u32;

/// Node role within the associative graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Sensor,
    Context,
    Action,
    Internal,
}

impl NodeKind {
    pub fn as_u8(self) -> u8 {
        match self {
            NodeKind::Sensor => 0,
            NodeKind::Context => 1,
            NodeKind::Action => 2,
            NodeKind::Internal => 3,
        }
    }

    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(NodeKind::Sensor),
            1 => Some(NodeKind::Context),
            2 => Some(NodeKind::Action),
            3 => Some(NodeKind::Internal),
            _ => None,
        }
    }
}

/// One outgoing synapse of a sender: the receiver endpoint, the learned
/// weight in [0.0, 1.0], and the tick of the last update.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Synapse {
    pub receiver: NodeId,
    pub weight: f32,
    pub tick: Tick,
}

impl Synapse {
    pub fn new(receiver: NodeId, weight: f32, tick: Tick) -> Self {
        Self {
            receiver,
            weight,
            tick,
        }
    }
}
