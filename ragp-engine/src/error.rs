// ragp-engine/src/error.rs
// Engine error types

use ragp_storage::{NodeId, StorageError};
use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("node {0} is not in the innate registry")]
    UnknownNode(NodeId),

    #[error("node {0} exceeds the configured node_max of {1}")]
    NodeOutOfRange(NodeId, NodeId),

    #[error("{0} must be finite, got {1}")]
    NonFinite(&'static str, f32),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("async runtime has not been started")]
    RuntimeNotStarted,

    #[error("async runtime has been stopped")]
    RuntimeStopped,

    #[error("ingress queue is full, stimulus refused")]
    QueueFull,

    #[error("a consolidation is already in progress")]
    ConsolidateBusy,
}
