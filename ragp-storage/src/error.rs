// ragp-storage/src/error.rs
// Storage error types

use crate::types::NodeId;
use std::path::PathBuf;
use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

/// Storage layer errors. CRC mismatches in the delta log are not represented
/// here: they are recovered locally by truncating the log at the first bad
/// record and reported through [`crate::delta::ReplaySummary`].
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("node {0} is not in the innate registry")]
    UnknownNode(NodeId),

    #[error("corrupt manifest: {0}")]
    CorruptManifest(String),

    #[error("unsupported base format version {0}")]
    UnsupportedVersion(u16),

    #[error("storage directory {0} is locked by another process")]
    DirectoryLocked(PathBuf),

    #[error("registry migration would drop protected node {0}")]
    MigrationConflict(NodeId),
}
