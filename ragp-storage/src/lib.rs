// ragp-storage/src/lib.rs
// Persistent graph storage: chunked base store + append-only delta log + innate registry

// CRITICAL: Enforce proper error handling - no unwrap/expect in production code
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

pub mod base;
pub mod delta;
pub mod error;
pub mod format;
pub mod lock;
pub mod merge;
pub mod registry;
pub mod types;

pub use base::ChunkedBase;
pub use delta::{DeltaLog, ReplaySummary};
pub use error::{StorageError, StorageResult};
pub use lock::DirLock;
pub use merge::{merge_delta, MergeStats};
pub use registry::{reconcile, InnateRegistry, NodeDef};
pub use types::{NodeId, NodeKind, Synapse, Tick};

/// Manifest file name inside the storage directory.
pub const BASE_FILE: &str = "base.bin";
/// Delta log file name inside the storage directory.
pub const DELTA_FILE: &str = "delta.bin";
/// Advisory lock file name inside the storage directory.
pub const LOCK_FILE: &str = ".lock";
