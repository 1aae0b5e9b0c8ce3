// ragp-engine/src/lib.rs
// RAGP activation-spreading engine: cache, graph view, kernel, sharded runtime

// CRITICAL: Enforce proper error handling - no unwrap/expect in production code
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

pub mod cache;
pub mod config;
pub mod consolidate;
pub mod engine;
pub mod error;
pub mod graph;
pub mod kernel;
pub mod runtime;
pub mod status;

pub use cache::HybridCache;
pub use config::{
    load_config, CacheConfig, CachePolicy, CoalescePolicy, EngineConfig, KernelConfig,
    RuntimeConfig,
};
pub use engine::GraphEngine;
pub use error::{EngineError, EngineResult};
pub use graph::SynapseGraph;
pub use kernel::{ActivationKernel, EdgeUpdate, KernelParams};
pub use runtime::ingress::{GuardMode, StimulusEvent, SubmitReport};
pub use status::{CacheStatus, EngineStatus, RuntimeStatus};

// Storage-layer types every embedder touches.
pub use ragp_storage::{NodeDef, NodeId, NodeKind, Synapse, Tick};
