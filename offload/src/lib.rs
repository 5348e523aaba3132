// Offload Worker Pool Implementation
//
// This crate implements the Offload API on dedicated OS threads, with a
// Tokio task supervising each pool.

pub mod catalog;
pub mod config;
pub mod logging;
pub mod pool;
pub mod registry;
pub mod reporter;

// Re-export commonly used types
pub use catalog::ScriptCatalog;
pub use config::{PoolConfig, PoolSize, MAX_POOL_SIZE, MIN_POOL_SIZE};
pub use pool::{PoolBuilder, UnitState, WorkerPool};
pub use registry::PoolRegistry;
pub use reporter::TracingReporter;

pub use offload_api::*;
