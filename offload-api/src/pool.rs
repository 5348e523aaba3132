//! # Task Pool Interface
//!
//! The operations every worker pool exposes to callers.
//!
//! ## Usage Example
//!
//! ```rust,ignore
//! use offload_api::pool::TaskPool;
//! use serde_json::json;
//!
//! async fn run(pool: &impl TaskPool) -> anyhow::Result<()> {
//!     pool.initialize().await?;
//!     let handle = pool.submit(json!({"n": 42}), Vec::new());
//!     let result = handle.await?;
//!     pool.terminate().await?;
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::PoolResult;
use crate::task::TaskHandle;
use crate::types::{Payload, Transferable};

/// Point-in-time view of a pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatus {
    /// Configured target size
    pub pool_size: usize,
    /// Units in the live collection, including ones still handshaking
    pub live_units: usize,
    /// Ready units without a bound task
    pub idle_units: usize,
    /// Units with a bound task
    pub busy_units: usize,
    /// Tasks waiting for an idle unit
    pub queued_tasks: usize,
    /// Removed units whose threads are still being joined
    pub retiring_units: usize,
    pub initialized: bool,
    pub shutting_down: bool,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub replaced_units: u64,
}

/// A bounded pool of parallel workers running one fixed script.
#[async_trait]
pub trait TaskPool: Send + Sync {
    /// Spawn the units and wait for every startup handshake.
    ///
    /// Idempotent: concurrent and repeated calls share one outcome.
    async fn initialize(&self) -> PoolResult<()>;

    /// Queue work and return its result handle immediately.
    ///
    /// Implicitly initializes the pool. Rejects the handle when the pool is
    /// shutting down.
    fn submit(&self, payload: Payload, transfer: Vec<Transferable>) -> TaskHandle;

    /// Reject queued tasks, stop every unit and wait for them to exit.
    async fn terminate(&self) -> PoolResult<()>;

    /// Configured target size.
    fn pool_size(&self) -> usize;

    /// Consistent snapshot of the pool state.
    async fn status(&self) -> PoolStatus;
}
