//! # Pool Error Types
//!
//! This module defines the error taxonomy shared by every pool implementation.
//!
//! ## Error Classes
//!
//! - `ConfigError`: fatal, raised synchronously while building a pool
//! - `TaskError`: carried by a rejected [`TaskHandle`](crate::task::TaskHandle);
//!   local to one task and never fatal to the pool
//! - `PoolError`: returned by pool-level operations (`initialize`, `terminate`)
//!
//! ## Usage Example
//!
//! ```rust
//! use offload_api::errors::TaskError;
//!
//! fn describe(error: &TaskError) -> &'static str {
//!     match error {
//!         TaskError::Failed(_) => "the script reported a failure",
//!         TaskError::UnitFault(_) => "the worker crashed",
//!         TaskError::Terminated => "the pool was shut down first",
//!     }
//! }
//! ```

use thiserror::Error;

/// Invalid pool configuration.
///
/// Always surfaces synchronously to the caller building the pool and is
/// fatal to that pool instance.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The entry script reference was empty or whitespace.
    #[error("Entry script reference must be a non-empty identifier")]
    EmptyScript,

    /// No script with this name is registered in the catalog.
    #[error("Unknown entry script: {0}")]
    UnknownScript(String),

    /// Pool size outside of the accepted range.
    #[error("Pool size {size} is out of range ({min}..={max})")]
    PoolSizeOutOfRange { size: i64, min: usize, max: usize },

    /// Pool size given as a fractional number.
    #[error("Pool size must be an integer, got {0}")]
    NonIntegerPoolSize(String),

    /// Pool size that could not be interpreted as a number at all.
    #[error("Pool size must be numeric, got {0:?}")]
    InvalidPoolSize(String),

    /// Any other malformed configuration value.
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    /// No async runtime is available to host the supervisor.
    #[error("No Tokio runtime available: {0}")]
    NoRuntime(String),
}

/// Reason a task's result handle was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The worker script reported an explicit failure for this task.
    #[error("Task failed: {0}")]
    Failed(String),

    /// The worker running this task crashed or exited abnormally.
    #[error("Worker fault: {0}")]
    UnitFault(String),

    /// The pool shut down before the task produced a result.
    #[error("pool terminated")]
    Terminated,
}

impl TaskError {
    /// Whether this rejection came from pool shutdown.
    pub fn is_terminated(&self) -> bool {
        matches!(self, TaskError::Terminated)
    }
}

/// Errors returned by pool-level operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// Pool configuration was rejected.
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    /// One or more workers failed their startup handshake.
    #[error("Pool initialization failed: {0}")]
    Initialization(String),

    /// The pool is shutting down or already terminated.
    #[error("pool terminated")]
    Terminated,

    /// Workers did not finish terminating within the grace period.
    #[error("Shutdown timed out with {remaining} worker(s) still running")]
    ShutdownTimeout { remaining: usize },

    /// A worker thread could not be created.
    #[error("Failed to spawn worker: {0}")]
    Spawn(String),

    /// Unexpected internal failure.
    #[error("Internal pool error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for PoolError {
    fn from(error: anyhow::Error) -> Self {
        PoolError::Internal(format!("{error:#}"))
    }
}

/// Result alias for pool-level operations.
pub type PoolResult<T> = Result<T, PoolError>;
