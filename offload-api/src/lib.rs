//! # Offload API
//!
//! Contract for moving CPU-bound work off a primary control flow onto a
//! bounded set of supervised worker units.
//!
//! ## Core Components
//!
//! - **Worker scripts**: the fixed program each unit runs
//! - **Control protocol**: discriminated messages between supervisor and units
//! - **Task handles**: futures settling with a result or a failure reason
//! - **Task pools**: initialize / submit / terminate plus introspection
//! - **Error reporting**: an injectable sink for faults
//!
//! ## Module Organization
//!
//! - [`script`]: `WorkerScript` and `UnitContext`
//! - [`message`]: `WorkerCommand` and `WorkerMessage`
//! - [`task`]: `TaskHandle`
//! - [`pool`]: `TaskPool` and `PoolStatus`
//! - [`reporter`]: `ErrorReporter`, `ErrorContext`, `Operation`
//! - [`errors`]: error taxonomy
//! - [`types`]: common type definitions

pub mod errors;
pub mod message;
pub mod pool;
pub mod reporter;
pub mod script;
pub mod task;
pub mod types;

pub use errors::{ConfigError, PoolError, PoolResult, TaskError};
pub use message::{WorkerCommand, WorkerMessage};
pub use pool::{PoolStatus, TaskPool};
pub use reporter::{ErrorContext, ErrorReporter, NoopReporter, Operation};
pub use script::{UnitContext, WorkerScript};
pub use task::TaskHandle;
pub use types::{Payload, TaskId, TaskResult, Transferable, UnitId};
