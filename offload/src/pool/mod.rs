//! # Worker Pool
//!
//! A fixed-size pool of worker threads running one entry script, fronted by
//! a cheap, cloneable [`WorkerPool`] handle.
//!
//! ## Key Concepts
//! - Supervisor: a single Tokio task that owns every piece of pool state and
//!   processes caller commands and unit events one at a time
//! - Units: dedicated OS threads, each executing at most one task at a time
//! - Queue: tasks wait in FIFO order until a unit becomes idle
//! - Crash recovery: a crashed unit is removed and replaced unless the pool
//!   is shutting down; its thread is joined on a tracked cleanup task
//!
//! ## Usage Example
//!
//! ```rust,ignore
//! use offload::{ScriptCatalog, WorkerPool};
//! use serde_json::json;
//!
//! let catalog = ScriptCatalog::new().with_script("square", |_ctx: &_, payload: Payload, _t: Vec<_>| {
//!     let n = payload.as_i64().unwrap_or_default();
//!     Ok(json!(n * n))
//! })?;
//!
//! let pool = WorkerPool::builder("square").pool_size(4).catalog(&catalog).build()?;
//! let handle = pool.submit(json!(12), Vec::new());
//! assert_eq!(handle.await?, json!(144));
//! pool.terminate().await?;
//! ```

mod queue;
mod shutdown;
mod supervisor;
mod task;
mod unit;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use offload_api::errors::{ConfigError, PoolError, PoolResult, TaskError};
use offload_api::message::WorkerMessage;
use offload_api::pool::{PoolStatus, TaskPool};
use offload_api::reporter::{ErrorContext, ErrorReporter, Operation};
use offload_api::script::WorkerScript;
use offload_api::task::TaskHandle;
use offload_api::types::{Payload, TaskId, Transferable, UnitId};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::Instrument;
use uuid::Uuid;

use crate::catalog::ScriptCatalog;
use crate::config::{PoolConfig, PoolSize};
use crate::reporter::TracingReporter;

use self::supervisor::Supervisor;
use self::task::Task;
use self::unit::UnitSpawner;

pub use self::unit::UnitState;

/// Everything the supervisor consumes, in arrival order.
pub(crate) enum Inbound {
    Command(Command),
    Unit { unit: UnitId, event: UnitEvent },
}

/// Requests from `WorkerPool` handles.
pub(crate) enum Command {
    Initialize(oneshot::Sender<PoolResult<()>>),
    Submit(Task),
    Terminate(Option<oneshot::Sender<PoolResult<()>>>),
    Status(oneshot::Sender<PoolStatus>),
}

/// What a unit thread reports about itself.
#[derive(Debug)]
pub(crate) enum UnitEvent {
    /// Protocol message (`initialized`, `task-complete`, `task-error`)
    Message(WorkerMessage),
    /// Unexpected failure of the unit itself
    Fault(String),
    /// The thread ended with this exit code
    Exit(i32),
}

/// Lock-free mirrors of supervisor state for synchronous introspection.
#[derive(Debug, Default)]
pub(crate) struct PoolGauges {
    pub(crate) live_units: AtomicUsize,
    pub(crate) queued_tasks: AtomicUsize,
    pub(crate) shutting_down: AtomicBool,
    pub(crate) completed_tasks: AtomicU64,
    pub(crate) failed_tasks: AtomicU64,
    pub(crate) replaced_units: AtomicU64,
}

// --- Builder ---

/// Validating builder for [`WorkerPool`].
pub struct PoolBuilder {
    config: PoolConfig,
    raw_pool_size: Option<Result<PoolSize, ConfigError>>,
    catalog: Option<ScriptCatalog>,
    reporter: Option<Arc<dyn ErrorReporter>>,
    runtime: Option<Handle>,
}

impl PoolBuilder {
    fn new(config: PoolConfig) -> Self {
        Self {
            config,
            raw_pool_size: None,
            catalog: None,
            reporter: None,
            runtime: None,
        }
    }

    /// Target number of units; validated by `build`, never clamped.
    pub fn pool_size(mut self, size: usize) -> Self {
        self.raw_pool_size = Some(PoolSize::new(size));
        self
    }

    /// Pool size from an untyped value (`4`, `"4"`, `1.5`, ...).
    pub fn pool_size_value(mut self, value: &serde_json::Value) -> Self {
        self.raw_pool_size = Some(PoolSize::try_from(value));
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = Some(timeout);
        self
    }

    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.config.stack_size = Some(bytes);
        self
    }

    /// Catalog to resolve the script from; the global catalog otherwise.
    pub fn catalog(mut self, catalog: &ScriptCatalog) -> Self {
        self.catalog = Some(catalog.clone());
        self
    }

    pub fn error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Runtime hosting the supervisor; the current runtime otherwise.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Validate the configuration and start the supervisor.
    ///
    /// Units are not spawned until the first `initialize()` or `submit()`.
    /// Every validation failure is also forwarded to the error reporter.
    pub fn build(self) -> Result<WorkerPool, ConfigError> {
        let reporter = self.reporter.clone().unwrap_or_else(|| Arc::new(TracingReporter));
        let pool_id = Uuid::new_v4();
        let context = ErrorContext::for_pool(pool_id, self.config.script.clone());

        match self.validate() {
            Ok((config, script, runtime)) => Ok(WorkerPool::start(pool_id, config, script, runtime, reporter)),
            Err(err) => {
                reporter.report(&err, Operation::Construct, &context);
                Err(err)
            }
        }
    }

    fn validate(self) -> Result<(PoolConfig, Arc<dyn WorkerScript>, Handle), ConfigError> {
        let mut config = self.config;
        if let Some(size) = self.raw_pool_size {
            config.pool_size = size?;
        }
        config.validate()?;

        let catalog = self.catalog.unwrap_or_else(|| ScriptCatalog::global().clone());
        let script = catalog.resolve(&config.script)?;

        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|e| ConfigError::NoRuntime(e.to_string()))?,
        };
        Ok((config, script, runtime))
    }
}

// --- Pool Handle ---

/// Handle to a running pool. Clones share the same pool.
///
/// Dropping the last handle requests termination without waiting for it.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    pool_id: Uuid,
    script: String,
    pool_size: PoolSize,
    inbox: mpsc::UnboundedSender<Inbound>,
    gauges: Arc<PoolGauges>,
    next_task_id: AtomicU64,
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        let _ = self.inbox.send(Inbound::Command(Command::Terminate(None)));
    }
}

impl WorkerPool {
    /// Start building a pool running `script`.
    pub fn builder(script: impl Into<String>) -> PoolBuilder {
        PoolBuilder::new(PoolConfig::new(script))
    }

    /// Start building a pool from a prepared configuration.
    pub fn from_config(config: PoolConfig) -> PoolBuilder {
        PoolBuilder::new(config)
    }

    fn start(
        pool_id: Uuid,
        config: PoolConfig,
        script: Arc<dyn WorkerScript>,
        runtime: Handle,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let gauges = Arc::new(PoolGauges::default());

        let spawner = UnitSpawner {
            pool_id,
            script_name: Arc::from(config.script.as_str()),
            script,
            events: inbox_tx.clone(),
            thread_name_prefix: config.thread_name_prefix.clone(),
            stack_size: config.stack_size,
            dispatch: crate::logging::current_subscriber(),
        };

        let supervisor = Supervisor::new(
            pool_id,
            config.pool_size.get(),
            config.shutdown_timeout,
            spawner,
            inbox_rx,
            reporter,
            Arc::clone(&gauges),
        );
        let span = crate::pool_span!(config.script, pool_id);
        runtime.spawn(supervisor.run().instrument(span));

        Self {
            inner: Arc::new(PoolInner {
                pool_id,
                script: config.script,
                pool_size: config.pool_size,
                inbox: inbox_tx,
                gauges,
                next_task_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.pool_id
    }

    pub fn script(&self) -> &str {
        &self.inner.script
    }

    /// Configured target size.
    pub fn pool_size(&self) -> usize {
        self.inner.pool_size.get()
    }

    /// Units in the live collection, as last published by the supervisor.
    pub fn live_units(&self) -> usize {
        self.inner.gauges.live_units.load(Ordering::Acquire)
    }

    /// Tasks waiting for a unit, as last published by the supervisor.
    pub fn queued_tasks(&self) -> usize {
        self.inner.gauges.queued_tasks.load(Ordering::Acquire)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.gauges.shutting_down.load(Ordering::Acquire)
    }

    /// Spawn every unit and wait for all startup handshakes.
    ///
    /// Concurrent and repeated calls share one outcome; nothing is spawned twice.
    pub async fn initialize(&self) -> PoolResult<()> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .inbox
            .send(Inbound::Command(Command::Initialize(tx)))
            .map_err(|_| PoolError::Terminated)?;
        rx.await.map_err(|_| PoolError::Terminated)?
    }

    /// Queue a task and return its result handle without waiting.
    pub fn submit(&self, payload: Payload, transfer: Vec<Transferable>) -> TaskHandle {
        let id = TaskId(self.inner.next_task_id.fetch_add(1, Ordering::Relaxed));
        if self.is_shutting_down() {
            return TaskHandle::rejected(id, TaskError::Terminated);
        }

        let (task, handle) = Task::new(id, payload, transfer);
        if let Err(mpsc::error::SendError(inbound)) = self.inner.inbox.send(Inbound::Command(Command::Submit(task))) {
            if let Inbound::Command(Command::Submit(mut task)) = inbound {
                task.reject(TaskError::Terminated);
            }
        }
        handle
    }

    /// Reject queued tasks, stop every unit and wait until all have exited.
    ///
    /// Tasks already running are left to finish and settle normally. With a
    /// shutdown timeout configured, tasks still running when it expires are
    /// rejected and `ShutdownTimeout` is returned.
    pub async fn terminate(&self) -> PoolResult<()> {
        let (tx, rx) = oneshot::channel();
        if self.inner.inbox.send(Inbound::Command(Command::Terminate(Some(tx)))).is_err() {
            // Supervisor already finished an earlier shutdown.
            return Ok(());
        }
        rx.await.unwrap_or(Ok(()))
    }

    /// Consistent snapshot, ordered after every command sent before it.
    pub async fn status(&self) -> PoolStatus {
        let (tx, rx) = oneshot::channel();
        if self.inner.inbox.send(Inbound::Command(Command::Status(tx))).is_ok() {
            if let Ok(status) = rx.await {
                return status;
            }
        }
        self.terminated_status()
    }

    fn terminated_status(&self) -> PoolStatus {
        let gauges = &self.inner.gauges;
        PoolStatus {
            pool_size: self.pool_size(),
            shutting_down: true,
            completed_tasks: gauges.completed_tasks.load(Ordering::Acquire),
            failed_tasks: gauges.failed_tasks.load(Ordering::Acquire),
            replaced_units: gauges.replaced_units.load(Ordering::Acquire),
            ..Default::default()
        }
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("id", &self.inner.pool_id)
            .field("script", &self.inner.script)
            .field("pool_size", &self.pool_size())
            .field("live_units", &self.live_units())
            .field("queued_tasks", &self.queued_tasks())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}

#[async_trait]
impl TaskPool for WorkerPool {
    async fn initialize(&self) -> PoolResult<()> {
        WorkerPool::initialize(self).await
    }

    fn submit(&self, payload: Payload, transfer: Vec<Transferable>) -> TaskHandle {
        WorkerPool::submit(self, payload, transfer)
    }

    async fn terminate(&self) -> PoolResult<()> {
        WorkerPool::terminate(self).await
    }

    fn pool_size(&self) -> usize {
        WorkerPool::pool_size(self)
    }

    async fn status(&self) -> PoolStatus {
        WorkerPool::status(self).await
    }
}
