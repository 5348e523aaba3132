//! # Pool Supervisor
//!
//! Sole owner of the unit collection, the task queue and the lifecycle
//! flags. Commands from `WorkerPool` handles and events from unit threads
//! arrive on one inbox and are handled strictly one at a time, so no pool
//! state is ever shared or locked.
//!
//! ## Dispatch
//! A queued task is bound to the first idle unit. Dispatch runs after every
//! event that can free a unit or add work: a handshake, a task outcome, a
//! submission and a replacement.
//!
//! ## Crash Recovery
//! A fault or an unexpected exit removes the unit, rejects its bound task and
//! spawns a replacement. A unit that fails before its handshake is not
//! replaced; a pending `initialize()` fails instead, and a pool left below
//! its target size is topped up by the next `initialize()` or `submit()`.

use std::mem;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use offload_api::errors::{PoolError, PoolResult, TaskError};
use offload_api::message::WorkerMessage;
use offload_api::pool::PoolStatus;
use offload_api::reporter::{ErrorContext, ErrorReporter, Operation};
use offload_api::types::{TaskId, UnitId};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use uuid::Uuid;

use super::queue::TaskQueue;
use super::shutdown::ShutdownState;
use super::task::Task;
use super::unit::{panic_message, UnitSpawner, WorkerUnit, EXIT_OK};
use super::{Command, Inbound, PoolGauges, UnitEvent};

pub(super) type Waiter = oneshot::Sender<PoolResult<()>>;

/// Progress of the startup handshake round.
pub(super) enum InitState {
    Uninitialized,
    /// Units spawned; waiting for every handshake
    Pending(Vec<Waiter>),
    Ready,
}

pub(crate) struct Supervisor {
    pub(super) pool_id: Uuid,
    pub(super) script: Arc<str>,
    pub(super) target_size: usize,
    pub(super) units: Vec<WorkerUnit>,
    pub(super) queue: TaskQueue,
    pub(super) init: InitState,
    pub(super) shutdown: ShutdownState,
    pub(super) cleanup: JoinSet<(UnitId, thread::Result<()>)>,
    pub(super) reporter: Arc<dyn ErrorReporter>,
    pub(super) gauges: Arc<PoolGauges>,
    inbox: mpsc::UnboundedReceiver<Inbound>,
    spawner: UnitSpawner,
    next_unit_id: u64,
}

impl Supervisor {
    pub(crate) fn new(
        pool_id: Uuid,
        target_size: usize,
        shutdown_timeout: Option<Duration>,
        spawner: UnitSpawner,
        inbox: mpsc::UnboundedReceiver<Inbound>,
        reporter: Arc<dyn ErrorReporter>,
        gauges: Arc<PoolGauges>,
    ) -> Self {
        Self {
            pool_id,
            script: Arc::clone(&spawner.script_name),
            target_size,
            units: Vec::with_capacity(target_size),
            queue: TaskQueue::new(),
            init: InitState::Uninitialized,
            shutdown: ShutdownState::new(shutdown_timeout),
            cleanup: JoinSet::new(),
            reporter,
            gauges,
            inbox,
            spawner,
            next_unit_id: 1,
        }
    }

    /// Event loop. Returns once shutdown has completed or timed out.
    pub(crate) async fn run(mut self) {
        crate::log_pool!(self.script, "started", pool_size = self.target_size);

        loop {
            let deadline = self.shutdown.deadline();
            tokio::select! {
                inbound = self.inbox.recv() => match inbound {
                    Some(inbound) => self.handle(inbound),
                    // Unreachable while the spawner holds a sender.
                    None => break,
                },
                Some(joined) = self.cleanup.join_next(), if !self.cleanup.is_empty() => {
                    self.on_reaped(joined);
                }
                _ = deadline_elapsed(deadline), if deadline.is_some() => {
                    self.force_shutdown();
                }
            }

            self.publish();
            if self.shutdown_complete() {
                self.finish_shutdown();
                break;
            }
        }
    }

    fn handle(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Command(Command::Initialize(reply)) => self.initialize(Some(reply)),
            Inbound::Command(Command::Submit(task)) => self.submit(task),
            Inbound::Command(Command::Terminate(reply)) => self.begin_shutdown(reply),
            Inbound::Command(Command::Status(reply)) => {
                let _ = reply.send(self.status());
            }
            Inbound::Unit { unit, event } => self.on_unit_event(unit, event),
        }
    }

    // --- Initialization ---

    fn initialize(&mut self, waiter: Option<Waiter>) {
        if self.shutdown.is_requested() {
            if let Some(waiter) = waiter {
                let _ = waiter.send(Err(PoolError::Terminated));
            }
            return;
        }

        match &mut self.init {
            InitState::Ready => {
                if let Some(waiter) = waiter {
                    let _ = waiter.send(Ok(()));
                }
                return;
            }
            InitState::Pending(waiters) => {
                waiters.extend(waiter);
                return;
            }
            InitState::Uninitialized => {}
        }

        self.init = InitState::Pending(waiter.into_iter().collect());
        let missing = self.target_size.saturating_sub(self.units.len());
        crate::log_pool!(self.script, "initializing", spawning = missing);

        let mut spawn_failure = None;
        for _ in 0..missing {
            if let Err(err) = self.spawn_unit() {
                spawn_failure = Some(err);
            }
        }

        match spawn_failure {
            Some(err) => self.fail_initialization(err.to_string()),
            None => self.check_initialized(),
        }
    }

    /// Settle a pending round once every live unit has handshaken.
    fn check_initialized(&mut self) {
        if !matches!(self.init, InitState::Pending(_)) {
            return;
        }
        if self.units.is_empty() || !self.units.iter().all(WorkerUnit::is_ready) {
            return;
        }

        if let InitState::Pending(waiters) = mem::replace(&mut self.init, InitState::Ready) {
            crate::log_pool!(self.script, "initialized", units = self.units.len());
            for waiter in waiters {
                let _ = waiter.send(Ok(()));
            }
        }
    }

    /// Fail a pending round and return to `Uninitialized`.
    fn fail_initialization(&mut self, reason: String) {
        if !matches!(self.init, InitState::Pending(_)) {
            return;
        }
        let InitState::Pending(waiters) = mem::replace(&mut self.init, InitState::Uninitialized) else {
            return;
        };

        let error = PoolError::Initialization(reason);
        self.report(&error, Operation::Initialize, self.context());
        for waiter in waiters {
            let _ = waiter.send(Err(error.clone()));
        }
    }

    fn spawn_unit(&mut self) -> Result<UnitId, PoolError> {
        let id = UnitId(self.next_unit_id);
        self.next_unit_id += 1;

        match self.spawner.spawn(id) {
            Ok(unit) => {
                self.units.push(unit);
                Ok(id)
            }
            Err(err) => {
                let error = PoolError::Spawn(format!("{id}: {err}"));
                self.report(&error, Operation::Spawn, self.context().with_unit(id));
                Err(error)
            }
        }
    }

    // --- Submission and Dispatch ---

    fn submit(&mut self, mut task: Task) {
        if self.shutdown.is_requested() {
            task.reject(TaskError::Terminated);
            return;
        }

        crate::log_task!(task.id(), "queued", queued = self.queue.len() + 1);
        self.queue.push(task);

        if matches!(self.init, InitState::Uninitialized) {
            self.initialize(None);
        }
        if self.units.is_empty() {
            self.reject_stranded("no live workers");
            return;
        }
        self.dispatch();
    }

    /// Bind queued tasks to idle units, head first.
    fn dispatch(&mut self) {
        if self.shutdown.is_requested() {
            return;
        }

        while !self.queue.is_empty() {
            let Some(index) = self.units.iter().position(WorkerUnit::is_idle) else {
                break;
            };
            let Some(task) = self.queue.pop() else {
                break;
            };
            // A failed bind marks the unit lost, so the next scan skips it.
            if let Err(task) = self.units[index].bind(task) {
                crate::log_unit!(self.units[index].id(), "lost", task = %task.id());
                self.queue.push_front(task);
            }
        }
    }

    /// Reject every queued task when no unit is left to run them.
    fn reject_stranded(&mut self, reason: &str) {
        if !self.units.is_empty() || self.queue.is_empty() {
            return;
        }
        tracing::warn!(script = %self.script, queued = self.queue.len(), reason, "rejecting queued tasks");
        let error = TaskError::UnitFault(reason.to_string());
        let mut rejected = 0;
        for mut task in self.queue.drain() {
            task.reject(error.clone());
            rejected += 1;
        }
        self.gauges.failed_tasks.fetch_add(rejected, Ordering::AcqRel);
    }

    // --- Unit Events ---

    fn on_unit_event(&mut self, unit_id: UnitId, event: UnitEvent) {
        let Some(index) = self.units.iter().position(|u| u.id() == unit_id) else {
            crate::log_unit!(unit_id, "event from retired unit ignored", detail = ?event);
            return;
        };

        match event {
            UnitEvent::Message(WorkerMessage::Initialized) => {
                if self.units[index].mark_ready() {
                    self.check_initialized();
                    self.dispatch();
                }
            }
            UnitEvent::Message(WorkerMessage::TaskComplete { task_id, result }) => {
                match self.units[index].finish(task_id) {
                    Some(mut task) => {
                        task.resolve(result);
                        self.gauges.completed_tasks.fetch_add(1, Ordering::AcqRel);
                    }
                    None => unexpected_outcome(unit_id, task_id),
                }
                self.dispatch();
            }
            UnitEvent::Message(WorkerMessage::TaskError { task_id, error }) => {
                match self.units[index].finish(task_id) {
                    Some(mut task) => {
                        let error = TaskError::Failed(error);
                        self.report(&error, Operation::Task, self.context().with_unit(unit_id).with_task(task_id));
                        task.reject(error);
                        self.gauges.failed_tasks.fetch_add(1, Ordering::AcqRel);
                    }
                    None => unexpected_outcome(unit_id, task_id),
                }
                self.dispatch();
            }
            UnitEvent::Fault(fault) => self.on_unit_crashed(index, fault),
            UnitEvent::Exit(code) => {
                crate::log_unit!(unit_id, "exited", code, state = ?self.units[index].state());
                if self.units[index].is_terminating() && code == EXIT_OK {
                    self.on_unit_terminated(index);
                } else {
                    self.on_unit_crashed(index, format!("exited unexpectedly with code {code}"));
                }
            }
        }
    }

    fn on_unit_terminated(&mut self, index: usize) {
        let mut unit = self.units.remove(index);
        crate::log_unit!(unit.id(), "terminated");
        if let Some(mut task) = unit.take_task() {
            task.reject(TaskError::UnitFault("exited before reporting a result".to_string()));
            self.gauges.failed_tasks.fetch_add(1, Ordering::AcqRel);
        }
        self.retire(unit);
    }

    /// Remove a failed unit, settle its task and restore the pool size.
    fn on_unit_crashed(&mut self, index: usize, fault: String) {
        let mut unit = self.units.remove(index);
        let unit_id = unit.id();
        let handshaken = unit.is_ready();
        let error = TaskError::UnitFault(format!("{unit_id} {fault}"));

        let mut context = self.context().with_unit(unit_id);
        if let Some(task) = unit.take_task() {
            context = context.with_task(task.id());
            self.reject_bound(task, error.clone());
        }
        self.report(&error, Operation::Unit, context);
        self.retire(unit);

        if !handshaken {
            // Startup failures are not retried here; the next initialize()
            // or submit() tops the pool back up.
            self.fail_initialization(format!("{unit_id} {fault}"));
        } else if !self.shutdown.is_requested() {
            if let Ok(replacement) = self.spawn_unit() {
                self.gauges.replaced_units.fetch_add(1, Ordering::AcqRel);
                crate::log_unit!(replacement, "replacement", replaces = %unit_id);
            }
        }
        self.mark_short_handed();

        self.reject_stranded(&fault);
        self.dispatch();
    }

    /// A ready pool below its target size goes back to `Uninitialized`.
    fn mark_short_handed(&mut self) {
        if self.shutdown.is_requested() || self.units.len() >= self.target_size {
            return;
        }
        if matches!(self.init, InitState::Ready) {
            crate::log_pool!(self.script, "below target size", units = self.units.len());
            self.init = InitState::Uninitialized;
        }
    }

    pub(super) fn reject_bound(&mut self, mut task: Task, error: TaskError) {
        task.reject(error);
        self.gauges.failed_tasks.fetch_add(1, Ordering::AcqRel);
    }

    /// Hand a removed unit's thread to the cleanup set to be joined.
    fn retire(&mut self, mut unit: WorkerUnit) {
        let id = unit.id();
        if let Some(handle) = unit.take_thread() {
            self.cleanup.spawn_blocking(move || (id, handle.join()));
        }
    }

    fn on_reaped(&mut self, joined: Result<(UnitId, thread::Result<()>), JoinError>) {
        match joined {
            Ok((unit, Ok(()))) => {
                crate::log_unit!(unit, "reaped");
            }
            Ok((unit, Err(payload))) => {
                crate::log_unit!(unit, "reaped", panic = %panic_message(payload.as_ref()));
            }
            Err(err) => {
                let error = reaping_error(err);
                self.report(&error, Operation::Unit, self.context());
            }
        }
    }

    // --- Introspection ---

    fn status(&self) -> PoolStatus {
        PoolStatus {
            pool_size: self.target_size,
            live_units: self.units.len(),
            idle_units: self.units.iter().filter(|u| u.is_idle()).count(),
            busy_units: self.units.iter().filter(|u| u.is_busy()).count(),
            queued_tasks: self.queue.len(),
            retiring_units: self.cleanup.len(),
            initialized: matches!(self.init, InitState::Ready),
            shutting_down: self.shutdown.is_requested(),
            completed_tasks: self.gauges.completed_tasks.load(Ordering::Acquire),
            failed_tasks: self.gauges.failed_tasks.load(Ordering::Acquire),
            replaced_units: self.gauges.replaced_units.load(Ordering::Acquire),
        }
    }

    fn publish(&self) {
        self.gauges.live_units.store(self.units.len(), Ordering::Release);
        self.gauges.queued_tasks.store(self.queue.len(), Ordering::Release);
    }

    pub(super) fn context(&self) -> ErrorContext {
        ErrorContext::for_pool(self.pool_id, self.script.as_ref())
    }

    pub(super) fn report(&self, error: &(dyn std::error::Error + Send + Sync + 'static), operation: Operation, context: ErrorContext) {
        self.reporter.report(error, operation, &context);
    }
}

/// A cleanup task that failed to join its unit thread.
fn reaping_error(err: JoinError) -> PoolError {
    PoolError::from(anyhow::Error::new(err).context("joining retired unit"))
}

fn unexpected_outcome(unit: UnitId, task: TaskId) {
    tracing::warn!(unit = %unit, task = %task, "outcome for a task not bound to this unit");
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
