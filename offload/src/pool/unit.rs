//! # Worker Units
//!
//! A worker unit wraps one dedicated OS thread running the pool's entry
//! script. The supervisor talks to it through a command channel and hears
//! back through the shared supervisor inbox.
//!
//! ## Lifecycle
//!
//! ```text
//! Spawning -> AwaitingHandshake -> Idle <-> Busy
//!                                   |        |
//!                                   +--------+--> (fault / exit) removed, replaced
//!                                   +--------+--> Terminating -> (exit) removed
//! ```
//!
//! ## Fault Isolation
//!
//! - `execute` returning `Err` is reported as `task-error`; the unit stays healthy
//! - A panic in `init` or `execute` is caught on the unit thread, reported as a
//!   fault, and the thread exits with code 1
//! - Every thread posts an exit notice with its exit code when it ends,
//!   even if it unwinds past the catch

use std::any::Any;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use offload_api::message::{WorkerCommand, WorkerMessage};
use offload_api::script::{UnitContext, WorkerScript};
use offload_api::types::{TaskId, UnitId};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::task::Task;
use super::{Inbound, UnitEvent};

pub(crate) const EXIT_OK: i32 = 0;
pub(crate) const EXIT_FAULT: i32 = 1;
pub(crate) const EXIT_UNWOUND: i32 = 101;

/// Observable state of a unit while it is in the live collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    /// Thread is being created
    Spawning,
    /// Thread running, startup handshake not yet received
    AwaitingHandshake,
    /// Ready and unbound
    Idle,
    /// Ready with a bound task
    Busy,
    /// Asked to exit after its current task, if any
    Terminating,
    /// Command channel closed; waiting for the exit notice
    Lost,
}

/// Supervisor-side record of one unit.
pub(crate) struct WorkerUnit {
    id: UnitId,
    state: UnitState,
    handshaken: bool,
    task: Option<Task>,
    commands: flume::Sender<WorkerCommand>,
    thread: Option<JoinHandle<()>>,
    spawned_at: Instant,
}

impl WorkerUnit {
    pub(crate) fn id(&self) -> UnitId {
        self.id
    }

    pub(crate) fn state(&self) -> UnitState {
        self.state
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.state == UnitState::Idle
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.task.is_some()
    }

    /// Whether the startup handshake was ever received.
    pub(crate) fn is_ready(&self) -> bool {
        self.handshaken
    }

    pub(crate) fn is_terminating(&self) -> bool {
        self.state == UnitState::Terminating
    }

    /// Record the handshake. `AwaitingHandshake -> Idle`; returns whether
    /// the unit became eligible for dispatch.
    pub(crate) fn mark_ready(&mut self) -> bool {
        if self.handshaken {
            return false;
        }
        self.handshaken = true;
        crate::log_unit!(self.id, "ready", startup_ms = self.spawned_at.elapsed().as_millis() as u64);
        if self.state == UnitState::AwaitingHandshake {
            self.state = UnitState::Idle;
            true
        } else {
            false
        }
    }

    /// `Idle -> Busy`: bind `task` and send the execute instruction.
    ///
    /// Hands the task back when the unit can no longer receive commands.
    pub(crate) fn bind(&mut self, mut task: Task) -> Result<(), Task> {
        debug_assert!(self.is_idle(), "binding a task to a unit that is not idle");
        let Some((payload, transfer)) = task.take_input() else {
            tracing::warn!(unit = %self.id, task = %task.id(), "task was already dispatched");
            self.state = UnitState::Lost;
            return Err(task);
        };

        let task_id = task.id();
        match self.commands.send(WorkerCommand::Execute { task_id, payload, transfer }) {
            Ok(()) => {
                crate::log_task!(task_id, "dispatched", unit = %self.id);
                self.task = Some(task);
                self.state = UnitState::Busy;
                Ok(())
            }
            Err(flume::SendError(command)) => {
                if let WorkerCommand::Execute { payload, transfer, .. } = command {
                    task.restore_input(payload, transfer);
                }
                self.state = UnitState::Lost;
                Err(task)
            }
        }
    }

    /// Unbind the task reported as finished.
    ///
    /// `Busy -> Idle`, except that a terminating unit stays terminating.
    pub(crate) fn finish(&mut self, task_id: TaskId) -> Option<Task> {
        match &self.task {
            Some(task) if task.id() == task_id => {}
            _ => return None,
        }
        if self.state == UnitState::Busy {
            self.state = UnitState::Idle;
        }
        self.task.take()
    }

    pub(crate) fn take_task(&mut self) -> Option<Task> {
        if self.state == UnitState::Busy {
            self.state = UnitState::Idle;
        }
        self.task.take()
    }

    /// Ask the thread to exit once its current task, if any, is done.
    pub(crate) fn request_terminate(&mut self) {
        if self.commands.send(WorkerCommand::Terminate).is_err() {
            self.state = UnitState::Lost;
            return;
        }
        self.state = UnitState::Terminating;
    }

    pub(crate) fn take_thread(&mut self) -> Option<JoinHandle<()>> {
        self.thread.take()
    }
}

impl fmt::Debug for WorkerUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerUnit")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("handshaken", &self.handshaken)
            .field("task", &self.task.as_ref().map(|t| t.id()))
            .field("has_thread", &self.thread.is_some())
            .finish()
    }
}

/// Everything needed to start unit threads for one pool.
#[derive(Clone)]
pub(crate) struct UnitSpawner {
    pub(crate) pool_id: Uuid,
    pub(crate) script_name: Arc<str>,
    pub(crate) script: Arc<dyn WorkerScript>,
    pub(crate) events: mpsc::UnboundedSender<Inbound>,
    pub(crate) thread_name_prefix: String,
    pub(crate) stack_size: Option<usize>,
    pub(crate) dispatch: tracing::Dispatch,
}

impl UnitSpawner {
    /// Start a unit thread. The unit begins in `AwaitingHandshake`.
    pub(crate) fn spawn(&self, id: UnitId) -> io::Result<WorkerUnit> {
        let (command_tx, command_rx) = flume::unbounded();
        let mut unit = WorkerUnit {
            id,
            state: UnitState::Spawning,
            handshaken: false,
            task: None,
            commands: command_tx,
            thread: None,
            spawned_at: Instant::now(),
        };

        let ctx = UnitContext {
            pool_id: self.pool_id,
            unit_id: id,
            script: Arc::clone(&self.script_name),
        };
        let script = Arc::clone(&self.script);
        let events = self.events.clone();
        let dispatch = self.dispatch.clone();

        let mut builder = thread::Builder::new().name(format!("{}{}-{}", self.thread_name_prefix, self.script_name, id.0));
        if let Some(stack_size) = self.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let handle = builder.spawn(move || {
            tracing::dispatcher::with_default(&dispatch, || unit_main(ctx, script, command_rx, events));
        })?;

        unit.thread = Some(handle);
        unit.state = UnitState::AwaitingHandshake;
        crate::log_unit!(id, "spawned");
        Ok(unit)
    }
}

/// Posts the exit notice when the unit thread ends, however it ends.
struct ExitNotice {
    unit: UnitId,
    code: i32,
    events: mpsc::UnboundedSender<Inbound>,
}

impl Drop for ExitNotice {
    fn drop(&mut self) {
        let code = if thread::panicking() { EXIT_UNWOUND } else { self.code };
        // The supervisor may already be gone after shutdown.
        let _ = self.events.send(Inbound::Unit { unit: self.unit, event: UnitEvent::Exit(code) });
    }
}

fn unit_main(
    ctx: UnitContext,
    script: Arc<dyn WorkerScript>,
    commands: flume::Receiver<WorkerCommand>,
    events: mpsc::UnboundedSender<Inbound>,
) {
    let unit = ctx.unit_id;
    let mut exit = ExitNotice { unit, code: EXIT_OK, events: events.clone() };
    let post = |event: UnitEvent| {
        let _ = events.send(Inbound::Unit { unit, event });
    };

    match panic::catch_unwind(AssertUnwindSafe(|| script.init(&ctx))) {
        Ok(Ok(())) => post(UnitEvent::Message(WorkerMessage::Initialized)),
        Ok(Err(err)) => {
            post(UnitEvent::Fault(format!("startup failed: {:#}", err)));
            exit.code = EXIT_FAULT;
            return;
        }
        Err(payload) => {
            post(UnitEvent::Fault(format!("panicked during startup: {}", panic_message(payload.as_ref()))));
            exit.code = EXIT_FAULT;
            return;
        }
    }

    // A closed channel means the supervisor is gone; exit quietly.
    while let Ok(command) = commands.recv() {
        match command {
            WorkerCommand::Execute { task_id, payload, transfer } => {
                match panic::catch_unwind(AssertUnwindSafe(|| script.execute(&ctx, payload, transfer))) {
                    Ok(Ok(result)) => post(UnitEvent::Message(WorkerMessage::TaskComplete { task_id, result })),
                    Ok(Err(err)) => post(UnitEvent::Message(WorkerMessage::TaskError {
                        task_id,
                        error: format!("{:#}", err),
                    })),
                    Err(payload) => {
                        post(UnitEvent::Fault(format!("panicked: {}", panic_message(payload.as_ref()))));
                        exit.code = EXIT_FAULT;
                        return;
                    }
                }
            }
            WorkerCommand::Terminate => break,
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
