//! Shutdown coordination for the supervisor.
//!
//! Order of a graceful shutdown:
//! 1. The shutting-down flag is raised, so new submissions are rejected.
//! 2. Queued tasks and pending `initialize()` calls are rejected.
//! 3. Every unit is asked to terminate after its current task.
//! 4. Waiters are released once every unit has exited and been joined.
//!
//! With a shutdown timeout, step 4 is replaced on expiry by rejecting the
//! tasks still bound, detaching the remaining threads and reporting
//! `ShutdownTimeout`.

use std::mem;
use std::sync::atomic::Ordering;
use std::time::Duration;

use offload_api::errors::{PoolError, TaskError};
use offload_api::reporter::Operation;
use tokio::time::Instant;

use super::supervisor::{InitState, Supervisor, Waiter};

#[derive(Debug, Default)]
pub(super) struct ShutdownState {
    requested: bool,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    waiters: Vec<Waiter>,
}

impl ShutdownState {
    pub(super) fn new(timeout: Option<Duration>) -> Self {
        Self { timeout, ..Default::default() }
    }

    pub(super) fn is_requested(&self) -> bool {
        self.requested
    }

    pub(super) fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

impl Supervisor {
    /// Start shutting down. Repeated calls only add waiters.
    pub(super) fn begin_shutdown(&mut self, waiter: Option<Waiter>) {
        self.shutdown.waiters.extend(waiter);
        if self.shutdown.requested {
            return;
        }

        self.shutdown.requested = true;
        self.gauges.shutting_down.store(true, Ordering::Release);
        crate::log_pool!(
            self.script,
            "shutting down",
            units = self.units.len(),
            queued = self.queue.len()
        );

        let mut rejected = 0;
        for mut task in self.queue.drain() {
            task.reject(TaskError::Terminated);
            rejected += 1;
        }
        self.gauges.failed_tasks.fetch_add(rejected, Ordering::AcqRel);

        if let InitState::Pending(waiters) = mem::replace(&mut self.init, InitState::Uninitialized) {
            for waiter in waiters {
                let _ = waiter.send(Err(PoolError::Terminated));
            }
        }

        for unit in &mut self.units {
            unit.request_terminate();
        }

        self.shutdown.deadline = self.shutdown.timeout.map(|timeout| Instant::now() + timeout);
    }

    pub(super) fn shutdown_complete(&self) -> bool {
        self.shutdown.requested && self.units.is_empty() && self.cleanup.is_empty()
    }

    pub(super) fn finish_shutdown(&mut self) {
        crate::log_pool!(self.script, "terminated");
        for waiter in self.shutdown.waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
    }

    /// Grace period expired: abandon whatever is still running.
    pub(super) fn force_shutdown(&mut self) {
        self.shutdown.deadline = None;
        let remaining = self.units.len();
        let error = PoolError::ShutdownTimeout { remaining };
        self.report(&error, Operation::Terminate, self.context());

        for mut unit in mem::take(&mut self.units) {
            if let Some(task) = unit.take_task() {
                self.reject_bound(task, TaskError::Terminated);
            }
            // Dropping the handle detaches the thread.
            drop(unit.take_thread());
        }
        self.cleanup.detach_all();

        for waiter in self.shutdown.waiters.drain(..) {
            let _ = waiter.send(Err(error.clone()));
        }
    }
}
