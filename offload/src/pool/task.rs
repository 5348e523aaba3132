use std::fmt;
use std::time::Instant;

use offload_api::errors::TaskError;
use offload_api::task::TaskHandle;
use offload_api::types::{Payload, TaskId, TaskResult, Transferable};
use tokio::sync::oneshot;

/// A unit of work owned by the supervisor until it is settled.
///
/// Input and transferables are moved out on dispatch; the reply side stays
/// with the task so it can be settled exactly once.
pub(crate) struct Task {
    id: TaskId,
    input: Option<(Payload, Vec<Transferable>)>,
    reply: Option<oneshot::Sender<TaskResult>>,
    submitted_at: Instant,
}

impl Task {
    pub(crate) fn new(id: TaskId, payload: Payload, transfer: Vec<Transferable>) -> (Self, TaskHandle) {
        let (tx, rx) = oneshot::channel();
        let task = Self {
            id,
            input: Some((payload, transfer)),
            reply: Some(tx),
            submitted_at: Instant::now(),
        };
        (task, TaskHandle::new(id, rx))
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    /// Move the input out for an execute instruction.
    pub(crate) fn take_input(&mut self) -> Option<(Payload, Vec<Transferable>)> {
        self.input.take()
    }

    /// Put the input back after a dispatch that never reached the unit.
    pub(crate) fn restore_input(&mut self, payload: Payload, transfer: Vec<Transferable>) {
        self.input = Some((payload, transfer));
    }

    pub(crate) fn resolve(&mut self, result: Payload) {
        self.settle(Ok(result));
    }

    pub(crate) fn reject(&mut self, error: TaskError) {
        self.settle(Err(error));
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.reply.is_none()
    }

    fn settle(&mut self, outcome: TaskResult) {
        match self.reply.take() {
            Some(tx) => {
                let status = if outcome.is_ok() { "resolved" } else { "rejected" };
                crate::log_task!(
                    self.id,
                    status,
                    elapsed_ms = self.submitted_at.elapsed().as_millis() as u64
                );
                // The caller may have dropped its handle; nothing to do then.
                let _ = tx.send(outcome);
            }
            None => {
                tracing::warn!(task = %self.id, "ignoring second settlement of task");
            }
        }
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        if let Some(tx) = self.reply.take() {
            let _ = tx.send(Err(TaskError::Terminated));
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("dispatched", &self.input.is_none())
            .field("settled", &self.is_settled())
            .finish()
    }
}
