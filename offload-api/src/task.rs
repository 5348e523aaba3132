//! Asynchronous result handles returned by task submission.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::FutureExt;
use tokio::sync::oneshot;

use crate::errors::TaskError;
use crate::types::{TaskId, TaskResult};

/// Caller-side handle to a submitted task.
///
/// Settles exactly once, with the script's result or a [`TaskError`].
/// Awaiting it never blocks the submitting thread.
#[derive(Debug)]
pub struct TaskHandle {
    id: TaskId,
    rx: oneshot::Receiver<TaskResult>,
}

impl TaskHandle {
    pub fn new(id: TaskId, rx: oneshot::Receiver<TaskResult>) -> Self {
        Self { id, rx }
    }

    /// A handle that is already rejected.
    pub fn rejected(id: TaskId, error: TaskError) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(error));
        Self { id, rx }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Non-blocking check for a settled result.
    ///
    /// Returns `None` while the task is still pending.
    pub fn try_result(&mut self) -> Option<TaskResult> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(TaskError::Terminated)),
        }
    }
}

impl Future for TaskHandle {
    type Output = TaskResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // A dropped sender means the pool went away without settling the task.
        self.rx
            .poll_unpin(cx)
            .map(|received| received.unwrap_or(Err(TaskError::Terminated)))
    }
}
