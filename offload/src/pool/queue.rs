use std::collections::VecDeque;
use std::fmt;

use super::task::Task;

/// FIFO of tasks waiting for an idle unit.
///
/// Owned by the supervisor alone, so no synchronization is needed. Assignment
/// order is submission order; a task leaves the queue the moment it is bound.
#[derive(Default)]
pub(crate) struct TaskQueue {
    tasks: VecDeque<Task>,
}

impl TaskQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append to the tail.
    pub(crate) fn push(&mut self, task: Task) {
        self.tasks.push_back(task);
    }

    /// Return a task to the head after a dispatch that did not go through.
    pub(crate) fn push_front(&mut self, task: Task) {
        self.tasks.push_front(task);
    }

    /// Remove from the head.
    pub(crate) fn pop(&mut self) -> Option<Task> {
        self.tasks.pop_front()
    }

    /// Remove every queued task, oldest first.
    pub(crate) fn drain(&mut self) -> impl Iterator<Item = Task> + '_ {
        self.tasks.drain(..)
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("len", &self.tasks.len())
            .field("head", &self.tasks.front().map(|t| t.id()))
            .finish()
    }
}
