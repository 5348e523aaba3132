//! # Control Protocol
//!
//! Discriminated messages exchanged between a supervisor and its units.
//!
//! | direction           | discriminant    | payload                         |
//! |---------------------|-----------------|---------------------------------|
//! | unit → supervisor   | `initialized`   | none                            |
//! | supervisor → unit   | `execute`       | task payload, transferables     |
//! | unit → supervisor   | `task-complete` | result payload                  |
//! | unit → supervisor   | `task-error`    | failure description             |
//!
//! Termination of a unit is requested with `terminate`, which is not part of
//! the task protocol and is only sent by shutdown.

use std::fmt;

use crate::types::{Payload, TaskId, Transferable};

/// Instruction sent from the supervisor to a unit.
pub enum WorkerCommand {
    /// Run one task on the unit.
    Execute {
        task_id: TaskId,
        payload: Payload,
        transfer: Vec<Transferable>,
    },
    /// Finish the current task, if any, then exit.
    Terminate,
}

impl WorkerCommand {
    /// Wire discriminant of this command.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerCommand::Execute { .. } => "execute",
            WorkerCommand::Terminate => "terminate",
        }
    }
}

impl fmt::Debug for WorkerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerCommand::Execute { task_id, payload, transfer } => f
                .debug_struct("Execute")
                .field("task_id", task_id)
                .field("payload", payload)
                .field("transfer", &transfer.len())
                .finish(),
            WorkerCommand::Terminate => f.write_str("Terminate"),
        }
    }
}

/// Message posted by a unit to its supervisor.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerMessage {
    /// Startup handshake completed.
    Initialized,
    /// The bound task finished with a result.
    TaskComplete { task_id: TaskId, result: Payload },
    /// The bound task failed; the unit itself is healthy.
    TaskError { task_id: TaskId, error: String },
}

impl WorkerMessage {
    /// Wire discriminant of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerMessage::Initialized => "initialized",
            WorkerMessage::TaskComplete { .. } => "task-complete",
            WorkerMessage::TaskError { .. } => "task-error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_discriminants() {
        let execute = WorkerCommand::Execute {
            task_id: TaskId(1),
            payload: json!({"n": 1}),
            transfer: vec![Box::new(vec![1u8, 2, 3])],
        };
        assert_eq!(execute.kind(), "execute");
        assert_eq!(WorkerCommand::Terminate.kind(), "terminate");
        assert_eq!(WorkerMessage::Initialized.kind(), "initialized");
        assert_eq!(
            WorkerMessage::TaskComplete { task_id: TaskId(1), result: json!(null) }.kind(),
            "task-complete"
        );
        assert_eq!(
            WorkerMessage::TaskError { task_id: TaskId(1), error: "boom".into() }.kind(),
            "task-error"
        );
    }

    #[test]
    fn test_execute_debug_hides_transferables() {
        let execute = WorkerCommand::Execute {
            task_id: TaskId(7),
            payload: json!(3),
            transfer: vec![Box::new(1u32), Box::new(2u32)],
        };
        let rendered = format!("{:?}", execute);
        assert!(rendered.contains("TaskId(7)"));
        assert!(rendered.contains("transfer: 2"));
    }
}
