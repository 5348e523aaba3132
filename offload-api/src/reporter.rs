//! # Error Reporting Sink
//!
//! Pools forward every validation failure, task failure, unit crash and
//! unexpected internal error to an injected [`ErrorReporter`]. The sink is a
//! collaborator only: reporting never changes how the pool reacts.

use std::error::Error;
use std::fmt;

use serde::Serialize;
use uuid::Uuid;

use crate::types::{TaskId, UnitId};

/// Operation label attached to every report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    /// Building and validating a pool
    Construct,
    /// Startup handshake of the initial units
    Initialize,
    /// A task reported `task-error`
    Task,
    /// A unit crashed or exited abnormally
    Unit,
    /// A unit thread could not be created
    Spawn,
    /// Shutdown
    Terminate,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Construct => "construct",
            Operation::Initialize => "initialize",
            Operation::Task => "task",
            Operation::Unit => "unit",
            Operation::Spawn => "spawn",
            Operation::Terminate => "terminate",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contextual metadata attached to a report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ErrorContext {
    pub pool_id: Option<Uuid>,
    pub script: Option<String>,
    pub unit_id: Option<UnitId>,
    pub task_id: Option<TaskId>,
}

impl ErrorContext {
    pub fn for_pool(pool_id: Uuid, script: impl Into<String>) -> Self {
        Self {
            pool_id: Some(pool_id),
            script: Some(script.into()),
            ..Default::default()
        }
    }

    pub fn with_unit(mut self, unit_id: UnitId) -> Self {
        self.unit_id = Some(unit_id);
        self
    }

    pub fn with_task(mut self, task_id: TaskId) -> Self {
        self.task_id = Some(task_id);
        self
    }
}

/// Sink receiving (fault, operation, context) for every reportable failure.
pub trait ErrorReporter: Send + Sync + fmt::Debug {
    fn report(&self, error: &(dyn Error + Send + Sync + 'static), operation: Operation, context: &ErrorContext);
}

/// Reporter that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl ErrorReporter for NoopReporter {
    fn report(&self, _error: &(dyn Error + Send + Sync + 'static), _operation: Operation, _context: &ErrorContext) {}
}
