use std::any::Any;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::TaskError;

// Type aliases for common types
pub type Payload = serde_json::Value;
pub type Transferable = Box<dyn Any + Send>;
pub type TaskResult = Result<Payload, TaskError>;

/// Identity of a submitted task, unique within one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Identity of a worker unit. Replacements always receive a fresh id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitId(pub u64);

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit-{}", self.0)
    }
}
