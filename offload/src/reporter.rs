use std::error::Error;

use offload_api::reporter::{ErrorContext, ErrorReporter, Operation};

/// Default sink: every report becomes a `tracing` error event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, error: &(dyn Error + Send + Sync + 'static), operation: Operation, context: &ErrorContext) {
        crate::log_error!(
            error,
            operation = operation.as_str(),
            pool_id = ?context.pool_id,
            script = ?context.script,
            unit_id = ?context.unit_id,
            task_id = ?context.task_id
        );
    }
}
