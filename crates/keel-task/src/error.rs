//! Error types for the task scheduler.

use thiserror::Error;

use crate::TaskId;

/// Errors that can occur when creating, wiring or dispatching tasks.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// Every task slot is in flight.
    #[error("task slots exhausted: {capacity} tasks in flight")]
    SlotsExhausted { capacity: usize },

    /// The task id does not name a live task (never created, or already completed).
    #[error("unknown task: {0:?}")]
    UnknownTask(TaskId),

    /// The task was already dispatched.
    #[error("task already dispatched: {0:?}")]
    AlreadyDispatched(TaskId),

    /// The task is executing or has executed.
    #[error("task already executing: {0:?}")]
    AlreadyExecuting(TaskId),
}

/// Result type for task operations.
pub type TaskResult<T> = Result<T, TaskError>;
