//! Error taxonomy.
//!
//! Synchronous submission errors fail the call directly; everything that
//! happens after submission is observable only through `get_status` /
//! `await_completion`, never thrown back into an unrelated call.

use thiserror::Error;

use super::ids::TaskId;
use super::name::TaskName;
use super::state::TaskState;

#[derive(Debug, Error)]
pub enum PrismError {
    /// Unknown handler at submission. Rejected synchronously, never enqueued.
    #[error("no handler registered for task name '{0}'")]
    InvalidTaskName(TaskName),

    /// The payload does not decode as the handler's declared input type.
    #[error("invalid payload for task '{name}': {reason}")]
    InvalidPayload { name: TaskName, reason: String },

    /// The router has no static rule for this task name.
    #[error("no queue route for task name '{0}'")]
    UnroutableTask(TaskName),

    /// Unknown or already-cleaned-up task id.
    #[error("task {0} not found")]
    NotFound(TaskId),

    /// A state transition the machine does not admit. Mostly an internal
    /// guard (stale worker reports race the sweeper and lose).
    #[error("task {id}: transition {from} -> {to} not admitted")]
    InvalidTransition {
        id: TaskId,
        from: TaskState,
        to: TaskState,
    },

    /// A group submission named a parent that is already terminal.
    #[error("task {0} is already terminal, cannot attach a subtask group")]
    ParentTerminal(TaskId),

    /// A group that is already coordinating for this parent.
    #[error("task {0} already has an active subtask group")]
    GroupActive(TaskId),

    /// Queue backend refused the message.
    #[error("queue backend error: {0}")]
    Broker(String),

    /// Shared storage I/O failure (cleanup, task files).
    #[error("task storage error: {0}")]
    Storage(#[from] std::io::Error),
}

/// Worker-reported execution failure.
///
/// `retryable` decides the path: transient failures are re-delivered with
/// backoff until retries run out, terminal ones go straight to `FAILURE`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TaskError {
    pub message: String,
    pub retryable: bool,
}

impl TaskError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn terminal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.message.fmt(f)
    }
}
