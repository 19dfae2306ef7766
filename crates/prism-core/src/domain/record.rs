//! Task record: the registry's single source of truth for one task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::{PrismError, TaskError};
use super::ids::TaskId;
use super::name::{QueueName, TaskName};
use super::state::TaskState;

/// Everything the orchestrator knows about one task.
///
/// Design:
/// - All state transitions happen through the `mark_*` methods below, which
///   enforce the state machine. Callers that race (a worker's completion
///   report vs. the timeout sweep) get `InvalidTransition` and must drop
///   their update.
/// - `queue` is resolved once at submission (or dynamic-routing) time and
///   never mutated afterwards.
/// - Exactly one of `result` / `error` is populated once the task is
///   terminal; both are empty before that.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub name: TaskName,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub parent_id: Option<TaskId>,
    pub queue: QueueName,

    pub state: TaskState,

    /// Worker-reported progress in [0, 1], monotonically increasing.
    pub progress: f64,

    pub submitted_at: DateTime<Utc>,

    /// Start of the current admission wait. Equal to `submitted_at` for the
    /// first attempt, reset whenever a retry puts the task back in queue —
    /// the sweeper measures queue residency per admission, not execution
    /// time or backoff of earlier attempts.
    pub waiting_since: DateTime<Utc>,

    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    pub result: Option<serde_json::Value>,
    pub error: Option<TaskError>,

    /// Re-deliveries attempted so far.
    pub retry_count: u32,
    pub max_retries: u32,
}

impl TaskRecord {
    pub fn new(
        id: TaskId,
        name: TaskName,
        payload: serde_json::Value,
        priority: i32,
        parent_id: Option<TaskId>,
        queue: QueueName,
        max_retries: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            name,
            payload,
            priority,
            parent_id,
            queue,
            state: TaskState::Pending,
            progress: 0.0,
            submitted_at: now,
            waiting_since: now,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            retry_count: 0,
            max_retries,
        }
    }

    fn transition(&mut self, next: TaskState) -> Result<(), PrismError> {
        if !self.state.can_transition_to(next) {
            return Err(PrismError::InvalidTransition {
                id: self.id,
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// A worker dequeued the message.
    pub fn mark_received(&mut self) -> Result<(), PrismError> {
        self.transition(TaskState::Received)
    }

    /// Execution begins.
    pub fn mark_started(&mut self) -> Result<(), PrismError> {
        self.transition(TaskState::Started)?;
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        Ok(())
    }

    pub fn mark_success(&mut self, result: serde_json::Value) -> Result<(), PrismError> {
        self.transition(TaskState::Success)?;
        self.result = Some(result);
        // Drop any error kept from an earlier retried attempt.
        self.error = None;
        self.progress = 1.0;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn mark_failure(&mut self, error: TaskError) -> Result<(), PrismError> {
        self.transition(TaskState::Failure)?;
        self.error = Some(error);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn mark_timeout(&mut self, error: TaskError) -> Result<(), PrismError> {
        self.transition(TaskState::Timeout)?;
        self.error = Some(error);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn mark_revoked(&mut self) -> Result<(), PrismError> {
        self.transition(TaskState::Revoked)?;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Put the task back in line after a transient failure.
    ///
    /// Each re-admission restarts the queue-residency clock: earlier
    /// attempts' execution time and backoff never count against the
    /// admission deadline. `submitted_at` stays at first submission.
    pub fn readmit_for_retry(&mut self, error: TaskError) -> Result<(), PrismError> {
        self.transition(TaskState::Pending)?;
        self.retry_count += 1;
        self.waiting_since = Utc::now();
        // Keep the last error around for observability; cleared on success.
        self.error = Some(error);
        Ok(())
    }

    /// Clamp progress to [0, 1] and never let it go backwards.
    pub fn update_progress(&mut self, progress: f64) {
        let p = progress.clamp(0.0, 1.0);
        if p > self.progress {
            self.progress = p;
        }
    }

    /// Time spent waiting in the current admission (queue-residency clock).
    pub fn waited(&self) -> chrono::Duration {
        Utc::now() - self.waiting_since
    }

    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}
