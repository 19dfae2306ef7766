//! Read-only status projection served to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::TaskError;
use super::ids::TaskId;
use super::name::{QueueName, TaskName};
use super::record::TaskRecord;
use super::state::TaskState;

/// Snapshot of one task for polling clients. Never exposes the mutable
/// record itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatus {
    pub task_id: TaskId,
    pub name: TaskName,
    pub state: TaskState,
    pub queue: QueueName,
    pub progress: f64,
    pub result: Option<serde_json::Value>,
    pub error: Option<TaskError>,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,

    /// Children spawned under this task, in submission order.
    #[serde(default)]
    pub subtasks: Vec<TaskId>,
}

impl TaskStatus {
    pub fn from_record(record: &TaskRecord, subtasks: Vec<TaskId>) -> Self {
        Self {
            task_id: record.id,
            name: record.name.clone(),
            state: record.state,
            queue: record.queue.clone(),
            progress: record.progress,
            result: record.result.clone(),
            error: record.error.clone(),
            submitted_at: record.submitted_at,
            started_at: record.started_at,
            completed_at: record.completed_at,
            retry_count: record.retry_count,
            subtasks,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
