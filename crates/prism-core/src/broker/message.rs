//! Wire message between the manager and the workers.

use serde::{Deserialize, Serialize};

use crate::domain::{TaskId, TaskName};

/// What travels through a queue. The registry record is the source of truth;
/// the message carries just enough for a worker to claim and execute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMessage {
    task_id: TaskId,
    name: TaskName,
    payload: serde_json::Value,
}

impl TaskMessage {
    pub fn new(task_id: TaskId, name: TaskName, payload: serde_json::Value) -> Self {
        Self {
            task_id,
            name,
            payload,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn name(&self) -> &TaskName {
        &self.name
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }
}
