//! Execution context handed to handlers.

use std::sync::Arc;

use crate::domain::TaskId;
use crate::registry::TaskRegistry;
use crate::storage::TaskStorage;

/// What a handler may touch while running: its own id, a progress reporter,
/// and the shared task storage. Deliberately no registry mutation beyond
/// progress — terminal outcomes go through the worker's report, exactly once.
#[derive(Clone)]
pub struct TaskContext {
    task_id: TaskId,
    registry: Arc<TaskRegistry>,
    storage: TaskStorage,
}

impl TaskContext {
    pub fn new(task_id: TaskId, registry: Arc<TaskRegistry>, storage: TaskStorage) -> Self {
        Self {
            task_id,
            registry,
            storage,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Heartbeat a progress fraction in [0, 1]. Regressions are ignored.
    pub fn report_progress(&self, progress: f64) {
        self.registry.update_progress(self.task_id, progress);
    }

    pub fn storage(&self) -> &TaskStorage {
        &self.storage
    }
}
