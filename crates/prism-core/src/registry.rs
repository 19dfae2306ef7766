//! Task registry: the single source of truth for task records.
//!
//! Design:
//! - One DashMap entry per task; every mutation of a record happens under
//!   that entry's shard lock, so updates to one task are serialized without
//!   any global lock (a worker's completion report and a sweeper pass on the
//!   same task cannot interleave).
//! - Transitions go through the record's `mark_*` methods, which enforce the
//!   state machine; a caller holding a stale view simply gets
//!   `InvalidTransition` back.
//! - Locks are never held across an await point.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::domain::{PrismError, TaskId, TaskRecord, TaskState};

struct Slot {
    record: TaskRecord,
    done: Arc<Notify>,
}

/// Tasks per state, for logs and dashboards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateCounts {
    pub pending: usize,
    pub received: usize,
    pub started: usize,
    pub success: usize,
    pub failure: usize,
    pub timeout: usize,
    pub revoked: usize,
}

#[derive(Default)]
pub struct TaskRegistry {
    slots: DashMap<TaskId, Slot>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }

    /// Register a freshly submitted record.
    pub fn insert(&self, record: TaskRecord) {
        let id = record.id;
        self.slots.insert(
            id,
            Slot {
                record,
                done: Arc::new(Notify::new()),
            },
        );
    }

    /// Remove a record (cleanup). Waiters are woken and will observe
    /// `NotFound` on their next read.
    pub fn remove(&self, id: TaskId) -> Result<TaskRecord, PrismError> {
        let (_, slot) = self.slots.remove(&id).ok_or(PrismError::NotFound(id))?;
        slot.done.notify_waiters();
        Ok(slot.record)
    }

    /// Snapshot of one record.
    pub fn get(&self, id: TaskId) -> Result<TaskRecord, PrismError> {
        self.slots
            .get(&id)
            .map(|slot| slot.record.clone())
            .ok_or(PrismError::NotFound(id))
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.slots.contains_key(&id)
    }

    /// Apply a guarded mutation under the entry lock and return the updated
    /// snapshot. If the mutation drove the record into a terminal state,
    /// completion waiters are woken.
    pub fn update<F>(&self, id: TaskId, f: F) -> Result<TaskRecord, PrismError>
    where
        F: FnOnce(&mut TaskRecord) -> Result<(), PrismError>,
    {
        let (snapshot, done) = {
            let mut slot = self.slots.get_mut(&id).ok_or(PrismError::NotFound(id))?;
            f(&mut slot.record)?;
            (slot.record.clone(), Arc::clone(&slot.done))
        };
        if snapshot.state.is_terminal() {
            done.notify_waiters();
        }
        Ok(snapshot)
    }

    /// Monotonic progress update; ignored for unknown or terminal tasks.
    pub fn update_progress(&self, id: TaskId, progress: f64) {
        if let Some(mut slot) = self.slots.get_mut(&id) {
            if slot.record.state == TaskState::Started {
                slot.record.update_progress(progress);
            }
        }
    }

    /// Children that share `parent_id`, in submission (id) order.
    pub fn children_of(&self, parent_id: TaskId) -> Vec<TaskId> {
        let mut children: Vec<TaskId> = self
            .slots
            .iter()
            .filter(|entry| entry.record.parent_id == Some(parent_id))
            .map(|entry| entry.record.id)
            .collect();
        children.sort();
        children
    }

    /// Tasks still waiting (PENDING/RECEIVED) past `deadline` — the
    /// sweeper's scan.
    pub fn waiting_longer_than(&self, deadline: Duration) -> Vec<TaskId> {
        let deadline = chrono::Duration::from_std(deadline).unwrap_or(chrono::Duration::MAX);
        self.slots
            .iter()
            .filter(|entry| entry.record.state.is_waiting() && entry.record.waited() > deadline)
            .map(|entry| entry.record.id)
            .collect()
    }

    pub fn counts(&self) -> StateCounts {
        let mut counts = StateCounts::default();
        for entry in self.slots.iter() {
            match entry.record.state {
                TaskState::Pending => counts.pending += 1,
                TaskState::Received => counts.received += 1,
                TaskState::Started => counts.started += 1,
                TaskState::Success => counts.success += 1,
                TaskState::Failure => counts.failure += 1,
                TaskState::Timeout => counts.timeout += 1,
                TaskState::Revoked => counts.revoked += 1,
            }
        }
        counts
    }

    /// Block until the task reaches a terminal state or `timeout` elapses;
    /// either way the last known snapshot is returned. The caller's deadline
    /// never touches server-side task state.
    pub async fn await_terminal(
        &self,
        id: TaskId,
        timeout: Duration,
    ) -> Result<TaskRecord, PrismError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Arm before reading, so a transition between the read and the
            // await cannot be missed.
            let done = {
                let slot = self.slots.get(&id).ok_or(PrismError::NotFound(id))?;
                if slot.record.state.is_terminal() {
                    return Ok(slot.record.clone());
                }
                Arc::clone(&slot.done)
            };
            let notified = done.notified();
            tokio::pin!(notified);

            // Re-check: the transition may have happened before we armed.
            {
                let slot = self.slots.get(&id).ok_or(PrismError::NotFound(id))?;
                if slot.record.state.is_terminal() {
                    return Ok(slot.record.clone());
                }
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(deadline) => {
                    return self.get(id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{QueueName, TaskError, TaskName};

    fn record() -> TaskRecord {
        TaskRecord::new(
            TaskId::generate(),
            TaskName::new("download_image"),
            serde_json::json!({"image_url": "http://example/img.jpg"}),
            5,
            None,
            QueueName::new("io"),
            3,
        )
    }

    #[test]
    fn insert_get_remove() {
        let registry = TaskRegistry::new();
        let r = record();
        let id = r.id;
        registry.insert(r);

        assert_eq!(registry.get(id).unwrap().state, TaskState::Pending);
        registry.remove(id).unwrap();
        assert!(matches!(registry.get(id), Err(PrismError::NotFound(_))));
    }

    #[test]
    fn remove_twice_is_not_found() {
        let registry = TaskRegistry::new();
        let r = record();
        let id = r.id;
        registry.insert(r);

        registry.remove(id).unwrap();
        assert!(matches!(registry.remove(id), Err(PrismError::NotFound(_))));
    }

    #[test]
    fn update_applies_under_the_state_machine() {
        let registry = TaskRegistry::new();
        let r = record();
        let id = r.id;
        registry.insert(r);

        registry.update(id, |r| r.mark_received()).unwrap();
        registry.update(id, |r| r.mark_started()).unwrap();
        let snap = registry
            .update(id, |r| r.mark_success(serde_json::json!("done")))
            .unwrap();
        assert_eq!(snap.state, TaskState::Success);
    }

    #[test]
    fn losing_racer_gets_invalid_transition() {
        let registry = TaskRegistry::new();
        let r = record();
        let id = r.id;
        registry.insert(r);

        // Sweeper wins.
        registry
            .update(id, |r| r.mark_timeout(TaskError::terminal("waited 31s")))
            .unwrap();

        // The stale worker report loses and changes nothing.
        let err = registry.update(id, |r| r.mark_received()).unwrap_err();
        assert!(matches!(err, PrismError::InvalidTransition { .. }));
        assert_eq!(registry.get(id).unwrap().state, TaskState::Timeout);
    }

    #[test]
    fn waiting_scan_only_returns_overdue_waiting_tasks() {
        let registry = TaskRegistry::new();
        let waiting = record();
        let waiting_id = waiting.id;
        registry.insert(waiting);

        let started = record();
        let started_id = started.id;
        registry.insert(started);
        registry.update(started_id, |r| r.mark_received()).unwrap();
        registry.update(started_id, |r| r.mark_started()).unwrap();

        std::thread::sleep(Duration::from_millis(20));

        let overdue = registry.waiting_longer_than(Duration::from_millis(5));
        assert!(overdue.contains(&waiting_id));
        assert!(!overdue.contains(&started_id));

        assert!(registry.waiting_longer_than(Duration::from_secs(60)).is_empty());
    }

    #[test]
    fn children_are_listed_in_submission_order() {
        let registry = TaskRegistry::new();
        let parent = record();
        let parent_id = parent.id;
        registry.insert(parent);

        let mut first = record();
        first.parent_id = Some(parent_id);
        let first_id = first.id;
        registry.insert(first);

        std::thread::sleep(Duration::from_millis(2));
        let mut second = record();
        second.parent_id = Some(parent_id);
        let second_id = second.id;
        registry.insert(second);

        assert_eq!(registry.children_of(parent_id), vec![first_id, second_id]);
    }

    #[test]
    fn counts_bucket_every_state() {
        let registry = TaskRegistry::new();

        // Two pending, one started, one success, one failure, one revoked.
        registry.insert(record());
        registry.insert(record());

        let started = record();
        let started_id = started.id;
        registry.insert(started);
        registry.update(started_id, |r| r.mark_received()).unwrap();
        registry.update(started_id, |r| r.mark_started()).unwrap();

        let success = record();
        let success_id = success.id;
        registry.insert(success);
        registry.update(success_id, |r| r.mark_received()).unwrap();
        registry.update(success_id, |r| r.mark_started()).unwrap();
        registry
            .update(success_id, |r| r.mark_success(serde_json::json!(1)))
            .unwrap();

        let failure = record();
        let failure_id = failure.id;
        registry.insert(failure);
        registry.update(failure_id, |r| r.mark_received()).unwrap();
        registry.update(failure_id, |r| r.mark_started()).unwrap();
        registry
            .update(failure_id, |r| r.mark_failure(TaskError::terminal("boom")))
            .unwrap();

        let revoked = record();
        let revoked_id = revoked.id;
        registry.insert(revoked);
        registry.update(revoked_id, |r| r.mark_revoked()).unwrap();

        let counts = registry.counts();
        assert_eq!(counts.pending, 2);
        assert_eq!(counts.received, 0);
        assert_eq!(counts.started, 1);
        assert_eq!(counts.success, 1);
        assert_eq!(counts.failure, 1);
        assert_eq!(counts.timeout, 0);
        assert_eq!(counts.revoked, 1);
    }

    #[tokio::test]
    async fn await_terminal_returns_last_known_on_timeout() {
        let registry = TaskRegistry::new();
        let r = record();
        let id = r.id;
        registry.insert(r);

        let snap = registry
            .await_terminal(id, Duration::from_millis(30))
            .await
            .unwrap();
        assert_eq!(snap.state, TaskState::Pending);
    }

    #[tokio::test]
    async fn await_terminal_wakes_on_completion() {
        let registry = Arc::new(TaskRegistry::new());
        let r = record();
        let id = r.id;
        registry.insert(r);

        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.await_terminal(id, Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.update(id, |r| r.mark_received()).unwrap();
        registry.update(id, |r| r.mark_started()).unwrap();
        registry
            .update(id, |r| r.mark_success(serde_json::json!({"ok": true})))
            .unwrap();

        let snap = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(snap.state, TaskState::Success);
    }
}
