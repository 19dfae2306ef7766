//! In-memory broker implementation.

use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::message::TaskMessage;
use super::{Broker, Delivery};
use crate::domain::{PrismError, QueueName, TaskId};

/// Ready-queue entry: max-heap by priority, then insertion order.
#[derive(Debug)]
struct ReadyEntry {
    priority: i32,
    seq: u64,
    message: TaskMessage,
}

impl PartialEq for ReadyEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for ReadyEntry {}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Higher priority wins; equal priority falls back to FIFO (lower seq
        // first, so reverse the seq comparison for the max-heap).
        self.priority
            .cmp(&other.priority)
            .then(other.seq.cmp(&self.seq))
    }
}

/// Delayed entry: min-heap by ready time (reversed ordering in a max-heap).
#[derive(Debug)]
struct ScheduledEntry {
    ready_at: Instant,
    queue: QueueName,
    priority: i32,
    message: TaskMessage,
}

impl PartialEq for ScheduledEntry {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at
    }
}
impl Eq for ScheduledEntry {}

impl PartialOrd for ScheduledEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other.ready_at.cmp(&self.ready_at)
    }
}

struct BrokerState {
    queues: HashMap<QueueName, BinaryHeap<ReadyEntry>>,
    scheduled: BinaryHeap<ScheduledEntry>,

    /// Tombstones from `drop_if_present`; matching messages are discarded at
    /// pop time instead of being dug out of the heaps.
    dropped: HashSet<TaskId>,

    seq: u64,
}

impl BrokerState {
    fn new() -> Self {
        Self {
            queues: HashMap::new(),
            scheduled: BinaryHeap::new(),
            dropped: HashSet::new(),
            seq: 0,
        }
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn push_ready(&mut self, queue: &QueueName, message: TaskMessage, priority: i32) {
        let seq = self.next_seq();
        self.queues.entry(queue.clone()).or_default().push(ReadyEntry {
            priority,
            seq,
            message,
        });
    }

    /// Move due scheduled messages into their ready queues.
    fn promote_scheduled(&mut self) {
        let now = Instant::now();
        while let Some(entry) = self.scheduled.peek() {
            if entry.ready_at > now {
                break; // min-heap, nothing else is due
            }
            let Some(entry) = self.scheduled.pop() else {
                break;
            };
            let queue = entry.queue.clone();
            self.push_ready(&queue, entry.message, entry.priority);
        }
    }

    /// Pop the next deliverable message, skipping tombstoned ones.
    fn pop_ready(&mut self, queue: &QueueName) -> Option<(TaskMessage, i32)> {
        let heap = self.queues.get_mut(queue)?;
        while let Some(entry) = heap.pop() {
            if self.dropped.remove(&entry.message.task_id()) {
                continue;
            }
            return Some((entry.message, entry.priority));
        }
        None
    }

    fn contains_undelivered(&self, task_id: TaskId) -> bool {
        self.queues
            .values()
            .flat_map(|heap| heap.iter())
            .any(|e| e.message.task_id() == task_id)
            || self.scheduled.iter().any(|e| e.message.task_id() == task_id)
    }

    fn next_scheduled_wake(&self) -> Option<Instant> {
        self.scheduled.peek().map(|e| e.ready_at)
    }
}

/// Priority-ordered multi-queue broker backed by process memory.
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
    closed: AtomicBool,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::new())),
            notify: Arc::new(Notify::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Messages currently waiting on `queue` (tests, observability).
    pub async fn depth(&self, queue: &QueueName) -> usize {
        let state = self.state.lock().await;
        state.queues.get(queue).map(|h| h.len()).unwrap_or(0)
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn enqueue(
        &self,
        queue: &QueueName,
        message: TaskMessage,
        priority: i32,
    ) -> Result<(), PrismError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PrismError::Broker("broker is closed".into()));
        }
        {
            let mut state = self.state.lock().await;
            state.push_ready(queue, message, priority);
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn enqueue_delayed(
        &self,
        queue: &QueueName,
        message: TaskMessage,
        priority: i32,
        delay: Duration,
    ) -> Result<(), PrismError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PrismError::Broker("broker is closed".into()));
        }
        {
            let mut state = self.state.lock().await;
            state.scheduled.push(ScheduledEntry {
                ready_at: Instant::now() + delay,
                queue: queue.clone(),
                priority,
                message,
            });
        }
        // Wake dequeuers so they re-arm their sleep against the new deadline.
        self.notify.notify_waiters();
        Ok(())
    }

    async fn dequeue(&self, queue: &QueueName) -> Option<Box<dyn Delivery>> {
        loop {
            // Arm the notification before inspecting state, otherwise an
            // enqueue between unlock and await is lost.
            let notified = self.notify.notified();
            tokio::pin!(notified);

            if self.closed.load(Ordering::Acquire) {
                return None;
            }

            let next_wake = {
                let mut state = self.state.lock().await;
                state.promote_scheduled();
                if let Some((message, priority)) = state.pop_ready(queue) {
                    return Some(Box::new(InMemoryDelivery {
                        message,
                        priority,
                        queue: queue.clone(),
                        state: Arc::clone(&self.state),
                        notify: Arc::clone(&self.notify),
                    }));
                }
                state.next_scheduled_wake()
            };

            if let Some(wake_at) = next_wake {
                tokio::select! {
                    _ = &mut notified => {}
                    _ = tokio::time::sleep_until(wake_at) => {}
                }
            } else {
                notified.await;
            }
        }
    }

    async fn drop_if_present(&self, task_id: TaskId) -> bool {
        let mut state = self.state.lock().await;
        let present = state.contains_undelivered(task_id);
        if present {
            state.dropped.insert(task_id);
        }
        present
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }
}

struct InMemoryDelivery {
    message: TaskMessage,
    priority: i32,
    queue: QueueName,
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
}

#[async_trait]
impl Delivery for InMemoryDelivery {
    fn message(&self) -> &TaskMessage {
        &self.message
    }

    async fn ack(self: Box<Self>) -> Result<(), PrismError> {
        // Popping was the removal; nothing to do for the in-memory adapter.
        Ok(())
    }

    async fn nack_requeue(self: Box<Self>) -> Result<(), PrismError> {
        {
            let mut state = self.state.lock().await;
            state.push_ready(&self.queue, self.message, self.priority);
        }
        self.notify.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskName;

    fn msg(id: TaskId) -> TaskMessage {
        TaskMessage::new(id, TaskName::new("test"), serde_json::json!({}))
    }

    fn queue() -> QueueName {
        QueueName::new("cpu")
    }

    #[tokio::test]
    async fn priority_then_fifo() {
        let broker = InMemoryBroker::new();
        let q = queue();
        let low = TaskId::generate();
        let high = TaskId::generate();
        let a = TaskId::generate();
        let b = TaskId::generate();

        broker.enqueue(&q, msg(low), 0).await.unwrap();
        broker.enqueue(&q, msg(a), 5).await.unwrap();
        broker.enqueue(&q, msg(b), 5).await.unwrap();
        broker.enqueue(&q, msg(high), 10).await.unwrap();

        let mut order = Vec::new();
        for _ in 0..4 {
            let d = broker.dequeue(&q).await.unwrap();
            order.push(d.message().task_id());
            d.ack().await.unwrap();
        }
        assert_eq!(order, vec![high, a, b, low]);
    }

    #[tokio::test]
    async fn queues_are_independent() {
        let broker = InMemoryBroker::new();
        let io = QueueName::new("io");
        let cpu = QueueName::new("cpu");
        let id = TaskId::generate();
        broker.enqueue(&io, msg(id), 5).await.unwrap();

        assert_eq!(broker.depth(&cpu).await, 0);
        assert_eq!(broker.depth(&io).await, 1);

        let d = broker.dequeue(&io).await.unwrap();
        assert_eq!(d.message().task_id(), id);
        d.ack().await.unwrap();
    }

    #[tokio::test]
    async fn dropped_message_is_never_delivered() {
        let broker = InMemoryBroker::new();
        let q = queue();
        let doomed = TaskId::generate();
        let kept = TaskId::generate();
        broker.enqueue(&q, msg(doomed), 9).await.unwrap();
        broker.enqueue(&q, msg(kept), 1).await.unwrap();

        assert!(broker.drop_if_present(doomed).await);

        let d = broker.dequeue(&q).await.unwrap();
        assert_eq!(d.message().task_id(), kept);
        d.ack().await.unwrap();
    }

    #[tokio::test]
    async fn drop_if_present_reports_absence() {
        let broker = InMemoryBroker::new();
        assert!(!broker.drop_if_present(TaskId::generate()).await);
    }

    #[tokio::test]
    async fn delayed_message_arrives_after_delay() {
        let broker = InMemoryBroker::new();
        let q = queue();
        let id = TaskId::generate();
        let start = Instant::now();
        broker
            .enqueue_delayed(&q, msg(id), 5, Duration::from_millis(50))
            .await
            .unwrap();

        let d = broker.dequeue(&q).await.unwrap();
        assert_eq!(d.message().task_id(), id);
        assert!(start.elapsed() >= Duration::from_millis(50));
        d.ack().await.unwrap();
    }

    #[tokio::test]
    async fn nack_requeues_at_same_priority() {
        let broker = InMemoryBroker::new();
        let q = queue();
        let id = TaskId::generate();
        broker.enqueue(&q, msg(id), 5).await.unwrap();

        let d = broker.dequeue(&q).await.unwrap();
        d.nack_requeue().await.unwrap();

        let d = broker.dequeue(&q).await.unwrap();
        assert_eq!(d.message().task_id(), id);
        d.ack().await.unwrap();
    }

    #[tokio::test]
    async fn close_wakes_blocked_dequeue_with_none() {
        let broker = Arc::new(InMemoryBroker::new());
        let q = queue();

        let waiter = {
            let broker = Arc::clone(&broker);
            let q = q.clone();
            tokio::spawn(async move { broker.dequeue(&q).await.is_none() })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.close();

        let exited = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(exited);
    }

    #[tokio::test]
    async fn dequeue_blocks_until_enqueue() {
        let broker = Arc::new(InMemoryBroker::new());
        let q = queue();
        let id = TaskId::generate();

        let waiter = {
            let broker = Arc::clone(&broker);
            let q = q.clone();
            tokio::spawn(async move { broker.dequeue(&q).await.map(|d| d.message().task_id()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.enqueue(&q, msg(id), 5).await.unwrap();

        let got = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, Some(id));
    }
}
