//! Queue backend adapter.
//!
//! The engine talks to its broker through this seam. The in-memory
//! implementation is the development/test adapter; a durable backend (Redis
//! or similar) plugs in behind the same trait.

mod memory;
mod message;

pub use memory::InMemoryBroker;
pub use message::TaskMessage;

use async_trait::async_trait;
use std::time::Duration;

use crate::domain::{PrismError, QueueName, TaskId};

/// A claimed message. The worker owns the delivery and must either `ack` it
/// or hand it back with `nack_requeue`.
#[async_trait]
pub trait Delivery: Send {
    fn message(&self) -> &TaskMessage;

    /// Remove the message for good.
    async fn ack(self: Box<Self>) -> Result<(), PrismError>;

    /// Put the message back at its priority position (worker could not
    /// process it; delivery counts are tracked on the task record, not here).
    async fn nack_requeue(self: Box<Self>) -> Result<(), PrismError>;
}

/// Broker port.
///
/// Ordering contract: within one queue, delivery respects priority (higher
/// first) then insertion order. Nothing is guaranteed across queues.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn enqueue(
        &self,
        queue: &QueueName,
        message: TaskMessage,
        priority: i32,
    ) -> Result<(), PrismError>;

    /// Enqueue after `delay` (retry backoff path).
    async fn enqueue_delayed(
        &self,
        queue: &QueueName,
        message: TaskMessage,
        priority: i32,
        delay: Duration,
    ) -> Result<(), PrismError>;

    /// Block until a message is available on `queue`, or the broker is
    /// closed (returns None; workers use that as their exit signal).
    async fn dequeue(&self, queue: &QueueName) -> Option<Box<dyn Delivery>>;

    /// Best-effort removal of an undelivered message. Returns whether the
    /// message was still in the queue; an in-flight delivery race is
    /// acceptable and resolved by the worker's state check.
    async fn drop_if_present(&self, task_id: TaskId) -> bool;

    /// Stop handing out messages; wakes every blocked `dequeue`.
    fn close(&self);
}
