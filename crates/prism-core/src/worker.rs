//! Worker pool: one pool per queue, each worker a dequeue-execute-report
//! loop.
//!
//! Workers never decide task fate themselves; every terminal outcome goes
//! through the manager's report surface so that retries, group settlement
//! and notifications happen in exactly one place.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::broker::{Broker, Delivery};
use crate::domain::{Outcome, QueueName, TaskError};
use crate::handler::TaskContext;
use crate::manager::TaskManager;

/// Handle to the workers of one queue.
/// - `request_shutdown()` で新規の取得を止める
/// - `join()` で全ワーカーの終了を待つ
pub struct WorkerPool {
    queue: QueueName,
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `concurrency` workers consuming `queue`.
    pub fn spawn(
        queue: QueueName,
        concurrency: usize,
        manager: Arc<TaskManager>,
        execution_deadline: Duration,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(concurrency);
        for worker_id in 0..concurrency {
            let q = queue.clone();
            let mgr = Arc::clone(&manager);
            let broker = Arc::clone(manager.broker());
            let mut rx = shutdown_rx.clone();

            let join = tokio::spawn(async move {
                worker_loop(worker_id, q, broker, mgr, execution_deadline, &mut rx).await;
            });
            joins.push(join);
        }

        Self {
            queue,
            shutdown_tx,
            joins,
        }
    }

    pub fn queue(&self) -> &QueueName {
        &self.queue
    }

    /// Stop taking new messages. In-flight handler executions finish and
    /// report normally.
    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for j in self.joins {
            let _ = j.await;
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    queue: QueueName,
    broker: Arc<dyn Broker>,
    manager: Arc<TaskManager>,
    execution_deadline: Duration,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // dequeue は「待つ」ので select で shutdown と競合させる
        let delivery = tokio::select! {
            _ = shutdown_rx.changed() => continue,
            d = broker.dequeue(&queue) => d,
        };
        let Some(delivery) = delivery else {
            // broker closed
            break;
        };

        process(worker_id, &queue, delivery, &manager, execution_deadline).await;
    }
    debug!("[{queue}/worker-{worker_id}] stopped");
}

/// Claim, execute, report, ack. Always acks: once a worker holds a delivery
/// the message's job is done — task fate lives on the registry record.
async fn process(
    worker_id: usize,
    queue: &QueueName,
    delivery: Box<dyn Delivery>,
    manager: &Arc<TaskManager>,
    execution_deadline: Duration,
) {
    let message = delivery.message().clone();
    let task_id = message.task_id();

    // Claim. A failed transition means the task was revoked, timed out or
    // cleaned up after the message was queued: discard without side effects.
    if let Err(e) = manager.report_received(task_id) {
        debug!("[{queue}/worker-{worker_id}] discarding stale message for {task_id}: {e}");
        ack_or_warn(worker_id, queue, delivery).await;
        return;
    }
    if let Err(e) = manager.report_started(task_id) {
        debug!("[{queue}/worker-{worker_id}] lost {task_id} before start: {e}");
        ack_or_warn(worker_id, queue, delivery).await;
        return;
    }

    let outcome = match manager.handlers().get(message.name()) {
        None => Err(TaskError::terminal(format!(
            "no handler registered for task '{}'",
            message.name()
        ))),
        Some(handler) => {
            let ctx = TaskContext::new(
                task_id,
                Arc::clone(manager.registry()),
                manager.storage().clone(),
            );
            let fut = handler.handle_dyn(&ctx, message.payload().clone());
            match tokio::time::timeout(execution_deadline, fut).await {
                Ok(result) => result,
                Err(_) => Err(TaskError::terminal(format!(
                    "execution deadline ({}s) exceeded",
                    execution_deadline.as_secs()
                ))),
            }
        }
    };

    let report = match outcome {
        Ok(Outcome::Success(result)) => manager.report_success(task_id, result).await,
        Ok(Outcome::Group { specs, mode }) => manager.report_group(task_id, specs, mode).await,
        Err(error) => manager.report_failure(task_id, error).await,
    };
    if let Err(e) = report {
        warn!("[{queue}/worker-{worker_id}] report for {task_id} failed: {e}");
    }
    ack_or_warn(worker_id, queue, delivery).await;
}

async fn ack_or_warn(worker_id: usize, queue: &QueueName, delivery: Box<dyn Delivery>) {
    if let Err(e) = delivery.ack().await {
        warn!("[{queue}/worker-{worker_id}] ack failed: {e}");
    }
}
