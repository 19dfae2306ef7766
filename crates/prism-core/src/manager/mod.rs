//! Task manager: submission, status, cancellation, cleanup, and the
//! parent/child coordination that drives multi-stage pipelines.

mod group;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use log::{debug, info, warn};

use crate::broker::{Broker, TaskMessage};
use crate::config::PrismConfig;
use crate::domain::{
    GroupMode, PrismError, QueueName, RouteSpec, SubTaskSpec, TaskError, TaskId, TaskName,
    TaskRecord, TaskState, TaskStatus,
};
use crate::handler::HandlerRegistry;
use crate::notify::{self, Notifier, NotifyEvent};
use crate::registry::TaskRegistry;
use crate::retry::RetryPolicy;
use crate::router::Router;
use crate::storage::TaskStorage;

use group::GroupState;

pub struct TaskManager {
    registry: Arc<TaskRegistry>,
    broker: Arc<dyn Broker>,
    router: Router,
    handlers: Arc<HandlerRegistry>,
    notifier: Arc<dyn Notifier>,
    storage: TaskStorage,
    retry: RetryPolicy,
    max_retries: u32,

    /// Active group coordinators, keyed by parent task id.
    groups: DashMap<TaskId, GroupState>,
}

impl TaskManager {
    pub fn new(
        config: &PrismConfig,
        broker: Arc<dyn Broker>,
        handlers: Arc<HandlerRegistry>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self::with_router(config, Router::from_config(config), broker, handlers, notifier)
    }

    /// Embedders with custom routing tables.
    pub fn with_router(
        config: &PrismConfig,
        router: Router,
        broker: Arc<dyn Broker>,
        handlers: Arc<HandlerRegistry>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            registry: Arc::new(TaskRegistry::new()),
            broker,
            router,
            handlers,
            notifier,
            storage: TaskStorage::new(config.shared_tmp_path.clone()),
            retry: RetryPolicy::from_config(config),
            max_retries: config.max_retries,
            groups: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn storage(&self) -> &TaskStorage {
        &self.storage
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    // ------------------------------------------------------------------
    // Public operations
    // ------------------------------------------------------------------

    /// Submit a task. Registry write and queue push are atomic from the
    /// caller's view: an enqueue failure rolls the record back out, never
    /// leaving a dangling PENDING entry with nothing in the queue.
    pub async fn submit(
        &self,
        name: impl Into<TaskName>,
        payload: serde_json::Value,
        priority: i32,
        parent_id: Option<TaskId>,
    ) -> Result<TaskId, PrismError> {
        let name = name.into();
        self.validate_submission(&name, &payload)?;
        let queue = self.router.route(&name)?;
        self.submit_routed(name, payload, priority, parent_id, queue)
            .await
    }

    /// Submit a group of subtasks under an existing parent.
    ///
    /// Parallel: every child goes out now; the parent settles once all of
    /// them are terminal (any failure => parent FAILURE, but siblings run to
    /// completion first).
    ///
    /// Chained: only the first stage goes out; each successor is submitted by
    /// the coordinator when its predecessor succeeds, with the predecessor's
    /// result injected. The first failing stage short-circuits the rest —
    /// they are never registered, so their ids never exist.
    pub async fn submit_group(
        &self,
        parent_id: TaskId,
        specs: Vec<SubTaskSpec>,
        mode: GroupMode,
    ) -> Result<Vec<TaskId>, PrismError> {
        if specs.is_empty() {
            return Ok(Vec::new());
        }
        let parent = self.registry.get(parent_id)?;
        if parent.state.is_terminal() {
            return Err(PrismError::ParentTerminal(parent_id));
        }

        // Validate every stage up front, so a chain never dies on a typo in
        // stage four after stages one to three already ran.
        for spec in &specs {
            self.validate_submission(&spec.name, &spec.payload)?;
            if spec.route == RouteSpec::Static {
                self.router.route(&spec.name)?;
            }
        }

        // The coordinator entry must exist before the first child hits the
        // broker: a fast worker can otherwise settle a child while its
        // parent has no group yet, and nothing would re-trigger settlement.
        // Child ids are therefore assigned here, ahead of submission.
        match mode {
            GroupMode::Parallel => {
                let mut planned = Vec::with_capacity(specs.len());
                for spec in specs {
                    let queue = self.resolve_route(&spec, None)?;
                    planned.push((TaskId::generate(), spec, queue));
                }
                let children: Vec<TaskId> = planned.iter().map(|(id, _, _)| *id).collect();
                self.claim_group(
                    parent_id,
                    GroupState::Parallel {
                        children: children.clone(),
                    },
                )?;
                if let Err(e) = self.start_parent(parent_id) {
                    self.groups.remove(&parent_id);
                    return Err(e);
                }

                let mut submitted: Vec<TaskId> = Vec::with_capacity(children.len());
                for (id, spec, queue) in planned {
                    match self
                        .submit_with_id(id, spec.name, spec.payload, spec.priority, Some(parent_id), queue)
                        .await
                    {
                        Ok(()) => submitted.push(id),
                        Err(e) => {
                            // Roll back: drop the coordinator, best-effort
                            // revoke the siblings already queued.
                            self.groups.remove(&parent_id);
                            for prior in submitted {
                                let _ = self.cancel(prior).await;
                            }
                            return Err(e);
                        }
                    }
                }
                info!(
                    "submitted parallel group of {} under {parent_id}",
                    children.len()
                );
                Ok(children)
            }
            GroupMode::Chained => {
                let mut remaining: VecDeque<SubTaskSpec> = specs.into();
                let Some(first) = remaining.pop_front() else {
                    return Ok(Vec::new());
                };
                let queue = self.resolve_route(&first, None)?;
                self.claim_group(parent_id, GroupState::Chained { remaining })?;
                if let Err(e) = self.start_parent(parent_id) {
                    self.groups.remove(&parent_id);
                    return Err(e);
                }

                let id = TaskId::generate();
                if let Err(e) = self
                    .submit_with_id(id, first.name, first.payload, first.priority, Some(parent_id), queue)
                    .await
                {
                    self.groups.remove(&parent_id);
                    return Err(e);
                }
                info!("submitted chained group under {parent_id}, first stage {id}");
                Ok(vec![id])
            }
        }
    }

    /// Read-only status projection.
    pub fn get_status(&self, task_id: TaskId) -> Result<TaskStatus, PrismError> {
        let record = self.registry.get(task_id)?;
        let subtasks = self.registry.children_of(task_id);
        Ok(TaskStatus::from_record(&record, subtasks))
    }

    /// Bounded wait for a terminal state. The caller's deadline is entirely
    /// client-side: expiring here returns the last known status and leaves
    /// the server-side admission clock untouched.
    pub async fn await_completion(
        &self,
        task_id: TaskId,
        timeout: Duration,
    ) -> Result<TaskStatus, PrismError> {
        let record = self.registry.await_terminal(task_id, timeout).await?;
        let subtasks = self.registry.children_of(task_id);
        Ok(TaskStatus::from_record(&record, subtasks))
    }

    /// Cooperative cancellation. Returns true if the task was revoked;
    /// false if it had already started or finished (revocation never
    /// interrupts in-flight execution).
    pub async fn cancel(&self, task_id: TaskId) -> Result<bool, PrismError> {
        match self.registry.update(task_id, |r| r.mark_revoked()) {
            Ok(snapshot) => {
                self.broker.drop_if_present(task_id).await;
                info!("revoked task {task_id}");
                self.settle_ancestors(snapshot).await;
                Ok(true)
            }
            Err(PrismError::InvalidTransition { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Remove the registry record and the task's shared storage. Not
    /// idempotent by design: the second call reports NotFound, which makes
    /// double-cleanup visible to callers.
    pub fn cleanup(&self, task_id: TaskId) -> Result<(), PrismError> {
        let record = self.registry.remove(task_id)?;
        if !record.state.is_terminal() {
            warn!(
                "cleanup of task {task_id} in non-terminal state {}",
                record.state
            );
        }
        self.groups.remove(&task_id);
        self.storage.cleanup(task_id)?;
        info!("cleaned up task {task_id}");
        Ok(())
    }

    /// Resolve the next GPU stage's queue from a runtime classification key.
    /// Unknown keys degrade to the default pool; the task id only has to
    /// exist (the caller is a completion handler naming itself).
    pub fn route_dynamic(
        &self,
        task_id: TaskId,
        classification_key: &str,
    ) -> Result<QueueName, PrismError> {
        if !self.registry.contains(task_id) {
            return Err(PrismError::NotFound(task_id));
        }
        Ok(self.router.route_dynamic(classification_key))
    }

    /// Expire every task that has waited in queue past `admission_deadline`.
    /// TIMEOUT is claimed by CAS, so a task being picked up by a worker at
    /// the same instant goes one way or the other, never both — and the
    /// admin notification for a given task fires at most once. Returns the
    /// number of tasks expired.
    pub async fn expire_overdue(&self, admission_deadline: Duration) -> usize {
        let mut expired = 0;
        for task_id in self.registry.waiting_longer_than(admission_deadline) {
            let error = TaskError::terminal(format!(
                "not admitted within {}s",
                admission_deadline.as_secs()
            ));
            let snapshot = match self.registry.update(task_id, |r| r.mark_timeout(error.clone()))
            {
                Ok(snapshot) => snapshot,
                // Lost the race to a worker claim, a revoke, or a cleanup.
                Err(_) => continue,
            };
            self.broker.drop_if_present(task_id).await;
            let waited_secs = snapshot.waited().num_milliseconds() as f64 / 1000.0;
            warn!(
                "task {task_id} timed out after {waited_secs:.1}s in queue {}",
                snapshot.queue
            );
            notify::notify_detached(
                Arc::clone(&self.notifier),
                NotifyEvent::TaskTimeout {
                    task_id,
                    queue: snapshot.queue.clone(),
                    waited_secs,
                },
            );
            self.settle_ancestors(snapshot).await;
            expired += 1;
        }
        expired
    }

    // ------------------------------------------------------------------
    // Worker-report surface
    // ------------------------------------------------------------------

    /// A worker claimed the message. An `InvalidTransition` here is the
    /// revocation race: the task was swept or revoked after the message was
    /// queued, and the worker must discard it without side effects.
    pub fn report_received(&self, task_id: TaskId) -> Result<TaskRecord, PrismError> {
        self.registry.update(task_id, |r| r.mark_received())
    }

    pub fn report_started(&self, task_id: TaskId) -> Result<TaskRecord, PrismError> {
        self.registry.update(task_id, |r| r.mark_started())
    }

    pub fn report_progress(&self, task_id: TaskId, progress: f64) {
        self.registry.update_progress(task_id, progress);
    }

    /// Terminal success. Triggers chain progression / parent aggregation.
    pub async fn report_success(
        &self,
        task_id: TaskId,
        result: serde_json::Value,
    ) -> Result<(), PrismError> {
        let snapshot = self.registry.update(task_id, |r| r.mark_success(result))?;
        debug!("task {task_id} succeeded");
        self.settle_ancestors(snapshot).await;
        Ok(())
    }

    /// Worker-reported failure. Transient failures are re-admitted with
    /// backoff until retries run out; terminal ones (and exhausted ones)
    /// become FAILURE and notify the admin channel.
    pub async fn report_failure(
        &self,
        task_id: TaskId,
        error: TaskError,
    ) -> Result<(), PrismError> {
        let record = self.registry.get(task_id)?;
        if error.retryable && !record.retries_exhausted() {
            let snapshot = self
                .registry
                .update(task_id, |r| r.readmit_for_retry(error.clone()))?;
            let delay = self.retry.next_delay(snapshot.retry_count.saturating_sub(1));
            let message = TaskMessage::new(task_id, snapshot.name.clone(), snapshot.payload.clone());
            warn!(
                "task {task_id} failed transiently (retry {}/{}), re-delivering in {:.1}s: {}",
                snapshot.retry_count,
                snapshot.max_retries,
                delay.as_secs_f64(),
                error
            );
            self.broker
                .enqueue_delayed(&snapshot.queue, message, snapshot.priority, delay)
                .await?;
            return Ok(());
        }

        let snapshot = self
            .registry
            .update(task_id, |r| r.mark_failure(error.clone()))?;
        warn!("task {task_id} failed terminally: {error}");
        notify::notify_detached(
            Arc::clone(&self.notifier),
            NotifyEvent::TaskFailure {
                task_id,
                error: error.message,
            },
        );
        self.settle_ancestors(snapshot).await;
        Ok(())
    }

    /// A handler decomposed into a subtask group; its own task stays
    /// STARTED until the coordinator settles it.
    pub async fn report_group(
        &self,
        task_id: TaskId,
        specs: Vec<SubTaskSpec>,
        mode: GroupMode,
    ) -> Result<(), PrismError> {
        if let Err(e) = self.submit_group(task_id, specs, mode).await {
            // The decomposition itself failed; surface it as the task's
            // failure rather than poisoning an unrelated caller.
            warn!("task {task_id} group submission failed: {e}");
            let snapshot = self
                .registry
                .update(task_id, |r| r.mark_failure(TaskError::terminal(e.to_string())))?;
            self.settle_ancestors(snapshot).await;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn validate_submission(
        &self,
        name: &TaskName,
        payload: &serde_json::Value,
    ) -> Result<(), PrismError> {
        let handler = self
            .handlers
            .get(name)
            .ok_or_else(|| PrismError::InvalidTaskName(name.clone()))?;
        handler
            .validate(payload)
            .map_err(|reason| PrismError::InvalidPayload {
                name: name.clone(),
                reason,
            })
    }

    /// Atomically claim the per-parent coordinator slot. One group at a
    /// time: a check-then-insert would let two concurrent submissions both
    /// pass the check.
    fn claim_group(&self, parent_id: TaskId, state: GroupState) -> Result<(), PrismError> {
        match self.groups.entry(parent_id) {
            Entry::Occupied(_) => Err(PrismError::GroupActive(parent_id)),
            Entry::Vacant(slot) => {
                slot.insert(state);
                Ok(())
            }
        }
    }

    async fn submit_routed(
        &self,
        name: TaskName,
        payload: serde_json::Value,
        priority: i32,
        parent_id: Option<TaskId>,
        queue: QueueName,
    ) -> Result<TaskId, PrismError> {
        let id = TaskId::generate();
        self.submit_with_id(id, name, payload, priority, parent_id, queue)
            .await?;
        Ok(id)
    }

    async fn submit_with_id(
        &self,
        id: TaskId,
        name: TaskName,
        payload: serde_json::Value,
        priority: i32,
        parent_id: Option<TaskId>,
        queue: QueueName,
    ) -> Result<(), PrismError> {
        let record = TaskRecord::new(
            id,
            name.clone(),
            payload.clone(),
            priority,
            parent_id,
            queue.clone(),
            self.max_retries,
        );
        self.registry.insert(record);

        let message = TaskMessage::new(id, name.clone(), payload);
        if let Err(e) = self.broker.enqueue(&queue, message, priority).await {
            // Roll back: no dangling PENDING record without a message.
            let _ = self.registry.remove(id);
            return Err(e);
        }

        info!("submitted task {name} as {id} to queue {queue}");
        Ok(())
    }

    /// Queue for a group stage. `predecessor_result` feeds dynamic routes;
    /// a dynamic first stage has no predecessor and lands in the default
    /// pool.
    fn resolve_route(
        &self,
        spec: &SubTaskSpec,
        predecessor_result: Option<&serde_json::Value>,
    ) -> Result<QueueName, PrismError> {
        match &spec.route {
            RouteSpec::Static => self.router.route(&spec.name),
            RouteSpec::FromResult { result_key } => {
                let key = predecessor_result
                    .and_then(|r| r.get(result_key))
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                Ok(self.router.route_dynamic(key))
            }
        }
    }

    fn start_parent(&self, parent_id: TaskId) -> Result<(), PrismError> {
        let parent = self.registry.get(parent_id)?;
        match parent.state {
            TaskState::Started => Ok(()),
            TaskState::Pending => {
                self.registry.update(parent_id, |r| {
                    r.mark_received()?;
                    r.mark_started()
                })?;
                Ok(())
            }
            TaskState::Received => {
                self.registry.update(parent_id, |r| r.mark_started())?;
                Ok(())
            }
            _ => Err(PrismError::ParentTerminal(parent_id)),
        }
    }

    /// Walk terminal transitions up the parent chain: a settled child may
    /// settle its parent's group, which may settle the grandparent's, and so
    /// on. Iterative to keep the future un-boxed.
    async fn settle_ancestors(&self, mut snapshot: TaskRecord) {
        loop {
            let Some(parent_id) = snapshot.parent_id else {
                return;
            };
            match self.settle_parent(parent_id, snapshot).await {
                Some(parent_snapshot) => snapshot = parent_snapshot,
                None => return,
            }
        }
    }

    /// React to one child's terminal state. Returns the parent's snapshot
    /// if the parent itself just settled.
    async fn settle_parent(&self, parent_id: TaskId, child: TaskRecord) -> Option<TaskRecord> {
        enum Step {
            SubmitNext(SubTaskSpec),
            ParentSuccess(serde_json::Value),
            ParentFailure(String),
            Wait,
        }

        // Decide under the groups entry, but act after releasing it: the
        // broker push awaits, and DashMap guards must not live that long.
        let step = {
            let mut entry = self.groups.get_mut(&parent_id)?;
            match entry.value_mut() {
                GroupState::Parallel { children } => {
                    let states: Vec<TaskState> = children
                        .iter()
                        .filter_map(|id| self.registry.get(*id).ok())
                        .map(|r| r.state)
                        .collect();
                    if states.len() < children.len() || states.iter().any(|s| !s.is_terminal()) {
                        Step::Wait
                    } else if states.iter().all(|s| *s == TaskState::Success) {
                        let results: Vec<serde_json::Value> = children
                            .iter()
                            .filter_map(|id| self.registry.get(*id).ok())
                            .map(|r| r.result.unwrap_or(serde_json::Value::Null))
                            .collect();
                        Step::ParentSuccess(serde_json::Value::Array(results))
                    } else {
                        let failed = states.iter().filter(|s| **s != TaskState::Success).count();
                        Step::ParentFailure(format!(
                            "{failed} of {} subtasks did not succeed",
                            children.len()
                        ))
                    }
                }
                GroupState::Chained { remaining } => {
                    if child.state != TaskState::Success {
                        Step::ParentFailure(format!(
                            "stage {} ended {}: {}",
                            child.name,
                            child.state,
                            child
                                .error
                                .as_ref()
                                .map(|e| e.message.as_str())
                                .unwrap_or("revoked or timed out")
                        ))
                    } else {
                        match remaining.pop_front() {
                            Some(spec) => Step::SubmitNext(spec),
                            None => Step::ParentSuccess(
                                child.result.clone().unwrap_or(serde_json::Value::Null),
                            ),
                        }
                    }
                }
            }
        };

        match step {
            Step::Wait => None,
            Step::SubmitNext(mut spec) => {
                let predecessor = child.result.clone().unwrap_or(serde_json::Value::Null);
                let submitted = match self.resolve_route(&spec, Some(&predecessor)) {
                    Ok(queue) => {
                        inject_input(&mut spec.payload, predecessor);
                        self.submit_routed(
                            spec.name,
                            spec.payload,
                            spec.priority,
                            Some(parent_id),
                            queue,
                        )
                        .await
                    }
                    Err(e) => Err(e),
                };
                match submitted {
                    Ok(next_id) => {
                        debug!("chain under {parent_id}: next stage {next_id}");
                        None
                    }
                    Err(e) => {
                        self.groups.remove(&parent_id);
                        self.fail_parent(parent_id, format!("stage submission failed: {e}"))
                    }
                }
            }
            Step::ParentSuccess(result) => {
                self.groups.remove(&parent_id);
                match self.registry.update(parent_id, |r| r.mark_success(result)) {
                    Ok(snapshot) => {
                        info!("group under {parent_id} completed");
                        Some(snapshot)
                    }
                    Err(e) => {
                        debug!("parent {parent_id} not settled: {e}");
                        None
                    }
                }
            }
            Step::ParentFailure(message) => {
                self.groups.remove(&parent_id);
                self.fail_parent(parent_id, message)
            }
        }
    }

    fn fail_parent(&self, parent_id: TaskId, message: String) -> Option<TaskRecord> {
        match self
            .registry
            .update(parent_id, |r| r.mark_failure(TaskError::terminal(message.clone())))
        {
            Ok(snapshot) => {
                warn!("group under {parent_id} failed: {message}");
                notify::notify_detached(
                    Arc::clone(&self.notifier),
                    NotifyEvent::TaskFailure {
                        task_id: parent_id,
                        error: message,
                    },
                );
                Some(snapshot)
            }
            Err(e) => {
                debug!("parent {parent_id} not failed: {e}");
                None
            }
        }
    }
}

/// Merge the predecessor's result into the next stage's payload under
/// `"input"`. Non-object payloads are wrapped.
fn inject_input(payload: &mut serde_json::Value, input: serde_json::Value) {
    match payload {
        serde_json::Value::Object(map) => {
            map.insert("input".to_string(), input);
        }
        other => {
            let prev = std::mem::take(other);
            *other = serde_json::json!({ "payload": prev, "input": input });
        }
    }
}
