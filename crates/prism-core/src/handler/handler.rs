//! Handler traits: typed surface, object-safe interior.

use async_trait::async_trait;
use std::marker::PhantomData;

use super::context::TaskContext;
use super::task::Task;
use crate::domain::{Outcome, TaskError};

/// Executes one task of type `T`.
///
/// Exactly one terminal outcome per invocation: `Ok` with a result (or a
/// subtask group to decompose into), or `Err` with a structured failure
/// whose `retryable` flag picks between re-delivery and `FAILURE`.
#[async_trait]
pub trait Handler<T: Task>: Send + Sync {
    async fn handle(&self, ctx: &TaskContext, task: T) -> Result<Outcome, TaskError>;
}

/// Object-safe erasure of `Handler<T>`, so heterogeneous handlers can live
/// in one registry map.
#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn handle_dyn(
        &self,
        ctx: &TaskContext,
        payload: serde_json::Value,
    ) -> Result<Outcome, TaskError>;

    /// Submission-time payload check: does this JSON decode as `T`?
    fn validate(&self, payload: &serde_json::Value) -> Result<(), String>;

    fn name(&self) -> &'static str;
}

/// Adapter from a typed `Handler<T>` to `DynHandler`.
pub struct TypedHandler<T: Task, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Task, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Task, H: Handler<T>> DynHandler for TypedHandler<T, H> {
    async fn handle_dyn(
        &self,
        ctx: &TaskContext,
        payload: serde_json::Value,
    ) -> Result<Outcome, TaskError> {
        // Validated at submission, so a decode failure here means the
        // payload was corrupted in transit. Not retryable either way.
        let task: T = serde_json::from_value(payload)
            .map_err(|e| TaskError::terminal(format!("payload decode: {e}")))?;
        self.handler.handle(ctx, task).await
    }

    fn validate(&self, payload: &serde_json::Value) -> Result<(), String> {
        serde_json::from_value::<T>(payload.clone())
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    fn name(&self) -> &'static str {
        T::NAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TaskRegistry;
    use crate::storage::TaskStorage;
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::sync::Arc;

    #[derive(Debug, Serialize, Deserialize)]
    struct Echo {
        value: i32,
    }

    impl Task for Echo {
        const NAME: &'static str = "echo";
    }

    struct EchoHandler;

    #[async_trait]
    impl Handler<Echo> for EchoHandler {
        async fn handle(&self, _ctx: &TaskContext, task: Echo) -> Result<Outcome, TaskError> {
            Ok(Outcome::success(json!({ "value": task.value })))
        }
    }

    fn ctx() -> TaskContext {
        TaskContext::new(
            crate::domain::TaskId::generate(),
            Arc::new(TaskRegistry::new()),
            TaskStorage::new(std::env::temp_dir()),
        )
    }

    #[tokio::test]
    async fn typed_handler_decodes_and_runs() {
        let h = TypedHandler::<Echo, _>::new(EchoHandler);
        let out = h.handle_dyn(&ctx(), json!({ "value": 7 })).await.unwrap();
        match out {
            Outcome::Success(v) => assert_eq!(v["value"], 7),
            _ => panic!("expected success outcome"),
        }
    }

    #[tokio::test]
    async fn undecodable_payload_is_a_terminal_failure() {
        let h = TypedHandler::<Echo, _>::new(EchoHandler);
        let err = h
            .handle_dyn(&ctx(), json!({ "value": "not a number" }))
            .await
            .unwrap_err();
        assert!(!err.retryable);
    }

    #[test]
    fn validate_accepts_and_rejects() {
        let h = TypedHandler::<Echo, _>::new(EchoHandler);
        assert!(h.validate(&json!({ "value": 1 })).is_ok());
        assert!(h.validate(&json!({ "wrong": 1 })).is_err());
    }
}
