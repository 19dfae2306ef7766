//! Handler registry: task name -> handler.
//!
//! Built during initialization (mutable), shared immutably afterwards. No
//! locks needed at execution time.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use super::handler::{DynHandler, Handler, TypedHandler};
use super::task::Task;
use crate::domain::TaskName;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("handler for task '{0}' is already registered")]
    AlreadyRegistered(TaskName),
}

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskName, Arc<dyn DynHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a typed handler under `T::NAME`.
    pub fn register<T: Task, H: Handler<T> + 'static>(
        &mut self,
        handler: H,
    ) -> Result<(), RegistryError> {
        let name = TaskName::new(T::NAME);
        if self.handlers.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered(name));
        }
        self.handlers
            .insert(name, Arc::new(TypedHandler::<T, H>::new(handler)));
        Ok(())
    }

    pub fn get(&self, name: &TaskName) -> Option<&Arc<dyn DynHandler>> {
        self.handlers.get(name)
    }

    pub fn contains(&self, name: &TaskName) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Outcome, TaskError};
    use crate::handler::TaskContext;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Noop;

    impl Task for Noop {
        const NAME: &'static str = "noop";
    }

    struct NoopHandler;

    #[async_trait]
    impl Handler<Noop> for NoopHandler {
        async fn handle(&self, _ctx: &TaskContext, _task: Noop) -> Result<Outcome, TaskError> {
            Ok(Outcome::success(serde_json::Value::Null))
        }
    }

    #[test]
    fn register_and_lookup() {
        let mut reg = HandlerRegistry::new();
        reg.register::<Noop, _>(NoopHandler).unwrap();
        assert!(reg.contains(&TaskName::new("noop")));
        assert!(reg.get(&TaskName::new("noop")).is_some());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut reg = HandlerRegistry::new();
        reg.register::<Noop, _>(NoopHandler).unwrap();
        let err = reg.register::<Noop, _>(NoopHandler).unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyRegistered(_)));
    }
}
