//! Typed handler API.
//!
//! Two layers:
//! - typed surface: `Task` + `Handler<T>` — the compiler ties a payload type
//!   to its handler;
//! - object-safe interior: `DynHandler` behind type erasure, so the worker
//!   can dispatch by task name at runtime.

mod context;
#[allow(clippy::module_inception)]
mod handler;
mod registry;
mod task;

pub use context::TaskContext;
pub use handler::{DynHandler, Handler, TypedHandler};
pub use registry::{HandlerRegistry, RegistryError};
pub use task::Task;
