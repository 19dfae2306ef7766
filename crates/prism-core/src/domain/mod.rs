//! Domain model (ids, names, states, records, group specs).

pub mod errors;
pub mod group;
pub mod ids;
pub mod name;
pub mod outcome;
pub mod record;
pub mod state;
pub mod status;

pub use errors::{PrismError, TaskError};
pub use group::{GroupMode, RouteSpec, SubTaskSpec};
pub use ids::TaskId;
pub use name::{QueueName, TaskName};
pub use outcome::Outcome;
pub use record::TaskRecord;
pub use state::TaskState;
pub use status::TaskStatus;
