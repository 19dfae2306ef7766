//! In-memory group coordination state.
//!
//! Groups are a submission-time construct (given by the caller or returned
//! from a handler as an `Outcome::Group`); only the child task records are
//! persisted. The coordinator state here is keyed by parent id and dropped
//! as soon as the group settles.

use std::collections::VecDeque;

use crate::domain::{SubTaskSpec, TaskId};

#[derive(Debug)]
pub(crate) enum GroupState {
    /// All children in flight; settle once every one is terminal.
    Parallel { children: Vec<TaskId> },

    /// Stages still to submit, front = next.
    Chained { remaining: VecDeque<SubTaskSpec> },
}
