//! Handler outcome.

use super::group::{GroupMode, SubTaskSpec};

/// What a handler produced.
///
/// Most handlers finish with a value. A pipeline entry point instead
/// decomposes into a subtask group: its own task stays `STARTED` and is
/// settled later by the group coordinator, once the children resolve.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Terminal result for this task.
    Success(serde_json::Value),

    /// Decompose into children; the task settles when the group does.
    Group {
        specs: Vec<SubTaskSpec>,
        mode: GroupMode,
    },
}

impl Outcome {
    pub fn success(value: serde_json::Value) -> Self {
        Outcome::Success(value)
    }

    pub fn chained(specs: Vec<SubTaskSpec>) -> Self {
        Outcome::Group {
            specs,
            mode: GroupMode::Chained,
        }
    }

    pub fn parallel(specs: Vec<SubTaskSpec>) -> Self {
        Outcome::Group {
            specs,
            mode: GroupMode::Parallel,
        }
    }
}
