//! Subtask group specs.
//!
//! A group is a submission-time construct, not a persisted entity: the
//! manager keeps its coordination state in memory and only the child task
//! records survive in the registry.

use serde::{Deserialize, Serialize};

use super::name::TaskName;

/// How the children of a group execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupMode {
    /// All children submitted immediately; the parent settles once every
    /// child is terminal.
    Parallel,

    /// Strictly one after another; each stage's result is injected into the
    /// next stage's payload, and a failing stage short-circuits the rest.
    Chained,
}

/// Where a chained stage's queue comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteSpec {
    /// The router's static `task name -> queue` table.
    Static,

    /// GPU-pool selection from the predecessor's result: the value found at
    /// `result_key` in the previous stage's result is matched against the
    /// configured categories (unknown keys fall back to the default pool).
    FromResult { result_key: String },
}

impl Default for RouteSpec {
    fn default() -> Self {
        RouteSpec::Static
    }
}

/// One child task inside a group submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTaskSpec {
    pub name: TaskName,

    #[serde(default)]
    pub payload: serde_json::Value,

    #[serde(default = "default_priority")]
    pub priority: i32,

    #[serde(default)]
    pub route: RouteSpec,
}

fn default_priority() -> i32 {
    5
}

impl SubTaskSpec {
    pub fn new(name: impl Into<TaskName>, payload: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            payload,
            priority: default_priority(),
            route: RouteSpec::Static,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Route this stage dynamically from the predecessor's result.
    pub fn routed_from_result(mut self, result_key: impl Into<String>) -> Self {
        self.route = RouteSpec::FromResult {
            result_key: result_key.into(),
        };
        self
    }
}
