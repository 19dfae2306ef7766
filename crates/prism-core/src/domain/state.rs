//! Task state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Task state.
///
/// State transitions:
/// - Pending -> Received -> Started -> Success
/// - Pending -> Received -> Started -> Failure
/// - Pending | Received -> Timeout (admission-control expiry, sweeper only)
/// - Pending | Received -> Revoked (explicit cancellation)
/// - Started -> Pending (retry re-admission after a transient failure)
///
/// Timeout and Revoked are never reachable from Started: a task that is
/// already executing is governed by the execution deadline, not by queue
/// residency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Submitted, not yet claimed by any worker.
    Pending,

    /// A worker has dequeued the message but not begun execution.
    Received,

    /// Execution in progress.
    Started,

    /// Terminal: completed, result recorded.
    Success,

    /// Terminal: failed, structured error recorded.
    Failure,

    /// Terminal: waited in queue past the admission deadline.
    Timeout,

    /// Terminal: explicitly cancelled before execution.
    Revoked,
}

impl TaskState {
    /// Is this a terminal state (no outgoing transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Success | TaskState::Failure | TaskState::Timeout | TaskState::Revoked
        )
    }

    /// Is this task still waiting for a worker (subject to admission control)?
    pub fn is_waiting(self) -> bool {
        matches!(self, TaskState::Pending | TaskState::Received)
    }

    /// Does the state machine admit `next` from this state?
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        match (self, next) {
            (Pending, Received) => true,
            (Received, Started) => true,
            (Started, Success) | (Started, Failure) => true,
            // Retry re-admission: the record goes back to the queue.
            (Started, Pending) => true,
            (Pending, Timeout) | (Received, Timeout) => true,
            (Pending, Revoked) | (Received, Revoked) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Pending => "PENDING",
            TaskState::Received => "RECEIVED",
            TaskState::Started => "STARTED",
            TaskState::Success => "SUCCESS",
            TaskState::Failure => "FAILURE",
            TaskState::Timeout => "TIMEOUT",
            TaskState::Revoked => "REVOKED",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(TaskState::Success)]
    #[case(TaskState::Failure)]
    #[case(TaskState::Timeout)]
    #[case(TaskState::Revoked)]
    fn terminal_states_have_no_outgoing_edges(#[case] terminal: TaskState) {
        assert!(terminal.is_terminal());
        for next in [
            TaskState::Pending,
            TaskState::Received,
            TaskState::Started,
            TaskState::Success,
            TaskState::Failure,
            TaskState::Timeout,
            TaskState::Revoked,
        ] {
            assert!(!terminal.can_transition_to(next));
        }
    }

    #[test]
    fn started_is_never_timed_out_or_revoked() {
        assert!(!TaskState::Started.can_transition_to(TaskState::Timeout));
        assert!(!TaskState::Started.can_transition_to(TaskState::Revoked));
    }

    #[test]
    fn happy_path_is_admitted() {
        assert!(TaskState::Pending.can_transition_to(TaskState::Received));
        assert!(TaskState::Received.can_transition_to(TaskState::Started));
        assert!(TaskState::Started.can_transition_to(TaskState::Success));
    }

    #[test]
    fn no_skipping_intermediate_states() {
        assert!(!TaskState::Pending.can_transition_to(TaskState::Started));
        assert!(!TaskState::Pending.can_transition_to(TaskState::Success));
        assert!(!TaskState::Received.can_transition_to(TaskState::Success));
    }

    #[test]
    fn serializes_to_wire_vocabulary() {
        let json = serde_json::to_string(&TaskState::Pending).unwrap();
        assert_eq!(json, "\"PENDING\"");
        let back: TaskState = serde_json::from_str("\"REVOKED\"").unwrap();
        assert_eq!(back, TaskState::Revoked);
    }
}
