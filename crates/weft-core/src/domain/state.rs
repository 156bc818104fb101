//! Task state machine for the queue.

use serde::{Deserialize, Serialize};

/// Task state.
///
/// State transitions:
/// - Sleeping -> Running (delay elapsed, keys free)
/// - Sleeping -> Waiting -> Running (delay elapsed, some key held)
/// - Waiting -> Running (a release freed every key)
/// - Running -> (removed) when `processed` is called
///
/// 宣言順はスナップショットでの並び順（running が先、sleeping が最後）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Holding all of its keys; `process` has been invoked.
    Running,

    /// Eligible, but at least one key is held by another task.
    Waiting,

    /// Scheduled with a delay that has not elapsed yet.
    Sleeping,
}

impl TaskState {
    /// Does a task in this state own entries in the held map?
    pub fn holds_resources(self) -> bool {
        matches!(self, TaskState::Running)
    }
}
