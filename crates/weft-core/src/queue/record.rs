//! Task record: metadata + task.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::domain::{ResourceTask, TaskState};

/// Metadata + task for an entry the queue currently knows about.
///
/// Design:
/// - This is the "single source of truth" for task state.
/// - The held map, waiting list and delay heap hold TaskId only; the
///   eligibility instant lives in the heap entry.
/// - Records are removed once the task is processed.
pub struct TaskRecord<T> {
    pub task: Arc<T>,
    pub state: TaskState,

    /// Submission order. Breaks ties between equal eligibility instants.
    pub seq: u64,

    /// Timestamps for observability.
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
}

impl<T: ResourceTask> TaskRecord<T> {
    /// Every task starts sleeping, even with a zero delay.
    pub fn new(task: Arc<T>, seq: u64, created_at: DateTime<Utc>) -> Self {
        Self {
            task,
            state: TaskState::Sleeping,
            seq,
            created_at,
            started_at: None,
        }
    }

    /// Blocked on at least one held key.
    pub fn mark_waiting(&mut self) {
        self.state = TaskState::Waiting;
    }

    /// All keys acquired; about to be dispatched.
    pub fn mark_running(&mut self, now: DateTime<Utc>) {
        self.state = TaskState::Running;
        self.started_at = Some(now);
    }
}
