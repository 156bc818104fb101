//! Status views over a queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ResourceTask, TaskId, TaskState};
use crate::queue::TaskRecord;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub sleeping: usize,
    pub waiting: usize,
    pub running: usize,
    /// Cumulative number of processed tasks.
    pub completed: u64,
    /// Keys currently held by running tasks.
    pub held_keys: usize,
}

impl QueueCounts {
    /// Tasks the queue still tracks.
    pub fn live(&self) -> usize {
        self.sleeping + self.waiting + self.running
    }
}

/// Point-in-time view of one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: TaskId,
    pub name: String,
    pub state: TaskState,
    pub resources: usize,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
}

impl TaskInfo {
    pub(crate) fn from_record<T: ResourceTask>(id: TaskId, record: &TaskRecord<T>) -> Self {
        Self {
            id,
            name: record.task.name().to_string(),
            state: record.state,
            resources: record.task.resources().len(),
            created_at: record.created_at,
            started_at: record.started_at,
        }
    }
}
