//! Delay heap: tasks ordered by the instant they become eligible.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use tokio::time::Instant;

use crate::domain::TaskId;

/// Scheduled task entry for the priority queue.
///
/// We use Reverse ordering so BinaryHeap acts as a min-heap (earliest first).
/// Equal instants fall back to submission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTask {
    pub eligible_at: Instant,
    pub seq: u64,
    pub task_id: TaskId,
}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTask {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .eligible_at
            .cmp(&self.eligible_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
pub struct DelayHeap {
    entries: BinaryHeap<ScheduledTask>,
}

impl DelayHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: ScheduledTask) {
        self.entries.push(entry);
    }

    /// Pop every entry due at `now`, earliest first.
    pub fn pop_due(&mut self, now: Instant) -> Vec<TaskId> {
        let mut due = Vec::new();
        while let Some(entry) = self.entries.peek() {
            if entry.eligible_at > now {
                break; // Heap is sorted, so we can stop
            }
            if let Some(entry) = self.entries.pop() {
                due.push(entry.task_id);
            }
        }
        due
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.peek().map(|entry| entry.eligible_at)
    }
}
