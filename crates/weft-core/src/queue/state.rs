//! Queue state guarded by the coordination lock.
//!
//! Every method here runs with the lock held and returns the batch of tasks
//! to dispatch. Dispatch itself happens after the guard is dropped.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use super::pending::PendingSet;
use super::record::TaskRecord;
use super::schedule::{DelayHeap, ScheduledTask};
use crate::domain::{ResourceTask, TaskId, TaskState};
use crate::observability::{QueueCounts, TaskInfo};

/// Tasks admitted under the lock, waiting to be handed to the processor.
pub(crate) type Admitted<T> = Vec<(TaskId, Arc<T>)>;

/// Outcome of a `processed` call.
pub(crate) enum Completion<T> {
    /// Keys released; `admitted` were unblocked by the release.
    Released {
        task: Arc<T>,
        freed: usize,
        admitted: Admitted<T>,
    },
    /// No record for this id (already processed, or never ours).
    Unknown,
    /// The task exists but is not running, so it holds nothing.
    NotRunning(TaskState),
}

pub(crate) struct QueueState<T: ResourceTask> {
    /// All live task records (single source of truth).
    records: HashMap<TaskId, TaskRecord<T>>,

    /// Held keys + waiting list.
    pending: PendingSet<T::Key>,

    /// Tasks whose delay has not elapsed yet.
    sleeping: DelayHeap,

    next_seq: u64,
    completed: u64,
    accepting: bool,
}

impl<T: ResourceTask> QueueState<T> {
    pub(crate) fn new() -> Self {
        Self {
            records: HashMap::new(),
            pending: PendingSet::new(),
            sleeping: DelayHeap::new(),
            next_seq: 0,
            completed: 0,
            accepting: true,
        }
    }

    pub(crate) fn is_accepting(&self) -> bool {
        self.accepting
    }

    pub(crate) fn stop_accepting(&mut self) {
        self.accepting = false;
    }

    /// Register a task as sleeping until `eligible_at`.
    ///
    /// Returns true when it became the earliest deadline (the timer driver
    /// needs to re-arm).
    pub(crate) fn insert(
        &mut self,
        id: TaskId,
        task: Arc<T>,
        eligible_at: Instant,
        now: DateTime<Utc>,
    ) -> bool {
        let seq = self.next_seq;
        self.next_seq += 1;

        self.records
            .insert(id, TaskRecord::new(task, seq, now));
        self.sleeping.push(ScheduledTask {
            eligible_at,
            seq,
            task_id: id,
        });
        self.sleeping.next_deadline() == Some(eligible_at)
    }

    /// Move every due sleeper into admission, earliest first.
    pub(crate) fn promote_due(&mut self, at: Instant, now: DateTime<Utc>) -> Admitted<T> {
        self.sleeping
            .pop_due(at)
            .into_iter()
            .filter_map(|id| self.admit(id, now))
            .collect()
    }

    /// Admission: acquire every key or park the task.
    fn admit(&mut self, id: TaskId, now: DateTime<Utc>) -> Option<(TaskId, Arc<T>)> {
        let record = self.records.get_mut(&id)?;
        if self.pending.try_acquire(id, record.task.resources()) {
            record.mark_running(now);
            tracing::debug!(task_id = %id, task = record.task.name(), "task admitted");
            Some((id, Arc::clone(&record.task)))
        } else {
            record.mark_waiting();
            self.pending.park(id, record.task.resources());
            tracing::debug!(task_id = %id, task = record.task.name(), "task waiting on resources");
            None
        }
    }

    /// Release a running task's keys and re-evaluate the waiting list.
    pub(crate) fn complete(&mut self, id: TaskId, now: DateTime<Utc>) -> Completion<T> {
        match self.records.get(&id).map(|record| record.state) {
            None => return Completion::Unknown,
            Some(state) if state.holds_resources() => {}
            Some(state) => return Completion::NotRunning(state),
        }
        let Some(record) = self.records.remove(&id) else {
            return Completion::Unknown;
        };

        let freed = self.pending.release(id, record.task.resources());
        self.completed += 1;
        let admitted = if freed > 0 {
            self.admit_waiting(record.task.resources(), now)
        } else {
            Vec::new()
        };
        Completion::Released {
            task: record.task,
            freed,
            admitted,
        }
    }

    fn admit_waiting(&mut self, freed: &HashSet<T::Key>, now: DateTime<Utc>) -> Admitted<T> {
        self.pending
            .sweep(freed)
            .into_iter()
            .filter_map(|id| {
                let record = self.records.get_mut(&id)?;
                record.mark_running(now);
                Some((id, Arc::clone(&record.task)))
            })
            .collect()
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.sleeping.next_deadline()
    }

    /// Nothing sleeping, waiting or running.
    pub(crate) fn is_idle(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn counts(&self) -> QueueCounts {
        let mut counts = QueueCounts {
            completed: self.completed,
            held_keys: self.pending.held_len(),
            ..QueueCounts::default()
        };
        for record in self.records.values() {
            match record.state {
                TaskState::Sleeping => counts.sleeping += 1,
                TaskState::Waiting => counts.waiting += 1,
                TaskState::Running => counts.running += 1,
            }
        }
        counts
    }

    pub(crate) fn info(&self, id: TaskId) -> Option<TaskInfo> {
        self.records.get(&id).map(|record| TaskInfo::from_record(id, record))
    }

    /// Snapshot ordered running -> waiting -> sleeping, then by submission.
    pub(crate) fn snapshot(&self) -> Vec<TaskInfo> {
        let mut entries: Vec<(&TaskId, &TaskRecord<T>)> = self.records.iter().collect();
        entries.sort_by_key(|(_, record)| (record.state, record.seq));
        entries
            .into_iter()
            .map(|(id, record)| TaskInfo::from_record(*id, record))
            .collect()
    }
}
