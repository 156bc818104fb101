//! Ticket: the handle a processor receives for one admitted task.

use std::fmt;
use std::sync::{Arc, Weak};

use super::locked::Shared;
use crate::domain::{ResourceTask, TaskId};

/// Handle for a running task.
///
/// The task's keys stay held until `processed()` is called or the ticket is
/// dropped, whichever comes first. Dropping covers the early-return and
/// panic paths, so a processor cannot leak keys by accident.
///
/// # 使用例
/// ```ignore
/// let processor = |ticket: Ticket<MyTask>| {
///     tokio::spawn(async move {
///         apply(ticket.task()).await;
///         ticket.processed();
///     });
/// };
/// ```
#[must_use = "dropping a ticket releases the task's resources immediately"]
pub struct Ticket<T: ResourceTask> {
    id: TaskId,
    task: Arc<T>,
    queue: Weak<Shared<T>>,
    released: bool,
}

impl<T: ResourceTask> Ticket<T> {
    pub(crate) fn new(id: TaskId, task: Arc<T>, queue: Weak<Shared<T>>) -> Self {
        Self {
            id,
            task,
            queue,
            released: false,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn task(&self) -> &T {
        &self.task
    }

    pub fn task_arc(&self) -> Arc<T> {
        Arc::clone(&self.task)
    }

    /// Signal completion: release the keys and unblock waiters.
    pub fn processed(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        // queue が先に drop されていれば解放先もない
        if let Some(shared) = self.queue.upgrade() {
            shared.complete(self.id);
        }
    }
}

impl<T: ResourceTask> Drop for Ticket<T> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T: ResourceTask> fmt::Debug for Ticket<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ticket")
            .field("id", &self.id)
            .field("task", &self.task.name())
            .field("released", &self.released)
            .finish()
    }
}
