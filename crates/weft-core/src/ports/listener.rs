//! TaskListener port - タスクの開始・終了の通知先
//!
//! キューは admission 後（`process` の直前）に `on_start`、key 解放後に
//! `on_stop` を呼びます。どちらもロックの外で呼ばれます。
//! listener の panic はキャッチしてログに残し、他の listener とキューには
//! 影響させません。

use crate::domain::{ResourceTask, TaskId};

/// Observes tasks as they start and stop running.
///
/// Both hooks default to no-ops, so an implementation only overrides what it
/// needs.
pub trait TaskListener<T: ResourceTask>: Send + Sync + 'static {
    /// All keys are held; the processor is about to receive the task.
    fn on_start(&self, _id: TaskId, _task: &T) {}

    /// The task was processed and its keys released.
    fn on_stop(&self, _id: TaskId, _task: &T) {}
}
