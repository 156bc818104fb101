//! Fixed-rate submission: one tokio task per periodic schedule.
//!
//! Every tick builds a fresh task from the factory and submits it with zero
//! delay, so it goes through the normal admission path. An instance whose
//! keys are still held by the previous one waits like any other task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::locked::Shared;
use crate::domain::ResourceTask;

/// Handle for a fixed-rate schedule.
///
/// Dropping the handle does not stop the schedule; it ends on
/// [`cancel`](Self::cancel) or when the queue shuts down.
#[derive(Debug)]
pub struct PeriodicHandle {
    join: JoinHandle<()>,
}

impl PeriodicHandle {
    pub(crate) fn new(join: JoinHandle<()>) -> Self {
        Self { join }
    }

    /// Stop submitting new instances. Already submitted ones are unaffected.
    pub fn cancel(&self) {
        self.join.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

pub(crate) async fn run<T, F>(
    shared: Arc<Shared<T>>,
    factory: F,
    first: Instant,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    T: ResourceTask,
    F: Fn() -> T + Send + 'static,
{
    let mut ticks = tokio::time::interval_at(first, interval);
    // 遅れた tick はまとめて投入せず捨てる
    ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            _ = ticks.tick() => {}
        }

        match shared.submit(Arc::new(factory()), Duration::ZERO) {
            Ok(id) => {
                tracing::debug!(queue = %shared.name, task_id = %id, "periodic task submitted");
            }
            Err(err) => {
                tracing::debug!(queue = %shared.name, error = %err, "periodic task rejected");
                break;
            }
        }
    }
    tracing::info!(queue = %shared.name, "periodic schedule stopped");
}
