//! Timer driver: the scheduled-execution facility behind delayed tasks.
//!
//! One tokio task per queue. It sleeps until the earliest eligibility
//! instant (or until woken by a new, earlier one), then pushes due tasks
//! through the same admission path `schedule` uses for zero delays.

use std::sync::Arc;

use tokio::sync::watch;

use super::locked::Shared;
use crate::domain::ResourceTask;

pub(crate) async fn run<T: ResourceTask>(
    shared: Arc<Shared<T>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut stopping = *shutdown_rx.borrow();
    loop {
        let next_wake = shared.promote_and_dispatch();

        // shutdown 後は眠っているタスクが無くなった時点で終了
        if stopping && next_wake.is_none() && !shared.has_sleepers() {
            break;
        }

        if let Some(wake_time) = next_wake {
            tokio::select! {
                _ = shared.wake.notified() => {},
                _ = tokio::time::sleep_until(wake_time) => {},
                changed = shutdown_rx.changed(), if !stopping => {
                    stopping = changed.is_err() || *shutdown_rx.borrow();
                }
            }
        } else {
            tokio::select! {
                _ = shared.wake.notified() => {},
                changed = shutdown_rx.changed(), if !stopping => {
                    stopping = changed.is_err() || *shutdown_rx.borrow();
                }
            }
        }
    }
    tracing::info!(queue = %shared.name, "timer driver stopped");
}
