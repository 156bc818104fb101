//! PriorityLockedQueue: delay-ordered admission with exclusive resource keys.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::periodic::{self, PeriodicHandle};
use super::state::{Admitted, Completion, QueueState};
use super::{driver, ticket::Ticket};
use crate::domain::{ResourceTask, TaskId};
use crate::error::QueueError;
use crate::observability::{QueueCounts, TaskInfo};
use crate::ports::{Clock, IdGenerator, Processor, TaskListener};

/// Upper bound for a single delay; `Instant + Duration` would panic past it.
const MAX_DELAY: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// Admitted tasks not yet handed to the processor.
///
/// A thread listed in `draining` is inside the dispatch loop. Work admitted
/// on that thread (a processor calling `processed` inline) is appended here
/// and picked up by the loop instead of recursing.
struct Outbox<T> {
    ready: VecDeque<(TaskId, Arc<T>)>,
    draining: Vec<ThreadId>,
}

/// State shared between the queue handle, its timer driver and tickets.
pub(crate) struct Shared<T: ResourceTask> {
    pub(crate) name: String,
    state: Mutex<QueueState<T>>,
    outbox: Mutex<Outbox<T>>,
    processor: Arc<dyn Processor<T>>,
    listeners: Vec<Arc<dyn TaskListener<T>>>,
    ids: Box<dyn IdGenerator>,
    clock: Arc<dyn Clock>,

    /// Wakes the timer driver when an earlier deadline appears.
    pub(crate) wake: Notify,

    /// Signalled whenever the queue becomes idle.
    idle: Notify,
}

/// Leaves the dispatch loop for the current thread, even on unwind.
struct DrainGuard<'a, T: ResourceTask> {
    shared: &'a Shared<T>,
    thread: ThreadId,
}

impl<T: ResourceTask> Drop for DrainGuard<'_, T> {
    fn drop(&mut self) {
        let mut outbox = self.shared.outbox();
        outbox.draining.retain(|t| *t != self.thread);
        if thread::panicking() && !outbox.ready.is_empty() {
            // 残りは次の dispatch（timer driver を含む）が拾う
            tracing::warn!(
                queue = %self.shared.name,
                pending = outbox.ready.len(),
                "processor panicked; deferring remaining admitted tasks"
            );
            self.shared.wake.notify_one();
        }
    }
}

impl<T: ResourceTask> Shared<T> {
    /// Coordination lock. Poisoning is ignored: state is consistent before any
    /// user code runs, because dispatch happens outside the lock.
    pub(crate) fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn outbox(&self) -> MutexGuard<'_, Outbox<T>> {
        self.outbox.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand admitted tasks to the processor. Must be called without the lock.
    ///
    /// Runs iteratively: a nested call on a thread that is already
    /// dispatching only enqueues, so inline `processed` chains use constant
    /// stack. Each ticket is created right before its `process` call.
    pub(crate) fn dispatch(self: &Arc<Self>, admitted: Admitted<T>) {
        let me = thread::current().id();
        {
            let mut outbox = self.outbox();
            outbox.ready.extend(admitted);
            if outbox.ready.is_empty() || outbox.draining.contains(&me) {
                return;
            }
            outbox.draining.push(me);
        }
        let _guard = DrainGuard {
            shared: self.as_ref(),
            thread: me,
        };

        loop {
            let Some((id, task)) = self.outbox().ready.pop_front() else {
                break;
            };
            self.notify_listeners(id, &task, |listener, id, task| listener.on_start(id, task));
            let ticket = Ticket::new(id, task, Arc::downgrade(self));
            self.processor.process(ticket);
        }
    }

    fn notify_listeners(
        &self,
        id: TaskId,
        task: &T,
        hook: impl Fn(&dyn TaskListener<T>, TaskId, &T),
    ) {
        for listener in &self.listeners {
            let result = panic::catch_unwind(AssertUnwindSafe(|| hook(listener.as_ref(), id, task)));
            if result.is_err() {
                tracing::warn!(queue = %self.name, task_id = %id, "task listener panicked");
            }
        }
    }

    /// Register `task` and, for a zero delay, run admission right away.
    pub(crate) fn submit(
        self: &Arc<Self>,
        task: Arc<T>,
        delay: Duration,
    ) -> Result<TaskId, QueueError> {
        let delay = delay.min(MAX_DELAY);
        let id = self.ids.generate_task_id();
        let name = task.name().to_string();

        let (admitted, rearm) = {
            let mut state = self.lock();
            if !state.is_accepting() {
                return Err(QueueError::ShutDown(self.name.clone()));
            }
            let now = Instant::now();
            let earliest = state.insert(id, task, now + delay, self.clock.now());
            let admitted = if delay.is_zero() {
                state.promote_due(now, self.clock.now())
            } else {
                Vec::new()
            };
            (admitted, earliest && !delay.is_zero())
        };

        tracing::debug!(
            queue = %self.name,
            task_id = %id,
            task = %name,
            delay_ms = delay.as_millis() as u64,
            "task scheduled"
        );

        if rearm {
            self.wake.notify_one();
        }
        self.dispatch(admitted);
        Ok(id)
    }

    /// Promote due sleepers and dispatch whatever was admitted.
    pub(crate) fn promote_and_dispatch(self: &Arc<Self>) -> Option<Instant> {
        let (admitted, next) = {
            let mut state = self.lock();
            let admitted = state.promote_due(Instant::now(), self.clock.now());
            (admitted, state.next_deadline())
        };
        self.dispatch(admitted);
        next
    }

    pub(crate) fn complete(self: &Arc<Self>, id: TaskId) -> bool {
        let (completion, idle) = {
            let mut state = self.lock();
            let completion = state.complete(id, self.clock.now());
            (completion, state.is_idle())
        };

        let released = match completion {
            Completion::Released {
                task,
                freed,
                admitted,
            } => {
                tracing::debug!(
                    queue = %self.name,
                    task_id = %id,
                    freed,
                    unblocked = admitted.len(),
                    "task processed"
                );
                self.notify_listeners(id, &task, |listener, id, task| listener.on_stop(id, task));
                self.dispatch(admitted);
                true
            }
            Completion::Unknown => {
                tracing::debug!(queue = %self.name, task_id = %id, "processed for unknown task ignored");
                false
            }
            Completion::NotRunning(state) => {
                tracing::warn!(
                    queue = %self.name,
                    task_id = %id,
                    ?state,
                    "processed called for a task that is not running"
                );
                false
            }
        };

        if idle {
            self.idle.notify_waiters();
        }
        released
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.lock().is_idle()
    }

    pub(crate) fn has_sleepers(&self) -> bool {
        self.lock().next_deadline().is_some()
    }
}

/// Queue that runs tasks once every resource key they declare is free.
///
/// - Tasks with disjoint key sets run in parallel.
/// - Tasks sharing a key never overlap; the later one waits for `processed`.
/// - A delay postpones eligibility, not priority.
///
/// Delayed tasks need the timer driver, which runs on a tokio runtime. It is
/// spawned by [`start`](Self::start) or by the first delayed submission.
/// Zero-delay submissions are admitted on the calling thread and work
/// without a runtime.
pub struct PriorityLockedQueue<T: ResourceTask> {
    shared: Arc<Shared<T>>,
    shutdown_tx: watch::Sender<bool>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl<T: ResourceTask> PriorityLockedQueue<T> {
    pub(crate) fn from_parts(
        name: String,
        processor: Arc<dyn Processor<T>>,
        listeners: Vec<Arc<dyn TaskListener<T>>>,
        ids: Box<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                name,
                state: Mutex::new(QueueState::new()),
                outbox: Mutex::new(Outbox {
                    ready: VecDeque::new(),
                    draining: Vec::new(),
                }),
                processor,
                listeners,
                ids,
                clock,
                wake: Notify::new(),
                idle: Notify::new(),
            }),
            shutdown_tx,
            driver: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Spawn the timer driver on the current tokio runtime.
    ///
    /// Idempotent until shutdown, after which it fails.
    pub fn start(&self) -> Result<(), QueueError> {
        if !self.shared.lock().is_accepting() {
            return Err(QueueError::ShutDown(self.shared.name.clone()));
        }
        let mut driver = self.driver.lock().unwrap_or_else(PoisonError::into_inner);
        if driver.is_some() {
            return Ok(());
        }
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| QueueError::NoRuntime(e.to_string()))?;
        let shared = Arc::clone(&self.shared);
        let shutdown_rx = self.shutdown_tx.subscribe();
        *driver = Some(handle.spawn(driver::run(shared, shutdown_rx)));
        tracing::info!(queue = %self.shared.name, "queue started");
        Ok(())
    }

    /// Submit `task` to become eligible after `delay`.
    ///
    /// Never blocks. A zero delay attempts admission right away on the
    /// calling thread. A longer delay goes through the timer driver, which
    /// is started here if needed; outside a tokio runtime that fails with
    /// [`QueueError::NoRuntime`] and the task is not accepted.
    pub fn schedule(&self, task: T, delay: Duration) -> Result<TaskId, QueueError> {
        self.schedule_arc(Arc::new(task), delay)
    }

    pub fn schedule_arc(&self, task: Arc<T>, delay: Duration) -> Result<TaskId, QueueError> {
        if !delay.is_zero() {
            self.start()?;
        }
        self.shared.submit(task, delay)
    }

    /// Submit a new task from `factory` every `interval`, first after
    /// `initial_delay`.
    ///
    /// Each instance is admitted like a zero-delay `schedule`. The schedule
    /// runs until cancelled through the handle or until the queue shuts down.
    pub fn schedule_at_fixed_rate<F>(
        &self,
        factory: F,
        initial_delay: Duration,
        interval: Duration,
    ) -> Result<PeriodicHandle, QueueError>
    where
        F: Fn() -> T + Send + 'static,
    {
        if interval.is_zero() {
            return Err(QueueError::InvalidSchedule(
                "interval must be greater than zero".to_string(),
            ));
        }
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| QueueError::NoRuntime(e.to_string()))?;
        if !self.shared.lock().is_accepting() {
            return Err(QueueError::ShutDown(self.shared.name.clone()));
        }

        let first = Instant::now() + initial_delay.min(MAX_DELAY);
        let join = handle.spawn(periodic::run(
            Arc::clone(&self.shared),
            factory,
            first,
            interval.min(MAX_DELAY),
            self.shutdown_tx.subscribe(),
        ));
        tracing::info!(
            queue = %self.shared.name,
            interval_ms = interval.as_millis() as u64,
            "periodic schedule registered"
        );
        Ok(PeriodicHandle::new(join))
    }

    /// Synchronous, zero-delay admission attempt.
    ///
    /// Returns true when the task was accepted for tracking (dispatched, or
    /// parked behind a held key), false when the queue has been shut down.
    pub fn process_item(&self, task: T) -> bool {
        match self.schedule(task, Duration::ZERO) {
            Ok(_) => true,
            Err(err) => {
                tracing::debug!(queue = %self.shared.name, error = %err, "task rejected");
                false
            }
        }
    }

    /// Completion signal for a running task: frees its keys and dispatches
    /// any waiter that becomes admissible.
    ///
    /// Idempotent. Returns false when nothing was released (unknown id,
    /// already processed, or the task is not running).
    pub fn processed(&self, id: TaskId) -> bool {
        self.shared.complete(id)
    }

    pub fn counts_by_state(&self) -> QueueCounts {
        self.shared.lock().counts()
    }

    pub fn task(&self, id: TaskId) -> Option<TaskInfo> {
        self.shared.lock().info(id)
    }

    /// Every live task, running first.
    pub fn tasks(&self) -> Vec<TaskInfo> {
        self.shared.lock().snapshot()
    }

    /// Resolve once nothing is sleeping, waiting or running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            // notify_waiters は登録済みの waiter にしか届かないので先に enable
            notified.as_mut().enable();
            if self.shared.is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Stop accepting new tasks. Already-sleeping tasks still become
    /// eligible; the driver exits once none are left. Periodic schedules
    /// stop.
    pub fn shutdown(&self) {
        self.shared.lock().stop_accepting();
        // send_replace: later subscribers must still see the flag
        self.shutdown_tx.send_replace(true);
        tracing::info!(queue = %self.shared.name, "queue shutting down");
    }

    /// Shutdown and wait for the timer driver to drain.
    pub async fn shutdown_and_join(&self) {
        self.shutdown();
        let driver = self
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(join) = driver
            && let Err(e) = join.await
        {
            tracing::warn!(queue = %self.shared.name, error = %e, "timer driver ended abnormally");
        }
    }
}

impl<T: ResourceTask> Drop for PriorityLockedQueue<T> {
    fn drop(&mut self) {
        self.shared.lock().stop_accepting();
        self.shutdown_tx.send_replace(true);
    }
}
