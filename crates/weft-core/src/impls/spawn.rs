//! SpawnProcessor - async handler を tokio 上で実行する Processor
//!
//! # 流れ
//! 1. `process` が ticket を受け取る（ロック外、呼び出し元スレッド）
//! 2. tokio task を spawn して semaphore の permit を待つ
//! 3. handler 実行（成功・失敗に関わらず）
//! 4. `ticket.processed()` で key を解放
//!
//! handler が panic しても ticket の Drop で key は解放されます。

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;

use crate::domain::ResourceTask;
use crate::error::{HandlerError, QueueError};
use crate::ports::Processor;
use crate::queue::Ticket;

/// Performs the actual work for one task (e.g. a ref update).
///
/// Failure is reported through the return value and logged; the queue
/// releases the task's keys either way.
#[async_trait]
pub trait TaskHandler<T: ResourceTask>: Send + Sync + 'static {
    async fn handle(&self, task: &T) -> Result<(), HandlerError>;
}

/// Runs a [`TaskHandler`] for each admitted task on a tokio runtime, with at
/// most `max_concurrent` handlers executing at once.
///
/// A task is admitted (its keys held) before it waits for a handler slot.
/// With a small `max_concurrent`, tasks can therefore sit in `Running` and
/// keep their keys locked while their handler has not started yet.
pub struct SpawnProcessor<T, H> {
    handler: Arc<H>,
    runtime: Handle,
    permits: Arc<Semaphore>,
    _marker: PhantomData<fn(T)>,
}

impl<T, H> SpawnProcessor<T, H>
where
    T: ResourceTask,
    H: TaskHandler<T>,
{
    /// Bind to the current runtime. `process` may later be called from any
    /// thread, including ones outside the runtime.
    pub fn new(handler: H, max_concurrent: usize) -> Result<Self, QueueError> {
        let runtime = Handle::try_current().map_err(|e| QueueError::NoRuntime(e.to_string()))?;
        Ok(Self::on(runtime, handler, max_concurrent))
    }

    pub fn on(runtime: Handle, handler: H, max_concurrent: usize) -> Self {
        Self {
            handler: Arc::new(handler),
            runtime,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            _marker: PhantomData,
        }
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}

impl<T, H> Processor<T> for SpawnProcessor<T, H>
where
    T: ResourceTask,
    H: TaskHandler<T>,
{
    fn process(&self, ticket: Ticket<T>) {
        let handler = Arc::clone(&self.handler);
        let permits = Arc::clone(&self.permits);

        self.runtime.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                // semaphore closed: ticket drop releases the keys
                tracing::warn!(task_id = %ticket.id(), "handler slots closed, skipping task");
                return;
            };

            match handler.handle(ticket.task()).await {
                Ok(()) => {
                    tracing::debug!(task_id = %ticket.id(), task = ticket.task().name(), "handler finished");
                }
                Err(e) => {
                    tracing::warn!(
                        task_id = %ticket.id(),
                        task = ticket.task().name(),
                        error = %e,
                        "handler failed"
                    );
                }
            }
            ticket.processed();
        });
    }
}
