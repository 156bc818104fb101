//! Processor port - admitted タスクの実行先
//!
//! キューは全ての key を確保した後に `process` を一度だけ呼びます。
//! ロックは保持していないので、`process` の中から `Ticket::processed()` を
//! 同期的に呼んでも構いません。

use crate::domain::ResourceTask;
use crate::queue::Ticket;

/// Executes admitted tasks.
///
/// `process` should return quickly: long work belongs on another thread or
/// task, carrying the ticket with it. The task's keys stay held until the
/// ticket is processed or dropped.
pub trait Processor<T: ResourceTask>: Send + Sync + 'static {
    fn process(&self, ticket: Ticket<T>);
}

impl<T, F> Processor<T> for F
where
    T: ResourceTask,
    F: Fn(Ticket<T>) + Send + Sync + 'static,
{
    fn process(&self, ticket: Ticket<T>) {
        self(ticket)
    }
}
