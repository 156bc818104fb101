//! Queue module: resource bookkeeping, delay heap, timer driver and the
//! `PriorityLockedQueue` that ties them together.
//!
//! # 構成
//! - **pending**: held map + waiting list（ロックを知らない純粋なデータ構造）
//! - **schedule**: eligibility 時刻順の min-heap
//! - **state**: ロック内で操作される QueueState
//! - **driver**: 遅延タスクを起こす tokio task
//! - **locked**: 公開 API（schedule / process_item / processed）
//! - **ticket**: processor に渡すハンドル
//! - **periodic**: 固定間隔でタスクを投入する tokio task

mod builder;
mod driver;
mod locked;
mod pending;
mod periodic;
mod record;
mod schedule;
mod state;
mod ticket;

#[cfg(test)]
mod scenarios;

pub use builder::QueueBuilder;
pub use locked::PriorityLockedQueue;
pub use pending::PendingSet;
pub use periodic::PeriodicHandle;
pub(crate) use record::TaskRecord;
pub use ticket::Ticket;
