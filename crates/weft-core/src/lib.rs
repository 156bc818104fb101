//! weft-core
//!
//! In-process work queue that runs tasks under exclusive resource keys.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, ResourceTask, TaskState）
//! - **ports**: 抽象化レイヤー（Processor, TaskListener, Clock, IdGenerator）
//! - **queue**: PriorityLockedQueue と内部の bookkeeping
//! - **impls**: 実装（SpawnProcessor）
//! - **config**: QueueConfig
//! - **observability**: status views
//! - **error**: エラー型

pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod queue;

pub use config::QueueConfig;
pub use domain::{KeyedTask, ResourceKey, ResourceTask, TaskId, TaskState};
pub use error::{HandlerError, QueueError};
pub use impls::{SpawnProcessor, TaskHandler};
pub use observability::{QueueCounts, TaskInfo};
pub use ports::{Processor, TaskListener};
pub use queue::{PeriodicHandle, PriorityLockedQueue, QueueBuilder, Ticket};
