//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **SpawnProcessor**: async handler を tokio 上で実行する Processor

pub mod spawn;

pub use self::spawn::{SpawnProcessor, TaskHandler};
