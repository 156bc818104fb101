//! Ports - 抽象化レイヤー
//!
//! キューが外部に依存する部分を trait として定義します。
//! - **Processor**: admitted タスクの実行先（outbound）
//! - **Clock**: 現在時刻
//! - **IdGenerator**: タスク ID の生成
//! - **TaskListener**: タスク開始・終了の通知

pub mod clock;
pub mod id_generator;
pub mod listener;
pub mod processor;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::listener::TaskListener;
pub use self::processor::Processor;
