//! QueueBuilder - キューの構築とワイヤリング
//!
//! # Fail-fast 設計
//! - build() 時に設定を検証
//! - 不正な設定は QueueError::Config を返す

use std::sync::Arc;

use super::PriorityLockedQueue;
use crate::config::QueueConfig;
use crate::domain::ResourceTask;
use crate::error::QueueError;
use crate::ports::{Clock, IdGenerator, Processor, SystemClock, TaskListener, UlidGenerator};

/// QueueBuilder は PriorityLockedQueue を構築
///
/// # 使用例
/// ```ignore
/// let queue = QueueBuilder::new(processor)
///     .config(QueueConfig::named("git-mutations"))
///     .build()?;
/// queue.start()?;
/// ```
pub struct QueueBuilder<T: ResourceTask> {
    config: QueueConfig,
    processor: Arc<dyn Processor<T>>,
    listeners: Vec<Arc<dyn TaskListener<T>>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Box<dyn IdGenerator>>,
}

impl<T: ResourceTask> QueueBuilder<T> {
    pub fn new(processor: impl Processor<T>) -> Self {
        Self::with_processor(Arc::new(processor))
    }

    pub fn with_processor(processor: Arc<dyn Processor<T>>) -> Self {
        Self {
            config: QueueConfig::default(),
            processor,
            listeners: Vec::new(),
            clock: None,
            ids: None,
        }
    }

    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a listener; listeners are called in registration order.
    pub fn listener(mut self, listener: impl TaskListener<T>) -> Self {
        self.listeners.push(Arc::new(listener));
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    pub fn id_generator(mut self, ids: impl IdGenerator + 'static) -> Self {
        self.ids = Some(Box::new(ids));
        self
    }

    pub fn build(self) -> Result<PriorityLockedQueue<T>, QueueError> {
        let config = self.config.validated()?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Box::new(UlidGenerator::new(Arc::clone(&clock))));

        Ok(PriorityLockedQueue::from_parts(
            config.name,
            self.processor,
            self.listeners,
            ids,
            clock,
        ))
    }
}
