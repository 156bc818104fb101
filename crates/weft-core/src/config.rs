//! Queue configuration.
//!
//! JSON で読み込み、欠けている項目はデフォルト値で埋めます。

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// Configuration for one queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Name used in log fields and error messages.
    pub name: String,

    /// Upper bound on concurrently running async handlers (`SpawnProcessor`).
    pub max_concurrent: usize,

    /// Default tracing filter for the binary (`RUST_LOG` wins).
    pub log_level: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "work-queue".to_string(),
            max_concurrent: 4,
            log_level: "info".to_string(),
        }
    }
}

impl QueueConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn from_json_str(raw: &str) -> Result<Self, QueueError> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| QueueError::Config(e.to_string()))?;
        config.validated()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, QueueError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| QueueError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&raw)
    }

    /// Normalise values: at least one handler slot, non-empty name.
    pub fn validated(mut self) -> Result<Self, QueueError> {
        if self.name.trim().is_empty() {
            return Err(QueueError::Config("queue name must not be empty".to_string()));
        }
        self.max_concurrent = self.max_concurrent.max(1);
        Ok(self)
    }
}
