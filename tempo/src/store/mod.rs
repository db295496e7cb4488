//! Key-value persistence boundary.
//!
//! Everything the daemon knows lives behind [`KeyValueStore`]: a flat,
//! last-write-wins namespace with no transactions. Handlers read what they
//! need once, compute, and write back once.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

pub type Entries = HashMap<String, Value>;

/// Persisted key names.
pub mod keys {
    pub const TIME_LEFT: &str = "timeLeft";
    pub const IS_RUNNING: &str = "isRunning";
    pub const SESSION_TYPE: &str = "sessionType";
    pub const IS_BREAK: &str = "isBreak";
    pub const COMPLETED_FOCUS_COUNT: &str = "completedFocusCount";
    pub const LEGACY_POMODORO_COUNT: &str = "pomodoroCount";
    pub const SESSION_COMPLETE: &str = "sessionComplete";
    pub const SESSION_START_TIME: &str = "sessionStartTime";
    pub const CURRENT_PROJECT_NAME: &str = "currentProjectName";
    pub const SETTINGS: &str = "settings";
    pub const HISTORY: &str = "pomodoroHistory";
    pub const PROJECT_HISTORY: &str = "projectHistory";
}

/// Async key-value store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns the values present for `keys`. Absent keys are simply missing
    /// from the result.
    async fn get(&self, keys: &[&str]) -> StoreResult<Entries>;

    /// Writes every entry, overwriting existing values.
    async fn set(&self, entries: Entries) -> StoreResult<()>;

    /// Deletes `keys`; deleting an absent key is not an error.
    async fn remove(&self, keys: &[&str]) -> StoreResult<()>;
}
