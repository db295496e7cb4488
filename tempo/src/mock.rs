//! Recording collaborators for tests

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use tempo_ipc::SoundId;

use crate::notify::{NotificationPort, NotifyError};
use crate::scheduler::Scheduler;
use crate::store::{Entries, KeyValueStore, MemoryStore, StoreError, StoreResult};

/// Scheduler that only remembers which names are armed
#[derive(Debug, Default)]
pub struct RecordingScheduler {
    armed: Mutex<HashSet<String>>,
    arm_calls: Mutex<usize>,
}

impl RecordingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of arm requests, including no-op ones
    pub fn arm_calls(&self) -> usize {
        *self.arm_calls.lock().unwrap()
    }
}

impl Scheduler for RecordingScheduler {
    fn arm(&self, name: &str, _period: Duration) {
        *self.arm_calls.lock().unwrap() += 1;
        self.armed.lock().unwrap().insert(name.to_string());
    }

    fn disarm(&self, name: &str) -> bool {
        self.armed.lock().unwrap().remove(name)
    }

    fn is_armed(&self, name: &str) -> bool {
        self.armed.lock().unwrap().contains(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NotifierCall {
    Sound { sound: SoundId, looped: bool, volume: u8 },
    StopSound,
    Alert { title: String, message: String },
}

/// Notification port that records every request
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    calls: Mutex<Vec<NotifierCall>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<NotifierCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn sounds(&self) -> Vec<SoundId> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                NotifierCall::Sound { sound, .. } => Some(sound),
                _ => None,
            })
            .collect()
    }

    pub fn alerts(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                NotifierCall::Alert { title, message } => Some((title, message)),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl NotificationPort for RecordingNotifier {
    async fn play_sound(&self, sound: SoundId, looped: bool, volume: u8) -> Result<(), NotifyError> {
        self.calls
            .lock()
            .unwrap()
            .push(NotifierCall::Sound { sound, looped, volume });
        Ok(())
    }

    async fn stop_sound(&self) -> Result<(), NotifyError> {
        self.calls.lock().unwrap().push(NotifierCall::StopSound);
        Ok(())
    }

    async fn show_alert(&self, title: &str, message: &str) -> Result<(), NotifyError> {
        self.calls.lock().unwrap().push(NotifierCall::Alert {
            title: title.to_string(),
            message: message.to_string(),
        });
        Ok(())
    }
}

/// In-memory store whose writes to chosen keys can be made to fail
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failures: Mutex<HashMap<String, usize>>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wrap(inner: MemoryStore) -> Self {
        Self {
            inner,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Fails the next `times` writes that touch `key`
    pub fn fail_writes_to(&self, key: &str, times: usize) {
        self.failures.lock().unwrap().insert(key.to_string(), times);
    }

    pub fn snapshot(&self) -> Entries {
        self.inner.snapshot()
    }
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    async fn get(&self, keys: &[&str]) -> StoreResult<Entries> {
        self.inner.get(keys).await
    }

    async fn set(&self, entries: Entries) -> StoreResult<()> {
        {
            let mut failures = self.failures.lock().unwrap();
            for key in entries.keys() {
                if let Some(left) = failures.get_mut(key).filter(|left| **left > 0) {
                    *left -= 1;
                    return Err(StoreError::Unavailable(format!("injected failure writing {key}")));
                }
            }
        }
        self.inner.set(entries).await
    }

    async fn remove(&self, keys: &[&str]) -> StoreResult<()> {
        self.inner.remove(keys).await
    }
}
