//! Periodic wake-up signal driving the countdown.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::debug;

/// Name of the signal that advances the timer.
pub const TICK_SIGNAL: &str = "pomodoroTimer";

pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_secs(1);

/// Something that fires named, periodic signals.
///
/// Arming a name that is already armed is a no-op.
pub trait Scheduler: Send + Sync {
    fn arm(&self, name: &str, period: Duration);

    /// Returns whether a timer was actually cleared.
    fn disarm(&self, name: &str) -> bool;

    fn is_armed(&self, name: &str) -> bool;
}

/// Tokio interval per armed name, each forwarding its name into a channel.
pub struct IntervalScheduler {
    tx: mpsc::UnboundedSender<String>,
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl IntervalScheduler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            tx,
            timers: Mutex::new(HashMap::new()),
        };
        (scheduler, rx)
    }

    fn timers(&self) -> std::sync::MutexGuard<'_, HashMap<String, JoinHandle<()>>> {
        self.timers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Scheduler for IntervalScheduler {
    fn arm(&self, name: &str, period: Duration) {
        let mut timers = self.timers();
        if timers.get(name).is_some_and(|t| !t.is_finished()) {
            return;
        }

        let tx = self.tx.clone();
        let signal = name.to_string();
        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if tx.send(signal.clone()).is_err() {
                    break;
                }
            }
        });
        debug!(signal = name, period_ms = period.as_millis() as u64, "scheduler armed");
        timers.insert(name.to_string(), handle);
    }

    fn disarm(&self, name: &str) -> bool {
        match self.timers().remove(name) {
            Some(handle) => {
                handle.abort();
                debug!(signal = name, "scheduler disarmed");
                true
            }
            None => false,
        }
    }

    fn is_armed(&self, name: &str) -> bool {
        self.timers().get(name).is_some_and(|t| !t.is_finished())
    }
}

impl Drop for IntervalScheduler {
    fn drop(&mut self) {
        for (_, handle) in self.timers().drain() {
            handle.abort();
        }
    }
}
