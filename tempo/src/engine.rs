//! The session state machine.
//!
//! Every handler reloads what it needs from the store, computes the next
//! state and writes it back in a single `set`. Nothing survives between
//! calls except the store itself, so a fresh engine over the same store
//! picks up exactly where the previous process stopped.
//!
//! Ordering inside a handler:
//! - history is recorded before the state write, so a crash may duplicate a
//!   record but never lose one;
//! - the state write happens before the scheduler is touched, so a failed
//!   write never leaves a timer armed for a state that was not persisted.

use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempo_ipc::table::StatsTable;
use tempo_ipc::{SessionRecord, SessionState, SessionType, Settings, TimerPhase};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::history::{HistoryRecorder, HistoryResult, ImportSummary, DEFAULT_WRITE_RETRIES};
use crate::notify::NotificationPort;
use crate::scheduler::{Scheduler, DEFAULT_TICK_PERIOD, TICK_SIGNAL};
use crate::settings;
use crate::state::{self, NO_PROJECT, STATE_KEYS};
use crate::store::{keys, Entries, KeyValueStore, StoreError};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{op} failed: {source}")]
    Store {
        op: &'static str,
        #[source]
        source: StoreError,
    },
}

pub type EngineResult<T> = Result<T, EngineError>;

/// What a tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Nothing was running; any leftover timer was cleared.
    Idle,
    Counted { time_left_seconds: u64 },
    Completed(Completion),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub finished: SessionType,
    pub next: SessionType,
    pub auto_started: bool,
    /// False when the history write gave up; the transition still happened.
    pub recorded: bool,
}

/// Everything a handler reads, fetched in one `get`.
struct Snapshot {
    state: SessionState,
    settings: Settings,
    settings_stored: bool,
    projects: Vec<String>,
}

pub struct TimerEngine {
    store: Arc<dyn KeyValueStore>,
    scheduler: Arc<dyn Scheduler>,
    notifier: Arc<dyn NotificationPort>,
    history: HistoryRecorder,
    tick_period: Duration,
    gate: Mutex<()>,
}

impl TimerEngine {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        scheduler: Arc<dyn Scheduler>,
        notifier: Arc<dyn NotificationPort>,
    ) -> Self {
        Self {
            history: HistoryRecorder::new(store.clone(), DEFAULT_WRITE_RETRIES),
            store,
            scheduler,
            notifier,
            tick_period: DEFAULT_TICK_PERIOD,
            gate: Mutex::new(()),
        }
    }

    pub fn with_tick_period(mut self, period: Duration) -> Self {
        self.tick_period = period;
        self
    }

    pub fn with_history_retries(mut self, retries: usize) -> Self {
        self.history = HistoryRecorder::new(self.store.clone(), retries);
        self
    }

    pub async fn history_records(&self) -> HistoryResult<Vec<SessionRecord>> {
        let _gate = self.gate.lock().await;
        self.history.load().await
    }

    pub async fn export_stats(&self) -> HistoryResult<StatsTable> {
        let _gate = self.gate.lock().await;
        self.history.export_all().await
    }

    /// Replaces the log under the gate, so a completing tick cannot append
    /// to the history this import is about to discard.
    pub async fn import_stats(&self, rows: &[Vec<String>]) -> HistoryResult<ImportSummary> {
        let _gate = self.gate.lock().await;
        self.history.import_replace(rows).await
    }

    pub async fn reset_stats(&self) -> HistoryResult<()> {
        let _gate = self.gate.lock().await;
        self.history.reset_all().await
    }

    /// Brings the scheduler in line with the persisted state after a
    /// restart and installs default settings on first run.
    pub async fn recover(&self) -> EngineResult<SessionState> {
        let _gate = self.gate.lock().await;
        let snap = self.load("recover").await?;

        if !snap.settings_stored {
            self.save("install default settings", settings_entry(&snap.settings))
                .await?;
            info!("installed default settings");
        }

        if snap.state.is_running {
            self.arm();
            info!(
                session = %snap.state.session_type,
                time_left = snap.state.time_left_seconds,
                "resumed running session"
            );
        } else {
            self.scheduler.disarm(TICK_SIGNAL);
        }
        Ok(snap.state)
    }

    pub async fn start(&self, session_type: SessionType, project: Option<&str>) -> EngineResult<SessionState> {
        let _gate = self.gate.lock().await;
        let snap = self.load("start timer").await?;
        self.begin_locked("start timer", snap, session_type, project, false)
            .await
    }

    /// Starts a new focus cycle with the long break counter reset.
    pub async fn start_cycle(&self, project: Option<&str>) -> EngineResult<SessionState> {
        let _gate = self.gate.lock().await;
        let snap = self.load("start cycle").await?;
        self.begin_locked("start cycle", snap, SessionType::Focus, project, true)
            .await
    }

    pub async fn toggle(&self) -> EngineResult<SessionState> {
        let _gate = self.gate.lock().await;
        let snap = self.load("toggle timer").await?;
        if snap.state.is_running {
            self.pause_locked(snap).await
        } else {
            self.continue_locked("toggle timer", snap).await
        }
    }

    pub async fn pause(&self) -> EngineResult<SessionState> {
        let _gate = self.gate.lock().await;
        let snap = self.load("pause timer").await?;
        self.pause_locked(snap).await
    }

    pub async fn resume(&self) -> EngineResult<SessionState> {
        let _gate = self.gate.lock().await;
        let snap = self.load("resume timer").await?;
        if snap.state.is_running {
            self.arm();
            return Ok(snap.state);
        }
        self.continue_locked("resume timer", snap).await
    }

    /// Resets the session to defaults from any state.
    pub async fn stop(&self) -> EngineResult<SessionState> {
        let _gate = self.gate.lock().await;
        let state = SessionState::default();
        self.save("stop timer", state::encode_state(&state)).await?;
        self.scheduler.disarm(TICK_SIGNAL);
        if let Err(e) = self.notifier.stop_sound().await {
            warn!(error = %e, "failed to stop sound");
        }
        info!("timer stopped");
        Ok(state)
    }

    /// Handles one wake-up of the tick signal.
    pub async fn tick(&self) -> EngineResult<TickOutcome> {
        let _gate = self.gate.lock().await;
        let mut snap = self.load("tick").await?;

        if !snap.state.is_running {
            if self.scheduler.disarm(TICK_SIGNAL) {
                debug!("stray tick for an idle timer, scheduler disarmed");
            }
            return Ok(TickOutcome::Idle);
        }

        if snap.state.time_left_seconds > 1 {
            snap.state.time_left_seconds -= 1;
            self.save("tick", state::encode_state(&snap.state)).await?;
            return Ok(TickOutcome::Counted {
                time_left_seconds: snap.state.time_left_seconds,
            });
        }

        snap.state.time_left_seconds = 0;
        let completion = self.complete_locked(snap).await?;
        Ok(TickOutcome::Completed(completion))
    }

    /// Merges a partial settings object onto the stored settings.
    ///
    /// A running session whose duration changed keeps its progress ratio.
    pub async fn update_settings(&self, partial: &Value) -> EngineResult<Settings> {
        let _gate = self.gate.lock().await;
        let mut snap = self.load("update settings").await?;
        let current_type = snap.state.session_type;
        let old_duration = snap.settings.duration_seconds(current_type);
        let merged = settings::merge_onto(snap.settings.clone(), partial);
        let new_duration = merged.duration_seconds(current_type);

        let mut entries = settings_entry(&merged);
        if snap.state.is_running && snap.state.time_left_seconds > 0 && new_duration != old_duration {
            let old_left = snap.state.time_left_seconds;
            snap.state.time_left_seconds = state::rescale_time_left(old_left, new_duration);
            entries.extend(state::encode_state(&snap.state));
            info!(
                session = %current_type,
                old_left,
                new_left = snap.state.time_left_seconds,
                "rescaled running session"
            );
        }
        self.save("update settings", entries).await?;
        Ok(merged)
    }

    pub async fn state(&self) -> EngineResult<SessionState> {
        Ok(self.load("get timer state").await?.state)
    }

    pub async fn settings(&self) -> EngineResult<Settings> {
        Ok(self.load("get settings").await?.settings)
    }

    pub async fn project_history(&self) -> EngineResult<Vec<String>> {
        Ok(self.load("get project history").await?.projects)
    }

    async fn begin_locked(
        &self,
        op: &'static str,
        mut snap: Snapshot,
        session_type: SessionType,
        project: Option<&str>,
        reset_cycle: bool,
    ) -> EngineResult<SessionState> {
        if reset_cycle {
            snap.state.completed_focus_count = 0;
        }
        begin(&mut snap.state, &snap.settings, session_type);

        let project = project.map(str::trim).filter(|name| !name.is_empty());
        if let Some(name) = project {
            snap.state.current_project_name = Some(name.to_string());
            state::remember_project(&mut snap.projects, name);
        }
        let mut entries = state::encode_state(&snap.state);
        if project.is_some() {
            entries.insert(keys::PROJECT_HISTORY.to_string(), json!(snap.projects));
        }

        self.save(op, entries).await?;
        self.arm();
        self.announce_start(&snap.settings, session_type).await;
        info!(
            session = %session_type,
            time_left = snap.state.time_left_seconds,
            project = snap.state.current_project_name.as_deref().unwrap_or(NO_PROJECT),
            "session started"
        );
        Ok(snap.state)
    }

    async fn pause_locked(&self, mut snap: Snapshot) -> EngineResult<SessionState> {
        if !snap.state.is_running {
            self.scheduler.disarm(TICK_SIGNAL);
            return Ok(snap.state);
        }
        snap.state.is_running = false;
        self.save("pause timer", state::encode_state(&snap.state)).await?;
        self.scheduler.disarm(TICK_SIGNAL);
        info!(time_left = snap.state.time_left_seconds, "timer paused");
        Ok(snap.state)
    }

    /// Resumes a paused session, or starts the pending one when there is
    /// nothing left on the clock.
    async fn continue_locked(&self, op: &'static str, mut snap: Snapshot) -> EngineResult<SessionState> {
        if snap.state.phase() == TimerPhase::Complete || snap.state.time_left_seconds == 0 {
            let session_type = snap.state.session_type;
            return self.begin_locked(op, snap, session_type, None, false).await;
        }

        snap.state.is_running = true;
        snap.state.session_start_time.get_or_insert_with(Utc::now);
        self.save(op, state::encode_state(&snap.state)).await?;
        self.arm();
        info!(time_left = snap.state.time_left_seconds, "timer resumed");
        Ok(snap.state)
    }

    async fn complete_locked(&self, mut snap: Snapshot) -> EngineResult<Completion> {
        let now = Utc::now();
        let finished = snap.state.session_type;
        let started = snap.state.session_start_time.unwrap_or(now);
        let elapsed_ms = (now - started).num_milliseconds().max(0) as f64;

        let record = SessionRecord {
            start_time: started,
            end_time: now,
            session_type: finished,
            duration_minutes: (elapsed_ms / 600.0).round() / 100.0,
            project_name: snap
                .state
                .current_project_name
                .clone()
                .unwrap_or_else(|| NO_PROJECT.to_string()),
        };
        let recorded = match self.history.record(record).await {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, session = %finished, "finished session was not recorded");
                false
            }
        };

        let settings = &snap.settings;
        let next = state::advance(&mut snap.state, settings.long_break.start_after_count);
        let auto_started = settings.auto_starts(next);
        if auto_started {
            begin(&mut snap.state, settings, next);
        } else {
            snap.state.session_type = next;
            snap.state.time_left_seconds = settings.duration_seconds(next);
            snap.state.is_running = false;
            snap.state.session_complete = true;
            snap.state.session_start_time = None;
        }

        self.save("complete session", state::encode_state(&snap.state))
            .await?;
        self.scheduler.disarm(TICK_SIGNAL);
        if auto_started {
            self.arm();
        }

        self.play_completion_sound(settings, finished).await;
        if auto_started {
            self.announce_start(settings, next).await;
        }
        if settings.session(finished).desktop_notification {
            let (title, message) = completion_alert(finished, next);
            if let Err(e) = self.notifier.show_alert(title, message).await {
                warn!(error = %e, "failed to show completion alert");
            }
        }

        info!(
            finished = %finished,
            next = %next,
            auto_started,
            completed_focus = snap.state.completed_focus_count,
            "session complete"
        );
        Ok(Completion {
            finished,
            next,
            auto_started,
            recorded,
        })
    }

    async fn load(&self, op: &'static str) -> EngineResult<Snapshot> {
        let mut wanted = STATE_KEYS.to_vec();
        wanted.extend([keys::SETTINGS, keys::PROJECT_HISTORY]);
        let entries = self
            .store
            .get(&wanted)
            .await
            .map_err(|source| EngineError::Store { op, source })?;

        let stored_settings = entries.get(keys::SETTINGS).filter(|v| !v.is_null());
        Ok(Snapshot {
            state: state::decode_state(&entries),
            settings: stored_settings.map(settings::merge).unwrap_or_default(),
            settings_stored: stored_settings.is_some(),
            projects: state::decode_projects(&entries),
        })
    }

    async fn save(&self, op: &'static str, entries: Entries) -> EngineResult<()> {
        self.store
            .set(entries)
            .await
            .map_err(|source| EngineError::Store { op, source })
    }

    fn arm(&self) {
        self.scheduler.arm(TICK_SIGNAL, self.tick_period);
    }

    /// Focus sessions open with their sound; breaks start silently.
    async fn announce_start(&self, settings: &Settings, session_type: SessionType) {
        if session_type == SessionType::Focus {
            self.play_completion_sound(settings, SessionType::Focus).await;
        }
    }

    async fn play_completion_sound(&self, settings: &Settings, session_type: SessionType) {
        let block = settings.session(session_type);
        if !settings.general.sound_enabled || block.completion_sound.is_silent() {
            return;
        }
        if let Err(e) = self
            .notifier
            .play_sound(block.completion_sound, false, block.completion_volume)
            .await
        {
            warn!(error = %e, session = %session_type, "failed to play sound");
        }
    }
}

/// Puts `state` at the beginning of a fresh `session_type` session.
fn begin(state: &mut SessionState, settings: &Settings, session_type: SessionType) {
    state.session_type = session_type;
    state.time_left_seconds = settings.duration_seconds(session_type);
    state.is_running = true;
    state.session_complete = false;
    state.session_start_time = Some(Utc::now());
}

fn settings_entry(settings: &Settings) -> Entries {
    Entries::from([(keys::SETTINGS.to_string(), json!(settings))])
}

pub fn completion_alert(finished: SessionType, next: SessionType) -> (&'static str, &'static str) {
    match (finished, next) {
        (SessionType::Focus, SessionType::LongBreak) => {
            ("Time for a long break!", "Nice streak. Step away and recharge.")
        }
        (SessionType::Focus, _) => ("Time for a break!", "Take a moment to rest and reset."),
        _ => ("Time to focus!", "Back to it. One session at a time."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{FlakyStore, NotifierCall, RecordingNotifier, RecordingScheduler};
    use crate::store::{MemoryStore, StoreResult};
    use tempo_ipc::SoundId;

    struct Harness {
        store: Arc<FlakyStore>,
        scheduler: Arc<RecordingScheduler>,
        notifier: Arc<RecordingNotifier>,
        engine: TimerEngine,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_store(FlakyStore::new())
        }

        fn with_settings(settings: Value) -> Self {
            Self::with_store(FlakyStore::wrap(MemoryStore::with_entries([(keys::SETTINGS, settings)])))
        }

        fn with_store(store: FlakyStore) -> Self {
            let store = Arc::new(store);
            let scheduler = Arc::new(RecordingScheduler::new());
            let notifier = Arc::new(RecordingNotifier::new());
            let engine = TimerEngine::new(store.clone(), scheduler.clone(), notifier.clone())
                .with_history_retries(0);
            Self {
                store,
                scheduler,
                notifier,
                engine,
            }
        }

        /// A second engine over the same collaborators, as after a restart.
        fn restarted(&self) -> TimerEngine {
            TimerEngine::new(self.store.clone(), self.scheduler.clone(), self.notifier.clone())
        }

        fn armed(&self) -> bool {
            self.scheduler.is_armed(TICK_SIGNAL)
        }

        async fn tick_until_complete(&self) -> Completion {
            for _ in 0..100_000 {
                if let TickOutcome::Completed(c) = self.engine.tick().await.unwrap() {
                    return c;
                }
            }
            panic!("session never completed");
        }
    }

    #[tokio::test]
    async fn start_focus_uses_configured_minutes() {
        let h = Harness::new();
        let state = h.engine.start(SessionType::Focus, None).await.unwrap();
        assert_eq!(state.time_left_seconds, 1500);
        assert!(state.is_running);
        assert!(state.session_start_time.is_some());
        assert!(h.armed());

        let stored = h.engine.state().await.unwrap();
        assert_eq!(stored, state);
    }

    #[tokio::test]
    async fn focus_start_plays_its_sound_breaks_do_not() {
        let h = Harness::new();
        h.engine.start(SessionType::ShortBreak, None).await.unwrap();
        assert!(h.notifier.sounds().is_empty());

        h.engine.start(SessionType::Focus, None).await.unwrap();
        assert_eq!(h.notifier.sounds(), vec![SoundId::Beep]);
    }

    #[tokio::test]
    async fn muted_settings_play_nothing() {
        let h = Harness::with_settings(json!({"general": {"soundEnabled": false}}));
        h.engine.start(SessionType::Focus, None).await.unwrap();
        assert!(h.notifier.sounds().is_empty());
    }

    #[tokio::test]
    async fn ticks_count_down_to_zero_then_complete() {
        let h = Harness::with_settings(json!({"shortBreak": {"durationMinutes": 0.05}}));
        h.engine.start(SessionType::ShortBreak, None).await.unwrap();

        let mut last = 3;
        loop {
            match h.engine.tick().await.unwrap() {
                TickOutcome::Counted { time_left_seconds } => {
                    assert!(time_left_seconds < last);
                    assert!(time_left_seconds > 0);
                    last = time_left_seconds;
                }
                TickOutcome::Completed(c) => {
                    assert_eq!(last, 1);
                    assert_eq!(c.finished, SessionType::ShortBreak);
                    assert_eq!(c.next, SessionType::Focus);
                    break;
                }
                TickOutcome::Idle => panic!("timer stopped running"),
            }
        }

        let state = h.engine.state().await.unwrap();
        assert!(!state.is_running);
        assert!(state.session_complete);
        assert_eq!(state.session_type, SessionType::Focus);
        assert_eq!(state.time_left_seconds, 1500);
        assert!(!h.armed());
    }

    #[tokio::test]
    async fn long_break_after_every_fourth_focus() {
        let h = Harness::with_settings(json!({"focus": {"durationMinutes": 0.05}}));
        let mut nexts = Vec::new();
        for _ in 0..4 {
            h.engine.start(SessionType::Focus, None).await.unwrap();
            nexts.push(h.tick_until_complete().await.next);
        }
        assert_eq!(
            nexts,
            vec![
                SessionType::ShortBreak,
                SessionType::ShortBreak,
                SessionType::ShortBreak,
                SessionType::LongBreak
            ]
        );
        assert_eq!(h.engine.state().await.unwrap().completed_focus_count, 4);
    }

    #[tokio::test]
    async fn completion_records_history_and_alerts() {
        let h = Harness::with_settings(json!({"focus": {"durationMinutes": 0.05, "completionSound": "chime"}}));
        h.engine.start(SessionType::Focus, Some("thesis")).await.unwrap();
        h.notifier.clear();

        let c = h.tick_until_complete().await;
        assert!(c.recorded);
        assert!(!c.auto_started);

        let records = h.engine.history_records().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].session_type, SessionType::Focus);
        assert_eq!(records[0].project_name, "thesis");
        assert!(records[0].duration_minutes >= 0.0);

        assert_eq!(h.notifier.sounds(), vec![SoundId::Chime]);
        assert_eq!(
            h.notifier.alerts(),
            vec![("Time for a break!".to_string(), "Take a moment to rest and reset.".to_string())]
        );
    }

    #[tokio::test]
    async fn disabled_alerts_stay_quiet() {
        let h = Harness::with_settings(json!({"shortBreak": {"durationMinutes": 0.05, "desktopNotification": false}}));
        h.engine.start(SessionType::ShortBreak, None).await.unwrap();
        h.tick_until_complete().await;
        assert!(h.notifier.alerts().is_empty());
    }

    #[tokio::test]
    async fn auto_start_chains_into_the_next_session() {
        let h = Harness::with_settings(json!({
            "focus": {"durationMinutes": 0.05},
            "general": {"autoStartBreaks": true}
        }));
        h.engine.start(SessionType::Focus, None).await.unwrap();
        let c = h.tick_until_complete().await;
        assert!(c.auto_started);
        assert_eq!(c.next, SessionType::ShortBreak);

        let state = h.engine.state().await.unwrap();
        assert!(state.is_running);
        assert!(!state.session_complete);
        assert_eq!(state.session_type, SessionType::ShortBreak);
        assert_eq!(state.time_left_seconds, 300);
        assert!(h.armed());
        assert_eq!(h.notifier.alerts().len(), 1);
    }

    #[tokio::test]
    async fn auto_started_focus_plays_completion_then_start_sound() {
        let h = Harness::with_settings(json!({
            "focus": {"completionSound": "bell"},
            "shortBreak": {"durationMinutes": 0.05, "completionSound": "gentle"},
            "general": {"autoStartFocus": true}
        }));
        h.engine.start(SessionType::ShortBreak, None).await.unwrap();
        h.tick_until_complete().await;
        assert_eq!(h.notifier.sounds(), vec![SoundId::Gentle, SoundId::Bell]);
    }

    #[tokio::test]
    async fn pause_then_resume_keeps_time_left() {
        let h = Harness::new();
        h.engine.start(SessionType::Focus, None).await.unwrap();
        h.engine.tick().await.unwrap();

        let paused = h.engine.toggle().await.unwrap();
        assert!(!paused.is_running);
        assert_eq!(paused.time_left_seconds, 1499);
        assert!(!h.armed());

        let resumed = h.engine.toggle().await.unwrap();
        assert!(resumed.is_running);
        assert_eq!(resumed.time_left_seconds, 1499);
        assert!(h.armed());
    }

    #[tokio::test]
    async fn tick_after_pause_changes_nothing() {
        let h = Harness::new();
        h.engine.start(SessionType::Focus, None).await.unwrap();

        let (paused, ticked) = tokio::join!(h.engine.pause(), h.engine.tick());
        paused.unwrap();
        ticked.unwrap();

        let state = h.engine.state().await.unwrap();
        assert!(!state.is_running);
        assert!(!h.armed());

        // a late tick for the paused session is dropped
        assert_eq!(h.engine.tick().await.unwrap(), TickOutcome::Idle);
        assert_eq!(h.engine.state().await.unwrap(), state);
    }

    #[tokio::test]
    async fn stray_tick_disarms() {
        let h = Harness::new();
        h.scheduler.arm(TICK_SIGNAL, Duration::from_secs(1));
        assert_eq!(h.engine.tick().await.unwrap(), TickOutcome::Idle);
        assert!(!h.armed());
    }

    #[tokio::test]
    async fn stop_resets_from_any_state() {
        let h = Harness::with_settings(json!({"focus": {"durationMinutes": 0.05}}));

        h.engine.stop().await.unwrap();
        assert!(!h.armed());

        h.engine.start(SessionType::LongBreak, None).await.unwrap();
        let state = h.engine.stop().await.unwrap();
        assert_eq!(state, SessionState::default());
        assert!(!h.armed());

        h.engine.start(SessionType::Focus, None).await.unwrap();
        h.tick_until_complete().await;
        h.engine.stop().await.unwrap();
        let state = h.engine.state().await.unwrap();
        assert!(!state.is_running);
        assert!(!state.session_complete);
        assert_eq!(state.completed_focus_count, 0);
        assert!(!h.armed());
        assert_eq!(h.notifier.calls().last(), Some(&NotifierCall::StopSound));
    }

    #[tokio::test]
    async fn toggle_from_complete_starts_the_pending_session() {
        let h = Harness::with_settings(json!({"focus": {"durationMinutes": 0.05}}));
        h.engine.start(SessionType::Focus, None).await.unwrap();
        h.tick_until_complete().await;

        let state = h.engine.toggle().await.unwrap();
        assert!(state.is_running);
        assert!(!state.session_complete);
        assert_eq!(state.session_type, SessionType::ShortBreak);
        assert_eq!(state.time_left_seconds, 300);
    }

    #[tokio::test]
    async fn toggle_on_fresh_install_starts_focus() {
        let h = Harness::new();
        let state = h.engine.toggle().await.unwrap();
        assert!(state.is_running);
        assert_eq!(state.session_type, SessionType::Focus);
        assert_eq!(state.time_left_seconds, 1500);
    }

    #[tokio::test]
    async fn settings_change_rescales_running_session() {
        let h = Harness::new();
        h.engine.start(SessionType::Focus, None).await.unwrap();
        for _ in 0..750 {
            h.engine.tick().await.unwrap();
        }
        assert_eq!(h.engine.state().await.unwrap().time_left_seconds, 750);

        let settings = h
            .engine
            .update_settings(&json!({"focus": {"durationMinutes": 30}}))
            .await
            .unwrap();
        assert_eq!(settings.focus.duration_minutes, 30.0);
        assert_eq!(h.engine.state().await.unwrap().time_left_seconds, 1798);
    }

    #[tokio::test]
    async fn settings_change_for_other_types_leaves_clock_alone() {
        let h = Harness::new();
        h.engine.start(SessionType::Focus, None).await.unwrap();
        h.engine
            .update_settings(&json!({"shortBreak": {"durationMinutes": 10}}))
            .await
            .unwrap();
        assert_eq!(h.engine.state().await.unwrap().time_left_seconds, 1500);
        assert_eq!(h.engine.settings().await.unwrap().short_break.duration_minutes, 10.0);
    }

    #[tokio::test]
    async fn partial_updates_accumulate() {
        let h = Harness::new();
        h.engine
            .update_settings(&json!({"general": {"autoStartBreaks": true}}))
            .await
            .unwrap();
        let settings = h
            .engine
            .update_settings(&json!({"focus": {"completionVolume": 90}}))
            .await
            .unwrap();
        assert!(settings.general.auto_start_breaks);
        assert_eq!(settings.focus.completion_volume, 90);
    }

    #[tokio::test]
    async fn restarted_engine_continues_from_the_store() {
        let h = Harness::new();
        h.engine.start(SessionType::Focus, None).await.unwrap();
        h.engine.tick().await.unwrap();
        h.scheduler.disarm(TICK_SIGNAL);

        let engine = h.restarted();
        let state = engine.recover().await.unwrap();
        assert!(state.is_running);
        assert_eq!(state.time_left_seconds, 1499);
        assert!(h.armed());

        assert_eq!(
            engine.tick().await.unwrap(),
            TickOutcome::Counted { time_left_seconds: 1498 }
        );
    }

    #[tokio::test]
    async fn recover_installs_defaults_and_disarms_idle_timer() {
        let h = Harness::new();
        h.scheduler.arm(TICK_SIGNAL, Duration::from_secs(1));
        h.engine.recover().await.unwrap();
        assert!(!h.armed());
        assert_eq!(
            h.store.snapshot()[keys::SETTINGS],
            json!(Settings::default())
        );
    }

    #[tokio::test]
    async fn failed_history_write_still_transitions() {
        let h = Harness::with_settings(json!({"focus": {"durationMinutes": 0.05}}));
        h.engine.start(SessionType::Focus, None).await.unwrap();
        h.store.fail_writes_to(keys::HISTORY, 1);

        let c = h.tick_until_complete().await;
        assert!(!c.recorded);
        assert_eq!(c.next, SessionType::ShortBreak);
        assert!(h.engine.history_records().await.unwrap().is_empty());
        assert!(h.engine.state().await.unwrap().session_complete);
    }

    #[tokio::test]
    async fn failed_state_write_leaves_scheduler_untouched() {
        let h = Harness::new();
        h.store.fail_writes_to(keys::IS_RUNNING, 1);
        assert!(h.engine.start(SessionType::Focus, None).await.is_err());
        assert!(!h.armed());
        assert!(!h.engine.state().await.unwrap().is_running);
    }

    #[tokio::test]
    async fn projects_are_remembered_most_recent_first() {
        let h = Harness::new();
        h.engine.start(SessionType::Focus, Some("alpha")).await.unwrap();
        h.engine.start(SessionType::Focus, Some("beta")).await.unwrap();
        h.engine.start(SessionType::Focus, Some(" alpha ")).await.unwrap();
        let state = h.engine.start(SessionType::Focus, None).await.unwrap();

        assert_eq!(state.current_project_name.as_deref(), Some("alpha"));
        assert_eq!(h.engine.project_history().await.unwrap(), vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn start_cycle_resets_the_long_break_counter() {
        let h = Harness::with_settings(json!({"focus": {"durationMinutes": 0.05}}));
        for _ in 0..2 {
            h.engine.start(SessionType::Focus, None).await.unwrap();
            h.tick_until_complete().await;
        }
        assert_eq!(h.engine.state().await.unwrap().completed_focus_count, 2);

        let state = h.engine.start_cycle(Some("cycle")).await.unwrap();
        assert_eq!(state.completed_focus_count, 0);
        assert_eq!(state.session_type, SessionType::Focus);
        assert!(state.is_running);
    }

    #[tokio::test]
    async fn resume_while_running_rearms_idempotently() {
        let h = Harness::new();
        h.engine.start(SessionType::Focus, None).await.unwrap();
        let state = h.engine.resume().await.unwrap();

        assert!(state.is_running);
        assert!(h.armed());
        assert_eq!(h.scheduler.arm_calls(), 2);
    }

    #[tokio::test]
    async fn completion_keeps_history_entries_in_older_layouts() {
        let legacy = json!({"startTime": "2024-05-01T09:00:00Z", "type": "focus", "durationMinutes": "25"});
        let h = Harness::with_store(FlakyStore::wrap(MemoryStore::with_entries([
            (keys::SETTINGS, json!({"focus": {"durationMinutes": 0.05}})),
            (keys::HISTORY, json!([legacy.clone()])),
        ])));
        h.engine.start(SessionType::Focus, None).await.unwrap();
        assert!(h.tick_until_complete().await.recorded);

        let stored = h.store.snapshot()[keys::HISTORY].clone();
        assert_eq!(stored.as_array().map(Vec::len), Some(2));
        assert_eq!(stored[0], legacy);
        assert_eq!(h.engine.history_records().await.unwrap().len(), 2);
    }

    /// Every store call gives the runtime a chance to run something else
    /// between reading and writing.
    #[derive(Default)]
    struct YieldingStore {
        inner: MemoryStore,
    }

    #[async_trait::async_trait]
    impl KeyValueStore for YieldingStore {
        async fn get(&self, keys: &[&str]) -> StoreResult<Entries> {
            let entries = self.inner.get(keys).await;
            tokio::task::yield_now().await;
            entries
        }

        async fn set(&self, entries: Entries) -> StoreResult<()> {
            tokio::task::yield_now().await;
            self.inner.set(entries).await
        }

        async fn remove(&self, keys: &[&str]) -> StoreResult<()> {
            tokio::task::yield_now().await;
            self.inner.remove(keys).await
        }
    }

    #[tokio::test]
    async fn reset_racing_a_completion_never_brings_old_history_back() {
        for delay in 0..6 {
            let engine = TimerEngine::new(
                Arc::new(YieldingStore::default()),
                Arc::new(RecordingScheduler::new()),
                Arc::new(RecordingNotifier::new()),
            )
            .with_history_retries(0);
            engine
                .update_settings(&json!({"focus": {"durationMinutes": 0.05}}))
                .await
                .unwrap();
            engine.start(SessionType::Focus, None).await.unwrap();
            engine.tick().await.unwrap();
            engine.tick().await.unwrap();
            let old = vec!["2024-05-01 09:00".to_string(), "Focus".into(), "25".into(), "old".into()];
            engine.import_stats(&[old]).await.unwrap();

            let (tick, reset) = tokio::join!(engine.tick(), async {
                for _ in 0..delay {
                    tokio::task::yield_now().await;
                }
                engine.reset_stats().await
            });
            assert!(matches!(tick.unwrap(), TickOutcome::Completed(_)));
            reset.unwrap();

            let records = engine.history_records().await.unwrap();
            assert!(records.iter().all(|r| r.project_name != "old"), "delay {delay}: {records:?}");
            assert!(records.len() <= 1);
        }
    }

    #[tokio::test]
    async fn import_waits_for_a_completing_tick() {
        let engine = TimerEngine::new(
            Arc::new(YieldingStore::default()),
            Arc::new(RecordingScheduler::new()),
            Arc::new(RecordingNotifier::new()),
        );
        engine
            .update_settings(&json!({"focus": {"durationMinutes": 0.05}}))
            .await
            .unwrap();
        engine.start(SessionType::Focus, None).await.unwrap();
        engine.tick().await.unwrap();
        engine.tick().await.unwrap();

        let row = vec!["2024-05-02 10:00".to_string(), "Long Break".into(), "15".into(), "imported".into()];
        let rows = [row];
        let (tick, import) = tokio::join!(engine.tick(), engine.import_stats(&rows));
        assert!(matches!(tick.unwrap(), TickOutcome::Completed(_)));
        assert_eq!(import.unwrap().imported, 1);

        // The tick took the gate first, so the import replaced what it wrote.
        let records = engine.history_records().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].project_name, "imported");
    }

    #[test]
    fn alerts_name_what_comes_next() {
        assert_eq!(completion_alert(SessionType::Focus, SessionType::LongBreak).0, "Time for a long break!");
        assert_eq!(completion_alert(SessionType::LongBreak, SessionType::Focus).0, "Time to focus!");
    }
}
