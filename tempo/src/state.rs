//! Mapping between [`SessionState`] and the flat persisted keys, plus the
//! pure transition rules the engine builds on.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tempo_ipc::{SessionState, SessionType};
use tracing::warn;

use crate::store::{keys, Entries};

pub const MAX_PROJECT_HISTORY: usize = 10;

/// Project label stored on records that ran without one.
pub const NO_PROJECT: &str = "N/A";

/// Every key read when rebuilding a [`SessionState`].
pub const STATE_KEYS: [&str; 9] = [
    keys::TIME_LEFT,
    keys::IS_RUNNING,
    keys::SESSION_TYPE,
    keys::IS_BREAK,
    keys::COMPLETED_FOCUS_COUNT,
    keys::LEGACY_POMODORO_COUNT,
    keys::SESSION_COMPLETE,
    keys::SESSION_START_TIME,
    keys::CURRENT_PROJECT_NAME,
];

/// Rebuilds the state from stored entries. Missing or unreadable keys take
/// their default value.
pub fn decode_state(entries: &Entries) -> SessionState {
    let mut state = SessionState::default();

    if let Some(value) = entries.get(keys::TIME_LEFT) {
        state.time_left_seconds = value
            .as_u64()
            .or_else(|| value.as_f64().filter(|v| v.is_finite() && *v > 0.0).map(|v| v.round() as u64))
            .unwrap_or(0);
    }
    state.is_running = flag(entries, keys::IS_RUNNING);
    state.session_complete = flag(entries, keys::SESSION_COMPLETE);

    state.session_type = match entries.get(keys::SESSION_TYPE) {
        Some(value) if !value.is_null() => match serde_json::from_value(value.clone()) {
            Ok(session_type) => session_type,
            Err(_) => {
                warn!(%value, "unreadable session type, assuming focus");
                SessionType::Focus
            }
        },
        _ if flag(entries, keys::IS_BREAK) => SessionType::ShortBreak,
        _ => SessionType::Focus,
    };

    state.completed_focus_count = [keys::COMPLETED_FOCUS_COUNT, keys::LEGACY_POMODORO_COUNT]
        .iter()
        .find_map(|key| entries.get(*key).and_then(Value::as_u64))
        .map(|n| n.min(u32::MAX as u64) as u32)
        .unwrap_or(0);

    state.session_start_time = entries
        .get(keys::SESSION_START_TIME)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc));

    state.current_project_name = entries
        .get(keys::CURRENT_PROJECT_NAME)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    // Running and complete are exclusive; running wins.
    if state.is_running && state.session_complete {
        state.session_complete = false;
    }

    state
}

/// Flattens the state into the persisted key layout.
pub fn encode_state(state: &SessionState) -> Entries {
    Entries::from([
        (keys::TIME_LEFT.to_string(), json!(state.time_left_seconds)),
        (keys::IS_RUNNING.to_string(), json!(state.is_running)),
        (keys::SESSION_TYPE.to_string(), json!(state.session_type.id())),
        (keys::IS_BREAK.to_string(), json!(state.session_type.is_break())),
        (keys::COMPLETED_FOCUS_COUNT.to_string(), json!(state.completed_focus_count)),
        (keys::SESSION_COMPLETE.to_string(), json!(state.session_complete)),
        (
            keys::SESSION_START_TIME.to_string(),
            json!(state.session_start_time.map(|t| t.to_rfc3339())),
        ),
        (keys::CURRENT_PROJECT_NAME.to_string(), json!(state.current_project_name)),
    ])
}

pub fn decode_projects(entries: &Entries) -> Vec<String> {
    entries
        .get(keys::PROJECT_HISTORY)
        .and_then(Value::as_array)
        .map(|names| {
            names
                .iter()
                .filter_map(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .take(MAX_PROJECT_HISTORY)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Moves `name` to the front of the recent projects list.
pub fn remember_project(projects: &mut Vec<String>, name: &str) {
    projects.retain(|p| p != name);
    projects.insert(0, name.to_string());
    projects.truncate(MAX_PROJECT_HISTORY);
}

/// Session type that follows `finished`. `completed_focus` is the count
/// after the finished session was counted.
pub fn next_session_type(finished: SessionType, completed_focus: u32, start_after: u32) -> SessionType {
    match finished {
        SessionType::Focus => {
            let start_after = start_after.max(1);
            if completed_focus > 0 && completed_focus % start_after == 0 {
                SessionType::LongBreak
            } else {
                SessionType::ShortBreak
            }
        }
        SessionType::ShortBreak | SessionType::LongBreak => SessionType::Focus,
    }
}

/// Counts the finished session and returns the type that comes next.
pub fn advance(state: &mut SessionState, start_after: u32) -> SessionType {
    if state.session_type == SessionType::Focus {
        state.completed_focus_count = state.completed_focus_count.saturating_add(1);
    }
    next_session_type(state.session_type, state.completed_focus_count, start_after)
}

/// Remaining time after the running session's duration changes.
pub fn rescale_time_left(time_left: u64, new_duration_seconds: u64) -> u64 {
    if time_left == 0 {
        return 0;
    }
    let fraction = time_left as f64 / (time_left as f64 + 1.0);
    (new_duration_seconds as f64 * fraction).round() as u64
}

fn flag(entries: &Entries, key: &str) -> bool {
    match entries.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s == "true",
        _ => false,
    }
}
