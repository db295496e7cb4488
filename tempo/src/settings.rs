//! Total merge of partial or legacy settings objects.
//!
//! Whatever arrives from storage or from a client, the result is a fully
//! populated [`Settings`]. Unusable fields keep the base value and log a
//! warning; they never fail the caller.

use serde_json::{Map, Value};
use tempo_ipc::{SessionSettings, SessionType, Settings, SoundId, DEFAULT_VOLUME, MAX_VOLUME};
use tracing::warn;

/// Merges `partial` onto the built-in defaults.
pub fn merge(partial: &Value) -> Settings {
    merge_onto(Settings::default(), partial)
}

/// Merges `partial` onto `base`, field by field.
pub fn merge_onto(mut base: Settings, partial: &Value) -> Settings {
    let root = match partial {
        Value::Object(root) => root,
        Value::Null => return base,
        other => {
            warn!(value = %other, "settings are not an object, keeping current values");
            return base;
        }
    };

    // Flat layout written by older releases; the nested blocks below win.
    apply_legacy_layout(&mut base, root);

    for session_type in SessionType::ALL {
        if let Some(block) = root.get(session_type.id()).and_then(Value::as_object) {
            apply_session_block(base.session_mut(session_type), session_type, block);
        }
    }

    if let Some(block) = root.get("longBreak").and_then(Value::as_object) {
        if let Some(value) = pick(block, &["startAfterCount", "startAfter"]) {
            apply_start_after(&mut base, value);
        }
    }

    if let Some(general) = root.get("general").and_then(Value::as_object) {
        if let Some(v) = pick(general, &["autoStartBreaks"]).and_then(as_bool) {
            base.general.auto_start_breaks = v;
        }
        if let Some(v) = pick(general, &["autoStartFocus", "autoStartPomodoros"]).and_then(as_bool) {
            base.general.auto_start_focus = v;
        }
        if let Some(v) = pick(general, &["soundEnabled"]).and_then(as_bool) {
            base.general.sound_enabled = v;
        }
    }

    base
}

fn apply_legacy_layout(base: &mut Settings, root: &Map<String, Value>) {
    if let Some(durations) = root.get("durations").and_then(Value::as_object) {
        for session_type in SessionType::ALL {
            if let Some(value) = durations.get(session_type.id()) {
                apply_duration(base.session_mut(session_type), session_type, value);
            }
        }
    }
    if let Some(sounds) = root.get("sound").and_then(Value::as_object) {
        for session_type in SessionType::ALL {
            if let Some(value) = sounds.get(session_type.id()) {
                apply_sound(base.session_mut(session_type), session_type, value);
            }
        }
    }
    if let Some(value) = root.get("longBreakInterval") {
        apply_start_after(base, value);
    }
    if let Some(v) = root.get("autoStartPomodoro").and_then(as_bool) {
        base.general.auto_start_focus = v;
    }
    if let Some(v) = root.get("autoStartBreaks").and_then(as_bool) {
        base.general.auto_start_breaks = v;
    }
}

fn apply_session_block(target: &mut SessionSettings, session_type: SessionType, block: &Map<String, Value>) {
    if let Some(value) = pick(block, &["durationMinutes", "duration"]) {
        apply_duration(target, session_type, value);
    }
    if let Some(value) = pick(block, &["completionSound", "sound"]) {
        apply_sound(target, session_type, value);
    }
    if let Some(value) = pick(block, &["completionVolume", "soundVolume"]) {
        target.completion_volume = resolve_volume(session_type, value);
    }
    if let Some(v) = pick(block, &["desktopNotification"]).and_then(as_bool) {
        target.desktop_notification = v;
    }
}

fn apply_duration(target: &mut SessionSettings, session_type: SessionType, value: &Value) {
    match as_number(value) {
        Some(minutes) if minutes.is_finite() && minutes > 0.0 => target.duration_minutes = minutes,
        _ => warn!(session = %session_type, %value, "ignoring invalid duration"),
    }
}

fn apply_sound(target: &mut SessionSettings, session_type: SessionType, value: &Value) {
    match value.as_str().map(str::parse::<SoundId>) {
        Some(Ok(sound)) => target.completion_sound = sound,
        _ => warn!(session = %session_type, %value, "ignoring unknown sound"),
    }
}

fn apply_start_after(base: &mut Settings, value: &Value) {
    match as_number(value) {
        Some(n) if n.is_finite() => {
            let n = n.round();
            if n < 1.0 {
                warn!(%value, "long break interval below 1, using 1");
            }
            base.long_break.start_after_count = n.clamp(1.0, u32::MAX as f64) as u32;
        }
        _ => warn!(%value, "ignoring invalid long break interval"),
    }
}

/// Programmatic volumes outside 0..=100 fall back to the default volume.
fn resolve_volume(session_type: SessionType, value: &Value) -> u8 {
    match as_number(value) {
        Some(v) if (0.0..=MAX_VOLUME as f64).contains(&v) => v.round() as u8,
        _ => {
            warn!(session = %session_type, %value, "volume out of range, using default");
            DEFAULT_VOLUME
        }
    }
}

fn pick<'a>(block: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .filter_map(|name| block.get(*name))
        .find(|v| !v.is_null())
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
