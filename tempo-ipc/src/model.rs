//! Data shared between the daemon and its clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of timed interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionType {
    #[default]
    Focus,
    ShortBreak,
    LongBreak,
}

impl SessionType {
    pub const ALL: [SessionType; 3] = [
        SessionType::Focus,
        SessionType::ShortBreak,
        SessionType::LongBreak,
    ];

    /// Identifier used on the wire and in storage.
    pub fn id(self) -> &'static str {
        match self {
            SessionType::Focus => "focus",
            SessionType::ShortBreak => "shortBreak",
            SessionType::LongBreak => "longBreak",
        }
    }

    /// Human readable name used in exported tables.
    pub fn label(self) -> &'static str {
        match self {
            SessionType::Focus => "Focus",
            SessionType::ShortBreak => "Short Break",
            SessionType::LongBreak => "Long Break",
        }
    }

    /// Accepts either a display label or an identifier, ignoring case.
    pub fn from_label(s: &str) -> Option<Self> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|t| t.label().eq_ignore_ascii_case(s) || t.id().eq_ignore_ascii_case(s))
    }

    pub fn is_break(self) -> bool {
        !matches!(self, SessionType::Focus)
    }

    /// Fallback duration used when settings carry nothing usable.
    pub fn default_minutes(self) -> f64 {
        match self {
            SessionType::Focus => 25.0,
            SessionType::ShortBreak => 5.0,
            SessionType::LongBreak => 15.0,
        }
    }
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for SessionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_', ' '], "").as_str() {
            "focus" | "pomodoro" => Ok(SessionType::Focus),
            "shortbreak" | "short" | "break" => Ok(SessionType::ShortBreak),
            "longbreak" | "long" => Ok(SessionType::LongBreak),
            _ => Err(format!("unknown session type: '{s}'")),
        }
    }
}

/// Coarse state derived from a [`SessionState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimerPhase {
    Idle,
    Running,
    Complete,
}

/// The single persisted timer record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub time_left_seconds: u64,
    pub is_running: bool,
    pub session_type: SessionType,
    pub completed_focus_count: u32,
    pub session_complete: bool,
    pub session_start_time: Option<DateTime<Utc>>,
    pub current_project_name: Option<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            time_left_seconds: 0,
            is_running: false,
            session_type: SessionType::Focus,
            completed_focus_count: 0,
            session_complete: false,
            session_start_time: None,
            current_project_name: None,
        }
    }
}

impl SessionState {
    pub fn phase(&self) -> TimerPhase {
        if self.is_running {
            TimerPhase::Running
        } else if self.session_complete {
            TimerPhase::Complete
        } else {
            TimerPhase::Idle
        }
    }
}

/// Sound played when a session of some type ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SoundId {
    None,
    #[default]
    Beep,
    Bell,
    Digital,
    Gentle,
    Chime,
}

impl SoundId {
    pub fn is_silent(self) -> bool {
        self == SoundId::None
    }
}

impl FromStr for SoundId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Ok(SoundId::None),
            "beep" => Ok(SoundId::Beep),
            "bell" => Ok(SoundId::Bell),
            "digital" => Ok(SoundId::Digital),
            "gentle" => Ok(SoundId::Gentle),
            "chime" => Ok(SoundId::Chime),
            _ => Err(format!("unknown sound: '{s}'")),
        }
    }
}

pub const DEFAULT_VOLUME: u8 = 50;
pub const MAX_VOLUME: u8 = 100;
pub const DEFAULT_LONG_BREAK_AFTER: u32 = 4;

/// Per session type configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSettings {
    pub duration_minutes: f64,
    pub completion_sound: SoundId,
    pub completion_volume: u8,
    pub desktop_notification: bool,
}

impl SessionSettings {
    pub fn for_type(session_type: SessionType) -> Self {
        Self {
            duration_minutes: session_type.default_minutes(),
            completion_sound: SoundId::Beep,
            completion_volume: DEFAULT_VOLUME,
            desktop_notification: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LongBreakSettings {
    #[serde(flatten)]
    pub session: SessionSettings,
    pub start_after_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneralSettings {
    pub auto_start_breaks: bool,
    pub auto_start_focus: bool,
    pub sound_enabled: bool,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            auto_start_breaks: false,
            auto_start_focus: false,
            sound_enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub focus: SessionSettings,
    pub short_break: SessionSettings,
    pub long_break: LongBreakSettings,
    pub general: GeneralSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            focus: SessionSettings::for_type(SessionType::Focus),
            short_break: SessionSettings::for_type(SessionType::ShortBreak),
            long_break: LongBreakSettings {
                session: SessionSettings::for_type(SessionType::LongBreak),
                start_after_count: DEFAULT_LONG_BREAK_AFTER,
            },
            general: GeneralSettings::default(),
        }
    }
}

impl Settings {
    pub fn session(&self, session_type: SessionType) -> &SessionSettings {
        match session_type {
            SessionType::Focus => &self.focus,
            SessionType::ShortBreak => &self.short_break,
            SessionType::LongBreak => &self.long_break.session,
        }
    }

    pub fn session_mut(&mut self, session_type: SessionType) -> &mut SessionSettings {
        match session_type {
            SessionType::Focus => &mut self.focus,
            SessionType::ShortBreak => &mut self.short_break,
            SessionType::LongBreak => &mut self.long_break.session,
        }
    }

    /// Configured length of a session, falling back to the built-in
    /// minutes when the stored value is not a positive number.
    pub fn duration_seconds(&self, session_type: SessionType) -> u64 {
        let minutes = self.session(session_type).duration_minutes;
        let minutes = if minutes.is_finite() && minutes > 0.0 {
            minutes
        } else {
            session_type.default_minutes()
        };
        ((minutes * 60.0).round() as u64).max(1)
    }

    /// Whether a session of `next` starts on its own after the previous one ends.
    pub fn auto_starts(&self, next: SessionType) -> bool {
        if next.is_break() {
            self.general.auto_start_breaks
        } else {
            self.general.auto_start_focus
        }
    }
}

/// One completed session in the history log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(alias = "type")]
    pub session_type: SessionType,
    pub duration_minutes: f64,
    pub project_name: String,
}
