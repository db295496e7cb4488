//! Inter-process communication between tempo and tempoctl
//!
//! We use Unix domain sockets for local IPC. A client writes one JSON
//! command terminated by a newline, the daemon answers with one JSON
//! response and closes the connection.

mod model;
pub mod table;

pub use model::*;

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

/// Commands that tempoctl can send to tempo
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    #[serde(rename_all = "camelCase")]
    StartTimer {
        session_type: SessionType,
        #[serde(default)]
        project_name: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    StartCycle {
        #[serde(default)]
        project_name: Option<String>,
    },
    ToggleTimer,
    PauseTimer,
    ResumeTimer,
    StopTimer,
    GetTimerState,
    GetSettings,
    /// Partial settings object, merged field by field onto the stored one.
    UpdateSettings { settings: serde_json::Value },
    ExportStats,
    ImportStats { rows: Vec<Vec<String>> },
    ResetStats,
    GetProjectHistory,
}

impl Command {
    pub const NAMES: [&'static str; 13] = [
        "START_TIMER",
        "START_CYCLE",
        "TOGGLE_TIMER",
        "PAUSE_TIMER",
        "RESUME_TIMER",
        "STOP_TIMER",
        "GET_TIMER_STATE",
        "GET_SETTINGS",
        "UPDATE_SETTINGS",
        "EXPORT_STATS",
        "IMPORT_STATS",
        "RESET_STATS",
        "GET_PROJECT_HISTORY",
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Command::StartTimer { .. } => "START_TIMER",
            Command::StartCycle { .. } => "START_CYCLE",
            Command::ToggleTimer => "TOGGLE_TIMER",
            Command::PauseTimer => "PAUSE_TIMER",
            Command::ResumeTimer => "RESUME_TIMER",
            Command::StopTimer => "STOP_TIMER",
            Command::GetTimerState => "GET_TIMER_STATE",
            Command::GetSettings => "GET_SETTINGS",
            Command::UpdateSettings { .. } => "UPDATE_SETTINGS",
            Command::ExportStats => "EXPORT_STATS",
            Command::ImportStats { .. } => "IMPORT_STATS",
            Command::ResetStats => "RESET_STATS",
            Command::GetProjectHistory => "GET_PROJECT_HISTORY",
        }
    }

    /// Decodes one request line, telling unknown commands apart from
    /// malformed ones.
    pub fn decode(line: &str) -> Result<Command, IpcError> {
        let value: serde_json::Value = serde_json::from_str(line.trim())?;
        let name = value
            .get("type")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .to_string();
        if Self::NAMES.iter().any(|known| *known == name) {
            Ok(serde_json::from_value(value)?)
        } else {
            Err(IpcError::UnknownCommand(name))
        }
    }
}

/// Responses from tempo back to tempoctl
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<SessionState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Settings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serialized_table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projects: Option<Vec<String>>,
}

impl Response {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_state(mut self, state: SessionState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }
}

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Connection refused - is tempo running?")]
    ConnectionRefused,

    #[error("unknown command")]
    UnknownCommand(String),
}

pub const SOCKET_PATH: &str = "/tmp/tempo.sock";

/// Sends one command and waits for the daemon's answer.
pub async fn send_command(socket: impl AsRef<Path>, command: &Command) -> Result<Response, IpcError> {
    let mut stream = UnixStream::connect(socket.as_ref())
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::NotFound => {
                IpcError::ConnectionRefused
            }
            _ => IpcError::Io(e),
        })?;

    let msg = serde_json::to_vec(command)?;
    stream.write_all(&msg).await?;
    stream.write_all(b"\n").await?;
    stream.shutdown().await?;

    // Exported tables can be large, so read until the daemon hangs up.
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    Ok(serde_json::from_slice(&buf)?)
}
