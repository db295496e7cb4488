use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::fs;
use std::path::PathBuf;
use tempo_ipc::table::StatsTable;
use tempo_ipc::{send_command, Command, Response, SessionState, SessionType, TimerPhase, MAX_VOLUME, SOCKET_PATH};

#[derive(Parser)]
#[command(name = "tempoctl")]
#[command(about = "Control the Tempo pomodoro timer", long_about = None)]
struct Cli {
    /// Socket of the running daemon
    #[arg(long, default_value = SOCKET_PATH)]
    socket: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a session (focus, short-break, long-break)
    Start {
        session_type: SessionType,
        #[arg(short, long)]
        project: Option<String>,
    },
    /// Start a new cycle with the long break counter reset
    Cycle {
        #[arg(short, long)]
        project: Option<String>,
    },
    /// Pause or resume the timer
    Toggle,
    /// Pause the timer
    Pause,
    /// Resume the timer
    Resume,
    /// Stop and reset the timer
    Stop,
    /// Get timer status
    Status,
    /// Show or change settings
    Settings {
        #[command(subcommand)]
        action: Option<SettingsAction>,
    },
    /// Export history as CSV
    Export {
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Replace history with the rows of a CSV file
    Import { file: PathBuf },
    /// Delete all history
    ResetStats,
    /// List recent projects
    Projects,
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Print current settings
    Show,
    /// Merge a partial settings object (inline JSON or @file)
    Set { json: String },
    /// Set the completion volume of one session type
    Volume {
        session_type: SessionType,
        #[arg(allow_hyphen_values = true)]
        volume: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let command = match cli.command {
        Commands::Start {
            session_type,
            project,
        } => Command::StartTimer {
            session_type,
            project_name: project,
        },
        Commands::Cycle { project } => Command::StartCycle {
            project_name: project,
        },
        Commands::Toggle => Command::ToggleTimer,
        Commands::Pause => Command::PauseTimer,
        Commands::Resume => Command::ResumeTimer,
        Commands::Stop => Command::StopTimer,
        Commands::Status => Command::GetTimerState,
        Commands::Settings { action: None }
        | Commands::Settings {
            action: Some(SettingsAction::Show),
        } => Command::GetSettings,
        Commands::Settings {
            action: Some(SettingsAction::Set { json }),
        } => {
            let settings = read_settings_arg(&json)?;
            check_volumes(&settings)?;
            Command::UpdateSettings { settings }
        }
        Commands::Settings {
            action: Some(SettingsAction::Volume {
                session_type,
                volume,
            }),
        } => {
            let mut settings = json!({});
            settings[session_type.id()] = json!({ "completionVolume": volume });
            check_volumes(&settings)?;
            Command::UpdateSettings { settings }
        }
        Commands::Export { out } => {
            let response = send_command(&cli.socket, &Command::ExportStats).await?;
            return write_export(response, out);
        }
        Commands::Import { file } => {
            let text = fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {:?}", file))?;
            Command::ImportStats {
                rows: StatsTable::parse_csv(&text).rows,
            }
        }
        Commands::ResetStats => Command::ResetStats,
        Commands::Projects => Command::GetProjectHistory,
    };

    let response = send_command(&cli.socket, &command).await?;
    print_response(response)
}

fn read_settings_arg(arg: &str) -> Result<Value> {
    let text = match arg.strip_prefix('@') {
        Some(path) => fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))?,
        None => arg.to_string(),
    };
    serde_json::from_str(&text).context("Settings must be a JSON object")
}

/// Interactive edits never send an out-of-range volume.
fn check_volumes(settings: &Value) -> Result<()> {
    for session_type in SessionType::ALL {
        let Some(block) = settings.get(session_type.id()) else {
            continue;
        };
        for key in ["completionVolume", "soundVolume"] {
            let Some(value) = block.get(key) else {
                continue;
            };
            let in_range = value
                .as_f64()
                .is_some_and(|v| (0.0..=MAX_VOLUME as f64).contains(&v));
            if !in_range {
                eprintln!(
                    "Warning: {} volume {} is outside 0-{}",
                    session_type.label(),
                    value,
                    MAX_VOLUME
                );
                bail!("settings not changed");
            }
        }
    }
    Ok(())
}

fn write_export(response: Response, out: Option<PathBuf>) -> Result<()> {
    if !response.success {
        return print_response(response);
    }
    let table = response.serialized_table.unwrap_or_default();
    let path = out
        .or_else(|| response.filename.map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(tempo_ipc::table::EXPORT_FILENAME));
    fs::write(&path, table).with_context(|| format!("Failed to write {:?}", path))?;
    println!("Exported to {}", path.display());
    Ok(())
}

fn print_response(response: Response) -> Result<()> {
    if !response.success {
        let error = response.error.unwrap_or_else(|| "request failed".to_string());
        match response.message {
            Some(message) => bail!("{}: {}", error, message),
            None => bail!("{}", error),
        }
    }

    if let Some(state) = &response.state {
        print_state(state);
    }
    if let Some(settings) = &response.settings {
        println!("{}", serde_json::to_string_pretty(settings)?);
    }
    if let Some(projects) = &response.projects {
        if projects.is_empty() {
            println!("No recent projects");
        }
        for project in projects {
            println!("{}", project);
        }
    }
    if let Some(message) = &response.message {
        println!("{}", message);
    }
    if response.state.is_none()
        && response.settings.is_none()
        && response.projects.is_none()
        && response.message.is_none()
    {
        println!("OK");
    }
    Ok(())
}

fn print_state(state: &SessionState) {
    let phase = match state.phase() {
        TimerPhase::Running => "running",
        TimerPhase::Complete => "complete",
        TimerPhase::Idle => "idle",
    };
    println!("Session: {} ({})", state.session_type.label(), phase);
    println!("Time left: {}", format_clock(state.time_left_seconds));
    println!("Focus sessions this cycle: {}", state.completed_focus_count);
    if let Some(project) = &state.current_project_name {
        println!("Project: {}", project);
    }
}

fn format_clock(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_format() {
        assert_eq!(format_clock(1500), "25:00");
        assert_eq!(format_clock(61), "01:01");
        assert_eq!(format_clock(0), "00:00");
    }

    #[test]
    fn volumes_are_checked_before_sending() {
        assert!(check_volumes(&json!({"focus": {"completionVolume": 100}})).is_ok());
        assert!(check_volumes(&json!({"focus": {"completionVolume": 101}})).is_err());
        assert!(check_volumes(&json!({"longBreak": {"soundVolume": -1}})).is_err());
        assert!(check_volumes(&json!({"general": {"soundEnabled": false}})).is_ok());
    }

    #[test]
    fn inline_settings_are_parsed() {
        let value = read_settings_arg(r#"{"focus": {"durationMinutes": 30}}"#).unwrap();
        assert_eq!(value["focus"]["durationMinutes"], 30);
        assert!(read_settings_arg("{oops").is_err());
    }
}
