//! Unix domain socket server for IPC

use crate::engine::TimerEngine;
use crate::history::HistoryError;
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tempo_ipc::table::EXPORT_FILENAME;
use tempo_ipc::{Command, IpcError, Response};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};

pub async fn start(socket_path: &Path, engine: Arc<TimerEngine>) -> Result<()> {
    // Remove old socket if it exists
    let _ = std::fs::remove_file(socket_path);

    let listener = UnixListener::bind(socket_path)?;
    info!("IPC server listening on {}", socket_path.display());

    serve(listener, engine).await
}

/// Accepts clients forever, one task per connection.
pub async fn serve(listener: UnixListener, engine: Arc<TimerEngine>) -> Result<()> {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let engine = engine.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, engine).await {
                        error!("Error handling client: {}", e);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {}", e);
            }
        }
    }
}

async fn handle_client(stream: UnixStream, engine: Arc<TimerEngine>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    reader.read_line(&mut line).await?;

    let response = match Command::decode(&line) {
        Ok(command) => handle_command(&engine, command).await,
        Err(IpcError::UnknownCommand(name)) => {
            warn!(command = %name, "unknown command");
            Response::failure("unknown command")
        }
        Err(e) => {
            warn!("Rejected request: {}", e);
            Response::failure(format!("invalid request: {e}"))
        }
    };

    let response_json = serde_json::to_vec(&response)?;
    writer.write_all(&response_json).await?;
    writer.shutdown().await?;

    Ok(())
}

/// Runs one command and shapes its response.
pub async fn handle_command(engine: &TimerEngine, command: Command) -> Response {
    let name = command.name();
    debug!(command = name, "handling command");

    let result = match command {
        Command::StartTimer {
            session_type,
            project_name,
        } => engine
            .start(session_type, project_name.as_deref())
            .await
            .map(|state| Response::ok().with_state(state)),
        Command::StartCycle { project_name } => engine
            .start_cycle(project_name.as_deref())
            .await
            .map(|state| Response::ok().with_state(state)),
        Command::ToggleTimer => engine
            .toggle()
            .await
            .map(|state| Response::ok().with_state(state)),
        Command::PauseTimer => engine
            .pause()
            .await
            .map(|state| Response::ok().with_state(state)),
        Command::ResumeTimer => engine
            .resume()
            .await
            .map(|state| Response::ok().with_state(state)),
        Command::StopTimer => engine
            .stop()
            .await
            .map(|state| Response::ok().with_state(state)),
        Command::GetTimerState => engine
            .state()
            .await
            .map(|state| Response::ok().with_state(state)),
        Command::GetSettings => engine
            .settings()
            .await
            .map(|settings| Response::ok().with_settings(settings)),
        Command::UpdateSettings { settings } => engine
            .update_settings(&settings)
            .await
            .map(|settings| Response::ok().with_settings(settings)),
        Command::GetProjectHistory => engine.project_history().await.map(|projects| Response {
            projects: Some(projects),
            ..Response::ok()
        }),
        Command::ExportStats => return export_stats(engine).await,
        Command::ImportStats { rows } => {
            return match engine.import_stats(&rows).await {
                Ok(summary) => Response::ok().with_message(format!(
                    "imported {} sessions ({} skipped)",
                    summary.imported, summary.skipped
                )),
                Err(e) => history_failure(name, "import failed", e),
            };
        }
        Command::ResetStats => {
            return match engine.reset_stats().await {
                Ok(()) => Response::ok().with_message("statistics reset"),
                Err(e) => history_failure(name, "reset failed", e),
            };
        }
    };

    result.unwrap_or_else(|e| {
        error!(command = name, "{}", e);
        Response::failure(e.to_string())
    })
}

async fn export_stats(engine: &TimerEngine) -> Response {
    match engine.export_stats().await {
        Ok(table) => Response {
            serialized_table: Some(table.to_csv()),
            filename: Some(EXPORT_FILENAME.to_string()),
            ..Response::ok()
        },
        Err(HistoryError::Empty) => {
            Response::failure("no data").with_message(HistoryError::Empty.to_string())
        }
        Err(e) => history_failure("EXPORT_STATS", "export failed", e),
    }
}

fn history_failure(command: &str, error: &str, e: HistoryError) -> Response {
    if !matches!(e, HistoryError::NoValidRows) {
        error!(command, "{}", e);
    }
    Response::failure(error).with_message(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{RecordingNotifier, RecordingScheduler};
    use crate::store::MemoryStore;
    use serde_json::json;
    use tempo_ipc::SessionType;

    fn engine() -> TimerEngine {
        TimerEngine::new(
            Arc::new(MemoryStore::new()),
            Arc::new(RecordingScheduler::new()),
            Arc::new(RecordingNotifier::new()),
        )
    }

    #[tokio::test]
    async fn start_reports_the_new_state() {
        let engine = engine();
        let response = handle_command(
            &engine,
            Command::StartTimer {
                session_type: SessionType::Focus,
                project_name: None,
            },
        )
        .await;
        assert!(response.success);
        assert_eq!(response.state.unwrap().time_left_seconds, 1500);
    }

    #[tokio::test]
    async fn export_of_empty_history_fails_with_message() {
        let response = handle_command(&engine(), Command::ExportStats).await;
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("no data"));
        assert_eq!(response.message.as_deref(), Some("no statistics to export"));
    }

    #[tokio::test]
    async fn import_reports_counts() {
        let engine = engine();
        let rows = vec![
            vec!["2024-05-01 09:00".into(), "Focus".into(), "25".into(), "N/A".into()],
            vec!["bad".into()],
        ];
        let response = handle_command(&engine, Command::ImportStats { rows }).await;
        assert!(response.success);
        assert_eq!(response.message.as_deref(), Some("imported 1 sessions (1 skipped)"));

        let response = handle_command(&engine, Command::ExportStats).await;
        assert!(response.success);
        assert_eq!(response.filename.as_deref(), Some("pomodoro_stats.csv"));
        assert!(response
            .serialized_table
            .unwrap()
            .starts_with("start_time,session_type,duration,project\r\n"));
    }

    #[tokio::test]
    async fn failed_import_explains_itself_and_keeps_history() {
        let engine = engine();
        let good = vec![vec!["2024-05-01 09:00".into(), "Focus".into(), "25".into(), "N/A".into()]];
        assert!(handle_command(&engine, Command::ImportStats { rows: good }).await.success);

        let rows = vec![vec!["yesterday".into(), "Nap".into(), "x".into(), "".into()]];
        let response = handle_command(&engine, Command::ImportStats { rows }).await;
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("import failed"));
        assert_eq!(response.message.as_deref(), Some("no valid rows to import"));
        assert_eq!(engine.history_records().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reset_then_export_is_no_data() {
        let engine = engine();
        let reset = handle_command(&engine, Command::ResetStats).await;
        assert!(reset.success);
        assert_eq!(reset.message.as_deref(), Some("statistics reset"));
        assert!(!handle_command(&engine, Command::ExportStats).await.success);
    }

    #[tokio::test]
    async fn settings_round_trip_through_commands() {
        let engine = engine();
        let response = handle_command(
            &engine,
            Command::UpdateSettings {
                settings: json!({"longBreak": {"startAfterCount": 2}}),
            },
        )
        .await;
        assert!(response.success);

        let response = handle_command(&engine, Command::GetSettings).await;
        assert_eq!(response.settings.unwrap().long_break.start_after_count, 2);
    }
}
