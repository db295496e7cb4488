//! Completed session log: append with bounded retry, CSV export, wholesale
//! import and reset.

use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveDateTime, TimeZone, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempo_ipc::table::StatsTable;
use tempo_ipc::{SessionRecord, SessionType};
use thiserror::Error;
use tracing::{debug, warn};

use crate::state::NO_PROJECT;
use crate::store::{keys, Entries, KeyValueStore, StoreError};

pub const DEFAULT_WRITE_RETRIES: usize = 2;
const RETRY_BACKOFF: Duration = Duration::from_millis(50);
const EXPORT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("{op} failed: {source}")]
    Store {
        op: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("history write failed after {attempts} attempts: {source}")]
    WriteFailed {
        attempts: usize,
        #[source]
        source: StoreError,
    },

    #[error("no statistics to export")]
    Empty,

    #[error("no valid rows to import")]
    NoValidRows,
}

pub type HistoryResult<T> = Result<T, HistoryError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
}

pub struct HistoryRecorder {
    store: Arc<dyn KeyValueStore>,
    write_retries: usize,
}

impl HistoryRecorder {
    pub fn new(store: Arc<dyn KeyValueStore>, write_retries: usize) -> Self {
        Self { store, write_retries }
    }

    /// Reads the stored log. Entries in older layouts are read leniently;
    /// entries that still make no sense are skipped, not deleted.
    pub async fn load(&self) -> HistoryResult<Vec<SessionRecord>> {
        let items = self.load_raw().await?;
        Ok(items.iter().filter_map(decode_record).collect())
    }

    /// Appends one record. Stored entries are written back untouched.
    pub async fn record(&self, entry: SessionRecord) -> HistoryResult<()> {
        let mut items = self.load_raw().await?;
        let value = serde_json::to_value(&entry).map_err(|e| HistoryError::Store {
            op: "encode record",
            source: StoreError::Serialization(e),
        })?;
        items.push(value);
        self.write(Value::Array(items)).await
    }

    pub async fn export_all(&self) -> HistoryResult<StatsTable> {
        let records = self.load().await?;
        if records.is_empty() {
            return Err(HistoryError::Empty);
        }
        Ok(StatsTable::new(records.iter().map(export_row).collect()))
    }

    /// Replaces the whole log with the valid rows of an imported table.
    pub async fn import_replace(&self, rows: &[Vec<String>]) -> HistoryResult<ImportSummary> {
        let records: Vec<SessionRecord> = rows.iter().filter_map(|row| parse_row(row)).collect();
        let summary = ImportSummary {
            imported: records.len(),
            skipped: rows.len() - records.len(),
        };
        if records.is_empty() && !rows.is_empty() {
            return Err(HistoryError::NoValidRows);
        }
        self.write(json!(records)).await?;
        Ok(summary)
    }

    pub async fn reset_all(&self) -> HistoryResult<()> {
        self.store
            .remove(&[keys::HISTORY])
            .await
            .map_err(|source| HistoryError::Store { op: "reset history", source })
    }

    async fn load_raw(&self) -> HistoryResult<Vec<Value>> {
        let mut entries = self
            .store
            .get(&[keys::HISTORY])
            .await
            .map_err(|source| HistoryError::Store { op: "load history", source })?;
        match entries.remove(keys::HISTORY) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => Ok(items),
            Some(other) => {
                warn!(value = %other, "history is not an array, keeping it as one entry");
                Ok(vec![other])
            }
        }
    }

    async fn write(&self, value: Value) -> HistoryResult<()> {
        let records = value.as_array().map_or(0, Vec::len);
        let attempts = self.write_retries + 1;
        let mut attempt = 1;
        loop {
            let entries = Entries::from([(keys::HISTORY.to_string(), value.clone())]);
            match self.store.set(entries).await {
                Ok(()) => {
                    debug!(records, attempt, "history written");
                    return Ok(());
                }
                Err(source) if attempt >= attempts => {
                    return Err(HistoryError::WriteFailed { attempts, source });
                }
                Err(e) => {
                    warn!(error = %e, attempt, "history write failed, retrying");
                    tokio::time::sleep(RETRY_BACKOFF * attempt as u32).await;
                    attempt += 1;
                }
            }
        }
    }
}

fn decode_record(item: &Value) -> Option<SessionRecord> {
    if let Ok(record) = serde_json::from_value(item.clone()) {
        return Some(record);
    }
    let record = decode_loose(item);
    if record.is_none() {
        warn!(entry = %item, "skipping unreadable history entry");
    }
    record
}

/// Entries from older releases or hand edits: numeric strings, `date`,
/// `type` and `duration` names, missing end times or projects.
fn decode_loose(item: &Value) -> Option<SessionRecord> {
    let start_time = pick(item, &["startTime", "date"])
        .and_then(Value::as_str)
        .and_then(parse_start)?;
    let session_type = pick(item, &["sessionType", "type"])
        .and_then(Value::as_str)
        .and_then(SessionType::from_label)?;
    let duration_minutes = pick(item, &["durationMinutes", "duration"])
        .and_then(|v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
        .filter(|d| d.is_finite() && *d >= 0.0)?;
    let end_time = pick(item, &["endTime"])
        .and_then(Value::as_str)
        .and_then(parse_start)
        .unwrap_or_else(|| end_of(start_time, duration_minutes));
    let project_name = pick(item, &["projectName", "project"])
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(NO_PROJECT)
        .to_string();

    Some(SessionRecord {
        start_time,
        end_time,
        session_type,
        duration_minutes,
        project_name,
    })
}

fn pick<'a>(item: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .find_map(|name| item.get(*name))
        .filter(|v| !v.is_null())
}

fn end_of(start_time: DateTime<Utc>, duration_minutes: f64) -> DateTime<Utc> {
    start_time + ChronoDuration::milliseconds((duration_minutes * 60_000.0).round() as i64)
}

fn export_row(record: &SessionRecord) -> Vec<String> {
    vec![
        record.start_time.with_timezone(&Local).format(EXPORT_TIME_FORMAT).to_string(),
        record.session_type.label().to_string(),
        record.duration_minutes.to_string(),
        record.project_name.clone(),
    ]
}

fn parse_row(row: &[String]) -> Option<SessionRecord> {
    let [start, session_type, duration, project] = row else {
        debug!(fields = row.len(), "skipping row with wrong field count");
        return None;
    };
    let start_time = parse_start(start)?;
    let session_type = SessionType::from_label(session_type)?;
    let duration_minutes: f64 = duration.trim().parse().ok()?;
    if !duration_minutes.is_finite() || duration_minutes < 0.0 {
        return None;
    }
    let project = project.trim();
    Some(SessionRecord {
        start_time,
        end_time: end_of(start_time, duration_minutes),
        session_type,
        duration_minutes,
        project_name: if project.is_empty() { NO_PROJECT.to_string() } else { project.to_string() },
    })
}

fn parse_start(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(text) {
        return Some(t.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .map(|t| t.with_timezone(&Utc))
}
