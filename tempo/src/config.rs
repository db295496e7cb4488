use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tempo_ipc::SOCKET_PATH;

use crate::history::DEFAULT_WRITE_RETRIES;
use crate::persistence::JsonFileStore;

/// Daemon configuration, read from `tempo.toml`
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub socket_path: PathBuf,
    /// Where the key-value state lives; the data directory when unset
    pub data_file: Option<PathBuf>,
    pub tick_interval_ms: u64,
    pub history_write_retries: usize,
    /// Used when `RUST_LOG` is not set
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(SOCKET_PATH),
            data_file: None,
            tick_interval_ms: 1000,
            history_write_retries: DEFAULT_WRITE_RETRIES,
            log_filter: "info".to_string(),
        }
    }
}

impl Config {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn data_path(&self) -> Result<PathBuf> {
        match &self.data_file {
            Some(path) => Ok(path.clone()),
            None => JsonFileStore::default_path(),
        }
    }
}

pub fn parse_config(text: &str) -> Result<Config> {
    toml::from_str(text).context("Failed to parse config")
}

pub fn load_config() -> Result<Config> {
    match ProjectDirs::from("com", "pabloagn", "Tempo") {
        Some(proj_dirs) => {
            let path = proj_dirs.config_dir().join("tempo.toml");
            if path.exists() {
                let config_str = fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config file at {:?}", path))?;
                toml::from_str(&config_str)
                    .with_context(|| format!("Failed to parse config file at {:?}", path))
            } else {
                Ok(Config::default())
            }
        }
        None => Ok(Config::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_default() {
        assert_eq!(parse_config("").unwrap(), Config::default());
    }

    #[test]
    fn fields_override_defaults() {
        let config = parse_config(
            r#"
            socket_path = "/run/user/1000/tempo.sock"
            data_file = "/tmp/tempo-state.json"
            tick_interval_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(config.socket_path, PathBuf::from("/run/user/1000/tempo.sock"));
        assert_eq!(config.data_path().unwrap(), PathBuf::from("/tmp/tempo-state.json"));
        assert_eq!(config.tick_interval(), Duration::from_millis(250));
        assert_eq!(config.history_write_retries, DEFAULT_WRITE_RETRIES);
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn bad_types_are_reported() {
        assert!(parse_config("tick_interval_ms = \"fast\"").is_err());
    }
}
