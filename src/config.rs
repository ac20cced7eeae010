use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelegramConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
    #[serde(default = "default_sessions_dir")]
    pub sessions_dir: String,
    #[serde(default = "default_media_assets_dir")]
    pub media_assets_dir: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    #[serde(default = "default_stop_grace_seconds")]
    pub stop_grace_seconds: u64,
    #[serde(default = "default_poll_timeout_seconds")]
    pub poll_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_api_base_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_sqlite_path() -> String {
    "data/app.db".to_string()
}

fn default_sessions_dir() -> String {
    "data/sessions".to_string()
}

fn default_media_assets_dir() -> String {
    "data/media_assets".to_string()
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_stop_grace_seconds() -> u64 {
    5
}

fn default_poll_timeout_seconds() -> u64 {
    50
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: default_sqlite_path(),
            sessions_dir: default_sessions_dir(),
            media_assets_dir: default_media_assets_dir(),
            data_dir: default_data_dir(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            stop_grace_seconds: default_stop_grace_seconds(),
            poll_timeout_seconds: default_poll_timeout_seconds(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            telegram: TelegramConfig::default(),
            storage: StorageConfig::default(),
            worker: WorkerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load the configuration. A missing file yields the defaults so worker
    /// subprocesses can run from environment overrides alone.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = if path.as_ref().exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_yaml::from_str(&content)?
        } else {
            Config::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("TELEGRAM_API_BASE_URL")
            && !value.trim().is_empty()
        {
            self.telegram.api_base_url = value;
        }
        if let Ok(value) = std::env::var("SQLITE_PATH")
            && !value.trim().is_empty()
        {
            self.storage.sqlite_path = value;
        }
        if let Ok(value) = std::env::var("DATA_DIR")
            && !value.trim().is_empty()
        {
            self.storage.data_dir = value;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.telegram.api_base_url.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "telegram.api_base_url cannot be empty".to_string(),
            ));
        }
        if self.storage.sqlite_path.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "storage.sqlite_path cannot be empty".to_string(),
            ));
        }
        if self.worker.poll_timeout_seconds == 0 {
            return Err(ConfigError::InvalidConfig(
                "worker.poll_timeout_seconds must be positive".to_string(),
            ));
        }
        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(ConfigError::InvalidConfig(format!(
                "logging.format must be 'pretty' or 'json', got '{}'",
                self.logging.format
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = Config::load("definitely-not-a-config.yaml").expect("defaults load");
        assert_eq!(config.telegram.api_base_url, "https://api.telegram.org");
        assert_eq!(config.storage.sqlite_path, "data/app.db");
        assert_eq!(config.worker.poll_timeout_seconds, 50);
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_sections() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "storage:\n  sqlite_path: /tmp/other.db").expect("write");
        let config = Config::load(file.path()).expect("config parses");
        assert_eq!(config.storage.sqlite_path, "/tmp/other.db");
        assert_eq!(config.storage.sessions_dir, "data/sessions");
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn invalid_log_format_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "logging:\n  format: xml").expect("write");
        let err = Config::load(file.path()).expect_err("xml is not a log format");
        assert!(matches!(err, ConfigError::InvalidConfig(_)));
    }
}
