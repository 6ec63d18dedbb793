use crate::error::WorklogError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use worklog_app::logging::LogSettings;
use worklog_storage::accessor::DEFAULT_MAX_MESSAGES_PER_USER;
use worklog_storage::db::Database;

pub const CONFIG_ENV_VAR: &str = "WORKLOG_CONFIG";

fn default_data_dir() -> String {
    "./worklog.data".into()
}
fn default_max_messages_per_user() -> usize {
    DEFAULT_MAX_MESSAGES_PER_USER
}
fn default_page_size() -> usize {
    50
}
fn default_log_to_file() -> bool {
    true
}
fn default_log_retention_days() -> i64 {
    worklog_app::logging::DEFAULT_LOG_RETENTION_DAYS
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_max_messages_per_user")]
    pub max_messages_per_user: usize,
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,
    #[serde(default = "default_log_to_file")]
    pub log_to_file: bool,
    #[serde(default = "default_log_retention_days")]
    pub log_retention_days: i64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: default_data_dir(),
            max_messages_per_user: default_max_messages_per_user(),
            default_page_size: default_page_size(),
            log_to_file: default_log_to_file(),
            log_retention_days: default_log_retention_days(),
        }
    }
}

impl Config {
    pub fn resolve_config_path() -> Result<Option<PathBuf>, WorklogError> {
        if let Ok(custom) = std::env::var(CONFIG_ENV_VAR) {
            if Path::new(&custom).exists() {
                return Ok(Some(PathBuf::from(custom)));
            }
            return Err(WorklogError::Config(format!(
                "{CONFIG_ENV_VAR} points to non-existent file: {custom}"
            )));
        }

        for candidate in ["./worklog.config.yaml", "./worklog.config.yml"] {
            if Path::new(candidate).exists() {
                return Ok(Some(PathBuf::from(candidate)));
            }
        }
        Ok(None)
    }

    /// Loads the YAML config if one can be found, otherwise the defaults.
    pub fn load() -> Result<Self, WorklogError> {
        match Self::resolve_config_path()? {
            Some(path) => Self::load_from_path(&path),
            None => Ok(Config::default()),
        }
    }

    pub fn load_from_path(path: &Path) -> Result<Self, WorklogError> {
        let path_str = path.to_string_lossy();
        let content = std::fs::read_to_string(path)
            .map_err(|e| WorklogError::Config(format!("Failed to read {path_str}: {e}")))?;
        let mut config: Config = serde_yaml::from_str(&content)
            .map_err(|e| WorklogError::Config(format!("Failed to parse {path_str}: {e}")))?;
        config.post_deserialize()?;
        Ok(config)
    }

    pub fn post_deserialize(&mut self) -> Result<(), WorklogError> {
        self.data_dir = self.data_dir.trim().to_string();
        if self.data_dir.is_empty() {
            return Err(WorklogError::Config("data_dir must not be empty".into()));
        }
        if self.max_messages_per_user == 0 {
            return Err(WorklogError::Config(
                "max_messages_per_user must be greater than 0".into(),
            ));
        }
        if self.default_page_size == 0 {
            return Err(WorklogError::Config(
                "default_page_size must be greater than 0".into(),
            ));
        }
        if self.log_retention_days <= 0 {
            return Err(WorklogError::Config(
                "log_retention_days must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn save_yaml(&self, path: &str) -> Result<(), WorklogError> {
        let content = serde_yaml::to_string(self)
            .map_err(|e| WorklogError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn log_settings(&self) -> LogSettings {
        let mut settings = if self.log_to_file {
            LogSettings::files_under(&self.data_dir)
        } else {
            LogSettings::console()
        };
        settings.retention_days = self.log_retention_days;
        settings
    }

    /// Unopened handle for the message store under `data_dir`.
    pub fn database(&self) -> Database {
        Database::new(&self.data_dir)
    }
}
