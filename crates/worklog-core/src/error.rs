use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorklogError {
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Migration to schema version {version} failed: {reason}")]
    MigrationFailure { version: i64, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl WorklogError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        WorklogError::InvalidArgument(msg.into())
    }

    pub fn store_unavailable(msg: impl Into<String>) -> Self {
        WorklogError::StoreUnavailable(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let e = WorklogError::StoreUnavailable("quota exhausted".into());
        assert_eq!(e.to_string(), "Store unavailable: quota exhausted");

        let e = WorklogError::invalid_argument("limit must be positive");
        assert_eq!(e.to_string(), "Invalid argument: limit must be positive");

        let e = WorklogError::MigrationFailure {
            version: 2,
            reason: "no such table".into(),
        };
        assert_eq!(
            e.to_string(),
            "Migration to schema version 2 failed: no such table"
        );

        let e = WorklogError::Config("missing data_dir".into());
        assert_eq!(e.to_string(), "Config error: missing data_dir");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let e: WorklogError = io_err.into();
        assert!(e.to_string().contains("denied"));
    }

    #[test]
    fn test_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{{invalid").unwrap_err();
        let e: WorklogError = json_err.into();
        assert!(e.to_string().contains("JSON error"));
    }

    #[test]
    fn test_error_from_sqlite() {
        let e: WorklogError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(e, WorklogError::Database(_)));
    }
}
