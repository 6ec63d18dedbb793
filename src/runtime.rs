use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::WorklogError;
use crate::session::Session;
use worklog_storage::db::{call_blocking, Database};
use worklog_storage::migrations::{self, MigrationReport};

pub struct AppState {
    pub config: Config,
    pub db: Arc<Database>,
    /// False when the store could not be opened; chat still works but
    /// nothing is persisted or restored.
    pub history_available: bool,
}

impl AppState {
    pub fn session(&self) -> Session {
        Session::new(self.db.clone(), self.config.max_messages_per_user)
    }
}

/// Opens the store and brings its schema up to date.
///
/// An unreachable store degrades to `history_available = false`; a failed
/// migration is returned to the caller since the schema can no longer be
/// trusted.
pub async fn bootstrap(config: Config) -> Result<AppState, WorklogError> {
    bootstrap_with(config.clone(), Arc::new(config.database())).await
}

pub async fn bootstrap_with(config: Config, db: Arc<Database>) -> Result<AppState, WorklogError> {
    let opened = call_blocking(db.clone(), |db| db.open()).await;
    match opened {
        Ok(()) => {}
        Err(WorklogError::StoreUnavailable(reason)) => {
            warn!("Chat history unavailable, continuing without it: {reason}");
            return Ok(AppState {
                config,
                db,
                history_available: false,
            });
        }
        Err(e) => return Err(e),
    }

    let report = run_migrations(db.clone()).await?;
    if !report.is_noop() {
        info!(
            "Message store schema upgraded v{} -> v{}",
            report.from, report.to
        );
    }
    Ok(AppState {
        config,
        db,
        history_available: true,
    })
}

pub async fn run_migrations(db: Arc<Database>) -> Result<MigrationReport, WorklogError> {
    call_blocking(db, |db| migrations::run_migrations(db))
        .await
        .inspect_err(|e| error!("Message store migration failed: {e}"))
}

/// Wipes the local store and reinitializes it from empty.
pub async fn reset_history(db: Arc<Database>) -> Result<MigrationReport, WorklogError> {
    call_blocking(db.clone(), |db| {
        migrations::reset_database(db)?;
        db.open()
    })
    .await?;
    run_migrations(db).await
}
