//! Versioned schema for the message store.
//!
//! The current version lives in `db_meta` under `schema_version`; every
//! applied step also leaves a row in `schema_migrations`. Steps run in
//! ascending order, each in its own transaction together with the marker
//! update, so an interrupted run resumes at the first step not committed.

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, warn};
use worklog_core::error::WorklogError;

use crate::db::{index_exists, table_exists, Database};

pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    apply: fn(&Connection) -> rusqlite::Result<()>,
    check: fn(&Connection) -> rusqlite::Result<bool>,
}

impl Migration {
    pub const fn new(
        version: i64,
        name: &'static str,
        apply: fn(&Connection) -> rusqlite::Result<()>,
        check: fn(&Connection) -> rusqlite::Result<bool>,
    ) -> Self {
        Migration {
            version,
            name,
            apply,
            check,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub from: i64,
    pub to: i64,
    pub applied: Vec<i64>,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigration {
    pub version: i64,
    pub name: String,
    pub applied_at: String,
}

pub const EXPECTED_SCHEMA_VERSION: i64 = 3;

pub const MIGRATIONS: &[Migration] = &[
    Migration::new(1, "create_messages_table", create_messages_table, has_messages_table),
    Migration::new(2, "index_messages_by_user", index_messages_by_user, has_user_index),
    Migration::new(
        3,
        "index_messages_by_user_created_at",
        index_messages_by_user_created_at,
        has_user_created_index,
    ),
];

fn create_messages_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL CHECK (length(user_id) > 0),
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            metadata TEXT,
            created_at TEXT NOT NULL
        );",
    )
}

fn has_messages_table(conn: &Connection) -> rusqlite::Result<bool> {
    table_exists(conn, "messages")
}

fn index_messages_by_user(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_messages_user ON messages(user_id)",
        [],
    )?;
    Ok(())
}

fn has_user_index(conn: &Connection) -> rusqlite::Result<bool> {
    index_exists(conn, "idx_messages_user")
}

fn index_messages_by_user_created_at(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_messages_user_created
         ON messages(user_id, created_at, id)",
        [],
    )?;
    Ok(())
}

fn has_user_created_index(conn: &Connection) -> rusqlite::Result<bool> {
    index_exists(conn, "idx_messages_user_created")
}

fn ensure_meta_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS db_meta (key TEXT PRIMARY KEY, value TEXT NOT NULL);
         CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL
         );",
    )
}

fn read_schema_version(conn: &Connection) -> rusqlite::Result<i64> {
    if !table_exists(conn, "db_meta")? {
        return Ok(0);
    }
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM db_meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(raw.and_then(|s| s.parse::<i64>().ok()).unwrap_or(0))
}

fn write_schema_version(conn: &Connection, step: &Migration) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO db_meta(key, value) VALUES('schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![step.version.to_string()],
    )?;
    conn.execute(
        "INSERT OR REPLACE INTO schema_migrations(version, name, applied_at)
         VALUES(?1, ?2, ?3)",
        params![step.version, step.name, chrono::Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

fn failure(version: i64, reason: impl std::fmt::Display) -> WorklogError {
    WorklogError::MigrationFailure {
        version,
        reason: reason.to_string(),
    }
}

/// Schema version recorded in the store; 0 for a fresh database.
pub fn current_version(db: &Database) -> Result<i64, WorklogError> {
    db.with_conn(|conn| Ok(read_schema_version(conn)?))
}

pub fn run_migrations(db: &Database) -> Result<MigrationReport, WorklogError> {
    apply_migrations(db, MIGRATIONS)
}

/// Applies every step of `steps` newer than the recorded version.
pub fn apply_migrations(
    db: &Database,
    steps: &[Migration],
) -> Result<MigrationReport, WorklogError> {
    if steps.windows(2).any(|w| w[0].version >= w[1].version) {
        return Err(WorklogError::invalid_argument(
            "migration steps must have strictly ascending versions",
        ));
    }
    let expected = steps.last().map(|s| s.version).unwrap_or(0);

    db.with_conn_mut(|conn| {
        let from = read_schema_version(conn)?;
        if from >= expected {
            if from > expected {
                warn!("Message store schema v{from} is newer than this build (v{expected})");
            }
            return Ok(MigrationReport {
                from,
                to: from,
                applied: Vec::new(),
            });
        }

        let mut applied = Vec::new();
        for step in steps.iter().filter(|s| s.version > from) {
            let tx = conn.transaction().map_err(|e| failure(step.version, e))?;
            ensure_meta_tables(&tx).map_err(|e| failure(step.version, e))?;
            (step.apply)(&tx).map_err(|e| failure(step.version, e))?;
            if !(step.check)(&tx).map_err(|e| failure(step.version, e))? {
                return Err(failure(
                    step.version,
                    format!("{} left the store in an unexpected state", step.name),
                ));
            }
            write_schema_version(&tx, step).map_err(|e| failure(step.version, e))?;
            tx.commit().map_err(|e| failure(step.version, e))?;
            info!("Applied schema migration v{} ({})", step.version, step.name);
            applied.push(step.version);
        }

        Ok(MigrationReport {
            from,
            to: expected,
            applied,
        })
    })
}

pub fn applied_migrations(db: &Database) -> Result<Vec<AppliedMigration>, WorklogError> {
    db.with_conn(|conn| {
        if !table_exists(conn, "schema_migrations")? {
            return Ok(Vec::new());
        }
        let mut stmt = conn.prepare(
            "SELECT version, name, applied_at FROM schema_migrations ORDER BY version ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(AppliedMigration {
                    version: row.get(0)?,
                    name: row.get(1)?,
                    applied_at: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Deletes the whole local store. The handle is left closed; callers must
/// `open()` and `run_migrations()` again before using it.
pub fn reset_database(db: &Database) -> Result<(), WorklogError> {
    db.destroy()?;
    match db.path() {
        Some(path) => warn!("Message store at {} was reset", path.display()),
        None => warn!("In-memory message store was reset"),
    }
    Ok(())
}
