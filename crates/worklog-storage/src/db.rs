use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use worklog_core::error::WorklogError;
use worklog_core::message::{MessageMetadata, Role};
use worklog_core::time::{ensure_storable, format_timestamp, parse_timestamp};

pub const DB_FILE_NAME: &str = "worklog.db";

enum StoreLocation {
    File(PathBuf),
    Memory,
}

pub struct Database {
    location: StoreLocation,
    conn: Mutex<Option<Connection>>,
}

pub async fn call_blocking<T, F>(db: Arc<Database>, f: F) -> Result<T, WorklogError>
where
    T: Send + 'static,
    F: FnOnce(&Database) -> Result<T, WorklogError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(db.as_ref()))
        .await
        .map_err(|e| WorklogError::Task(format!("DB task join error: {e}")))?
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub id: i64,
    pub user_id: String,
    pub role: Role,
    pub content: String,
    pub metadata: Option<MessageMetadata>,
    pub created_at: DateTime<Utc>,
}

const MESSAGE_COLUMNS: &str = "id, user_id, role, content, metadata, created_at";

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<StoredMessage> {
    let role: String = row.get(2)?;
    let metadata: Option<String> = row.get(4)?;
    let created_at: String = row.get(5)?;
    Ok(StoredMessage {
        id: row.get(0)?,
        user_id: row.get(1)?,
        role: role.parse().map_err(|e| conversion_error(2, e))?,
        content: row.get(3)?,
        metadata: metadata
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(|e| conversion_error(4, e))?,
        created_at: parse_timestamp(&created_at).map_err(|e| conversion_error(5, e))?,
    })
}

fn encode_metadata(metadata: Option<&MessageMetadata>) -> Result<Option<String>, WorklogError> {
    metadata
        .map(serde_json::to_string)
        .transpose()
        .map_err(Into::into)
}

pub(crate) fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![table],
        |row| row.get::<_, i64>(0),
    )
    .map(|n| n > 0)
}

pub(crate) fn index_exists(conn: &Connection, index: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = ?1",
        params![index],
        |row| row.get::<_, i64>(0),
    )
    .map(|n| n > 0)
}

impl Database {
    /// Handle for `<data_dir>/worklog.db`. Nothing is touched until `open()`.
    pub fn new(data_dir: &str) -> Self {
        Database {
            location: StoreLocation::File(Path::new(data_dir).join(DB_FILE_NAME)),
            conn: Mutex::new(None),
        }
    }

    /// Private store that lives only as long as its connection.
    pub fn in_memory() -> Self {
        Database {
            location: StoreLocation::Memory,
            conn: Mutex::new(None),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.location {
            StoreLocation::File(path) => Some(path.as_path()),
            StoreLocation::Memory => None,
        }
    }

    fn lock_conn(&self) -> MutexGuard<'_, Option<Connection>> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.lock_conn().is_some()
    }

    pub fn open(&self) -> Result<(), WorklogError> {
        let mut guard = self.lock_conn();
        if guard.is_some() {
            return Ok(());
        }

        let conn = match &self.location {
            StoreLocation::File(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        WorklogError::store_unavailable(format!(
                            "cannot create {}: {e}",
                            parent.display()
                        ))
                    })?;
                }
                let conn = Connection::open(path).map_err(|e| {
                    WorklogError::store_unavailable(format!("cannot open {}: {e}", path.display()))
                })?;
                conn.execute_batch("PRAGMA journal_mode=WAL;")
                    .map_err(|e| {
                        WorklogError::store_unavailable(format!(
                            "cannot use {}: {e}",
                            path.display()
                        ))
                    })?;
                conn
            }
            StoreLocation::Memory => Connection::open_in_memory().map_err(|e| {
                WorklogError::store_unavailable(format!("cannot open in-memory store: {e}"))
            })?,
        };

        match self.path() {
            Some(path) => info!("Opened message store at {}", path.display()),
            None => info!("Opened in-memory message store"),
        }
        *guard = Some(conn);
        Ok(())
    }

    pub fn close(&self) {
        let mut guard = self.lock_conn();
        if let Some(conn) = guard.take() {
            if let Err((_, e)) = conn.close() {
                warn!("Message store did not close cleanly: {e}");
            }
        }
    }

    pub(crate) fn with_conn<T, F>(&self, f: F) -> Result<T, WorklogError>
    where
        F: FnOnce(&Connection) -> Result<T, WorklogError>,
    {
        let guard = self.lock_conn();
        let conn = guard
            .as_ref()
            .ok_or_else(|| WorklogError::store_unavailable("message store is not open"))?;
        f(conn)
    }

    pub(crate) fn with_conn_mut<T, F>(&self, f: F) -> Result<T, WorklogError>
    where
        F: FnOnce(&mut Connection) -> Result<T, WorklogError>,
    {
        let mut guard = self.lock_conn();
        let conn = guard
            .as_mut()
            .ok_or_else(|| WorklogError::store_unavailable("message store is not open"))?;
        f(conn)
    }

    /// Closes the store and removes its files. The handle stays usable:
    /// a later `open()` starts from an empty database.
    pub fn destroy(&self) -> Result<(), WorklogError> {
        self.close();
        let Some(path) = self.path() else {
            return Ok(());
        };
        let mut targets = vec![path.to_path_buf()];
        for suffix in ["-wal", "-shm"] {
            let mut sidecar = path.as_os_str().to_os_string();
            sidecar.push(suffix);
            targets.push(PathBuf::from(sidecar));
        }
        for target in targets {
            match std::fs::remove_file(&target) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    pub fn insert_message(
        &self,
        user_id: &str,
        role: Role,
        content: &str,
        metadata: Option<&MessageMetadata>,
        created_at: &DateTime<Utc>,
    ) -> Result<i64, WorklogError> {
        ensure_storable(created_at)?;
        let metadata = encode_metadata(metadata)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (user_id, role, content, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    user_id,
                    role.as_str(),
                    content,
                    metadata,
                    format_timestamp(created_at)
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_all_messages(&self, user_id: &str) -> Result<Vec<StoredMessage>, WorklogError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS}
                 FROM messages
                 WHERE user_id = ?1
                 ORDER BY created_at ASC, id ASC"
            ))?;
            let messages = stmt
                .query_map(params![user_id], message_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(messages)
        })
    }

    pub fn get_message(
        &self,
        user_id: &str,
        id: i64,
    ) -> Result<Option<StoredMessage>, WorklogError> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1 AND user_id = ?2"),
                params![id, user_id],
                message_from_row,
            )
            .optional()
            .map_err(Into::into)
        })
    }

    /// Newest-first window `[offset, offset + limit)`, returned oldest first.
    pub fn get_messages_page(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StoredMessage>, WorklogError> {
        self.with_conn(|conn| {
            // SQLite reads a negative OFFSET as 0, so never let the cast wrap.
            let Ok(offset) = i64::try_from(offset) else {
                return Ok(Vec::new());
            };
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS}
                 FROM messages
                 WHERE user_id = ?1
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?2 OFFSET ?3"
            ))?;
            let mut messages = stmt
                .query_map(
                    params![user_id, limit, offset],
                    message_from_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;

            // Reverse so oldest first
            messages.reverse();
            Ok(messages)
        })
    }

    pub fn get_messages_since(
        &self,
        user_id: &str,
        since: &DateTime<Utc>,
    ) -> Result<Vec<StoredMessage>, WorklogError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS}
                 FROM messages
                 WHERE user_id = ?1 AND created_at >= ?2
                 ORDER BY created_at ASC, id ASC"
            ))?;
            let messages = stmt
                .query_map(params![user_id, format_timestamp(since)], message_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(messages)
        })
    }

    pub fn search_messages(
        &self,
        user_id: &str,
        query: &str,
    ) -> Result<Vec<StoredMessage>, WorklogError> {
        let needle = query.to_lowercase();
        let messages = self.get_all_messages(user_id)?;
        Ok(messages
            .into_iter()
            .filter(|m| m.content.to_lowercase().contains(&needle))
            .collect())
    }

    pub fn count_messages(&self, user_id: &str) -> Result<usize, WorklogError> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
    }

    pub fn delete_message(&self, user_id: &str, id: i64) -> Result<bool, WorklogError> {
        self.with_conn(|conn| {
            let rows = conn.execute(
                "DELETE FROM messages WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )?;
            Ok(rows > 0)
        })
    }

    pub fn clear_messages(&self, user_id: &str) -> Result<usize, WorklogError> {
        self.with_conn(|conn| {
            let rows = conn.execute("DELETE FROM messages WHERE user_id = ?1", params![user_id])?;
            Ok(rows)
        })
    }

    pub fn update_message_metadata(
        &self,
        user_id: &str,
        id: i64,
        metadata: &MessageMetadata,
    ) -> Result<bool, WorklogError> {
        let encoded = encode_metadata(Some(metadata))?;
        self.with_conn(|conn| {
            let rows = conn.execute(
                "UPDATE messages SET metadata = ?1 WHERE id = ?2 AND user_id = ?3",
                params![encoded, id, user_id],
            )?;
            Ok(rows > 0)
        })
    }

    /// Deletes everything but the `keep` newest messages of `user_id`.
    pub fn trim_messages(&self, user_id: &str, keep: usize) -> Result<usize, WorklogError> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )?;
            if count as usize <= keep {
                return Ok(0);
            }
            let rows = conn.execute(
                "DELETE FROM messages
                 WHERE user_id = ?1
                   AND id NOT IN (
                       SELECT id FROM messages
                       WHERE user_id = ?1
                       ORDER BY created_at DESC, id DESC
                       LIMIT ?2
                   )",
                params![user_id, i64::try_from(keep).unwrap_or(i64::MAX)],
            )?;
            Ok(rows)
        })
    }
}
