//! Per-user view over the message store.
//!
//! A `MessageAccessor` is bound to one user id at construction and every
//! query it issues is filtered by that id, so no input can reach another
//! user's partition.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use worklog_core::error::WorklogError;
use worklog_core::message::{MessageMetadata, Role};

use crate::db::{call_blocking, Database, StoredMessage};
use crate::transfer;

pub const DEFAULT_MAX_MESSAGES_PER_USER: usize = 1000;

#[derive(Clone)]
pub struct MessageAccessor {
    db: Arc<Database>,
    user_id: Arc<str>,
    max_messages: usize,
}

impl std::fmt::Debug for MessageAccessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageAccessor")
            .field("user_id", &self.user_id)
            .field("max_messages", &self.max_messages)
            .finish()
    }
}

impl MessageAccessor {
    pub fn new(db: Arc<Database>, user_id: &str) -> Result<Self, WorklogError> {
        if user_id.trim().is_empty() {
            return Err(WorklogError::invalid_argument("user id must not be empty"));
        }
        Ok(MessageAccessor {
            db,
            user_id: Arc::from(user_id),
            max_messages: DEFAULT_MAX_MESSAGES_PER_USER,
        })
    }

    /// Overrides the retention ceiling. Zero is clamped to one.
    pub fn with_max_messages(mut self, max_messages: usize) -> Self {
        self.max_messages = max_messages.max(1);
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    pub async fn get_all_messages(&self) -> Result<Vec<StoredMessage>, WorklogError> {
        let user_id = self.user_id.clone();
        call_blocking(self.db.clone(), move |db| db.get_all_messages(&user_id)).await
    }

    pub async fn get_message(&self, id: i64) -> Result<Option<StoredMessage>, WorklogError> {
        let user_id = self.user_id.clone();
        call_blocking(self.db.clone(), move |db| db.get_message(&user_id, id)).await
    }

    pub async fn count_messages(&self) -> Result<usize, WorklogError> {
        let user_id = self.user_id.clone();
        call_blocking(self.db.clone(), move |db| db.count_messages(&user_id)).await
    }

    pub async fn add_message(
        &self,
        role: Role,
        content: &str,
        metadata: Option<MessageMetadata>,
    ) -> Result<i64, WorklogError> {
        self.insert_and_trim(role, content.to_string(), metadata, Utc::now())
            .await
    }

    async fn insert_and_trim(
        &self,
        role: Role,
        content: String,
        metadata: Option<MessageMetadata>,
        created_at: DateTime<Utc>,
    ) -> Result<i64, WorklogError> {
        let user_id = self.user_id.clone();
        let keep = self.max_messages;
        call_blocking(self.db.clone(), move |db| {
            let id = db.insert_message(&user_id, role, &content, metadata.as_ref(), &created_at)?;
            // Retention is best-effort; the insert above already succeeded.
            match db.trim_messages(&user_id, keep) {
                Ok(0) => {}
                Ok(removed) => debug!("Trimmed {removed} old messages for user {user_id}"),
                Err(e) => warn!("Failed to trim message history for user {user_id}: {e}"),
            }
            Ok(id)
        })
        .await
    }

    /// Page counted from the newest end: skip `offset`, take `limit`,
    /// returned oldest first.
    pub async fn get_messages(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StoredMessage>, WorklogError> {
        if limit == 0 {
            return Err(WorklogError::invalid_argument("limit must be positive"));
        }
        let user_id = self.user_id.clone();
        call_blocking(self.db.clone(), move |db| {
            db.get_messages_page(&user_id, limit, offset)
        })
        .await
    }

    pub async fn get_messages_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<StoredMessage>, WorklogError> {
        let user_id = self.user_id.clone();
        call_blocking(self.db.clone(), move |db| {
            db.get_messages_since(&user_id, &since)
        })
        .await
    }

    pub async fn get_last_messages(&self, count: usize) -> Result<Vec<StoredMessage>, WorklogError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        self.get_messages(count, 0).await
    }

    /// Returns `false` when the id is unknown or owned by someone else.
    pub async fn delete_message(&self, id: i64) -> Result<bool, WorklogError> {
        let user_id = self.user_id.clone();
        call_blocking(self.db.clone(), move |db| db.delete_message(&user_id, id)).await
    }

    pub async fn clear_all_messages(&self) -> Result<usize, WorklogError> {
        let user_id = self.user_id.clone();
        call_blocking(self.db.clone(), move |db| db.clear_messages(&user_id)).await
    }

    pub async fn update_message_metadata(
        &self,
        id: i64,
        metadata: MessageMetadata,
    ) -> Result<bool, WorklogError> {
        let user_id = self.user_id.clone();
        call_blocking(self.db.clone(), move |db| {
            db.update_message_metadata(&user_id, id, &metadata)
        })
        .await
    }

    pub async fn search_messages(&self, query: &str) -> Result<Vec<StoredMessage>, WorklogError> {
        let user_id = self.user_id.clone();
        let query = query.to_string();
        call_blocking(self.db.clone(), move |db| db.search_messages(&user_id, &query)).await
    }

    pub async fn export_messages(&self) -> Result<String, WorklogError> {
        let messages = self.get_all_messages().await?;
        transfer::encode(messages)
    }

    /// Re-inserts every message of an export under this user. Ids are
    /// reassigned, `created_at` is kept from the payload. Not atomic: a
    /// store failure part-way leaves the earlier messages in place.
    pub async fn import_messages(&self, serialized: &str) -> Result<usize, WorklogError> {
        let messages = transfer::decode(serialized)?;
        let mut imported = 0;
        for msg in messages {
            self.insert_and_trim(msg.role, msg.content, msg.metadata, msg.created_at)
                .await?;
            imported += 1;
        }
        Ok(imported)
    }
}
