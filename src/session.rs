//! Login-scoped access to chat history.
//!
//! A `Session` owns at most one `MessageAccessor`, created on login for the
//! authenticated user and dropped on logout. Callers pass the session (or
//! the accessor it hands out) down explicitly.

use std::sync::Arc;

use tracing::info;
use worklog_core::error::WorklogError;
use worklog_core::message::{MessageMetadata, Role};
use worklog_storage::accessor::MessageAccessor;
use worklog_storage::db::Database;

pub struct Session {
    db: Arc<Database>,
    max_messages: usize,
    active: Option<MessageAccessor>,
}

impl Session {
    pub fn new(db: Arc<Database>, max_messages: usize) -> Self {
        Session {
            db,
            max_messages,
            active: None,
        }
    }

    /// Binds the session to `user_id`, replacing any previous user.
    pub fn login(&mut self, user_id: &str) -> Result<&MessageAccessor, WorklogError> {
        let accessor =
            MessageAccessor::new(self.db.clone(), user_id)?.with_max_messages(self.max_messages);
        if let Some(previous) = self.active.replace(accessor) {
            info!("Session switched from user {} to {user_id}", previous.user_id());
        }
        self.accessor()
    }

    /// Returns the user id that was logged out, if any.
    pub fn logout(&mut self) -> Option<String> {
        self.active.take().map(|a| a.user_id().to_string())
    }

    pub fn current_user(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.user_id())
    }

    pub fn accessor(&self) -> Result<&MessageAccessor, WorklogError> {
        self.active
            .as_ref()
            .ok_or_else(|| WorklogError::invalid_argument("no user is logged in"))
    }

    /// Stores one chat exchange: the user's prompt followed by the reply.
    pub async fn record_turn(
        &self,
        prompt: &str,
        reply: &str,
        reply_metadata: Option<MessageMetadata>,
    ) -> Result<(i64, i64), WorklogError> {
        let accessor = self.accessor()?;
        let prompt_id = accessor.add_message(Role::User, prompt, None).await?;
        let reply_id = accessor
            .add_message(Role::Assistant, reply, reply_metadata)
            .await?;
        Ok((prompt_id, reply_id))
    }

    /// Most recent `count` messages as `(role, content)` pairs, oldest
    /// first, ready to be sent as LLM context.
    pub async fn context_window(&self, count: usize) -> Result<Vec<(Role, String)>, WorklogError> {
        let messages = self.accessor()?.get_last_messages(count).await?;
        Ok(messages.into_iter().map(|m| (m.role, m.content)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use worklog_storage::migrations::run_migrations;

    fn test_session(max_messages: usize) -> Session {
        let db = Database::in_memory();
        db.open().unwrap();
        run_migrations(&db).unwrap();
        Session::new(Arc::new(db), max_messages)
    }

    #[test]
    fn test_accessor_requires_login() {
        let mut session = test_session(1000);
        assert!(matches!(
            session.accessor(),
            Err(WorklogError::InvalidArgument(_))
        ));
        assert!(session.login("").is_err());
        assert!(session.current_user().is_none());

        session.login("alice").unwrap();
        assert_eq!(session.current_user(), Some("alice"));
        assert_eq!(session.accessor().unwrap().max_messages(), 1000);

        assert_eq!(session.logout(), Some("alice".to_string()));
        assert!(session.accessor().is_err());
        assert_eq!(session.logout(), None);
    }

    #[tokio::test]
    async fn test_record_turn_and_context_window() {
        let mut session = test_session(1000);
        session.login("alice").unwrap();
        session
            .record_turn("What did I do today?", "You closed 2 issues.", None)
            .await
            .unwrap();
        session
            .record_turn(
                "And yesterday?",
                "You reviewed 4 MRs.",
                Some(MessageMetadata::with_model("claude-sonnet")),
            )
            .await
            .unwrap();

        let window = session.context_window(3).await.unwrap();
        assert_eq!(
            window,
            vec![
                (Role::Assistant, "You closed 2 issues.".to_string()),
                (Role::User, "And yesterday?".to_string()),
                (Role::Assistant, "You reviewed 4 MRs.".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_switching_users_switches_partition() {
        let mut session = test_session(1000);
        session.login("alice").unwrap();
        session.record_turn("hi", "hello alice", None).await.unwrap();

        session.login("bob").unwrap();
        assert!(session.context_window(10).await.unwrap().is_empty());

        session.login("alice").unwrap();
        assert_eq!(session.context_window(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_session_applies_configured_ceiling() {
        let mut session = test_session(2);
        session.login("alice").unwrap();
        session.record_turn("q1", "a1", None).await.unwrap();
        session.record_turn("q2", "a2", None).await.unwrap();
        let window = session.context_window(10).await.unwrap();
        let contents: Vec<&str> = window.iter().map(|(_, c)| c.as_str()).collect();
        assert_eq!(contents, vec!["q2", "a2"]);
    }
}
