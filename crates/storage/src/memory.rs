use std::sync::Arc;

use parking_lot::Mutex;
use snafu::OptionExt;

use super::error::{
    MessageMissingSnafu, SessionExistsSnafu, SessionMissingSnafu, StorageResult,
};
use super::ids::{MessageId, SessionId};
use super::types::{MessageRecord, NewMessage, NewSession, SessionRecord};
use super::{BoxFuture, ChatStore};

/// In-process store with the same contract as [`crate::SqliteStorage`].
///
/// Useful for tests and for running without a database file.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    sessions: Arc<Mutex<Vec<SessionRecord>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything currently stored, newest session first.
    pub fn snapshot(&self) -> Vec<SessionRecord> {
        let mut sessions = self.sessions.lock().clone();
        sort_newest_first(&mut sessions);
        sessions
    }

    fn create_now(&self, input: NewSession) -> StorageResult<SessionRecord> {
        let mut sessions = self.sessions.lock();
        if sessions.iter().any(|session| session.id == input.id) {
            return SessionExistsSnafu {
                stage: "memory-session-create",
                session_id: input.id,
            }
            .fail();
        }

        let record = SessionRecord {
            id: input.id,
            title: input.title,
            created_at_ms: input.created_at_ms,
            messages: vec![input.welcome.into_record(input.id)],
        };
        sessions.push(record.clone());
        Ok(record)
    }

    fn append_now(&self, session_id: SessionId, input: NewMessage) -> StorageResult<MessageRecord> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .iter_mut()
            .find(|session| session.id == session_id)
            .context(SessionMissingSnafu {
                stage: "memory-message-append",
                session_id,
            })?;

        let record = input.into_record(session_id);
        match session
            .messages
            .iter_mut()
            .find(|message| message.id == record.id)
        {
            Some(existing) => *existing = record.clone(),
            None => session.messages.push(record.clone()),
        }
        Ok(record)
    }

    fn delete_message_now(&self, message_id: MessageId) -> StorageResult<()> {
        let mut sessions = self.sessions.lock();
        for session in sessions.iter_mut() {
            let before = session.messages.len();
            session.messages.retain(|message| message.id != message_id);
            if session.messages.len() != before {
                return Ok(());
            }
        }

        MessageMissingSnafu {
            stage: "memory-message-delete",
            message_id,
        }
        .fail()
    }

    fn delete_session_now(&self, session_id: SessionId) -> StorageResult<()> {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|session| session.id != session_id);
        if sessions.len() == before {
            return SessionMissingSnafu {
                stage: "memory-session-delete",
                session_id,
            }
            .fail();
        }
        Ok(())
    }

    fn rename_now(&self, session_id: SessionId, title: String) -> StorageResult<()> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .iter_mut()
            .find(|session| session.id == session_id)
            .context(SessionMissingSnafu {
                stage: "memory-session-rename",
                session_id,
            })?;
        session.title = title;
        Ok(())
    }
}

impl ChatStore for MemoryStorage {
    fn create_chat_session<'a>(
        &'a self,
        input: NewSession,
    ) -> BoxFuture<'a, StorageResult<SessionRecord>> {
        Box::pin(async move { self.create_now(input) })
    }

    fn append_message<'a>(
        &'a self,
        session_id: SessionId,
        input: NewMessage,
    ) -> BoxFuture<'a, StorageResult<MessageRecord>> {
        Box::pin(async move { self.append_now(session_id, input) })
    }

    fn delete_message<'a>(&'a self, message_id: MessageId) -> BoxFuture<'a, StorageResult<()>> {
        Box::pin(async move { self.delete_message_now(message_id) })
    }

    fn delete_session<'a>(&'a self, session_id: SessionId) -> BoxFuture<'a, StorageResult<()>> {
        Box::pin(async move { self.delete_session_now(session_id) })
    }

    fn rename_session<'a>(
        &'a self,
        session_id: SessionId,
        title: String,
    ) -> BoxFuture<'a, StorageResult<()>> {
        Box::pin(async move { self.rename_now(session_id, title) })
    }

    fn list_sessions<'a>(&'a self) -> BoxFuture<'a, StorageResult<Vec<SessionRecord>>> {
        Box::pin(async move { Ok(self.snapshot()) })
    }
}

fn sort_newest_first(sessions: &mut [SessionRecord]) {
    sessions.sort_by(|left, right| {
        right
            .created_at_ms
            .cmp(&left.created_at_ms)
            .then_with(|| right.id.cmp(&left.id))
    });
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::error::StorageError;
    use crate::types::MessageRole;

    fn message(role: MessageRole, text: &str) -> NewMessage {
        NewMessage {
            id: MessageId::new_v7(),
            role,
            text: text.to_string(),
            timestamp: Utc::now(),
            hidden_context: None,
            is_error: false,
        }
    }

    fn session(created_at_ms: i64) -> NewSession {
        NewSession {
            id: SessionId::new_v7(),
            title: "New Chat".to_string(),
            created_at_ms,
            welcome: message(MessageRole::Model, "Welcome"),
        }
    }

    #[tokio::test]
    async fn create_stores_welcome_message() {
        let store = MemoryStorage::new();
        let created = store.create_chat_session(session(10)).await.unwrap();

        assert_eq!(created.messages.len(), 1);
        assert_eq!(created.messages[0].role, MessageRole::Model);
        assert_eq!(store.snapshot(), vec![created]);
    }

    #[tokio::test]
    async fn list_orders_newest_first() {
        let store = MemoryStorage::new();
        let older = store.create_chat_session(session(10)).await.unwrap();
        let newer = store.create_chat_session(session(20)).await.unwrap();

        let listed = store.list_sessions().await.unwrap();
        let ids = listed.iter().map(|session| session.id).collect::<Vec<_>>();
        assert_eq!(ids, vec![newer.id, older.id]);
    }

    #[tokio::test]
    async fn append_to_unknown_session_fails() {
        let store = MemoryStorage::new();
        let error = store
            .append_message(SessionId::new_v7(), message(MessageRole::User, "hi"))
            .await
            .unwrap_err();
        assert!(matches!(error, StorageError::SessionMissing { .. }));
        assert!(error.is_missing());
    }

    #[tokio::test]
    async fn delete_session_cascades_messages() {
        let store = MemoryStorage::new();
        let created = store.create_chat_session(session(10)).await.unwrap();
        let user = message(MessageRole::User, "hello");
        let user_id = user.id;
        store.append_message(created.id, user).await.unwrap();

        store.delete_session(created.id).await.unwrap();

        assert!(store.snapshot().is_empty());
        assert!(store.delete_message(user_id).await.is_err());
    }

    #[tokio::test]
    async fn delete_message_removes_only_that_row() {
        let store = MemoryStorage::new();
        let created = store.create_chat_session(session(10)).await.unwrap();
        let user = message(MessageRole::User, "hello");
        let reply = message(MessageRole::Model, "hi there");
        let reply_id = reply.id;
        store.append_message(created.id, user).await.unwrap();
        store.append_message(created.id, reply).await.unwrap();

        store.delete_message(reply_id).await.unwrap();

        let texts = store.snapshot()[0]
            .messages
            .iter()
            .map(|message| message.text.clone())
            .collect::<Vec<_>>();
        assert_eq!(texts, vec!["Welcome".to_string(), "hello".to_string()]);
    }
}
