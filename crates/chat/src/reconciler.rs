use std::sync::Arc;

use selah_storage::{ChatStore, MessageId, SessionId, StorageResult};

use crate::message::{ChatSession, Message};

/// Mirrors local session changes into the durable store.
///
/// Local state is authoritative. Failures are logged and never undone, except for
/// session deletion which hands the error back so the caller can roll back.
#[derive(Clone)]
pub struct PersistenceReconciler {
    store: Arc<dyn ChatStore>,
}

impl PersistenceReconciler {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }

    pub async fn load(&self) -> StorageResult<Vec<ChatSession>> {
        let records = self.store.list_sessions().await?;
        Ok(records.into_iter().map(ChatSession::from).collect())
    }

    /// Creates the session with its title and welcome message only.
    pub async fn create_session(&self, session: &ChatSession) -> bool {
        let Some(input) = session.to_new_session() else {
            tracing::warn!(session_id = %session.id, "session has no welcome message to persist");
            return false;
        };

        match self.store.create_chat_session(input).await {
            Ok(_) => {
                tracing::debug!(session_id = %session.id, "persisted new session");
                true
            }
            Err(error) => {
                tracing::warn!(session_id = %session.id, error = %error, "failed to persist new session");
                false
            }
        }
    }

    pub async fn append_message(&self, session_id: SessionId, message: &Message) -> bool {
        match self
            .store
            .append_message(session_id, message.to_new_message())
            .await
        {
            Ok(_) => true,
            Err(error) => {
                tracing::warn!(
                    session_id = %session_id,
                    message_id = %message.id,
                    error = %error,
                    "failed to persist message"
                );
                false
            }
        }
    }

    pub async fn delete_message(&self, message_id: MessageId) -> bool {
        match self.store.delete_message(message_id).await {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(message_id = %message_id, error = %error, "failed to delete message");
                false
            }
        }
    }

    pub async fn rename_session(&self, session_id: SessionId, title: String) -> bool {
        match self.store.rename_session(session_id, title).await {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(session_id = %session_id, error = %error, "failed to rename session");
                false
            }
        }
    }

    pub async fn delete_session(&self, session_id: SessionId) -> StorageResult<()> {
        self.store.delete_session(session_id).await
    }
}
