use std::future::Future;
use std::pin::Pin;

pub mod error;
pub mod ids;
pub mod memory;
pub mod sqlite;
pub mod types;

pub use error::{StorageError, StorageResult};
pub use ids::{MessageId, SessionId};
pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;
pub use types::{MessageRecord, MessageRole, NewMessage, NewSession, SessionRecord};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Durable copy of the chat history.
///
/// Every call may fail independently; callers decide per operation whether a
/// failure is logged or rolled back.
pub trait ChatStore: Send + Sync {
    fn create_chat_session<'a>(
        &'a self,
        input: NewSession,
    ) -> BoxFuture<'a, StorageResult<SessionRecord>>;

    fn append_message<'a>(
        &'a self,
        session_id: SessionId,
        input: NewMessage,
    ) -> BoxFuture<'a, StorageResult<MessageRecord>>;

    fn delete_message<'a>(&'a self, message_id: MessageId) -> BoxFuture<'a, StorageResult<()>>;

    /// Removes the session and every message it owns.
    fn delete_session<'a>(&'a self, session_id: SessionId) -> BoxFuture<'a, StorageResult<()>>;

    fn rename_session<'a>(
        &'a self,
        session_id: SessionId,
        title: String,
    ) -> BoxFuture<'a, StorageResult<()>>;

    /// Sessions newest first, each with its messages in conversational order.
    fn list_sessions<'a>(&'a self) -> BoxFuture<'a, StorageResult<Vec<SessionRecord>>>;
}
