use snafu::Snafu;

use super::ids::{MessageId, SessionId};

/// Failures from either chat store.
///
/// `stage` names the store call that failed and shows up in every log line the
/// controller writes when it rolls a change back.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StorageError {
    #[snafu(display("chat {session_id} is not stored"))]
    SessionMissing {
        stage: &'static str,
        session_id: SessionId,
    },
    #[snafu(display("message {message_id} is not stored"))]
    MessageMissing {
        stage: &'static str,
        message_id: MessageId,
    },
    #[snafu(display("chat {session_id} is already stored"))]
    SessionExists {
        stage: &'static str,
        session_id: SessionId,
    },
    #[snafu(display("'{raw}' is not a {kind} id"))]
    MalformedId {
        stage: &'static str,
        kind: &'static str,
        raw: String,
        source: uuid::Error,
    },
    #[snafu(display("stored message role '{raw}' is unknown"))]
    UnknownRole { stage: &'static str, raw: String },
    #[snafu(display("stored message time '{raw}' is not RFC 3339"))]
    MalformedTimestamp {
        stage: &'static str,
        raw: String,
        source: chrono::ParseError,
    },
    #[snafu(display("chat store is unavailable: {details}"))]
    Unavailable {
        stage: &'static str,
        details: String,
    },
    #[snafu(display("cannot create the chat database folder {path}"))]
    DatabaseFolder {
        stage: &'static str,
        path: String,
        source: std::io::Error,
    },
    #[snafu(display("'{database_url}' is not a usable sqlite location"))]
    DatabaseUrl {
        stage: &'static str,
        database_url: String,
        source: sqlx::Error,
    },
    #[snafu(display("cannot open the chat database at {database_url}"))]
    DatabaseOpen {
        stage: &'static str,
        database_url: String,
        source: sqlx::Error,
    },
    #[snafu(display("chat database schema upgrade failed"))]
    SchemaUpgrade {
        stage: &'static str,
        source: sqlx::migrate::MigrateError,
    },
    #[snafu(display("chat database statement failed at {stage}: {source}"))]
    Statement {
        stage: &'static str,
        source: sqlx::Error,
    },
}

impl StorageError {
    /// True when the row the call targeted was already gone.
    pub fn is_missing(&self) -> bool {
        matches!(
            self,
            Self::SessionMissing { .. } | Self::MessageMissing { .. }
        )
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
