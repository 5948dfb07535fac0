use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use snafu::ResultExt;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};

use super::error::{
    DatabaseFolderSnafu, DatabaseOpenSnafu, DatabaseUrlSnafu, MalformedTimestampSnafu,
    MessageMissingSnafu, SchemaUpgradeSnafu, SessionMissingSnafu, StatementSnafu,
    StorageResult, UnknownRoleSnafu,
};
use super::ids::{MessageId, SessionId};
use super::types::{MessageRecord, MessageRole, NewMessage, NewSession, SessionRecord};
use super::{BoxFuture, ChatStore};

#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
    database_url: String,
}

impl SqliteStorage {
    pub async fn open(database_location: &str) -> StorageResult<Self> {
        ensure_database_directory(database_location)?;

        let database_url = normalize_database_url(database_location);
        let connect_options = SqliteConnectOptions::from_str(&database_url)
            .context(DatabaseUrlSnafu {
                stage: "sqlite-open-parse-url",
                database_url: database_url.clone(),
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(5_000));

        // A single long-lived connection keeps `:memory:` databases alive for the pool lifetime.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(connect_options)
            .await
            .context(DatabaseOpenSnafu {
                stage: "sqlite-open-connect",
                database_url: database_url.clone(),
            })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context(SchemaUpgradeSnafu {
                stage: "sqlite-open-migrate",
            })?;

        tracing::debug!(database_url = %database_url, "sqlite chat store ready");
        Ok(Self { pool, database_url })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    async fn insert_session(&self, input: NewSession) -> StorageResult<SessionRecord> {
        let mut tx = self.pool.begin().await.context(StatementSnafu {
            stage: "session-create-begin",
        })?;

        sqlx::query("INSERT INTO sessions (id, title, created_at_ms) VALUES (?, ?, ?)")
            .bind(input.id.to_string())
            .bind(input.title.clone())
            .bind(input.created_at_ms)
            .execute(&mut *tx)
            .await
            .context(StatementSnafu {
                stage: "session-create-insert-session",
            })?;

        // The welcome message is part of the creation so a listed session is never empty.
        let welcome = input.welcome.into_record(input.id);
        sqlx::query(
            "INSERT INTO messages (id, session_id, seq, role, text, timestamp, hidden_context, is_error) VALUES (?, ?, 1, ?, ?, ?, ?, ?)",
        )
        .bind(welcome.id.to_string())
        .bind(input.id.to_string())
        .bind(welcome.role.as_str())
        .bind(welcome.text.clone())
        .bind(welcome.timestamp.to_rfc3339())
        .bind(welcome.hidden_context.clone())
        .bind(welcome.is_error)
        .execute(&mut *tx)
        .await
        .context(StatementSnafu {
            stage: "session-create-insert-welcome",
        })?;

        tx.commit().await.context(StatementSnafu {
            stage: "session-create-commit",
        })?;

        Ok(SessionRecord {
            id: input.id,
            title: input.title,
            created_at_ms: input.created_at_ms,
            messages: vec![welcome],
        })
    }

    async fn insert_message(
        &self,
        session_id: SessionId,
        input: NewMessage,
    ) -> StorageResult<MessageRecord> {
        let record = input.into_record(session_id);

        // Re-appending an id replaces its content but keeps its original position.
        sqlx::query(
            "INSERT INTO messages (id, session_id, seq, role, text, timestamp, hidden_context, is_error) \
             VALUES (?, ?, (SELECT COALESCE(MAX(seq), 0) + 1 FROM messages WHERE session_id = ?), ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET text = excluded.text, is_error = excluded.is_error",
        )
        .bind(record.id.to_string())
        .bind(session_id.to_string())
        .bind(session_id.to_string())
        .bind(record.role.as_str())
        .bind(record.text.clone())
        .bind(record.timestamp.to_rfc3339())
        .bind(record.hidden_context.clone())
        .bind(record.is_error)
        .execute(&self.pool)
        .await
        .context(StatementSnafu {
            stage: "message-append-insert",
        })?;

        Ok(record)
    }

    async fn remove_message(&self, message_id: MessageId) -> StorageResult<()> {
        let result = sqlx::query("DELETE FROM messages WHERE id = ?")
            .bind(message_id.to_string())
            .execute(&self.pool)
            .await
            .context(StatementSnafu {
                stage: "message-delete-apply",
            })?;

        if result.rows_affected() == 0 {
            return MessageMissingSnafu {
                stage: "message-delete-missing",
                message_id,
            }
            .fail();
        }
        Ok(())
    }

    async fn remove_session(&self, session_id: SessionId) -> StorageResult<()> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(session_id.to_string())
            .execute(&self.pool)
            .await
            .context(StatementSnafu {
                stage: "session-delete-apply",
            })?;

        if result.rows_affected() == 0 {
            return SessionMissingSnafu {
                stage: "session-delete-missing",
                session_id,
            }
            .fail();
        }
        Ok(())
    }

    async fn update_title(&self, session_id: SessionId, title: String) -> StorageResult<()> {
        let result = sqlx::query("UPDATE sessions SET title = ? WHERE id = ?")
            .bind(title)
            .bind(session_id.to_string())
            .execute(&self.pool)
            .await
            .context(StatementSnafu {
                stage: "session-rename-apply",
            })?;

        if result.rows_affected() == 0 {
            return SessionMissingSnafu {
                stage: "session-rename-missing",
                session_id,
            }
            .fail();
        }
        Ok(())
    }

    async fn load_sessions(&self) -> StorageResult<Vec<SessionRecord>> {
        let session_rows = sqlx::query_as::<_, SessionRow>(
            "SELECT id, title, created_at_ms FROM sessions ORDER BY created_at_ms DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await
        .context(StatementSnafu {
            stage: "session-list-query",
        })?;

        let message_rows = sqlx::query_as::<_, MessageRow>(
            "SELECT id, session_id, role, text, timestamp, hidden_context, is_error FROM messages ORDER BY session_id ASC, seq ASC",
        )
        .fetch_all(&self.pool)
        .await
        .context(StatementSnafu {
            stage: "session-list-messages-query",
        })?;

        let mut sessions = session_rows
            .into_iter()
            .map(session_row_to_record)
            .collect::<StorageResult<Vec<_>>>()?;

        for row in message_rows {
            let record = message_row_to_record(row)?;
            if let Some(session) = sessions
                .iter_mut()
                .find(|session| session.id == record.session_id)
            {
                session.messages.push(record);
            }
        }

        Ok(sessions)
    }
}

impl ChatStore for SqliteStorage {
    fn create_chat_session<'a>(
        &'a self,
        input: NewSession,
    ) -> BoxFuture<'a, StorageResult<SessionRecord>> {
        Box::pin(self.insert_session(input))
    }

    fn append_message<'a>(
        &'a self,
        session_id: SessionId,
        input: NewMessage,
    ) -> BoxFuture<'a, StorageResult<MessageRecord>> {
        Box::pin(self.insert_message(session_id, input))
    }

    fn delete_message<'a>(&'a self, message_id: MessageId) -> BoxFuture<'a, StorageResult<()>> {
        Box::pin(self.remove_message(message_id))
    }

    fn delete_session<'a>(&'a self, session_id: SessionId) -> BoxFuture<'a, StorageResult<()>> {
        Box::pin(self.remove_session(session_id))
    }

    fn rename_session<'a>(
        &'a self,
        session_id: SessionId,
        title: String,
    ) -> BoxFuture<'a, StorageResult<()>> {
        Box::pin(self.update_title(session_id, title))
    }

    fn list_sessions<'a>(&'a self) -> BoxFuture<'a, StorageResult<Vec<SessionRecord>>> {
        Box::pin(self.load_sessions())
    }
}

#[derive(Debug, FromRow)]
struct SessionRow {
    id: String,
    title: String,
    created_at_ms: i64,
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: String,
    session_id: String,
    role: String,
    text: String,
    timestamp: String,
    hidden_context: Option<String>,
    is_error: bool,
}

fn session_row_to_record(row: SessionRow) -> StorageResult<SessionRecord> {
    Ok(SessionRecord {
        id: SessionId::parse(&row.id)?,
        title: row.title,
        created_at_ms: row.created_at_ms,
        messages: Vec::new(),
    })
}

fn message_row_to_record(row: MessageRow) -> StorageResult<MessageRecord> {
    Ok(MessageRecord {
        id: MessageId::parse(&row.id)?,
        session_id: SessionId::parse(&row.session_id)?,
        role: role_from_sql(&row.role)?,
        text: row.text,
        timestamp: timestamp_from_sql(&row.timestamp)?,
        hidden_context: row.hidden_context,
        is_error: row.is_error,
    })
}

fn role_from_sql(raw: &str) -> StorageResult<MessageRole> {
    match MessageRole::parse(raw) {
        Some(role) => Ok(role),
        None => UnknownRoleSnafu {
            stage: "message-role-from-sql",
            raw,
        }
        .fail(),
    }
}

fn timestamp_from_sql(raw: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .context(MalformedTimestampSnafu {
            stage: "message-timestamp-from-sql",
            raw,
        })
}

fn ensure_database_directory(database_location: &str) -> StorageResult<()> {
    if database_location.starts_with("sqlite:") || database_location == ":memory:" {
        return Ok(());
    }

    let path = Path::new(database_location);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context(DatabaseFolderSnafu {
            stage: "sqlite-open-create-directory",
            path: parent.display().to_string(),
        })?;
    }

    Ok(())
}

fn normalize_database_url(database_location: &str) -> String {
    if database_location.starts_with("sqlite:") {
        return database_location.to_string();
    }

    if database_location == ":memory:" {
        return "sqlite::memory:".to_string();
    }

    format!("sqlite://{database_location}")
}
