use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{MessageId, SessionId};

/// Storage-local message role, decoupled from the controller's role enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Model,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Model => "model",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "user" => Some(Self::User),
            "model" => Some(Self::Model),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: MessageId,
    pub session_id: SessionId,
    pub role: MessageRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub hidden_context: Option<String>,
    pub is_error: bool,
}

/// A persisted session together with its ordered messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub title: String,
    pub created_at_ms: i64,
    pub messages: Vec<MessageRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub id: MessageId,
    pub role: MessageRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub hidden_context: Option<String>,
    pub is_error: bool,
}

impl NewMessage {
    pub fn into_record(self, session_id: SessionId) -> MessageRecord {
        MessageRecord {
            id: self.id,
            session_id,
            role: self.role,
            text: self.text,
            timestamp: self.timestamp,
            hidden_context: self.hidden_context,
            is_error: self.is_error,
        }
    }
}

/// Creation payload: the session row plus the welcome message it was opened with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSession {
    pub id: SessionId,
    pub title: String,
    pub created_at_ms: i64,
    pub welcome: NewMessage,
}
