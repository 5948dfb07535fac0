use chrono::{DateTime, Utc};
use selah_llm::{ProviderMessage, Role as ProviderRole};
use selah_storage::{
    MessageId, MessageRecord, MessageRole, NewMessage, NewSession, SessionId, SessionRecord,
};

/// Chat speaker role. `Model` is assistant-authored text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Model,
}

/// One chat turn.
///
/// `text` only grows while a generation streams into it; `timestamp` is fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub hidden_context: Option<String>,
    pub is_error: bool,
}

impl Message {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            id: MessageId::new_v7(),
            role,
            text: text.into(),
            timestamp: Utc::now(),
            hidden_context: None,
            is_error: false,
        }
    }

    pub fn user(text: impl Into<String>, hidden_context: Option<String>) -> Self {
        Self {
            hidden_context,
            ..Self::new(Role::User, text)
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self::new(Role::Model, text)
    }

    /// Empty assistant message that a generation fills in place.
    pub fn placeholder() -> Self {
        Self::new(Role::Model, String::new())
    }

    pub fn to_new_message(&self) -> NewMessage {
        NewMessage {
            id: self.id,
            role: match self.role {
                Role::User => MessageRole::User,
                Role::Model => MessageRole::Model,
            },
            text: self.text.clone(),
            timestamp: self.timestamp,
            hidden_context: self.hidden_context.clone(),
            is_error: self.is_error,
        }
    }

    pub fn to_provider_message(&self) -> ProviderMessage {
        let role = match self.role {
            Role::User => ProviderRole::User,
            Role::Model => ProviderRole::Assistant,
        };
        ProviderMessage::new(role, self.text.clone())
    }
}

impl From<MessageRecord> for Message {
    fn from(record: MessageRecord) -> Self {
        Self {
            id: record.id,
            role: match record.role {
                MessageRole::User => Role::User,
                MessageRole::Model => Role::Model,
            },
            text: record.text,
            timestamp: record.timestamp,
            hidden_context: record.hidden_context,
            is_error: record.is_error,
        }
    }
}

/// Title lifecycle: summarised once, on the first real exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TitleState {
    #[default]
    Untitled,
    Summarizing,
    Titled,
}

/// One conversation thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSession {
    pub id: SessionId,
    pub title: String,
    pub created_at_ms: i64,
    pub messages: Vec<Message>,
    /// True until the first round trip has been handed to the durable store.
    pub is_temp: bool,
    pub title_state: TitleState,
}

impl ChatSession {
    /// Fresh, not yet persisted session opened by a single welcome message.
    pub fn new(title: impl Into<String>, welcome_text: impl Into<String>) -> Self {
        Self {
            id: SessionId::new_v7(),
            title: title.into(),
            created_at_ms: Utc::now().timestamp_millis(),
            messages: vec![Message::model(welcome_text)],
            is_temp: true,
            title_state: TitleState::Untitled,
        }
    }

    pub fn message(&self, message_id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|message| message.id == message_id)
    }

    pub fn message_mut(&mut self, message_id: MessageId) -> Option<&mut Message> {
        self.messages
            .iter_mut()
            .find(|message| message.id == message_id)
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Creation payload for the durable store: title plus the original welcome message.
    pub fn to_new_session(&self) -> Option<NewSession> {
        let welcome = self.messages.first()?;
        Some(NewSession {
            id: self.id,
            title: self.title.clone(),
            created_at_ms: self.created_at_ms,
            welcome: welcome.to_new_message(),
        })
    }
}

impl From<SessionRecord> for ChatSession {
    fn from(record: SessionRecord) -> Self {
        Self {
            id: record.id,
            title: record.title,
            created_at_ms: record.created_at_ms,
            messages: record.messages.into_iter().map(Message::from).collect(),
            is_temp: false,
            title_state: TitleState::Titled,
        }
    }
}
