use selah_storage::{MessageId, SessionId};

use crate::stream::{GenerationOutcome, GenerationTarget};

/// Change notifications broadcast by the controller for presentation layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// The session list was replaced, reordered, grown or shrunk.
    SessionsChanged,
    ActiveSessionChanged(Option<SessionId>),
    TitleChanged {
        session_id: SessionId,
        title: String,
    },
    MessageAdded {
        session_id: SessionId,
        message_id: MessageId,
    },
    MessageRemoved {
        session_id: SessionId,
        message_id: MessageId,
    },
    /// A streaming reply grew; `text` is the full reply so far.
    MessageUpdated {
        target: GenerationTarget,
        text: String,
    },
    GenerationStarted(GenerationTarget),
    GenerationFinished {
        target: GenerationTarget,
        outcome: GenerationOutcome,
    },
    /// A send or regenerate was refused for lack of a credential.
    CredentialRequired,
}

impl ChatEvent {
    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            Self::SessionsChanged | Self::CredentialRequired => None,
            Self::ActiveSessionChanged(session_id) => *session_id,
            Self::TitleChanged { session_id, .. }
            | Self::MessageAdded { session_id, .. }
            | Self::MessageRemoved { session_id, .. } => Some(*session_id),
            Self::MessageUpdated { target, .. }
            | Self::GenerationStarted(target)
            | Self::GenerationFinished { target, .. } => Some(target.session_id),
        }
    }
}
