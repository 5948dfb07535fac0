use selah_storage::{MessageId, SessionId};

use crate::message::{ChatSession, Message, TitleState};

/// Ordered in-memory session list plus the active pointer.
///
/// Newest sessions sit at the front. The active pointer always names a listed session
/// or is `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStore {
    sessions: Vec<ChatSession>,
    active: Option<SessionId>,
}

/// Everything needed to undo a [`SessionStore::remove`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedSession {
    pub session: ChatSession,
    pub index: usize,
    pub active_before: Option<SessionId>,
    pub active_after: Option<SessionId>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sessions(&self) -> &[ChatSession] {
        &self.sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn active_id(&self) -> Option<SessionId> {
        self.active
    }

    pub fn active(&self) -> Option<&ChatSession> {
        self.active.and_then(|id| self.get(id))
    }

    pub fn active_mut(&mut self) -> Option<&mut ChatSession> {
        let id = self.active?;
        self.get_mut(id)
    }

    pub fn get(&self, id: SessionId) -> Option<&ChatSession> {
        self.sessions.iter().find(|session| session.id == id)
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut ChatSession> {
        self.sessions.iter_mut().find(|session| session.id == id)
    }

    fn position(&self, id: SessionId) -> Option<usize> {
        self.sessions.iter().position(|session| session.id == id)
    }

    /// Replaces the whole list, activating the first entry.
    pub fn replace_all(&mut self, sessions: Vec<ChatSession>) {
        self.active = sessions.first().map(|session| session.id);
        self.sessions = sessions;
    }

    pub fn insert_front(&mut self, session: ChatSession, activate: bool) -> SessionId {
        let id = session.id;
        self.sessions.insert(0, session);
        if activate || self.active.is_none() {
            self.active = Some(id);
        }
        id
    }

    pub fn select(&mut self, id: SessionId) -> bool {
        if self.position(id).is_none() {
            return false;
        }
        self.active = Some(id);
        true
    }

    /// Removes a session. When it was active, the session now at its index (or the
    /// one before it) becomes active.
    pub fn remove(&mut self, id: SessionId) -> Option<RemovedSession> {
        let index = self.position(id)?;
        let active_before = self.active;
        let session = self.sessions.remove(index);

        if self.active == Some(id) {
            self.active = self
                .sessions
                .get(index)
                .or_else(|| index.checked_sub(1).and_then(|prev| self.sessions.get(prev)))
                .map(|session| session.id);
        }

        Some(RemovedSession {
            session,
            index,
            active_before,
            active_after: self.active,
        })
    }

    /// Puts a removed session back where it was.
    ///
    /// The active pointer is only rewound if nothing moved it since the removal.
    pub fn restore(&mut self, removed: RemovedSession) {
        if self.position(removed.session.id).is_some() {
            return;
        }
        let index = removed.index.min(self.sessions.len());
        self.sessions.insert(index, removed.session);
        if self.active == removed.active_after {
            self.active = removed.active_before;
        }
    }

    /// Sets a new title. Returns the previous `is_temp` flag, or `None` when unknown.
    pub fn rename(&mut self, id: SessionId, title: impl Into<String>) -> Option<bool> {
        let session = self.get_mut(id)?;
        let was_temp = session.is_temp;
        session.title = title.into();
        session.is_temp = false;
        session.title_state = TitleState::Titled;
        Some(was_temp)
    }

    pub fn message_mut(
        &mut self,
        session_id: SessionId,
        message_id: MessageId,
    ) -> Option<&mut Message> {
        self.get_mut(session_id)?.message_mut(message_id)
    }

    /// Overwrites a message's text. Unknown targets are ignored.
    pub fn overwrite_text(
        &mut self,
        session_id: SessionId,
        message_id: MessageId,
        text: impl Into<String>,
    ) -> bool {
        match self.message_mut(session_id, message_id) {
            Some(message) => {
                message.text = text.into();
                true
            }
            None => false,
        }
    }
}
