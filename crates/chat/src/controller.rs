use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use selah_llm::{GenerationOptions, LlmProvider};
use selah_storage::{ChatStore, MessageId, SessionId, StorageResult};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

use crate::credential::CredentialGate;
use crate::events::ChatEvent;
use crate::locale::Localizer;
use crate::message::ChatSession;
use crate::reconciler::PersistenceReconciler;
use crate::store::SessionStore;
use crate::stream::{GenerationTarget, StreamState, StreamTransition, StreamTransitionRejection};

pub const DEFAULT_STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Per-user generation settings, forwarded to the provider without interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatOptions {
    pub language: String,
    pub display_name: Option<String>,
    pub translation_id: Option<String>,
    pub persona_override: Option<String>,
    /// Longest gap between stream events before the watchdog fails the generation.
    pub stream_idle_timeout: Duration,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            display_name: None,
            translation_id: None,
            persona_override: None,
            stream_idle_timeout: DEFAULT_STREAM_IDLE_TIMEOUT,
        }
    }
}

impl ChatOptions {
    pub fn generation_options(&self) -> GenerationOptions {
        GenerationOptions {
            translation_id: self.translation_id.clone(),
            language: self.language.clone(),
            display_name: self.display_name.clone(),
            persona_override: self.persona_override.clone(),
        }
    }
}

/// Collaborators the controller talks to.
pub struct ChatDependencies {
    pub store: Arc<dyn ChatStore>,
    pub provider: Arc<dyn LlmProvider>,
    pub credential: Arc<dyn CredentialGate>,
    pub localizer: Arc<dyn Localizer>,
}

pub(crate) struct ControllerState {
    pub(crate) sessions: SessionStore,
    pub(crate) stream: StreamState,
    pub(crate) cancel_tx: Option<oneshot::Sender<()>>,
    /// Sessions whose first send is still writing the session row.
    pub(crate) pending_creates: HashSet<SessionId>,
    /// Last queued store write; every new write runs after it.
    pub(crate) write_tail: Option<JoinHandle<()>>,
}

impl ControllerState {
    /// Claims the generating flag for `target`. Returns the active target on rejection.
    pub(crate) fn start_generation(
        &mut self,
        target: GenerationTarget,
    ) -> Result<oneshot::Receiver<()>, GenerationTarget> {
        match self.stream.apply(StreamTransition::Start(target)) {
            Ok(next) => {
                let (cancel_tx, cancel_rx) = oneshot::channel();
                self.stream = next;
                self.cancel_tx = Some(cancel_tx);
                Ok(cancel_rx)
            }
            Err(
                StreamTransitionRejection::AlreadyStreaming { active, .. }
                | StreamTransitionRejection::TargetMismatch { active, .. },
            ) => Err(active),
            Err(StreamTransitionRejection::NoActiveStream) => Err(target),
        }
    }

    /// Runs `write` after every previously queued write, so rows land in the order the
    /// conversation produced them. The receiver resolves once `write` has returned.
    pub(crate) fn queue_write<F>(&mut self, write: F) -> oneshot::Receiver<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let previous = self.write_tail.take();
        let (done_tx, done_rx) = oneshot::channel();
        self.write_tail = Some(tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            write.await;
            let _ = done_tx.send(());
        }));
        done_rx
    }
}

pub(crate) struct ControllerInner {
    pub(crate) state: Mutex<ControllerState>,
    pub(crate) reconciler: PersistenceReconciler,
    pub(crate) provider: Arc<dyn LlmProvider>,
    pub(crate) credential: Arc<dyn CredentialGate>,
    pub(crate) localizer: Arc<dyn Localizer>,
    pub(crate) options: RwLock<ChatOptions>,
    pub(crate) events: broadcast::Sender<ChatEvent>,
}

impl ControllerInner {
    pub(crate) fn emit(&self, event: ChatEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn new_session(&self) -> ChatSession {
        let options = self.options.read();
        ChatSession::new(
            self.localizer.default_title(&options.language),
            self.localizer
                .welcome_message(&options.language, options.display_name.as_deref()),
        )
    }

    pub(crate) fn create_session(&self, activate: bool) -> SessionId {
        let session = self.new_session();
        let (session_id, active) = {
            let mut state = self.state.lock();
            let session_id = state.sessions.insert_front(session, activate);
            (session_id, state.sessions.active_id())
        };

        tracing::info!(session_id = %session_id, "created session");
        self.emit(ChatEvent::SessionsChanged);
        if active == Some(session_id) {
            self.emit(ChatEvent::ActiveSessionChanged(active));
        }
        session_id
    }
}

/// Owns the session list and drives sends, regenerations and their persistence.
///
/// Cheap to clone; clones share state. Methods that start generations spawn onto the
/// ambient tokio runtime.
#[derive(Clone)]
pub struct ChatController {
    pub(crate) inner: Arc<ControllerInner>,
}

impl ChatController {
    pub fn new(dependencies: ChatDependencies, options: ChatOptions) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(ControllerInner {
                state: Mutex::new(ControllerState {
                    sessions: SessionStore::new(),
                    stream: StreamState::Idle,
                    cancel_tx: None,
                    pending_creates: HashSet::new(),
                    write_tail: None,
                }),
                reconciler: PersistenceReconciler::new(dependencies.store),
                provider: dependencies.provider,
                credential: dependencies.credential,
                localizer: dependencies.localizer,
                options: RwLock::new(options),
                events,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.inner.events.subscribe()
    }

    pub fn options(&self) -> ChatOptions {
        self.inner.options.read().clone()
    }

    /// Takes effect for sessions and generations started afterwards.
    pub fn set_options(&self, options: ChatOptions) {
        *self.inner.options.write() = options;
    }

    pub fn sessions(&self) -> Vec<ChatSession> {
        self.inner.state.lock().sessions.sessions().to_vec()
    }

    pub fn session(&self, session_id: SessionId) -> Option<ChatSession> {
        self.inner.state.lock().sessions.get(session_id).cloned()
    }

    pub fn active_session_id(&self) -> Option<SessionId> {
        self.inner.state.lock().sessions.active_id()
    }

    pub fn active_session(&self) -> Option<ChatSession> {
        self.inner.state.lock().sessions.active().cloned()
    }

    pub fn is_generating(&self) -> bool {
        self.inner.state.lock().stream.is_streaming()
    }

    pub fn active_generation(&self) -> Option<GenerationTarget> {
        self.inner.state.lock().stream.active_target()
    }

    pub fn has_valid_credential(&self) -> bool {
        self.inner.credential.has_valid_credential()
    }

    /// Replaces the in-memory list with the durable copy, newest first.
    ///
    /// Falls back to one fresh unsaved session when the store is empty or unreachable.
    /// Returns how many sessions were loaded.
    pub async fn load_sessions(&self) -> usize {
        let mut sessions = match self.inner.reconciler.load().await {
            Ok(sessions) => sessions,
            Err(error) => {
                tracing::warn!(error = %error, "failed to load sessions, starting fresh");
                Vec::new()
            }
        };

        if sessions.is_empty() {
            self.inner.create_session(true);
            return 0;
        }

        sessions.sort_by(|left, right| right.created_at_ms.cmp(&left.created_at_ms));
        let count = sessions.len();
        let active = {
            let mut state = self.inner.state.lock();
            state.sessions.replace_all(sessions);
            state.sessions.active_id()
        };

        tracing::info!(count, "loaded sessions");
        self.inner.emit(ChatEvent::SessionsChanged);
        self.inner.emit(ChatEvent::ActiveSessionChanged(active));
        count
    }

    pub fn create_session(&self, activate: bool) -> SessionId {
        self.inner.create_session(activate)
    }

    pub fn select_session(&self, session_id: SessionId) -> bool {
        let selected = self.inner.state.lock().sessions.select(session_id);
        if selected {
            self.inner
                .emit(ChatEvent::ActiveSessionChanged(Some(session_id)));
        }
        selected
    }

    /// Sets a title locally, then persists it. Persistence failures are logged only.
    ///
    /// A session that was never saved is created in the store under the new title.
    pub async fn rename_session(&self, session_id: SessionId, title: impl Into<String>) -> bool {
        let title = title.into().trim().to_string();
        if title.is_empty() {
            return false;
        }

        let renamed = {
            let mut state = self.inner.state.lock();
            state
                .sessions
                .rename(session_id, title.clone())
                .and_then(|was_temp| {
                    state
                        .sessions
                        .get(session_id)
                        .cloned()
                        .map(|session| (was_temp, session))
                })
        };
        let Some((was_temp, session)) = renamed else {
            return false;
        };

        self.inner.emit(ChatEvent::TitleChanged {
            session_id,
            title: title.clone(),
        });

        if was_temp {
            self.inner.reconciler.create_session(&session).await;
        } else {
            self.inner.reconciler.rename_session(session_id, title).await;
        }
        true
    }

    /// Removes a session, optimistically.
    ///
    /// If the durable delete fails the session is put back where it was and the error
    /// returned. Sessions never saved, or whose first send has not written them yet,
    /// are removed locally. Returns `Ok(false)` for unknown ids.
    pub async fn delete_session(&self, session_id: SessionId) -> StorageResult<bool> {
        let (removed, creating) = {
            let mut state = self.inner.state.lock();
            let creating = state.pending_creates.contains(&session_id);
            (state.sessions.remove(session_id), creating)
        };
        let Some(removed) = removed else {
            return Ok(false);
        };

        self.inner.emit(ChatEvent::SessionsChanged);
        if removed.active_before != removed.active_after {
            self.inner
                .emit(ChatEvent::ActiveSessionChanged(removed.active_after));
        }

        // A row still being created is removed by the send that creates it.
        let local_only = removed.session.is_temp || creating;
        if !local_only
            && let Err(error) = self.inner.reconciler.delete_session(session_id).await
        {
            tracing::warn!(
                session_id = %session_id,
                error = %error,
                "failed to delete session, restoring it"
            );
            let active = {
                let mut state = self.inner.state.lock();
                state.sessions.restore(removed);
                state.sessions.active_id()
            };
            self.inner.emit(ChatEvent::SessionsChanged);
            self.inner.emit(ChatEvent::ActiveSessionChanged(active));
            return Err(error);
        }

        tracing::info!(session_id = %session_id, "deleted session");

        if let Some(target) = self
            .active_generation()
            .filter(|target| target.session_id == session_id)
        {
            self.cancel_generation(target.message_id);
        }

        let now_empty = self.inner.state.lock().sessions.is_empty();
        if now_empty {
            self.inner.create_session(true);
        }
        Ok(true)
    }

    /// Stops the generation filling `message_id`. Stale ids are ignored.
    pub fn cancel_generation(&self, message_id: MessageId) -> bool {
        let cancel_tx = {
            let mut state = self.inner.state.lock();
            match state.stream.active_target() {
                Some(target) if target.message_id == message_id => state.cancel_tx.take(),
                _ => None,
            }
        };

        match cancel_tx {
            Some(cancel_tx) => {
                tracing::debug!(message_id = %message_id, "cancelling generation");
                cancel_tx.send(()).is_ok()
            }
            None => false,
        }
    }
}
