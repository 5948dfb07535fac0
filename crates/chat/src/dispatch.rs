use std::sync::Arc;

use snafu::ensure;
use tokio::sync::oneshot;

use crate::controller::{ChatController, ControllerInner};
use crate::error::{
    CredentialRequiredSnafu, DispatchResult, EmptyPromptSnafu, GenerationInFlightSnafu,
    NoActiveSessionSnafu,
};
use crate::events::ChatEvent;
use crate::generation::Generation;
use crate::message::{ChatSession, Message, TitleState};
use crate::stream::{GenerationOutcome, GenerationTarget};
use crate::title::clean_title;

/// Everything a send captured while holding the state lock.
struct SendPlan {
    target: GenerationTarget,
    user: Message,
    /// Turns before `user`.
    history: Vec<Message>,
    /// Snapshot to create in the store when this is the session's first exchange.
    first_turn: Option<ChatSession>,
}

impl ChatController {
    /// Sends a user message into the active session and starts streaming the reply.
    ///
    /// The user message and an empty placeholder are appended together before this
    /// returns. Nothing is mutated when an error is returned.
    pub fn send(
        &self,
        text: impl Into<String>,
        hidden_context: Option<String>,
    ) -> DispatchResult<Generation> {
        if !self.inner.credential.has_valid_credential() {
            self.inner.emit(ChatEvent::CredentialRequired);
            return CredentialRequiredSnafu { stage: "send" }.fail();
        }

        let text = text.into();
        ensure!(!text.trim().is_empty(), EmptyPromptSnafu { stage: "send" });
        let hidden_context = hidden_context.filter(|hidden| !hidden.trim().is_empty());

        let (plan, cancel_rx) = {
            let mut state = self.inner.state.lock();
            let Some(session) = state.sessions.active() else {
                return NoActiveSessionSnafu { stage: "send" }.fail();
            };
            let session_id = session.id;
            let history = session.messages.clone();
            let first_turn = session.is_temp.then(|| session.clone());

            let user = Message::user(text, hidden_context);
            let placeholder = Message::placeholder();
            let target = GenerationTarget::new(session_id, placeholder.id);

            let cancel_rx = match state.start_generation(target) {
                Ok(cancel_rx) => cancel_rx,
                Err(active) => {
                    return GenerationInFlightSnafu {
                        stage: "send",
                        session_id,
                        active,
                    }
                    .fail();
                }
            };

            if let Some(session) = state.sessions.get_mut(session_id) {
                session.messages.push(user.clone());
                session.messages.push(placeholder);
                session.is_temp = false;
                if first_turn.is_some() {
                    session.title_state = TitleState::Summarizing;
                }
            }
            if first_turn.is_some() {
                state.pending_creates.insert(session_id);
            }

            (
                SendPlan {
                    target,
                    user,
                    history,
                    first_turn,
                },
                cancel_rx,
            )
        };

        let target = plan.target;
        tracing::debug!(
            session_id = %target.session_id,
            message_id = %target.message_id,
            first_turn = plan.first_turn.is_some(),
            "dispatching message"
        );
        self.inner.emit(ChatEvent::MessageAdded {
            session_id: target.session_id,
            message_id: plan.user.id,
        });
        self.inner.emit(ChatEvent::MessageAdded {
            session_id: target.session_id,
            message_id: target.message_id,
        });
        self.inner.emit(ChatEvent::GenerationStarted(target));

        let inner = self.inner.clone();
        let task = tokio::spawn(async move { inner.run_send(plan, cancel_rx).await });
        Ok(Generation::new(target, task))
    }
}

impl ControllerInner {
    async fn run_send(
        self: Arc<Self>,
        plan: SendPlan,
        mut cancel_rx: oneshot::Receiver<()>,
    ) -> GenerationOutcome {
        let SendPlan {
            target,
            user,
            history,
            first_turn,
        } = plan;

        if let Some(session) = first_turn {
            // The session row must exist before any message is appended to it.
            self.reconciler.create_session(&session).await;
            let still_listed = {
                let mut state = self.state.lock();
                state.pending_creates.remove(&session.id);
                state.sessions.get(session.id).is_some()
            };
            if !still_listed {
                tracing::info!(session_id = %session.id, "session deleted while being saved");
                // A create that already failed leaves nothing to remove.
                if let Err(error) = self.reconciler.delete_session(session.id).await
                    && !error.is_missing()
                {
                    tracing::warn!(
                        session_id = %session.id,
                        error = %error,
                        "failed to delete session saved after removal"
                    );
                }
                return self
                    .finish_generation(target, GenerationOutcome::Cancelled)
                    .await;
            }

            let summary = tokio::select! {
                biased;
                _ = &mut cancel_rx => None,
                title = self.summarize_title(&session, &user.text) => Some(title),
            };
            let cancelled = summary.is_none();
            let title = summary.unwrap_or_else(|| self.default_title());
            self.settle_title(&session, title).await;

            if cancelled {
                self.queue_user_write(target, user);
                return self
                    .finish_generation(target, GenerationOutcome::Cancelled)
                    .await;
            }
        }

        let request =
            self.build_request(target, &history, &user.text, user.hidden_context.clone());
        self.queue_user_write(target, user);
        self.stream_reply(target, request, cancel_rx).await
    }

    fn queue_user_write(&self, target: GenerationTarget, user: Message) {
        let reconciler = self.reconciler.clone();
        let _ = self.state.lock().queue_write(async move {
            reconciler.append_message(target.session_id, &user).await;
        });
    }

    fn default_title(&self) -> String {
        let language = self.options.read().language.clone();
        self.localizer.default_title(&language)
    }

    /// Summarises a title for a session's first exchange, bounded by the stream idle
    /// timeout. Falls back to the localized default.
    async fn summarize_title(&self, session: &ChatSession, prompt: &str) -> String {
        let (language, limit) = {
            let options = self.options.read();
            (options.language.clone(), options.stream_idle_timeout)
        };

        let summary = tokio::time::timeout(
            limit,
            self.provider
                .summarize_title(prompt.to_string(), language.clone()),
        )
        .await;

        let title = match summary {
            Ok(Ok(raw)) => clean_title(&raw),
            Ok(Err(error)) => {
                tracing::warn!(
                    session_id = %session.id,
                    error = %error,
                    "title summary failed, using default title"
                );
                None
            }
            Err(_) => {
                tracing::warn!(
                    session_id = %session.id,
                    limit_secs = limit.as_secs_f64(),
                    "title summary timed out, using default title"
                );
                None
            }
        };
        title.unwrap_or_else(|| self.localizer.default_title(&language))
    }

    /// Applies a first-exchange title once and persists it when it changed.
    async fn settle_title(&self, session: &ChatSession, title: String) {
        let applied = {
            let mut state = self.state.lock();
            match state.sessions.get_mut(session.id) {
                // A manual rename while summarising wins.
                Some(current) if current.title_state == TitleState::Summarizing => {
                    current.title = title.clone();
                    current.title_state = TitleState::Titled;
                    true
                }
                _ => false,
            }
        };
        if !applied {
            return;
        }

        self.emit(ChatEvent::TitleChanged {
            session_id: session.id,
            title: title.clone(),
        });
        if title != session.title {
            self.reconciler.rename_session(session.id, title).await;
        }
    }
}
