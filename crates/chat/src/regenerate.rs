use std::sync::Arc;

use selah_storage::{MessageId, SessionId};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::controller::{ChatController, ControllerInner};
use crate::error::{CredentialRequiredSnafu, DispatchResult};
use crate::events::ChatEvent;
use crate::generation::Generation;
use crate::message::{ChatSession, Message, Role};
use crate::stream::{GenerationOutcome, GenerationTarget};

/// Hidden context for a regenerated reply.
///
/// The nonce makes each retry's prompt unique so a caching backend cannot replay the
/// previous answer.
pub fn regeneration_context(original: &str) -> String {
    format!("{original} [regeneration {}]", Uuid::new_v4().simple())
}

/// What a regeneration replaces and what it resends.
#[derive(Debug, Clone)]
pub(crate) struct RegenerationPlan {
    pub(crate) session_id: SessionId,
    pub(crate) replaced: MessageId,
    pub(crate) placeholder: Message,
    /// Turns before the user prompt.
    pub(crate) history: Vec<Message>,
    pub(crate) prompt: String,
    pub(crate) hidden_context: Option<String>,
}

impl RegenerationPlan {
    /// Requires the session to end with a user prompt followed by a model reply.
    pub(crate) fn from_session(session: &ChatSession) -> Option<Self> {
        let [.., user, reply] = session.messages.as_slice() else {
            return None;
        };
        if user.role != Role::User || reply.role != Role::Model {
            return None;
        }

        Some(Self {
            session_id: session.id,
            replaced: reply.id,
            placeholder: Message::placeholder(),
            history: session.messages[..session.messages.len() - 2].to_vec(),
            prompt: user.text.clone(),
            hidden_context: user.hidden_context.as_deref().map(regeneration_context),
        })
    }

    fn target(&self) -> GenerationTarget {
        GenerationTarget::new(self.session_id, self.placeholder.id)
    }
}

impl ChatController {
    /// Replaces the active session's last reply with a fresh generation.
    ///
    /// Returns `Ok(None)` without changing anything when the session does not end with
    /// a prompt/reply pair or a generation is already running.
    pub fn regenerate(&self) -> DispatchResult<Option<Generation>> {
        if !self.inner.credential.has_valid_credential() {
            self.inner.emit(ChatEvent::CredentialRequired);
            return CredentialRequiredSnafu {
                stage: "regenerate",
            }
            .fail();
        }

        let started = {
            let mut state = self.inner.state.lock();
            let plan = state
                .sessions
                .active()
                .and_then(RegenerationPlan::from_session);

            match plan {
                Some(plan) => match state.start_generation(plan.target()) {
                    Ok(cancel_rx) => {
                        if let Some(session) = state.sessions.get_mut(plan.session_id) {
                            session.messages.pop();
                            session.messages.push(plan.placeholder.clone());
                        }
                        Some((plan, cancel_rx))
                    }
                    Err(_) => None,
                },
                None => None,
            }
        };

        let Some((plan, cancel_rx)) = started else {
            tracing::debug!("regenerate ignored, nothing to replace");
            return Ok(None);
        };

        let target = plan.target();
        tracing::debug!(
            session_id = %target.session_id,
            replaced = %plan.replaced,
            message_id = %target.message_id,
            "regenerating reply"
        );
        self.inner.emit(ChatEvent::MessageRemoved {
            session_id: target.session_id,
            message_id: plan.replaced,
        });
        self.inner.emit(ChatEvent::MessageAdded {
            session_id: target.session_id,
            message_id: target.message_id,
        });
        self.inner.emit(ChatEvent::GenerationStarted(target));

        let inner = self.inner.clone();
        let task = tokio::spawn(async move { inner.run_regenerate(plan, cancel_rx).await });
        Ok(Some(Generation::new(target, task)))
    }
}

impl ControllerInner {
    async fn run_regenerate(
        self: Arc<Self>,
        plan: RegenerationPlan,
        cancel_rx: oneshot::Receiver<()>,
    ) -> GenerationOutcome {
        let target = plan.target();

        let reconciler = self.reconciler.clone();
        let replaced = plan.replaced;
        let _ = self.state.lock().queue_write(async move {
            reconciler.delete_message(replaced).await;
        });

        let request = self.build_request(target, &plan.history, &plan.prompt, plan.hidden_context);
        self.stream_reply(target, request, cancel_rx).await
    }
}
