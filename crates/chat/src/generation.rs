use std::time::Duration;

use selah_llm::{ProviderEventStream, StreamRequest};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::accumulator::{AccumulatorStep, StreamAccumulator};
use crate::controller::ControllerInner;
use crate::events::ChatEvent;
use crate::message::Message;
use crate::stream::{GenerationOutcome, GenerationTarget, StreamTransition};

/// Ticket for one started generation.
///
/// Dropping it detaches the generation; it still runs to completion.
#[derive(Debug)]
pub struct Generation {
    target: GenerationTarget,
    task: JoinHandle<GenerationOutcome>,
}

impl Generation {
    pub(crate) fn new(target: GenerationTarget, task: JoinHandle<GenerationOutcome>) -> Self {
        Self { target, task }
    }

    pub fn target(&self) -> GenerationTarget {
        self.target
    }

    /// Resolves once the reply is final and its persistence attempt has returned.
    pub async fn finished(self) -> GenerationOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(error) => GenerationOutcome::Failed(format!("generation task stopped: {error}")),
        }
    }
}

impl ControllerInner {
    pub(crate) fn build_request(
        &self,
        target: GenerationTarget,
        history: &[Message],
        prompt: &str,
        hidden_context: Option<String>,
    ) -> StreamRequest {
        let options = self.options.read().generation_options();
        StreamRequest::new(
            target.to_provider(),
            history.iter().map(Message::to_provider_message).collect(),
            prompt,
        )
        .with_hidden_context(hidden_context)
        .with_options(options)
    }

    /// Streams one reply into its placeholder and settles it.
    pub(crate) async fn stream_reply(
        &self,
        target: GenerationTarget,
        request: StreamRequest,
        mut cancel_rx: oneshot::Receiver<()>,
    ) -> GenerationOutcome {
        let idle_timeout = self.options.read().stream_idle_timeout;

        let outcome = match self.provider.stream_chat(request) {
            Ok(handle) => {
                tokio::spawn(handle.worker);
                self.drive(target, handle.stream, &mut cancel_rx, idle_timeout)
                    .await
            }
            Err(error) => {
                tracing::warn!(
                    session_id = %target.session_id,
                    message_id = %target.message_id,
                    error = %error,
                    "failed to start generation"
                );
                GenerationOutcome::Failed(error.to_string())
            }
        };

        self.finish_generation(target, outcome).await
    }

    async fn drive(
        &self,
        target: GenerationTarget,
        mut stream: ProviderEventStream,
        cancel_rx: &mut oneshot::Receiver<()>,
        idle_timeout: Duration,
    ) -> GenerationOutcome {
        let mut accumulator = StreamAccumulator::new(target);

        loop {
            tokio::select! {
                biased;
                _ = &mut *cancel_rx => {
                    stream.cancel();
                    return GenerationOutcome::Cancelled;
                }
                next = tokio::time::timeout(idle_timeout, stream.recv()) => {
                    let event = match next {
                        Ok(Some(event)) => event,
                        Ok(None) => {
                            return GenerationOutcome::Failed(
                                "provider stream ended before a terminal event".to_string(),
                            );
                        }
                        Err(_) => {
                            stream.cancel();
                            tracing::warn!(
                                session_id = %target.session_id,
                                message_id = %target.message_id,
                                idle_secs = idle_timeout.as_secs_f64(),
                                "generation stalled, giving up"
                            );
                            return GenerationOutcome::Failed(format!(
                                "no stream activity for {:.1}s",
                                idle_timeout.as_secs_f64()
                            ));
                        }
                    };

                    match accumulator.apply(event) {
                        AccumulatorStep::Ignored => {}
                        AccumulatorStep::Text(text) => self.apply_text(target, text),
                        AccumulatorStep::Finished(outcome) => return outcome,
                    }
                }
            }
        }
    }

    fn apply_text(&self, target: GenerationTarget, text: String) {
        let applied = {
            let mut state = self.state.lock();
            state.stream.accepts(target)
                && state
                    .sessions
                    .overwrite_text(target.session_id, target.message_id, text.as_str())
        };

        if applied {
            self.emit(ChatEvent::MessageUpdated { target, text });
        }
    }

    /// Clears the generating flag and writes the reply when its outcome keeps it.
    ///
    /// The reply write is queued in the same critical section that clears the flag, so
    /// a prompt sent right after is stored behind it.
    pub(crate) async fn finish_generation(
        &self,
        target: GenerationTarget,
        outcome: GenerationOutcome,
    ) -> GenerationOutcome {
        let written = {
            let mut state = self.state.lock();
            match state.stream.apply(StreamTransition::Finish {
                target,
                outcome: outcome.clone(),
            }) {
                Ok(next) => {
                    state.stream = next;
                    state.cancel_tx = None;
                }
                Err(rejection) => {
                    tracing::warn!(?rejection, "generation finished out of turn");
                }
            }

            let reply = state
                .sessions
                .message_mut(target.session_id, target.message_id)
                .map(|message| {
                    if outcome.is_error() {
                        message.is_error = true;
                    }
                    message.clone()
                })
                .filter(|reply| outcome.persists_reply(&reply.text));

            match reply {
                Some(reply) => {
                    let reconciler = self.reconciler.clone();
                    state.queue_write(async move {
                        reconciler.append_message(target.session_id, &reply).await;
                    })
                }
                // Still wait for this turn's earlier writes.
                None => state.queue_write(async {}),
            }
        };

        match &outcome {
            GenerationOutcome::Completed => {
                tracing::debug!(message_id = %target.message_id, "generation completed");
            }
            GenerationOutcome::Cancelled => {
                tracing::info!(message_id = %target.message_id, "generation cancelled");
            }
            GenerationOutcome::Failed(reason) => {
                tracing::warn!(message_id = %target.message_id, reason = %reason, "generation failed");
            }
        }

        self.emit(ChatEvent::GenerationFinished {
            target,
            outcome: outcome.clone(),
        });

        let _ = written.await;
        outcome
    }
}
