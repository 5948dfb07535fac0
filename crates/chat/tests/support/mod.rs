#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use selah_chat::{
    BuiltinLocalizer, ChatController, ChatDependencies, ChatEvent, ChatOptions, StaticCredential,
};
use selah_llm::{
    BoxFuture, LlmProvider, ProviderError, ProviderResult, ProviderStreamHandle, StreamEventMapped,
    StreamRequest, make_event_stream,
};
use selah_storage::{
    ChatStore, MemoryStorage, MessageId, MessageRecord, NewMessage, NewSession, SessionId,
    SessionRecord, StorageError, StorageResult,
};
use tokio::sync::{Notify, broadcast};

/// One durable-store call as the controller issued it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Create {
        session_id: SessionId,
        welcome_id: MessageId,
        title: String,
    },
    Append {
        session_id: SessionId,
        message_id: MessageId,
        text: String,
    },
    DeleteMessage(MessageId),
    DeleteSession(SessionId),
    Rename {
        session_id: SessionId,
        title: String,
    },
    List,
}

/// [`MemoryStorage`] that records every call and can be told to fail.
#[derive(Default)]
pub struct RecordingStore {
    pub inner: MemoryStorage,
    calls: Mutex<Vec<StoreCall>>,
    pub fail_delete_session: AtomicBool,
    pub fail_appends: AtomicBool,
    held_append: Mutex<Option<(String, Arc<Notify>)>>,
}

impl RecordingStore {
    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().clone()
    }

    /// Makes the next append of a message with `text` wait for `gate`.
    pub fn hold_append(&self, text: &str, gate: Arc<Notify>) {
        *self.held_append.lock() = Some((text.to_string(), gate));
    }

    /// Texts of the first stored session's messages, in stored order.
    pub fn stored_texts(&self) -> Vec<String> {
        self.inner
            .snapshot()
            .first()
            .map(|session| {
                session
                    .messages
                    .iter()
                    .map(|message| message.text.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn record(&self, call: StoreCall) {
        self.calls.lock().push(call);
    }

    fn unavailable(stage: &'static str) -> StorageError {
        StorageError::Unavailable {
            stage,
            details: "scripted failure".to_string(),
        }
    }
}

impl ChatStore for RecordingStore {
    fn create_chat_session<'a>(
        &'a self,
        input: NewSession,
    ) -> BoxFuture<'a, StorageResult<SessionRecord>> {
        self.record(StoreCall::Create {
            session_id: input.id,
            welcome_id: input.welcome.id,
            title: input.title.clone(),
        });
        self.inner.create_chat_session(input)
    }

    fn append_message<'a>(
        &'a self,
        session_id: SessionId,
        input: NewMessage,
    ) -> BoxFuture<'a, StorageResult<MessageRecord>> {
        self.record(StoreCall::Append {
            session_id,
            message_id: input.id,
            text: input.text.clone(),
        });
        if self.fail_appends.load(Ordering::Acquire) {
            return Box::pin(async { Err(Self::unavailable("test-append")) });
        }

        let gate = {
            let mut held = self.held_append.lock();
            match held.as_ref() {
                Some((text, _)) if *text == input.text => held.take().map(|(_, gate)| gate),
                _ => None,
            }
        };
        let inner = self.inner.clone();
        Box::pin(async move {
            if let Some(gate) = gate {
                gate.notified().await;
            }
            inner.append_message(session_id, input).await
        })
    }

    fn delete_message<'a>(&'a self, message_id: MessageId) -> BoxFuture<'a, StorageResult<()>> {
        self.record(StoreCall::DeleteMessage(message_id));
        self.inner.delete_message(message_id)
    }

    fn delete_session<'a>(&'a self, session_id: SessionId) -> BoxFuture<'a, StorageResult<()>> {
        self.record(StoreCall::DeleteSession(session_id));
        if self.fail_delete_session.load(Ordering::Acquire) {
            return Box::pin(async { Err(Self::unavailable("test-delete-session")) });
        }
        self.inner.delete_session(session_id)
    }

    fn rename_session<'a>(
        &'a self,
        session_id: SessionId,
        title: String,
    ) -> BoxFuture<'a, StorageResult<()>> {
        self.record(StoreCall::Rename {
            session_id,
            title: title.clone(),
        });
        self.inner.rename_session(session_id, title)
    }

    fn list_sessions<'a>(&'a self) -> BoxFuture<'a, StorageResult<Vec<SessionRecord>>> {
        self.record(StoreCall::List);
        self.inner.list_sessions()
    }
}

/// One scripted provider action.
#[derive(Clone)]
pub enum Step {
    Delta(&'static str),
    Done,
    Error(&'static str),
    /// Blocks until the notify fires.
    Pause(Arc<Notify>),
    /// Sends nothing more and waits for cancellation, then flags `cancelled`.
    Stall,
}

/// Provider that replays one script per `stream_chat` call.
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Vec<Step>>>,
    title: Mutex<Result<String, String>>,
    requests: Mutex<Vec<StreamRequest>>,
    title_hangs: AtomicBool,
    pub cancelled: Arc<AtomicBool>,
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            title: Mutex::new(Ok("Grace Explained".to_string())),
            requests: Mutex::new(Vec::new()),
            title_hangs: AtomicBool::new(false),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl ScriptedProvider {
    pub fn push_script(&self, steps: Vec<Step>) {
        self.scripts.lock().push_back(steps);
    }

    pub fn set_title(&self, title: Result<&str, &str>) {
        *self.title.lock() = title.map(str::to_string).map_err(str::to_string);
    }

    /// Title summaries never answer from now on.
    pub fn hang_title(&self) {
        self.title_hangs.store(true, Ordering::Release);
    }

    pub fn requests(&self) -> Vec<StreamRequest> {
        self.requests.lock().clone()
    }
}

impl LlmProvider for ScriptedProvider {
    fn id(&self) -> &str {
        "scripted"
    }

    fn name(&self) -> &str {
        "Scripted"
    }

    fn stream_chat(&self, request: StreamRequest) -> ProviderResult<ProviderStreamHandle> {
        let target = request.target;
        self.requests.lock().push(request);
        let steps = self.scripts.lock().pop_front().unwrap_or_default();
        let cancelled = self.cancelled.clone();

        let (event_tx, stream, mut cancel_rx) = make_event_stream(target);
        let worker = Box::pin(async move {
            for step in steps {
                let event = match step {
                    Step::Delta(chunk) => StreamEventMapped::delta(target, chunk),
                    Step::Done => StreamEventMapped::done(target),
                    Step::Error(message) => StreamEventMapped::error(target, message),
                    Step::Pause(notify) => {
                        notify.notified().await;
                        continue;
                    }
                    Step::Stall => {
                        if (&mut cancel_rx).await.is_ok() {
                            cancelled.store(true, Ordering::Release);
                        }
                        return;
                    }
                };
                if event_tx.send(event).is_err() {
                    return;
                }
            }
            // Keep the channel open until the reader is done with it.
            let _ = cancel_rx.await;
        });

        Ok(ProviderStreamHandle { stream, worker })
    }

    fn summarize_title<'a>(
        &'a self,
        _prompt: String,
        _language: String,
    ) -> BoxFuture<'a, ProviderResult<String>> {
        let title = self.title.lock().clone();
        let hangs = self.title_hangs.load(Ordering::Acquire);
        Box::pin(async move {
            if hangs {
                std::future::pending::<()>().await;
            }
            title.map_err(|message| ProviderError::SummaryFailed {
                stage: "scripted-title",
                message,
            })
        })
    }
}

pub struct Harness {
    pub controller: ChatController,
    pub store: Arc<RecordingStore>,
    pub provider: Arc<ScriptedProvider>,
    pub credential: Arc<StaticCredential>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_options(ChatOptions::default())
    }

    pub fn with_options(options: ChatOptions) -> Self {
        let store = Arc::new(RecordingStore::default());
        let provider = Arc::new(ScriptedProvider::default());
        let credential = Arc::new(StaticCredential::new(true));
        let controller = ChatController::new(
            ChatDependencies {
                store: store.clone(),
                provider: provider.clone(),
                credential: credential.clone(),
                localizer: Arc::new(BuiltinLocalizer),
            },
            options,
        );

        Self {
            controller,
            store,
            provider,
            credential,
        }
    }

    /// Loads from the (empty) store, leaving one temp session active.
    pub async fn started() -> Self {
        let harness = Self::new();
        harness.controller.load_sessions().await;
        harness
    }
}

/// Waits for the first event matching `predicate`.
pub async fn wait_for(
    events: &mut broadcast::Receiver<ChatEvent>,
    predicate: impl Fn(&ChatEvent) -> bool,
) -> ChatEvent {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("timed out waiting for chat event")
}
