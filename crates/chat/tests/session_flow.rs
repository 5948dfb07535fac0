mod support;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;
use selah_chat::{ChatEvent, ChatOptions, DispatchError, GenerationOutcome, Role, TitleState};
use selah_storage::{ChatStore, MessageId, MessageRole, NewMessage, NewSession, SessionId};
use support::{Harness, Step, StoreCall, wait_for};
use tokio::sync::Notify;

async fn seed_session(harness: &Harness, title: &str, created_at_ms: i64) -> SessionId {
    let session_id = SessionId::new_v7();
    harness
        .store
        .inner
        .create_chat_session(NewSession {
            id: session_id,
            title: title.to_string(),
            created_at_ms,
            welcome: NewMessage {
                id: MessageId::new_v7(),
                role: MessageRole::Model,
                text: "Welcome, Guest".to_string(),
                timestamp: Utc::now(),
                hidden_context: None,
                is_error: false,
            },
        })
        .await
        .unwrap();
    session_id
}

#[tokio::test]
async fn send_appends_prompt_and_placeholder_together() {
    let harness = Harness::started().await;
    let gate = Arc::new(Notify::new());
    harness
        .provider
        .push_script(vec![Step::Pause(gate.clone()), Step::Delta("Amen"), Step::Done]);

    let before = harness.controller.active_session().unwrap().messages.len();
    let generation = harness
        .controller
        .send("Pray with me", None)
        .unwrap();

    let session = harness.controller.active_session().unwrap();
    assert_eq!(session.messages.len(), before + 2);
    let user = &session.messages[session.messages.len() - 2];
    let placeholder = &session.messages[session.messages.len() - 1];
    assert_eq!(user.role, Role::User);
    assert_eq!(user.text, "Pray with me");
    assert_eq!(placeholder.role, Role::Model);
    assert!(placeholder.text.is_empty());
    assert_eq!(placeholder.id, generation.target().message_id);
    assert!(!session.is_temp);
    assert!(harness.controller.is_generating());

    gate.notify_one();
    assert_eq!(generation.finished().await, GenerationOutcome::Completed);
    assert!(!harness.controller.is_generating());
}

#[tokio::test]
async fn first_exchange_streams_titles_and_persists() {
    let harness = Harness::started().await;
    let session = harness.controller.active_session().unwrap();
    assert!(session.is_temp);
    assert_eq!(session.messages.len(), 1);
    assert_eq!(session.messages[0].text, "Welcome, Guest");
    let welcome_id = session.messages[0].id;

    harness.provider.push_script(vec![
        Step::Delta("Grace "),
        Step::Delta("is "),
        Step::Delta("unmerited favor."),
        Step::Done,
    ]);

    let generation = harness.controller.send("What is grace?", None).unwrap();
    let session_now = harness.controller.active_session().unwrap();
    assert_eq!(session_now.messages.len(), 3);
    assert_eq!(session_now.messages[1].text, "What is grace?");
    assert_eq!(session_now.messages[2].text, "");
    let user_id = session_now.messages[1].id;
    let reply_id = generation.target().message_id;

    assert_eq!(generation.finished().await, GenerationOutcome::Completed);

    let session = harness.controller.active_session().unwrap();
    assert_eq!(session.messages[2].text, "Grace is unmerited favor.");
    assert!(!session.is_temp);
    assert!(!harness.controller.is_generating());
    assert_eq!(session.title, "Grace Explained");
    assert_eq!(session.title_state, TitleState::Titled);

    assert_eq!(
        harness.store.calls(),
        vec![
            StoreCall::List,
            StoreCall::Create {
                session_id: session.id,
                welcome_id,
                title: "New Chat".to_string(),
            },
            StoreCall::Rename {
                session_id: session.id,
                title: "Grace Explained".to_string(),
            },
            StoreCall::Append {
                session_id: session.id,
                message_id: user_id,
                text: "What is grace?".to_string(),
            },
            StoreCall::Append {
                session_id: session.id,
                message_id: reply_id,
                text: "Grace is unmerited favor.".to_string(),
            },
        ]
    );

    let stored = harness.store.inner.snapshot();
    let texts = stored[0]
        .messages
        .iter()
        .map(|message| message.text.as_str())
        .collect::<Vec<_>>();
    assert_eq!(
        texts,
        vec!["Welcome, Guest", "What is grace?", "Grace is unmerited favor."]
    );
}

#[tokio::test]
async fn failed_title_summary_falls_back_to_default() {
    let harness = Harness::started().await;
    harness.provider.set_title(Err("summarizer offline"));
    harness
        .provider
        .push_script(vec![Step::Delta("Grace is a gift."), Step::Done]);

    let generation = harness.controller.send("What is grace?", None).unwrap();
    assert_eq!(generation.finished().await, GenerationOutcome::Completed);

    let session = harness.controller.active_session().unwrap();
    assert_eq!(session.title, "New Chat");
    assert_eq!(session.title_state, TitleState::Titled);
    assert_eq!(session.messages[2].text, "Grace is a gift.");
    assert!(
        !harness
            .store
            .calls()
            .iter()
            .any(|call| matches!(call, StoreCall::Rename { .. }))
    );
}

#[tokio::test]
async fn blank_title_summary_falls_back_to_default() {
    let harness = Harness::started().await;
    harness.provider.set_title(Ok("  \"\"  "));
    harness.provider.push_script(vec![Step::Done]);

    let generation = harness.controller.send("Hello", None).unwrap();
    generation.finished().await;

    assert_eq!(harness.controller.active_session().unwrap().title, "New Chat");
}

#[tokio::test]
async fn title_is_only_summarised_once() {
    let harness = Harness::started().await;
    harness.provider.push_script(vec![Step::Done]);
    harness.provider.push_script(vec![Step::Done]);

    harness.controller.send("First", None).unwrap().finished().await;
    harness.provider.set_title(Ok("Another Title"));
    harness.controller.send("Second", None).unwrap().finished().await;

    let session = harness.controller.active_session().unwrap();
    assert_eq!(session.title, "Grace Explained");
    let creates = harness
        .store
        .calls()
        .iter()
        .filter(|call| matches!(call, StoreCall::Create { .. }))
        .count();
    assert_eq!(creates, 1);
}

#[tokio::test]
async fn second_send_is_rejected_while_generating() {
    let harness = Harness::started().await;
    let gate = Arc::new(Notify::new());
    harness
        .provider
        .push_script(vec![Step::Pause(gate.clone()), Step::Done]);
    harness.provider.push_script(vec![Step::Done]);

    let generation = harness.controller.send("First", None).unwrap();
    let count = harness.controller.active_session().unwrap().messages.len();

    let error = harness.controller.send("Second", None).unwrap_err();
    assert!(matches!(error, DispatchError::GenerationInFlight { .. }));
    assert_eq!(
        harness.controller.active_session().unwrap().messages.len(),
        count
    );

    gate.notify_one();
    generation.finished().await;

    let next = harness.controller.send("Second", None).unwrap();
    assert_eq!(next.finished().await, GenerationOutcome::Completed);
    assert_eq!(
        harness.controller.active_session().unwrap().messages.len(),
        count + 2
    );
}

#[tokio::test]
async fn missing_credential_blocks_without_mutation() {
    let harness = Harness::started().await;
    harness.credential.set(false);
    let mut events = harness.controller.subscribe();
    let before = harness.controller.active_session().unwrap();

    let error = harness.controller.send("Hello", None).unwrap_err();
    assert!(matches!(error, DispatchError::CredentialRequired { .. }));
    assert!(matches!(
        harness.controller.regenerate(),
        Err(DispatchError::CredentialRequired { .. })
    ));

    assert_eq!(harness.controller.active_session().unwrap(), before);
    assert!(!harness.controller.is_generating());
    assert_eq!(
        wait_for(&mut events, |event| matches!(event, ChatEvent::CredentialRequired)).await,
        ChatEvent::CredentialRequired
    );
}

#[tokio::test]
async fn blank_prompt_is_rejected() {
    let harness = Harness::started().await;
    let error = harness.controller.send("   ", None).unwrap_err();
    assert!(matches!(error, DispatchError::EmptyPrompt { .. }));
    assert_eq!(harness.controller.active_session().unwrap().messages.len(), 1);
}

#[tokio::test]
async fn send_without_sessions_is_rejected() {
    let harness = Harness::new();
    let error = harness.controller.send("Hello", None).unwrap_err();
    assert!(matches!(error, DispatchError::NoActiveSession { .. }));
}

#[tokio::test]
async fn load_restores_history_newest_first() {
    let harness = Harness::new();
    let older = seed_session(&harness, "Psalm 23", 1_000).await;
    let newer = seed_session(&harness, "Romans 8", 2_000).await;

    assert_eq!(harness.controller.load_sessions().await, 2);

    let sessions = harness.controller.sessions();
    assert_eq!(sessions[0].id, newer);
    assert_eq!(sessions[1].id, older);
    assert!(sessions.iter().all(|session| !session.is_temp));
    assert_eq!(harness.controller.active_session_id(), Some(newer));
}

#[tokio::test]
async fn failed_delete_rolls_back_exactly() {
    let harness = Harness::new();
    seed_session(&harness, "Psalm 23", 1_000).await;
    let middle = seed_session(&harness, "Romans 8", 2_000).await;
    seed_session(&harness, "John 3", 3_000).await;
    harness.controller.load_sessions().await;
    assert!(harness.controller.select_session(middle));

    let sessions_before = harness.controller.sessions();
    let active_before = harness.controller.active_session_id();
    harness.store.fail_delete_session.store(true, Ordering::Release);

    assert!(harness.controller.delete_session(middle).await.is_err());

    assert_eq!(harness.controller.sessions(), sessions_before);
    assert_eq!(harness.controller.active_session_id(), active_before);
    assert_eq!(harness.store.inner.snapshot().len(), 3);
}

#[tokio::test]
async fn confirmed_delete_removes_from_store_and_moves_pointer() {
    let harness = Harness::new();
    let older = seed_session(&harness, "Psalm 23", 1_000).await;
    let newer = seed_session(&harness, "Romans 8", 2_000).await;
    harness.controller.load_sessions().await;

    assert!(harness.controller.delete_session(newer).await.unwrap());

    assert_eq!(harness.controller.sessions().len(), 1);
    assert_eq!(harness.controller.active_session_id(), Some(older));
    assert!(harness.store.calls().contains(&StoreCall::DeleteSession(newer)));
    assert_eq!(harness.store.inner.snapshot().len(), 1);
}

#[tokio::test]
async fn deleting_unsaved_session_never_touches_store() {
    let harness = Harness::started().await;
    let temp = harness.controller.active_session_id().unwrap();

    assert!(harness.controller.delete_session(temp).await.unwrap());

    assert!(
        !harness
            .store
            .calls()
            .iter()
            .any(|call| matches!(call, StoreCall::DeleteSession(_)))
    );
    let sessions = harness.controller.sessions();
    assert_eq!(sessions.len(), 1);
    assert_ne!(sessions[0].id, temp);
}

#[tokio::test]
async fn rename_of_saved_session_is_not_rolled_back() {
    let harness = Harness::new();
    let saved = seed_session(&harness, "Psalm 23", 1_000).await;
    harness.controller.load_sessions().await;

    assert!(harness.controller.rename_session(saved, "The Lord is my shepherd").await);

    assert_eq!(
        harness.controller.session(saved).unwrap().title,
        "The Lord is my shepherd"
    );
    assert!(harness.store.calls().contains(&StoreCall::Rename {
        session_id: saved,
        title: "The Lord is my shepherd".to_string(),
    }));
}

#[tokio::test]
async fn persistence_failures_keep_local_state() {
    let harness = Harness::started().await;
    harness.store.fail_appends.store(true, Ordering::Release);
    harness
        .provider
        .push_script(vec![Step::Delta("Still here."), Step::Done]);

    let generation = harness.controller.send("Hello", None).unwrap();
    assert_eq!(generation.finished().await, GenerationOutcome::Completed);

    let session = harness.controller.active_session().unwrap();
    assert_eq!(session.messages.len(), 3);
    assert_eq!(session.messages[2].text, "Still here.");
    assert!(!session.messages[2].is_error);
}

#[tokio::test(start_paused = true)]
async fn hung_title_summary_times_out_to_default() {
    let harness = Harness::with_options(ChatOptions {
        stream_idle_timeout: Duration::from_secs(2),
        ..ChatOptions::default()
    });
    harness.controller.load_sessions().await;
    harness.provider.hang_title();
    harness
        .provider
        .push_script(vec![Step::Delta("Amen"), Step::Done]);

    let generation = harness.controller.send("Pray with me", None).unwrap();
    assert_eq!(generation.finished().await, GenerationOutcome::Completed);

    let session = harness.controller.active_session().unwrap();
    assert_eq!(session.title, "New Chat");
    assert_eq!(session.title_state, TitleState::Titled);
    assert_eq!(session.messages[2].text, "Amen");
    assert!(!harness.controller.is_generating());
    assert!(
        !harness
            .store
            .calls()
            .iter()
            .any(|call| matches!(call, StoreCall::Rename { .. }))
    );
}

#[tokio::test]
async fn cancelling_while_title_is_summarised_frees_generation() {
    let harness = Harness::started().await;
    harness.provider.hang_title();

    let generation = harness.controller.send("Hello", None).unwrap();
    assert!(harness.controller.cancel_generation(generation.target().message_id));
    assert_eq!(generation.finished().await, GenerationOutcome::Cancelled);

    assert!(!harness.controller.is_generating());
    assert!(harness.provider.requests().is_empty());
    let session = harness.controller.active_session().unwrap();
    assert_eq!(session.title, "New Chat");
    assert_eq!(session.title_state, TitleState::Titled);
    assert_eq!(harness.store.stored_texts(), vec!["Welcome, Guest", "Hello"]);

    harness.provider.push_script(vec![Step::Delta("Peace."), Step::Done]);
    let next = harness.controller.send("Again", None).unwrap();
    assert_eq!(next.finished().await, GenerationOutcome::Completed);
}

#[tokio::test]
async fn deleting_during_first_send_removes_it_everywhere() {
    let harness = Harness::started().await;

    let generation = harness.controller.send("hi", None).unwrap();
    let session_id = generation.target().session_id;

    assert!(harness.controller.delete_session(session_id).await.unwrap());
    assert_eq!(generation.finished().await, GenerationOutcome::Cancelled);

    assert!(harness.controller.session(session_id).is_none());
    assert_eq!(harness.controller.sessions().len(), 1);
    assert!(!harness.controller.is_generating());
    assert!(harness.store.inner.snapshot().is_empty());
    assert!(
        !harness
            .store
            .calls()
            .iter()
            .any(|call| matches!(call, StoreCall::Append { .. }))
    );
}
