// ABOUTME: Integration tests for the streaming chat turn orchestrator
// ABOUTME: Covers frame order, persistence, failure paths, cancellation, ownership, and titles
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    collect_events, continue_turn, conversation_id_of, create_chat_service, create_file_database,
    create_test_database, event_names, new_turn, seed_model, ScriptStep, ScriptedAdapter, TitleReply,
};
use converse_server::{
    chat::ChatEvent,
    constants::errors::MODEL_TIMEOUT_MESSAGE,
    database::{Database, MessageStatus},
    errors::{ErrorClass, ErrorCode},
    llm::{ChatMessage, MessageRole},
};
use futures_util::StreamExt;

const MODEL: &str = "gpt-test";

async fn seeded_database() -> Database {
    let database = create_test_database().await.unwrap();
    seed_model(&database, MODEL, "openai", "primary").await.unwrap();
    database
}

async fn count_rows(database: &Database, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(database.pool())
        .await
        .unwrap()
}

fn error_of(event: &ChatEvent) -> (ErrorClass, String) {
    match event {
        ChatEvent::Error { class, message } => (*class, message.clone()),
        other => panic!("expected error frame, got {other:?}"),
    }
}

/// Run one successful turn and return its conversation id
async fn first_turn(database: &Database) -> String {
    let adapter = Arc::new(ScriptedAdapter::new(vec![
        ScriptStep::Text("Hi"),
        ScriptStep::Text(" there"),
    ]));
    let service = create_chat_service(database, adapter);
    let events = collect_events(service.stream_chat(new_turn("user-1", MODEL, "Hello"))).await;
    assert_eq!(events.last().map(ChatEvent::name), Some("conversation.done"));
    conversation_id_of(&events)
}

#[tokio::test]
async fn test_new_conversation_streams_full_turn() {
    let database = seeded_database().await;
    let adapter = Arc::new(ScriptedAdapter::new(vec![
        ScriptStep::Thinking("Greeting"),
        ScriptStep::Text("Hi"),
        ScriptStep::Text(" there"),
    ]));
    let service = create_chat_service(&database, Arc::clone(&adapter));

    let events = collect_events(service.stream_chat(new_turn("user-1", MODEL, "Hello"))).await;

    assert_eq!(
        event_names(&events),
        vec![
            "conversation.start",
            "message.started",
            "thinking.delta",
            "text.delta",
            "text.delta",
            "message.done",
            "conversation.done",
        ]
    );

    let conversation_id = conversation_id_of(&events);
    assert_eq!(
        events[0],
        ChatEvent::ConversationStart {
            conversation_id: conversation_id.clone(),
            is_new: true,
            title: Some("Hello".to_owned()),
        }
    );
    let ChatEvent::MessageStarted { message_id } = &events[1] else {
        panic!("expected message.started");
    };
    assert_eq!(
        events[5],
        ChatEvent::MessageDone {
            message_id: message_id.clone(),
            content: "Hi there".to_owned(),
            thinking: Some("Greeting".to_owned()),
        }
    );

    let messages = database.chat().list_messages(&conversation_id).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].order, 1);
    assert_eq!(messages[0].role, MessageRole::User);
    assert_eq!(messages[0].content, "Hello");
    assert_eq!(messages[0].status, MessageStatus::Completed);
    assert_eq!(messages[1].order, 2);
    assert_eq!(&messages[1].id, message_id);
    assert_eq!(messages[1].role, MessageRole::Assistant);
    assert_eq!(messages[1].content, "Hi there");
    assert_eq!(messages[1].thinking.as_deref(), Some("Greeting"));
    assert_eq!(messages[1].model.as_deref(), Some(MODEL));
    assert_eq!(messages[1].status, MessageStatus::Completed);

    let conversation = database
        .chat()
        .get_conversation(&conversation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(conversation.user_id, "user-1");
    assert_eq!(conversation.last_model, MODEL);
    assert_eq!(conversation.title.as_deref(), Some("Scripted title"));
    assert_eq!(adapter.chat_call_count(), 1);

    let calls = adapter.stream_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, vec![ChatMessage::user("Hello")]);
    assert!(!calls[0].1);
}

#[tokio::test]
async fn test_message_done_is_concatenation_of_deltas() {
    let database = seeded_database().await;
    let adapter = Arc::new(ScriptedAdapter::new(vec![
        ScriptStep::Text("Ru"),
        ScriptStep::Text(""),
        ScriptStep::Text("st "),
        ScriptStep::Text("is fun"),
    ]));
    let service = create_chat_service(&database, adapter);

    let events = collect_events(service.stream_chat(new_turn("user-1", MODEL, "Opinion?"))).await;

    let streamed: String = events
        .iter()
        .filter_map(|event| match event {
            ChatEvent::TextDelta { delta } => Some(delta.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(streamed, "Rust is fun");
    // Empty upstream chunks never reach the client
    assert_eq!(event_names(&events).iter().filter(|n| **n == "text.delta").count(), 3);

    let done = events
        .iter()
        .find_map(|event| match event {
            ChatEvent::MessageDone {
                content, thinking, ..
            } => Some((content.clone(), thinking.clone())),
            _ => None,
        })
        .unwrap();
    assert_eq!(done, ("Rust is fun".to_owned(), None));

    let conversation_id = conversation_id_of(&events);
    let messages = database.chat().list_messages(&conversation_id).await.unwrap();
    assert_eq!(messages[1].thinking, None);
}

#[tokio::test]
async fn test_continuing_turn_uses_completed_context() {
    let database = seeded_database().await;
    let conversation_id = first_turn(&database).await;

    let adapter = Arc::new(ScriptedAdapter::new(vec![ScriptStep::Text("Sure")]));
    let service = create_chat_service(&database, Arc::clone(&adapter));
    let mut request = continue_turn("user-1", MODEL, "Again", &conversation_id);
    request.thinking_enabled = true;

    let events = collect_events(service.stream_chat(request)).await;

    assert_eq!(
        events[0],
        ChatEvent::ConversationStart {
            conversation_id: conversation_id.clone(),
            is_new: false,
            title: None,
        }
    );
    assert_eq!(events.last().map(ChatEvent::name), Some("conversation.done"));

    let calls = adapter.stream_calls();
    assert_eq!(
        calls[0].0,
        vec![
            ChatMessage::user("Hello"),
            ChatMessage::assistant("Hi there"),
            ChatMessage::user("Again"),
        ]
    );
    assert!(calls[0].1);

    // The conversation already has a title
    assert_eq!(adapter.chat_call_count(), 0);

    let orders: Vec<i64> = database
        .chat()
        .list_messages(&conversation_id)
        .await
        .unwrap()
        .iter()
        .map(|m| m.order)
        .collect();
    assert_eq!(orders, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn test_upstream_timeout_aborts_with_partial_content() {
    let database = seeded_database().await;
    let conversation_id = first_turn(&database).await;

    let adapter = Arc::new(ScriptedAdapter::new(vec![
        ScriptStep::Text("Par"),
        ScriptStep::Fail(ErrorCode::ExternalServiceTimeout, "no data received for 120s"),
    ]));
    let service = create_chat_service(&database, adapter);
    let events = collect_events(service.stream_chat(continue_turn(
        "user-1",
        MODEL,
        "Tell me more",
        &conversation_id,
    )))
    .await;

    assert_eq!(
        event_names(&events),
        vec!["conversation.start", "message.started", "text.delta", "error"]
    );
    assert_eq!(
        error_of(&events[3]),
        (ErrorClass::ModelError, MODEL_TIMEOUT_MESSAGE.to_owned())
    );

    let messages = database.chat().list_messages(&conversation_id).await.unwrap();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[2].content, "Tell me more");
    assert_eq!(messages[2].status, MessageStatus::Completed);
    assert_eq!(messages[3].content, "Par");
    assert_eq!(messages[3].status, MessageStatus::Aborted);

    // The aborted reply is left out of the next turn's context
    let adapter = Arc::new(ScriptedAdapter::new(vec![ScriptStep::Text("Ok")]));
    let service = create_chat_service(&database, Arc::clone(&adapter));
    collect_events(service.stream_chat(continue_turn(
        "user-1",
        MODEL,
        "Retry",
        &conversation_id,
    )))
    .await;

    assert_eq!(
        adapter.stream_calls()[0].0,
        vec![
            ChatMessage::user("Hello"),
            ChatMessage::assistant("Hi there"),
            ChatMessage::user("Tell me more"),
            ChatMessage::user("Retry"),
        ]
    );
    let orders: Vec<i64> = database
        .chat()
        .list_messages(&conversation_id)
        .await
        .unwrap()
        .iter()
        .map(|m| m.order)
        .collect();
    assert_eq!(orders, vec![1, 2, 3, 4, 5, 6]);
}

#[tokio::test]
async fn test_rate_limited_connect_aborts_empty_placeholder() {
    let database = seeded_database().await;
    let adapter = Arc::new(ScriptedAdapter::failing_connect(ErrorCode::ExternalRateLimited));
    let service = create_chat_service(&database, adapter);

    let events = collect_events(service.stream_chat(new_turn("user-1", MODEL, "Hello"))).await;

    assert_eq!(
        event_names(&events),
        vec!["conversation.start", "message.started", "error"]
    );
    assert_eq!(error_of(&events[2]).0, ErrorClass::RateLimit);

    let conversation_id = conversation_id_of(&events);
    let messages = database.chat().list_messages(&conversation_id).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].content, "");
    assert_eq!(messages[1].status, MessageStatus::Aborted);
}

#[tokio::test]
async fn test_unresolved_model_writes_nothing() {
    let database = seeded_database().await;
    let adapter = Arc::new(ScriptedAdapter::new(vec![ScriptStep::Text("unused")]));
    let service = create_chat_service(&database, Arc::clone(&adapter));

    let events =
        collect_events(service.stream_chat(new_turn("user-1", "missing-model", "Hello"))).await;

    assert_eq!(events.len(), 1);
    let (class, message) = error_of(&events[0]);
    assert_eq!(class, ErrorClass::RequestError);
    assert!(message.contains("missing-model"));
    assert_eq!(count_rows(&database, "conversations").await, 0);
    assert_eq!(count_rows(&database, "messages").await, 0);
    assert!(adapter.stream_calls().is_empty());
}

#[tokio::test]
async fn test_invalid_request_is_rejected_before_any_write() {
    let database = seeded_database().await;
    let service = create_chat_service(&database, Arc::new(ScriptedAdapter::new(Vec::new())));

    let events = collect_events(service.stream_chat(new_turn("user-1", MODEL, "   "))).await;

    assert_eq!(events.len(), 1);
    assert_eq!(error_of(&events[0]).0, ErrorClass::RequestError);
    assert_eq!(count_rows(&database, "conversations").await, 0);
}

#[tokio::test]
async fn test_other_users_conversation_is_rejected() {
    let database = seeded_database().await;
    let conversation_id = first_turn(&database).await;

    let service = create_chat_service(&database, Arc::new(ScriptedAdapter::new(Vec::new())));
    let events = collect_events(service.stream_chat(continue_turn(
        "user-2",
        MODEL,
        "Let me in",
        &conversation_id,
    )))
    .await;
    assert_eq!(events.len(), 1);
    assert_eq!(error_of(&events[0]).0, ErrorClass::RequestError);

    let events = collect_events(service.stream_chat(continue_turn(
        "user-1",
        MODEL,
        "Hello?",
        "no-such-conversation",
    )))
    .await;
    assert_eq!(events.len(), 1);
    assert_eq!(error_of(&events[0]).0, ErrorClass::RequestError);

    assert_eq!(count_rows(&database, "messages").await, 2);
}

#[tokio::test]
async fn test_dropped_stream_aborts_message() {
    let database = seeded_database().await;
    let adapter = Arc::new(ScriptedAdapter::new(vec![
        ScriptStep::Text("Partial"),
        ScriptStep::Hang,
    ]));
    let service = create_chat_service(&database, adapter);

    let mut events = Box::pin(service.stream_chat(new_turn("user-1", MODEL, "Hello")));
    let start = events.next().await.unwrap();
    let conversation_id = conversation_id_of(&[start]);
    assert_eq!(events.next().await.unwrap().name(), "message.started");
    assert_eq!(
        events.next().await.unwrap(),
        ChatEvent::TextDelta {
            delta: "Partial".to_owned()
        }
    );

    // Client disconnects while the upstream is still open
    drop(events);

    let mut status = None;
    for _ in 0..50 {
        let messages = database.chat().list_messages(&conversation_id).await.unwrap();
        if let Some(reply) = messages.get(1) {
            if reply.status == MessageStatus::Aborted {
                assert_eq!(reply.content, "Partial");
                status = Some(reply.status);
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(status, Some(MessageStatus::Aborted));
}

#[tokio::test]
async fn test_title_failure_keeps_provisional_title() {
    let database = seeded_database().await;
    let adapter = Arc::new(
        ScriptedAdapter::new(vec![ScriptStep::Text("Answer")])
            .with_title(TitleReply::Fail(ErrorCode::ExternalServiceUnavailable)),
    );
    let service = create_chat_service(&database, Arc::clone(&adapter));

    let events =
        collect_events(service.stream_chat(new_turn("user-1", MODEL, "  Plan a trip  "))).await;

    assert_eq!(events.last().map(ChatEvent::name), Some("conversation.done"));
    assert_eq!(adapter.chat_call_count(), 1);
    let conversation = database
        .chat()
        .get_conversation(&conversation_id_of(&events))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(conversation.title.as_deref(), Some("Plan a trip"));
}

#[tokio::test]
async fn test_blank_generated_title_is_ignored() {
    let database = seeded_database().await;
    let adapter = Arc::new(
        ScriptedAdapter::new(vec![ScriptStep::Text("Answer")])
            .with_title(TitleReply::Text("  \"\"  ")),
    );
    let service = create_chat_service(&database, adapter);

    let events = collect_events(service.stream_chat(new_turn("user-1", MODEL, "Hello"))).await;

    let conversation = database
        .chat()
        .get_conversation(&conversation_id_of(&events))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(conversation.title.as_deref(), Some("Hello"));
}

#[tokio::test]
async fn test_concurrent_turns_get_distinct_orders() {
    let database = seeded_database().await;
    let conversation_id = first_turn(&database).await;
    let adapter = Arc::new(ScriptedAdapter::new(vec![ScriptStep::Text("ok")]));
    let service = create_chat_service(&database, adapter);

    let first = service.stream_chat(continue_turn("user-1", MODEL, "A", &conversation_id));
    let second = service.stream_chat(continue_turn("user-1", MODEL, "B", &conversation_id));
    let (first, second) = tokio::join!(collect_events(first), collect_events(second));

    assert_eq!(first.last().map(ChatEvent::name), Some("conversation.done"));
    assert_eq!(second.last().map(ChatEvent::name), Some("conversation.done"));

    let orders: Vec<i64> = database
        .chat()
        .list_messages(&conversation_id)
        .await
        .unwrap()
        .iter()
        .map(|m| m.order)
        .collect();
    assert_eq!(orders, vec![1, 2, 3, 4, 5, 6]);
}

#[tokio::test]
async fn test_streaming_turn_does_not_block_other_users_on_file_database() {
    let dir = tempfile::tempdir().unwrap();
    let database = create_file_database(dir.path()).await.unwrap();
    seed_model(&database, MODEL, "openai", "primary").await.unwrap();
    let adapter = Arc::new(ScriptedAdapter::new(vec![
        ScriptStep::Text("Hi"),
        ScriptStep::Text(" there"),
    ]));
    let service = create_chat_service(&database, adapter);

    // Alice's turn is paused mid-stream with her rows already staged
    let mut alice = Box::pin(service.stream_chat(new_turn("alice", MODEL, "Hello")));
    let alice_start = alice.next().await.unwrap();
    assert_eq!(alice.next().await.unwrap().name(), "message.started");
    assert_eq!(alice.next().await.unwrap().name(), "text.delta");

    let bob = tokio::time::timeout(
        Duration::from_secs(5),
        collect_events(service.stream_chat(new_turn("bob", MODEL, "Hi"))),
    )
    .await
    .unwrap();
    assert!(bob.iter().all(|e| e.name() != "error"), "{bob:?}");
    assert_eq!(bob.last().map(ChatEvent::name), Some("conversation.done"));

    let rest = collect_events(alice).await;
    assert_eq!(
        event_names(&rest),
        vec!["text.delta", "message.done", "conversation.done"]
    );

    for events in [vec![alice_start], bob] {
        let messages = database
            .chat()
            .list_messages(&conversation_id_of(&events))
            .await
            .unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].status, MessageStatus::Completed);
        assert_eq!(messages[1].content, "Hi there");
    }
}
