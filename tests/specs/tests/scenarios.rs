// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The concrete end-to-end scenarios from `spec.md` §8, S1-S8.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agentbus_broker::config::BrokerConfig;
use agentbus_broker::persistence::{MemoryStore, SnapshotStore};
use agentbus_specs::{ack, list_agents, list_conversations, poll_inbox, post_event, register, send, Harness};
use chrono::Duration as ChronoDuration;

fn memory_config() -> BrokerConfig {
    BrokerConfig::default()
}

#[tokio::test]
async fn s1_round_trip() {
    let harness = Harness::start(memory_config(), Arc::new(MemoryStore)).await;

    register(&harness, "a", "a-secret", "x", "pull", 60, None).await;
    register(&harness, "b", "b-secret", "y", "pull", 60, None).await;

    let (status, sent) = send(&harness, "a", "b", "rid-1", "request", "hello", "a-secret").await;
    assert!(status.is_success());
    let message_id = sent["message_id"].as_str().expect("message_id").to_owned();

    let inbox = poll_inbox(&harness, "b", 0, "b-secret").await;
    let events = inbox["events"].as_array().expect("events");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["message_id"], message_id);

    ack(&harness, "b", &message_id, "accepted", "b-secret").await;

    let conversations = list_conversations(&harness).await;
    let conversation_id = conversations[0]["conversation_id"].as_str().expect("conversation_id").to_owned();
    let messages = agentbus_specs::conversation_messages(&harness, &conversation_id).await;
    assert_eq!(messages[0]["state"], "executing");

    post_event(&harness, "b", &message_id, "final", "done", "b-secret").await;
    let messages = agentbus_specs::conversation_messages(&harness, &conversation_id).await;
    assert_eq!(messages[0]["state"], "completed");

    let (events, _cursor) = harness.broker().poll_observe(-1, None, None, Duration::from_millis(10)).await;
    let kinds: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(
        kinds,
        vec!["agent_registered", "agent_registered", "message", "ack", "state_change", "state_change"]
    );
}

#[tokio::test]
async fn s2_idempotent_concurrent_send() {
    let harness = Arc::new(Harness::start(memory_config(), Arc::new(MemoryStore)).await);
    register(&harness, "a", "a-secret", "x", "pull", 60, None).await;
    register(&harness, "b", "b-secret", "y", "pull", 60, None).await;

    let mut handles = Vec::new();
    for _ in 0..32 {
        let harness = Arc::clone(&harness);
        handles.push(tokio::spawn(async move { send(&harness, "a", "b", "rid-concurrent", "request", "hi", "a-secret").await }));
    }

    let mut message_ids = std::collections::HashSet::new();
    let mut duplicate_false_count = 0;
    for handle in handles {
        let (status, outcome) = handle.await.expect("join send task");
        assert!(status.is_success());
        message_ids.insert(outcome["message_id"].as_str().expect("message_id").to_owned());
        if outcome["duplicate"] == false {
            duplicate_false_count += 1;
        }
    }
    assert_eq!(message_ids.len(), 1);
    assert_eq!(duplicate_false_count, 1);

    let inbox = poll_inbox(&harness, "b", 0, "b-secret").await;
    assert_eq!(inbox["events"].as_array().expect("events").len(), 1);
}

#[tokio::test]
async fn s3_ack_timeout() {
    let harness = Harness::start(memory_config(), Arc::new(MemoryStore)).await;
    register(&harness, "a", "a-secret", "x", "pull", 60, None).await;
    register(&harness, "b", "b-secret", "y", "pull", 60, None).await;

    let (_status, sent) = send(&harness, "a", "b", "rid-1", "request", "hello", "a-secret").await;
    let message_id = sent["message_id"].as_str().expect("message_id").to_owned();

    harness.clock.advance(ChronoDuration::seconds(11));
    harness.tick().await;

    let conversations = list_conversations(&harness).await;
    let conversation_id = conversations[0]["conversation_id"].as_str().expect("conversation_id").to_owned();
    let messages = agentbus_specs::conversation_messages(&harness, &conversation_id).await;
    let message = messages.as_array().expect("messages").iter().find(|m| m["message_id"] == message_id).expect("message present");
    assert_eq!(message["state"], "error");
}

#[tokio::test]
async fn s4_grace_delivery() {
    let harness = Harness::start(memory_config(), Arc::new(MemoryStore)).await;
    register(&harness, "a", "a-secret", "x", "pull", 60, None).await;
    register(&harness, "b", "b-secret", "y", "pull", 1, None).await;

    harness.clock.advance(ChronoDuration::seconds(2));

    let (status, sent) = send(&harness, "a", "b", "rid-1", "request", "hello", "a-secret").await;
    assert!(status.is_success());
    let message_id = sent["message_id"].as_str().expect("message_id").to_owned();

    register(&harness, "b", "b-secret", "y", "pull", 60, None).await;
    harness.tick().await;

    let inbox = poll_inbox(&harness, "b", 0, "b-secret").await;
    let events = inbox["events"].as_array().expect("events");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["message_id"], message_id);
}

#[tokio::test]
async fn s5_grace_lapse() {
    let harness = Harness::start(memory_config(), Arc::new(MemoryStore)).await;
    register(&harness, "a", "a-secret", "x", "pull", 60, None).await;
    register(&harness, "b", "b-secret", "y", "pull", 1, None).await;

    harness.clock.advance(ChronoDuration::seconds(2));
    let (_status, sent) = send(&harness, "a", "b", "rid-1", "request", "hello", "a-secret").await;
    let message_id = sent["message_id"].as_str().expect("message_id").to_owned();

    harness.clock.advance(ChronoDuration::seconds(40));
    harness.tick().await;

    let conversations = list_conversations(&harness).await;
    let conversation_id = conversations[0]["conversation_id"].as_str().expect("conversation_id").to_owned();
    let messages = agentbus_specs::conversation_messages(&harness, &conversation_id).await;
    let message = messages.as_array().expect("messages").iter().find(|m| m["message_id"] == message_id).expect("message present");
    assert_eq!(message["state"], "error");
}

#[tokio::test]
async fn s6_push_retries() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let app = axum::Router::new().route(
        "/callback",
        axum::routing::post(move |_body: axum::body::Bytes| {
            let counter = Arc::clone(&counter);
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR
                } else {
                    axum::http::StatusCode::OK
                }
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind callback listener");
    let callback_addr = listener.local_addr().expect("callback addr");
    tokio::spawn(async move { let _ = axum::serve(listener, app).await; });
    let callback_url = format!("http://{callback_addr}/callback");

    let mut config = memory_config();
    config.push_max_attempts = 3;
    config.push_base_backoff_ms = 50;
    let harness = Harness::start(config, Arc::new(MemoryStore)).await;

    register(&harness, "a", "a-secret", "x", "pull", 60, None).await;
    register(&harness, "b", "b-secret", "y", "push", 60, Some(&callback_url)).await;

    send(&harness, "a", "b", "rid-1", "request", "hello", "a-secret").await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if attempts.load(Ordering::SeqCst) >= 3 {
            break;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("callback was not retried to success within 2s");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let health = harness.tick().await;
    assert_eq!(health["push_successes"], 1);
}

#[tokio::test]
async fn s7_sse_resume_never_replays() {
    let harness = Harness::start(memory_config(), Arc::new(MemoryStore)).await;
    register(&harness, "a", "a-secret", "x", "pull", 60, None).await;
    register(&harness, "b", "b-secret", "y", "pull", 60, None).await;

    let (_status, first) = send(&harness, "a", "b", "rid-1", "request", "first", "a-secret").await;
    let (events, cursor_x) = harness.broker().poll_observe(-1, None, None, Duration::from_millis(10)).await;
    let first_message_event = events.iter().find(|e| e.event_type == "message").expect("first message event");
    assert_eq!(first_message_event.data["message_id"], first["message_id"]);

    let (_status, second) = send(&harness, "a", "b", "rid-2", "request", "second", "a-secret").await;
    let (resumed, _cursor) = harness.broker().poll_observe(cursor_x as i64, None, None, Duration::from_millis(10)).await;

    assert!(resumed.iter().all(|e| e.id > cursor_x));
    let second_message_event = resumed.iter().find(|e| e.event_type == "message").expect("second message event");
    assert_eq!(second_message_event.data["message_id"], second["message_id"]);
}

#[tokio::test]
async fn s8_persistence_round_trip() {
    let dir = tempfile_dir();
    let state_file = dir.join("broker.json");

    let mut config = memory_config();
    config.state_file = Some(state_file.clone());
    let persistence = Arc::new(SnapshotStore::new(state_file.clone()));
    let message_id = {
        let harness = Harness::start(config.clone(), persistence).await;
        register(&harness, "a", "a-secret", "x", "pull", 3600, None).await;
        register(&harness, "b", "b-secret", "y", "pull", 3600, None).await;
        send(&harness, "a", "b", "rid-1", "request", "one", "a-secret").await;
        send(&harness, "a", "b", "rid-2", "request", "two", "a-secret").await;
        let (_status, sent) = send(&harness, "a", "b", "rid-3", "request", "three", "a-secret").await;
        sent["message_id"].as_str().expect("message_id").to_owned()
    };
    assert_eq!(message_id, "m-000003");

    let persistence = Arc::new(SnapshotStore::new(state_file));
    let harness = Harness::start(config, persistence).await;

    let agents = list_agents(&harness).await;
    assert_eq!(agents.as_array().expect("agents").len(), 2);

    let inbox = poll_inbox(&harness, "b", 0, "b-secret").await;
    assert_eq!(inbox["events"].as_array().expect("events").len(), 3);

    let (_status, sent) = send(&harness, "a", "b", "rid-4", "request", "four", "a-secret").await;
    assert_eq!(sent["message_id"], "m-000004");
}

fn tempfile_dir() -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("agentbus-spec-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}
