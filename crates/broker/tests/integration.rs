// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Integration tests for the agent message bus HTTP API.

use std::sync::Arc;

use axum::http::StatusCode;
use axum_test::TestServer;
use tokio_util::sync::CancellationToken;

use agentbus_broker::broker::Broker;
use agentbus_broker::clock::system_clock;
use agentbus_broker::config::BrokerConfig;
use agentbus_broker::persistence::MemoryStore;
use agentbus_broker::transport::{auth, build_router};

async fn test_server() -> TestServer {
    let config = BrokerConfig::default();
    let broker = Broker::new(config, system_clock(), Arc::new(MemoryStore), CancellationToken::new())
        .await
        .expect("broker should start");
    TestServer::new(build_router(broker)).expect("create test server")
}

async fn register(server: &TestServer, agent_id: &str, secret: &str) {
    let resp = server
        .post("/v1/agents/register")
        .json(&serde_json::json!({
            "agent_id": agent_id,
            "capabilities": ["demo"],
            "description": "",
            "mode": "pull",
            "secret": secret,
        }))
        .await;
    resp.assert_status_ok();
}

#[tokio::test]
async fn health_reports_zero_counts_on_fresh_broker() {
    let server = test_server().await;
    let resp = server.get("/v1/health").await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["agent_count"], 0);
    assert_eq!(body["message_count"], 0);
}

#[tokio::test]
async fn register_send_ack_and_complete_round_trip() {
    let server = test_server().await;
    register(&server, "alice", "alice-secret").await;
    register(&server, "bob", "bob-secret").await;

    let send_body = serde_json::json!({
        "from": "alice",
        "to": "bob",
        "request_id": "rid-1",
        "type": "request",
        "body": "please summarize the report",
    });
    let raw = serde_json::to_vec(&send_body).expect("serialize send body");
    let signature = auth::sign("alice-secret", &raw);
    let resp = server
        .post("/v1/messages")
        .add_header("x-bus-signature", signature.parse().expect("header value"))
        .bytes(raw.into())
        .await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    let message_id = body["message_id"].as_str().expect("message_id").to_owned();
    assert_eq!(body["duplicate"], false);

    let query = "agent_id=bob&cursor=0";
    let inbox_signature = auth::sign("bob-secret", query.as_bytes());
    let resp = server
        .get(&format!("/v1/inbox?{query}"))
        .add_header("x-bus-signature", inbox_signature.parse().expect("header value"))
        .await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["events"].as_array().expect("events array").len(), 1);

    let ack_body = serde_json::json!({"agent_id": "bob", "message_id": message_id, "status": "accepted"});
    let raw = serde_json::to_vec(&ack_body).expect("serialize ack body");
    let signature = auth::sign("bob-secret", &raw);
    let resp = server
        .post("/v1/acks")
        .add_header("x-bus-signature", signature.parse().expect("header value"))
        .bytes(raw.into())
        .await;
    resp.assert_status_ok();

    let event_body = serde_json::json!({"message_id": message_id, "kind": "final", "body": "done"});
    let raw = serde_json::to_vec(&event_body).expect("serialize event body");
    let signature = auth::sign("bob-secret", &raw);
    let resp = server
        .post("/v1/events")
        .add_header("x-agent-id", "bob")
        .add_header("x-bus-signature", signature.parse().expect("header value"))
        .bytes(raw.into())
        .await;
    resp.assert_status_ok();

    let conversations = server.get("/v1/conversations").await;
    conversations.assert_status_ok();
    let conversations: Vec<serde_json::Value> = conversations.json();
    assert_eq!(conversations.len(), 1);
    let conversation_id = conversations[0]["conversation_id"].as_str().expect("conversation_id").to_owned();

    let messages = server.get(&format!("/v1/conversations/{conversation_id}/messages")).await;
    messages.assert_status_ok();
    let messages: Vec<serde_json::Value> = messages.json();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["state"], "completed");
}

#[tokio::test]
async fn send_without_signature_is_rejected() {
    let server = test_server().await;
    register(&server, "alice", "alice-secret").await;
    register(&server, "bob", "bob-secret").await;

    let resp = server
        .post("/v1/messages")
        .json(&serde_json::json!({
            "from": "alice",
            "to": "bob",
            "request_id": "rid-1",
            "type": "request",
            "body": "hi",
        }))
        .await;
    resp.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn send_with_wrong_secret_is_rejected() {
    let server = test_server().await;
    register(&server, "alice", "alice-secret").await;
    register(&server, "bob", "bob-secret").await;

    let send_body = serde_json::json!({
        "from": "alice",
        "to": "bob",
        "request_id": "rid-1",
        "type": "request",
        "body": "hi",
    });
    let raw = serde_json::to_vec(&send_body).expect("serialize");
    let signature = auth::sign("not-alices-secret", &raw);
    let resp = server
        .post("/v1/messages")
        .add_header("x-bus-signature", signature.parse().expect("header value"))
        .bytes(raw.into())
        .await;
    resp.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn send_to_unregistered_target_returns_not_found() {
    let server = test_server().await;
    register(&server, "alice", "alice-secret").await;

    let send_body = serde_json::json!({
        "from": "alice",
        "to": "nobody",
        "request_id": "rid-1",
        "type": "request",
        "body": "hi",
    });
    let raw = serde_json::to_vec(&send_body).expect("serialize");
    let signature = auth::sign("alice-secret", &raw);
    let resp = server
        .post("/v1/messages")
        .add_header("x-bus-signature", signature.parse().expect("header value"))
        .bytes(raw.into())
        .await;
    resp.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn inject_without_target_creates_standalone_message() {
    let server = test_server().await;
    let resp = server
        .post("/v1/inject")
        .json(&serde_json::json!({"identity": "operator", "body": "manual note"}))
        .await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["duplicate"], false);
}

#[tokio::test]
async fn create_conversation_then_lists_it() {
    let server = test_server().await;
    let resp = server
        .post("/v1/conversations")
        .json(&serde_json::json!({"title": "weekly sync", "participants": ["alice", "bob"]}))
        .await;
    resp.assert_status_ok();
    let created: serde_json::Value = resp.json();
    let conversation_id = created["conversation_id"].as_str().expect("conversation_id").to_owned();
    assert_eq!(created["title"], "weekly sync");

    let conversations = server.get("/v1/conversations").await;
    conversations.assert_status_ok();
    let conversations: Vec<serde_json::Value> = conversations.json();
    assert!(conversations.iter().any(|c| c["conversation_id"] == conversation_id));
}

#[tokio::test]
async fn create_conversation_rejects_duplicate_id() {
    let server = test_server().await;
    let body = serde_json::json!({"conversation_id": "c-fixed", "participants": []});
    server.post("/v1/conversations").json(&body).await.assert_status_ok();
    let resp = server.post("/v1/conversations").json(&body).await;
    resp.assert_status(StatusCode::CONFLICT);
}

#[tokio::test]
async fn conversation_messages_limit_is_clamped() {
    let server = test_server().await;
    register(&server, "alice", "alice-secret").await;
    register(&server, "bob", "bob-secret").await;

    for n in 0..3 {
        let send_body = serde_json::json!({
            "from": "alice",
            "to": "bob",
            "request_id": format!("rid-{n}"),
            "type": "inform",
            "body": "note",
        });
        let raw = serde_json::to_vec(&send_body).expect("serialize send body");
        let signature = auth::sign("alice-secret", &raw);
        server
            .post("/v1/messages")
            .add_header("x-bus-signature", signature.parse().expect("header value"))
            .bytes(raw.into())
            .await
            .assert_status_ok();
    }

    let conversations = server.get("/v1/conversations").await;
    let conversations: Vec<serde_json::Value> = conversations.json();
    let conversation_id = conversations[0]["conversation_id"].as_str().expect("conversation_id").to_owned();

    let resp = server.get(&format!("/v1/conversations/{conversation_id}/messages?limit=100000")).await;
    resp.assert_status_ok();
    let messages: Vec<serde_json::Value> = resp.json();
    assert_eq!(messages.len(), 3);
}

#[tokio::test]
async fn list_agents_filters_by_capability() {
    let server = test_server().await;
    register(&server, "alice", "alice-secret").await;

    let resp = server.get("/v1/agents?capability=demo").await;
    resp.assert_status_ok();
    let agents: Vec<serde_json::Value> = resp.json();
    assert_eq!(agents.len(), 1);

    let resp = server.get("/v1/agents?capability=other").await;
    resp.assert_status_ok();
    let agents: Vec<serde_json::Value> = resp.json();
    assert!(agents.is_empty());
}
