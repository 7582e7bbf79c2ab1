// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for the cross-cutting S1-S8 scenarios in `spec.md` §8.
//!
//! Binds the real router to a loopback port (the same shape
//! `agentbus_broker::run` uses) rather than driving the router in-process,
//! since several scenarios (S6's push callback, S7's long-lived SSE stream)
//! need a real socket.

use std::sync::Arc;

use agentbus_broker::broker::Broker;
use agentbus_broker::clock::ManualClock;
use agentbus_broker::config::BrokerConfig;
use agentbus_broker::persistence::Persistence;
use agentbus_broker::transport::auth;
use agentbus_broker::transport::build_router;
use chrono::{DateTime, Utc};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// The fixed clock start every scenario in `spec.md` §8 is anchored to.
pub fn start_epoch() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-02-17T00:00:00Z").expect("valid literal").with_timezone(&Utc)
}

/// A broker bound to a real loopback port, with a manually-advanced clock.
pub struct Harness {
    pub base_url: String,
    pub clock: ManualClock,
    broker: Arc<Broker>,
    server: tokio::task::JoinHandle<()>,
    shutdown: CancellationToken,
}

impl Harness {
    pub async fn start(config: BrokerConfig, persistence: Arc<dyn Persistence>) -> Self {
        let clock = ManualClock::new(start_epoch());
        let shutdown = CancellationToken::new();
        let broker = Broker::new(config, Arc::new(clock.clone()), persistence, shutdown.clone())
            .await
            .expect("broker should start");
        let router = build_router(Arc::clone(&broker));
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback");
        let addr = listener.local_addr().expect("local addr");
        let shutdown_clone = shutdown.clone();
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, router).with_graceful_shutdown(async move { shutdown_clone.cancelled().await }).await;
        });
        Self { base_url: format!("http://{addr}"), clock, broker, server, shutdown }
    }

    pub fn client(&self) -> reqwest::Client {
        reqwest::Client::new()
    }

    /// Hits `/v1/health`, which drives a sweep as a side effect — the same
    /// way every read path does, per `spec.md` §9's best-effort-persist note.
    pub async fn tick(&self) -> serde_json::Value {
        self.client().get(format!("{}/v1/health", self.base_url)).send().await.expect("health request").json().await.expect("health json")
    }

    /// Direct access to the broker core for assertions that would otherwise
    /// need to scrape HTTP responses (e.g. counting push successes).
    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.server.abort();
    }
}

pub async fn register(
    harness: &Harness,
    agent_id: &str,
    secret: &str,
    capability: &str,
    mode: &str,
    ttl_secs: u64,
    callback_url: Option<&str>,
) -> serde_json::Value {
    harness
        .client()
        .post(format!("{}/v1/agents/register", harness.base_url))
        .json(&serde_json::json!({
            "agent_id": agent_id,
            "capabilities": [capability],
            "mode": mode,
            "ttl_secs": ttl_secs,
            "callback_url": callback_url,
            "secret": secret,
        }))
        .send()
        .await
        .expect("register request")
        .json()
        .await
        .expect("register json")
}

pub async fn send(
    harness: &Harness,
    from: &str,
    to: &str,
    request_id: &str,
    message_type: &str,
    body: &str,
    secret: &str,
) -> (reqwest::StatusCode, serde_json::Value) {
    let payload = serde_json::json!({
        "from": from,
        "to": to,
        "request_id": request_id,
        "type": message_type,
        "body": body,
    });
    let raw = serde_json::to_vec(&payload).expect("serialize send body");
    let signature = auth::sign(secret, &raw);
    let resp = harness
        .client()
        .post(format!("{}/v1/messages", harness.base_url))
        .header("x-bus-signature", signature)
        .header("content-type", "application/json")
        .body(raw)
        .send()
        .await
        .expect("send request");
    let status = resp.status();
    (status, resp.json().await.expect("send json"))
}

pub async fn poll_inbox(harness: &Harness, agent_id: &str, cursor: u64, secret: &str) -> serde_json::Value {
    let query = format!("agent_id={agent_id}&cursor={cursor}");
    let signature = auth::sign(secret, query.as_bytes());
    harness
        .client()
        .get(format!("{}/v1/inbox?{query}", harness.base_url))
        .header("x-bus-signature", signature)
        .send()
        .await
        .expect("inbox request")
        .json()
        .await
        .expect("inbox json")
}

pub async fn ack(harness: &Harness, agent_id: &str, message_id: &str, status: &str, secret: &str) -> serde_json::Value {
    let payload = serde_json::json!({"agent_id": agent_id, "message_id": message_id, "status": status});
    let raw = serde_json::to_vec(&payload).expect("serialize ack body");
    let signature = auth::sign(secret, &raw);
    harness
        .client()
        .post(format!("{}/v1/acks", harness.base_url))
        .header("x-bus-signature", signature)
        .header("content-type", "application/json")
        .body(raw)
        .send()
        .await
        .expect("ack request")
        .json()
        .await
        .expect("ack json")
}

pub async fn post_event(
    harness: &Harness,
    agent_id: &str,
    message_id: &str,
    kind: &str,
    body: &str,
    secret: &str,
) -> serde_json::Value {
    let payload = serde_json::json!({"message_id": message_id, "kind": kind, "body": body});
    let raw = serde_json::to_vec(&payload).expect("serialize event body");
    let signature = auth::sign(secret, &raw);
    harness
        .client()
        .post(format!("{}/v1/events", harness.base_url))
        .header("x-bus-signature", signature)
        .header("x-agent-id", agent_id)
        .header("content-type", "application/json")
        .body(raw)
        .send()
        .await
        .expect("event request")
        .json()
        .await
        .expect("event json")
}

pub async fn conversation_messages(harness: &Harness, conversation_id: &str) -> serde_json::Value {
    harness
        .client()
        .get(format!("{}/v1/conversations/{conversation_id}/messages", harness.base_url))
        .send()
        .await
        .expect("conversation messages request")
        .json()
        .await
        .expect("conversation messages json")
}

pub async fn list_conversations(harness: &Harness) -> serde_json::Value {
    harness
        .client()
        .get(format!("{}/v1/conversations", harness.base_url))
        .send()
        .await
        .expect("conversations request")
        .json()
        .await
        .expect("conversations json")
}

pub async fn list_agents(harness: &Harness) -> serde_json::Value {
    harness
        .client()
        .get(format!("{}/v1/agents", harness.base_url))
        .send()
        .await
        .expect("agents request")
        .json()
        .await
        .expect("agents json")
}
