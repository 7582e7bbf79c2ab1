// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP client for the bus API, grounded on the reference's
//! `broker::client::BrokerClientConfig` + `reqwest::Client` wrapper.

use std::time::Duration;

use agentbus_broker::transport::auth;
use serde::Serialize;
use serde_json::Value;

use crate::config::ClientConfig;
use crate::error::CliError;

pub struct BusClient {
    http: reqwest::Client,
    base_url: String,
}

impl BusClient {
    pub fn new(config: &ClientConfig) -> anyhow::Result<Self> {
        // No whole-request timeout: `/v1/observe` holds its connection open
        // for the life of the stream. `connect_timeout` still bounds a dead
        // broker; `timeout_secs` is honored per logical call by racing a
        // `tokio::time::timeout` around the one-shot commands instead.
        let http = reqwest::Client::builder().connect_timeout(Duration::from_secs(config.timeout_secs)).build()?;
        Ok(Self { http, base_url: config.base_url() })
    }

    async fn parse_response(resp: reqwest::Response) -> Result<Value, CliError> {
        let status = resp.status();
        let bytes = resp.bytes().await?;
        if status.is_success() {
            return serde_json::from_slice(&bytes).map_err(CliError::InvalidResponse);
        }
        match serde_json::from_slice::<agentbus_broker::error::ErrorResponse>(&bytes) {
            Ok(body) => Err(CliError::Broker {
                status: status.as_u16(),
                code: body.error.code,
                message: body.error.message,
            }),
            Err(_) => Err(CliError::Broker {
                status: status.as_u16(),
                code: "unknown".to_owned(),
                message: String::from_utf8_lossy(&bytes).into_owned(),
            }),
        }
    }

    async fn post_unsigned(&self, path: &str, body: &impl Serialize) -> Result<Value, CliError> {
        let resp = self.http.post(format!("{}{path}", self.base_url)).json(body).send().await?;
        Self::parse_response(resp).await
    }

    async fn post_signed(&self, path: &str, body: &impl Serialize, secret: &str) -> Result<Value, CliError> {
        let raw = serde_json::to_vec(body).unwrap_or_default();
        let signature = auth::sign(secret, &raw);
        let resp = self
            .http
            .post(format!("{}{path}", self.base_url))
            .header("x-bus-signature", signature)
            .header("content-type", "application/json")
            .body(raw)
            .send()
            .await?;
        Self::parse_response(resp).await
    }

    pub async fn register(
        &self,
        agent_id: &str,
        capabilities: Vec<String>,
        mode: &str,
        callback_url: Option<String>,
        secret: &str,
    ) -> Result<Value, CliError> {
        let body = serde_json::json!({
            "agent_id": agent_id,
            "capabilities": capabilities,
            "mode": mode,
            "callback_url": callback_url,
            "secret": secret,
        });
        self.post_unsigned("/v1/agents/register", &body).await
    }

    pub async fn send(
        &self,
        from: &str,
        to: &str,
        request_id: &str,
        message_type: &str,
        body: &str,
        conversation_id: Option<String>,
        secret: &str,
    ) -> Result<Value, CliError> {
        let payload = serde_json::json!({
            "from": from,
            "to": to,
            "request_id": request_id,
            "type": message_type,
            "body": body,
            "conversation_id": conversation_id,
        });
        self.post_signed("/v1/messages", &payload, secret).await
    }

    pub async fn ack(&self, agent_id: &str, message_id: &str, status: &str, secret: &str) -> Result<Value, CliError> {
        let payload = serde_json::json!({"agent_id": agent_id, "message_id": message_id, "status": status});
        self.post_signed("/v1/acks", &payload, secret).await
    }

    pub async fn post_event(
        &self,
        agent_id: &str,
        message_id: &str,
        kind: &str,
        body: &str,
        secret: &str,
    ) -> Result<Value, CliError> {
        let payload = serde_json::json!({"message_id": message_id, "kind": kind, "body": body});
        let raw = serde_json::to_vec(&payload).unwrap_or_default();
        let signature = auth::sign(secret, &raw);
        let resp = self
            .http
            .post(format!("{}/v1/events", self.base_url))
            .header("x-bus-signature", signature)
            .header("x-agent-id", agent_id)
            .header("content-type", "application/json")
            .body(raw)
            .send()
            .await?;
        Self::parse_response(resp).await
    }

    pub async fn poll_inbox(
        &self,
        agent_id: &str,
        cursor: u64,
        wait_secs: Option<u64>,
        secret: &str,
    ) -> Result<Value, CliError> {
        let mut query = format!("agent_id={agent_id}&cursor={cursor}");
        if let Some(wait) = wait_secs {
            query.push_str(&format!("&wait_secs={wait}"));
        }
        let signature = auth::sign(secret, query.as_bytes());
        let resp = self
            .http
            .get(format!("{}/v1/inbox?{query}", self.base_url))
            .header("x-bus-signature", signature)
            .send()
            .await?;
        Self::parse_response(resp).await
    }

    /// Opens the `/v1/observe` SSE stream. The caller reads frames off the
    /// returned response body; the connection stays open until the server or
    /// the caller closes it, matching the long-lived nature of the stream.
    pub async fn observe_stream(
        &self,
        cursor: i64,
        conversation_id: Option<&str>,
        agent_id: Option<&str>,
    ) -> Result<reqwest::Response, CliError> {
        let mut query = format!("cursor={cursor}");
        if let Some(id) = conversation_id {
            query.push_str(&format!("&conversation_id={id}"));
        }
        if let Some(id) = agent_id {
            query.push_str(&format!("&agent_id={id}"));
        }
        let resp = self.http.get(format!("{}/v1/observe?{query}", self.base_url)).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await?;
            return Err(CliError::Broker { status: status.as_u16(), code: "transport".to_owned(), message: text });
        }
        Ok(resp)
    }

    pub async fn inject(
        &self,
        identity: &str,
        to: Option<String>,
        body: &str,
        conversation_id: Option<String>,
    ) -> Result<Value, CliError> {
        let payload = serde_json::json!({"identity": identity, "to": to, "body": body, "conversation_id": conversation_id});
        self.post_unsigned("/v1/inject", &payload).await
    }

    pub async fn list_agents(&self, capability: Option<&str>) -> Result<Value, CliError> {
        let mut url = format!("{}/v1/agents", self.base_url);
        if let Some(cap) = capability {
            url.push_str(&format!("?capability={cap}"));
        }
        let resp = self.http.get(url).send().await?;
        Self::parse_response(resp).await
    }

    pub async fn list_conversations(&self) -> Result<Value, CliError> {
        let resp = self.http.get(format!("{}/v1/conversations", self.base_url)).send().await?;
        Self::parse_response(resp).await
    }

    pub async fn health(&self) -> Result<Value, CliError> {
        let resp = self.http.get(format!("{}/v1/health", self.base_url)).send().await?;
        Self::parse_response(resp).await
    }
}
