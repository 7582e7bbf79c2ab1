// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSON request handlers for the bus API, per `spec.md` §4.4 and §6.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, RawQuery, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::broker::Broker;
use crate::error::{BusError, BusResult};
use crate::model::{Attachment, DeliveryMode, MessageType};
use crate::state::{AckStatus, PostEventKind, RegisterRequest, SendRequest};

use super::auth;

fn actor_header(headers: &HeaderMap) -> BusResult<String> {
    headers
        .get("x-agent-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .ok_or_else(|| BusError::validation("X-Agent-ID header is required"))
}

// -- Register ------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RegisterBody {
    pub agent_id: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub description: String,
    pub mode: DeliveryMode,
    #[serde(default)]
    pub callback_url: Option<String>,
    #[serde(default)]
    pub ttl_secs: Option<u64>,
    pub secret: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub ok: bool,
    pub agent_id: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

/// `POST /v1/agents/register`. Unauthenticated by HMAC (there is no prior
/// secret to sign with) but gated by `AGENT_ALLOWLIST` when configured.
pub async fn register_agent(
    State(broker): State<Arc<Broker>>,
    Json(body): Json<RegisterBody>,
) -> BusResult<Json<RegisterResponse>> {
    if !broker.security.agent_allowlist.allows(&body.agent_id) {
        return Err(BusError::unauthorized("agent_id is not on the allowlist"));
    }
    if body.secret.trim().is_empty() {
        return Err(BusError::validation("secret is required"));
    }
    let agent_id = body.agent_id.trim().to_owned();
    let outcome = broker
        .register(RegisterRequest {
            agent_id: body.agent_id,
            capabilities: body.capabilities,
            description: body.description,
            mode: body.mode,
            callback_url: body.callback_url,
            ttl_secs: body.ttl_secs,
        })
        .await?;
    broker.security.secrets.set(&agent_id, body.secret).await;
    Ok(Json(RegisterResponse { ok: true, agent_id: outcome.agent_id, expires_at: outcome.expires_at }))
}

#[derive(Debug, Deserialize)]
pub struct ListAgentsQuery {
    pub capability: Option<String>,
}

pub async fn list_agents(
    State(broker): State<Arc<Broker>>,
    Query(query): Query<ListAgentsQuery>,
) -> Json<Vec<crate::model::Agent>> {
    Json(broker.list_agents(query.capability.as_deref()).await)
}

// -- Send message ----------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SendBody {
    pub from: String,
    pub to: String,
    pub request_id: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub body: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub meta: Option<serde_json::Value>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub ttl_secs: Option<u64>,
    #[serde(default)]
    pub in_reply_to: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SendResponse {
    pub ok: bool,
    pub message_id: String,
    pub duplicate: bool,
}

/// `POST /v1/messages`, signed by the sending agent over the raw JSON body.
pub async fn send_message(
    State(broker): State<Arc<Broker>>,
    headers: HeaderMap,
    raw: Bytes,
) -> BusResult<Json<SendResponse>> {
    let body: SendBody =
        serde_json::from_slice(&raw).map_err(|err| BusError::validation(format!("invalid body: {err}")))?;
    auth::require_signature(&broker.security.secrets, &body.from, &raw, &headers).await?;
    let outcome = broker
        .send(SendRequest {
            from: body.from,
            to: body.to,
            request_id: body.request_id,
            message_type: body.message_type,
            body: body.body,
            conversation_id: body.conversation_id,
            meta: body.meta,
            attachments: body.attachments,
            ttl_secs: body.ttl_secs,
            in_reply_to: body.in_reply_to,
        })
        .await?;
    Ok(Json(SendResponse { ok: true, message_id: outcome.message_id, duplicate: outcome.duplicate }))
}

// -- Ack --------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct AckBody {
    pub agent_id: String,
    pub message_id: String,
    pub status: AckStatusWire,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatusWire {
    Accepted,
    Rejected,
}

impl From<AckStatusWire> for AckStatus {
    fn from(value: AckStatusWire) -> Self {
        match value {
            AckStatusWire::Accepted => Self::Accepted,
            AckStatusWire::Rejected => Self::Rejected,
        }
    }
}

/// `POST /v1/acks`, signed by the acking agent over the raw JSON body.
pub async fn ack(
    State(broker): State<Arc<Broker>>,
    headers: HeaderMap,
    raw: Bytes,
) -> BusResult<Json<serde_json::Value>> {
    let body: AckBody =
        serde_json::from_slice(&raw).map_err(|err| BusError::validation(format!("invalid body: {err}")))?;
    auth::require_signature(&broker.security.secrets, &body.agent_id, &raw, &headers).await?;
    broker.ack(&body.agent_id, &body.message_id, body.status.into()).await?;
    Ok(Json(serde_json::json!({"ok": true})))
}

// -- Events -----------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct EventBody {
    pub message_id: String,
    pub kind: PostEventKindWire,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub meta: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostEventKindWire {
    Progress,
    Final,
    Error,
}

impl From<PostEventKindWire> for PostEventKind {
    fn from(value: PostEventKindWire) -> Self {
        match value {
            PostEventKindWire::Progress => Self::Progress,
            PostEventKindWire::Final => Self::Final,
            PostEventKindWire::Error => Self::Error,
        }
    }
}

/// `POST /v1/events`. The actor is carried in `X-Agent-ID` and must be the
/// identity the signature was produced with, per `spec.md` §4.4.
pub async fn post_event(
    State(broker): State<Arc<Broker>>,
    headers: HeaderMap,
    raw: Bytes,
) -> BusResult<Json<serde_json::Value>> {
    let actor = actor_header(&headers)?;
    auth::require_signature(&broker.security.secrets, &actor, &raw, &headers).await?;
    let body: EventBody =
        serde_json::from_slice(&raw).map_err(|err| BusError::validation(format!("invalid body: {err}")))?;
    broker.post_event(&actor, &body.message_id, body.kind.into(), body.body, body.meta).await?;
    Ok(Json(serde_json::json!({"ok": true})))
}

// -- Inbox --------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct InboxQuery {
    pub agent_id: String,
    #[serde(default)]
    pub cursor: u64,
    #[serde(default)]
    pub wait_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct InboxResponse {
    pub ok: bool,
    pub events: Vec<crate::model::InboxEvent>,
    pub cursor: u64,
}

/// `GET /v1/inbox`, signed over the raw query string (byte-exact).
pub async fn poll_inbox(
    State(broker): State<Arc<Broker>>,
    headers: HeaderMap,
    RawQuery(raw_query): RawQuery,
    Query(query): Query<InboxQuery>,
) -> BusResult<Json<InboxResponse>> {
    let raw = raw_query.unwrap_or_default();
    auth::require_signature(&broker.security.secrets, &query.agent_id, raw.as_bytes(), &headers).await?;
    let wait = query.wait_secs.map(std::time::Duration::from_secs).unwrap_or_default();
    let (events, cursor) = broker.poll_inbox(&query.agent_id, query.cursor, wait).await?;
    Ok(Json(InboxResponse { ok: true, events, cursor }))
}

// -- Conversations ------------------------------------------------------

pub async fn list_conversations(
    State(broker): State<Arc<Broker>>,
) -> Json<Vec<crate::model::Conversation>> {
    Json(broker.list_conversations().await)
}

#[derive(Debug, Deserialize)]
pub struct CreateConversationBody {
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub meta: serde_json::Value,
}

/// `POST /v1/conversations`. Unsigned, same as registration: there is no
/// shared secret to sign with before a conversation exists.
pub async fn create_conversation(
    State(broker): State<Arc<Broker>>,
    Json(body): Json<CreateConversationBody>,
) -> BusResult<Json<crate::model::Conversation>> {
    let conversation = broker
        .create_conversation(body.conversation_id, body.title, body.participants, body.meta)
        .await?;
    Ok(Json(conversation))
}

#[derive(Debug, Deserialize)]
pub struct ConversationMessagesQuery {
    #[serde(default)]
    pub cursor: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

const MAX_CONVERSATION_MESSAGES_LIMIT: usize = 200;

pub async fn conversation_messages(
    State(broker): State<Arc<Broker>>,
    Path(conversation_id): Path<String>,
    Query(query): Query<ConversationMessagesQuery>,
) -> BusResult<Json<Vec<crate::model::Message>>> {
    let limit = query.limit.min(MAX_CONVERSATION_MESSAGES_LIMIT);
    let messages = broker.conversation_messages(&conversation_id, query.cursor, limit).await?;
    Ok(Json(messages))
}

// -- Inject ---------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct InjectBody {
    pub identity: String,
    #[serde(default)]
    pub to: Option<String>,
    pub body: String,
    #[serde(default)]
    pub meta: Option<serde_json::Value>,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

/// `POST /v1/inject`, gated by `HUMAN_ALLOWLIST`. Unsigned: human operators
/// do not hold an agent shared secret.
pub async fn inject(
    State(broker): State<Arc<Broker>>,
    Json(body): Json<InjectBody>,
) -> BusResult<Json<SendResponse>> {
    let outcome = broker.inject(&body.identity, body.to, body.body, body.meta, body.conversation_id).await?;
    Ok(Json(SendResponse { ok: true, message_id: outcome.message_id, duplicate: outcome.duplicate }))
}

// -- Health / status -------------------------------------------------------

pub async fn health(State(broker): State<Arc<Broker>>) -> Json<serde_json::Value> {
    Json(broker.health().await)
}

pub async fn system_status(State(broker): State<Arc<Broker>>) -> Json<serde_json::Value> {
    let health = broker.health().await;
    Json(serde_json::json!({"ok": true, "status": health}))
}
