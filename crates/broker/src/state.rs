// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory broker core: all state mutations, sweeping, idempotency, inbox,
//! observe log. Per `spec.md` §4.1, the broker holds all state behind a
//! single lock and every public operation runs `sweep(now)` first.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::BrokerConfig;
use crate::error::{BusError, BusResult};
use crate::model::{
    Agent, AgentStatus, Attachment, Conversation, DeliveryMode, Inbox, InboxEvent,
    IdempotencyEntry, IdempotencyKey, Message, MessageState, MessageType, ObserveEvent,
};

fn trim(id: &str) -> String {
    id.trim().to_owned()
}

/// `chrono::DateTime` arithmetic takes `chrono::Duration`; config durations
/// are plain `std::time::Duration`. Converts with clamping instead of
/// panicking on out-of-range values (none of our configured durations are
/// anywhere near the `chrono::Duration` bound, but this keeps the broker
/// from ever panicking on a mutation path).
fn to_chrono(d: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

/// A scheduled out-of-lock delivery to a push-mode agent's callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushJob {
    pub target_agent_id: String,
    pub callback_url: String,
    pub message_id: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub from: String,
    pub conversation_id: String,
    pub body: String,
    pub meta: serde_json::Value,
    pub attachments: Vec<Attachment>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RegisterRequest {
    pub agent_id: String,
    pub capabilities: Vec<String>,
    pub description: String,
    pub mode: DeliveryMode,
    pub callback_url: Option<String>,
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct RegisterOutcome {
    pub agent_id: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SendRequest {
    pub from: String,
    pub to: String,
    pub request_id: String,
    pub message_type: MessageType,
    pub body: String,
    pub conversation_id: Option<String>,
    pub meta: Option<serde_json::Value>,
    pub attachments: Vec<Attachment>,
    pub ttl_secs: Option<u64>,
    pub in_reply_to: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub message_id: String,
    pub duplicate: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostEventKind {
    Progress,
    Final,
    Error,
}

/// Full in-memory state of one broker instance.
#[derive(Default)]
pub struct Inner {
    pub agents: HashMap<String, Agent>,
    pub conversations: HashMap<String, Conversation>,
    pub messages: HashMap<String, Message>,
    pub inboxes: HashMap<String, Inbox>,
    pub idempotency: HashMap<IdempotencyKey, IdempotencyEntry>,
    pub observe_events: Vec<ObserveEvent>,
    pub observe_base: u64,
    pub next_conversation_id: u64,
    pub next_message_id: u64,
    pub next_observe_id: u64,
    pub push_successes: u64,
    pub push_failures: u64,
    pub last_persist_error: Option<String>,
}

/// A full on-disk representation, per `spec.md` §6 "Persisted snapshot layout".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub next_conversation_id: u64,
    pub next_message_id: u64,
    pub next_observe_id: u64,
    pub push_failures: u64,
    pub push_successes: u64,
    pub agents: Vec<Agent>,
    pub conversations: Vec<Conversation>,
    pub messages: Vec<Message>,
    pub conversation_messages: HashMap<String, Vec<String>>,
    pub inboxes: HashMap<String, Inbox>,
    pub observe_events: Vec<ObserveEvent>,
    pub idempotency: Vec<(String, String, DateTime<Utc>)>,
}

impl Inner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Snapshot {
        let conversation_messages = self
            .conversations
            .values()
            .map(|c| (c.conversation_id.clone(), c.message_ids.clone()))
            .collect();
        let idempotency = self
            .idempotency
            .iter()
            .map(|(key, entry)| (key.as_str().to_owned(), entry.message_id.clone(), entry.created_at))
            .collect();
        Snapshot {
            next_conversation_id: self.next_conversation_id,
            next_message_id: self.next_message_id,
            next_observe_id: self.next_observe_id,
            push_failures: self.push_failures,
            push_successes: self.push_successes,
            agents: self.agents.values().cloned().collect(),
            conversations: self.conversations.values().cloned().collect(),
            messages: self.messages.values().cloned().collect(),
            conversation_messages,
            inboxes: self.inboxes.clone(),
            observe_events: self.observe_events.clone(),
            idempotency,
        }
    }

    pub fn restore(snapshot: Snapshot) -> Self {
        let mut inner = Self::new();
        inner.next_conversation_id = snapshot.next_conversation_id;
        inner.next_message_id = snapshot.next_message_id;
        inner.next_observe_id = snapshot.next_observe_id;
        inner.push_failures = snapshot.push_failures;
        inner.push_successes = snapshot.push_successes;
        for agent in snapshot.agents {
            inner.agents.insert(agent.agent_id.clone(), agent);
        }
        for mut conversation in snapshot.conversations {
            if let Some(ids) = snapshot.conversation_messages.get(&conversation.conversation_id) {
                conversation.message_ids = ids.clone();
            }
            inner.conversations.insert(conversation.conversation_id.clone(), conversation);
        }
        for message in snapshot.messages {
            inner.messages.insert(message.message_id.clone(), message);
        }
        inner.inboxes = snapshot.inboxes;
        inner.observe_base =
            snapshot.observe_events.first().map(|e| e.id).unwrap_or(snapshot.next_observe_id);
        inner.observe_events = snapshot.observe_events;
        for (from_to_rid, message_id, created_at) in snapshot.idempotency {
            inner
                .idempotency
                .insert(IdempotencyKey::from_raw(from_to_rid), IdempotencyEntry { message_id, created_at });
        }
        inner
    }

    fn publish(&mut self, event_type: &str, data: serde_json::Value, now: DateTime<Utc>) -> u64 {
        self.publish_for(event_type, data, now, None, Vec::new())
    }

    fn publish_for(
        &mut self,
        event_type: &str,
        data: serde_json::Value,
        now: DateTime<Utc>,
        conversation_id: Option<String>,
        agent_ids: Vec<String>,
    ) -> u64 {
        let id = self.next_observe_id;
        self.next_observe_id += 1;
        self.observe_events.push(ObserveEvent {
            id,
            event_type: event_type.to_owned(),
            at: now,
            data,
            conversation_id,
            agent_ids,
        });
        id
    }

    fn trim_observe_log(&mut self, max_events: usize) {
        if self.observe_events.len() > max_events {
            let overflow = self.observe_events.len() - max_events;
            self.observe_events.drain(0..overflow);
            self.observe_base += overflow as u64;
        }
    }

    fn transition(
        &mut self,
        message_id: &str,
        to: MessageState,
        now: DateTime<Utc>,
        reason: Option<&str>,
    ) {
        let from_state = match self.messages.get_mut(message_id) {
            Some(message) => {
                let from_state = message.state;
                message.state = to;
                message.last_transition_reason = reason.map(str::to_owned);
                from_state
            }
            None => return,
        };
        let mut data = serde_json::json!({
            "message_id": message_id,
            "from_state": from_state,
            "to_state": to,
            "at": now,
        });
        if let Some(reason) = reason {
            data["reason"] = serde_json::Value::String(reason.to_owned());
        }
        self.publish("state_change", data, now);
    }

    // -- Sweep ----------------------------------------------------------

    /// Time-driven transitions, per `spec.md` §4.1.1. Returns any push
    /// deliveries a sweep-driven grace delivery scheduled.
    pub fn sweep(&mut self, now: DateTime<Utc>, cfg: &BrokerConfig) -> Vec<PushJob> {
        let window = cfg.idempotency_window();
        self.idempotency.retain(|_, entry| now - entry.created_at <= window);

        let expired_agents: Vec<String> = self
            .agents
            .values()
            .filter(|a| a.status == AgentStatus::Active && now > a.expires_at)
            .map(|a| a.agent_id.clone())
            .collect();
        for agent_id in expired_agents {
            if let Some(agent) = self.agents.get_mut(&agent_id) {
                agent.status = AgentStatus::Expired;
            }
            self.publish("agent_expired", serde_json::json!({"agent_id": agent_id}), now);
        }

        let mut jobs = Vec::new();
        let message_ids: Vec<String> = self.messages.keys().cloned().collect();
        for message_id in message_ids {
            let Some(message) = self.messages.get(&message_id) else { continue };
            if message.state.is_terminal() {
                continue;
            }
            if let Some(ttl) = message.ttl_expires_at {
                if now > ttl {
                    self.transition(&message_id, MessageState::Error, now, Some("ttl timeout"));
                    continue;
                }
            }
            if message.state == MessageState::Waiting {
                if let Some(delivered_at) = message.delivered_at {
                    if now - delivered_at > to_chrono(cfg.ack_timeout()) {
                        self.transition(&message_id, MessageState::Error, now, Some("ack timeout"));
                        continue;
                    }
                }
            }
            if message.queued_for_agent {
                let to = message.to.clone();
                let target_active =
                    self.agents.get(&to).is_some_and(|a| a.status == AgentStatus::Active);
                if target_active {
                    if let Some(job) = self.deliver_queued(&message_id, now, cfg) {
                        jobs.push(job);
                    }
                } else if let Some(grace_until) = message.grace_until {
                    if now > grace_until {
                        self.transition(
                            &message_id,
                            MessageState::Error,
                            now,
                            Some("target agent did not re-register in grace period"),
                        );
                    }
                }
            }
        }
        self.trim_observe_log(cfg.max_observe_events);
        jobs
    }

    fn deliver_queued(
        &mut self,
        message_id: &str,
        now: DateTime<Utc>,
        cfg: &BrokerConfig,
    ) -> Option<PushJob> {
        let message = self.messages.get_mut(message_id)?;
        message.queued_for_agent = false;
        message.delivered_at = Some(now);
        let event = InboxEvent {
            message_id: message.message_id.clone(),
            message_type: message.message_type,
            from: message.from.clone(),
            conversation_id: message.conversation_id.clone(),
            body: message.body.clone(),
            meta: message.meta.clone(),
            attachments: message.attachments.clone(),
            created_at: message.created_at,
        };
        let to = message.to.clone();
        self.transition(message_id, MessageState::Waiting, now, None);
        self.append_inbox(&to, event, cfg);
        self.maybe_schedule_push(message_id)
    }

    fn append_inbox(&mut self, agent_id: &str, event: InboxEvent, cfg: &BrokerConfig) {
        self.inboxes
            .entry(agent_id.to_owned())
            .or_default()
            .push(event, cfg.max_inbox_events_per_agent);
    }

    fn maybe_schedule_push(&self, message_id: &str) -> Option<PushJob> {
        let message = self.messages.get(message_id)?;
        let agent = self.agents.get(&message.to)?;
        if agent.mode != DeliveryMode::Push {
            return None;
        }
        let callback_url = agent.callback_url.clone()?;
        Some(PushJob {
            target_agent_id: agent.agent_id.clone(),
            callback_url,
            message_id: message.message_id.clone(),
            message_type: message.message_type,
            from: message.from.clone(),
            conversation_id: message.conversation_id.clone(),
            body: message.body.clone(),
            meta: message.meta.clone(),
            attachments: message.attachments.clone(),
            created_at: message.created_at,
        })
    }

    // -- Register agent ---------------------------------------------------

    pub fn register_agent(
        &mut self,
        req: RegisterRequest,
        now: DateTime<Utc>,
        cfg: &BrokerConfig,
    ) -> BusResult<RegisterOutcome> {
        let agent_id = trim(&req.agent_id);
        if agent_id.is_empty() {
            return Err(BusError::validation("agent_id is required"));
        }
        if req.mode == DeliveryMode::Push && req.callback_url.as_deref().map(str::trim).unwrap_or("").is_empty()
        {
            return Err(BusError::validation("callback_url is required for push mode"));
        }
        let ttl_secs = req.ttl_secs.unwrap_or_else(|| cfg.default_registration_ttl_secs);
        let expires_at = now + chrono::Duration::seconds(ttl_secs as i64);
        let registered_at = self.agents.get(&agent_id).map(|a| a.registered_at).unwrap_or(now);
        self.agents.insert(
            agent_id.clone(),
            Agent {
                agent_id: agent_id.clone(),
                capabilities: req.capabilities.into_iter().collect(),
                description: req.description,
                mode: req.mode,
                callback_url: req.callback_url,
                status: AgentStatus::Active,
                registered_at,
                expires_at,
                ttl_secs,
            },
        );
        self.inboxes.entry(agent_id.clone()).or_default();
        self.publish("agent_registered", serde_json::json!({"agent_id": agent_id}), now);
        Ok(RegisterOutcome { agent_id, expires_at })
    }

    pub fn list_agents(&self, capability: Option<&str>) -> Vec<Agent> {
        self.agents
            .values()
            .filter(|a| capability.is_none_or(|cap| a.capabilities.contains(cap)))
            .cloned()
            .collect()
    }

    fn ensure_conversation(
        &mut self,
        conversation_id: Option<String>,
        participants: &[&str],
        now: DateTime<Utc>,
    ) -> String {
        let id = conversation_id
            .map(|id| trim(&id))
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| {
                let id = format!("c-{:06}", self.next_conversation_id);
                self.next_conversation_id += 1;
                id
            });
        self.conversations.entry(id.clone()).or_insert_with(|| Conversation {
            conversation_id: id.clone(),
            title: None,
            participants: participants.iter().map(|p| (*p).to_owned()).collect(),
            status: "open".to_owned(),
            message_count: 0,
            created_at: now,
            last_message_at: now,
            meta: serde_json::Value::Null,
            message_ids: Vec::new(),
        });
        id
    }

    // -- Send message ------------------------------------------------------

    pub fn send_message(
        &mut self,
        req: SendRequest,
        now: DateTime<Utc>,
        cfg: &BrokerConfig,
    ) -> BusResult<(SendOutcome, Vec<PushJob>)> {
        let from = trim(&req.from);
        let to = trim(&req.to);
        let request_id = req.request_id.clone();
        if from.is_empty() || to.is_empty() || request_id.trim().is_empty() || req.body.trim().is_empty() {
            return Err(BusError::validation("to, from, request_id, and body are required"));
        }

        let sender_active =
            self.agents.get(&from).is_some_and(|a| a.status == AgentStatus::Active);
        if !sender_active {
            return Err(BusError::unauthorized("sender is not registered or not active"));
        }

        let key = IdempotencyKey::new(&from, &to, &request_id);
        if let Some(entry) = self.idempotency.get(&key) {
            if self.messages.contains_key(&entry.message_id) {
                return Ok((
                    SendOutcome { message_id: entry.message_id.clone(), duplicate: true },
                    Vec::new(),
                ));
            }
        }

        let target = self.agents.get(&to).cloned();
        let target = match target {
            Some(t) => t,
            None => return Err(BusError::not_found("target agent is not registered")),
        };
        let target_expired = target.status == AgentStatus::Expired;
        let within_grace = target_expired
            && now <= target.expires_at + to_chrono(cfg.grace_period());
        if target_expired && !within_grace {
            return Err(BusError::not_found("target agent is expired"));
        }

        let message_id = format!("m-{:06}", self.next_message_id);
        self.next_message_id += 1;

        let conversation_id =
            self.ensure_conversation(req.conversation_id, &[&from, &to], now);

        let ttl_secs = req.ttl_secs.unwrap_or(cfg.default_message_ttl_secs);
        let ttl_expires_at = Some(now + chrono::Duration::seconds(ttl_secs as i64));

        let queued_for_agent = target_expired;
        let grace_until = if queued_for_agent { Some(target.expires_at + to_chrono(cfg.grace_period())) } else { None };
        let state = if queued_for_agent {
            MessageState::Pending
        } else if req.message_type == MessageType::Request {
            MessageState::Waiting
        } else {
            MessageState::Completed
        };
        let delivered_at = if queued_for_agent { None } else { Some(now) };

        let message = Message {
            message_id: message_id.clone(),
            message_type: req.message_type,
            from: from.clone(),
            to: to.clone(),
            conversation_id: conversation_id.clone(),
            request_id: request_id.clone(),
            in_reply_to: req.in_reply_to,
            body: req.body.clone(),
            meta: req.meta.clone().unwrap_or(serde_json::Value::Null),
            attachments: req.attachments.clone(),
            state,
            created_at: now,
            delivered_at,
            last_progress_at: None,
            ttl_expires_at,
            grace_until,
            queued_for_agent,
            last_transition_reason: None,
        };
        self.messages.insert(message_id.clone(), message);

        let mut jobs = Vec::new();
        if !queued_for_agent {
            let event = InboxEvent {
                message_id: message_id.clone(),
                message_type: req.message_type,
                from: from.clone(),
                conversation_id: conversation_id.clone(),
                body: req.body.clone(),
                meta: req.meta.unwrap_or(serde_json::Value::Null),
                attachments: req.attachments,
                created_at: now,
            };
            self.append_inbox(&to, event, cfg);
            if let Some(job) = self.maybe_schedule_push(&message_id) {
                jobs.push(job);
            }
        }

        self.idempotency.insert(key, IdempotencyEntry { message_id: message_id.clone(), created_at: now });

        if let Some(conversation) = self.conversations.get_mut(&conversation_id) {
            conversation.message_count += 1;
            conversation.last_message_at = now;
            conversation.message_ids.push(message_id.clone());
        }

        self.publish_for(
            "message",
            serde_json::json!({"message_id": message_id, "from": from, "to": to}),
            now,
            Some(conversation_id),
            vec![from, to],
        );

        Ok((SendOutcome { message_id, duplicate: false }, jobs))
    }

    // -- Ack -----------------------------------------------------------

    pub fn ack(
        &mut self,
        agent_id: &str,
        message_id: &str,
        status: AckStatus,
        now: DateTime<Utc>,
    ) -> BusResult<()> {
        let agent_id = trim(agent_id);
        let message = self.messages.get(message_id).ok_or_else(|| BusError::not_found("message not found"))?;
        if message.message_type != MessageType::Request {
            return Err(BusError::validation("ack is only valid for request messages"));
        }
        if message.to != agent_id {
            return Err(BusError::unauthorized("agent is not the message target"));
        }
        if message.state.is_terminal() {
            return Ok(());
        }

        self.publish(
            "ack",
            serde_json::json!({"message_id": message_id, "agent_id": agent_id, "status": status_str(status)}),
            now,
        );
        let to = match status {
            AckStatus::Accepted => MessageState::Executing,
            AckStatus::Rejected => MessageState::Rejected,
        };
        self.transition(message_id, to, now, None);
        Ok(())
    }

    // -- Post event ------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn post_event(
        &mut self,
        actor: &str,
        message_id: &str,
        kind: PostEventKind,
        body: String,
        meta: serde_json::Value,
        now: DateTime<Utc>,
        cfg: &BrokerConfig,
    ) -> BusResult<()> {
        let actor = trim(actor);
        if actor.is_empty() {
            return Err(BusError::unauthorized("actor is required"));
        }
        let message = self.messages.get(message_id).ok_or_else(|| BusError::not_found("message not found"))?;
        if message.to != actor {
            return Err(BusError::unauthorized("agent is not the message target"));
        }
        if message.message_type != MessageType::Request {
            return Err(BusError::validation("events are only valid for request messages"));
        }
        if message.state.is_terminal() {
            return Ok(());
        }

        match kind {
            PostEventKind::Progress => {
                if let Some(last) = message.last_progress_at {
                    let elapsed = now - last;
                    let min_interval = cfg.progress_min_interval();
                    if elapsed < min_interval {
                        let remaining = min_interval - elapsed;
                        let retry_after = remaining.to_std().unwrap_or(std::time::Duration::from_secs(1));
                        return Err(BusError::rate_limited("progress too frequent", retry_after));
                    }
                }
                if message.state == MessageState::Waiting {
                    self.transition(message_id, MessageState::Executing, now, None);
                }
                if let Some(message) = self.messages.get_mut(message_id) {
                    message.last_progress_at = Some(now);
                }
                self.publish(
                    "progress",
                    serde_json::json!({"message_id": message_id, "body": body, "meta": meta}),
                    now,
                );
            }
            PostEventKind::Final => {
                self.transition_with_payload(message_id, MessageState::Completed, now, "final event", body, meta);
            }
            PostEventKind::Error => {
                self.transition_with_payload(message_id, MessageState::Error, now, "error event", body, meta);
            }
        }
        Ok(())
    }

    fn transition_with_payload(
        &mut self,
        message_id: &str,
        to: MessageState,
        now: DateTime<Utc>,
        reason: &str,
        body: String,
        meta: serde_json::Value,
    ) {
        let from_state = match self.messages.get_mut(message_id) {
            Some(message) => {
                let from_state = message.state;
                message.state = to;
                message.last_transition_reason = Some(reason.to_owned());
                from_state
            }
            None => return,
        };
        self.publish(
            "state_change",
            serde_json::json!({
                "message_id": message_id,
                "from_state": from_state,
                "to_state": to,
                "at": now,
                "reason": reason,
                "body": body,
                "meta": meta,
            }),
            now,
        );
    }

    // -- Inject (human-originated message) --------------------------------

    pub fn inject(
        &mut self,
        identity: &str,
        to: Option<String>,
        body: String,
        meta: Option<serde_json::Value>,
        conversation_id: Option<String>,
        now: DateTime<Utc>,
        cfg: &BrokerConfig,
    ) -> BusResult<(SendOutcome, Vec<PushJob>)> {
        let identity = trim(identity);
        let from = format!("human:{identity}");
        self.publish(
            "human_injection",
            serde_json::json!({"identity": identity, "to": to}),
            now,
        );
        match to {
            Some(to) => {
                let req = SendRequest {
                    from,
                    to,
                    request_id: format!("inject-{}", self.next_message_id),
                    message_type: MessageType::Inform,
                    body,
                    conversation_id,
                    meta,
                    attachments: Vec::new(),
                    ttl_secs: None,
                    in_reply_to: None,
                };
                self.send_message_as_system(req, now, cfg)
            }
            None => {
                let message_id = format!("m-{:06}", self.next_message_id);
                self.next_message_id += 1;
                let conversation_id = self.ensure_conversation(conversation_id, &[&from], now);
                let message = Message {
                    message_id: message_id.clone(),
                    message_type: MessageType::Inform,
                    from: from.clone(),
                    to: String::new(),
                    conversation_id: conversation_id.clone(),
                    request_id: String::new(),
                    in_reply_to: None,
                    body,
                    meta: meta.unwrap_or(serde_json::Value::Null),
                    attachments: Vec::new(),
                    state: MessageState::Completed,
                    created_at: now,
                    delivered_at: Some(now),
                    last_progress_at: None,
                    ttl_expires_at: None,
                    grace_until: None,
                    queued_for_agent: false,
                    last_transition_reason: None,
                };
                self.messages.insert(message_id.clone(), message);
                self.publish_for(
                    "message",
                    serde_json::json!({"message_id": message_id, "from": from}),
                    now,
                    Some(conversation_id),
                    vec![from],
                );
                Ok((SendOutcome { message_id, duplicate: false }, Vec::new()))
            }
        }
    }

    /// `inject`'s recipient path reuses `send_message`'s delivery algorithm
    /// verbatim (grace/expiry handling included) but bypasses the sender
    /// active/registered check, since a human identity is not an agent.
    fn send_message_as_system(
        &mut self,
        req: SendRequest,
        now: DateTime<Utc>,
        cfg: &BrokerConfig,
    ) -> BusResult<(SendOutcome, Vec<PushJob>)> {
        let to = trim(&req.to);
        if to.is_empty() || req.body.trim().is_empty() {
            return Err(BusError::validation("to and body are required"));
        }
        let target = self.agents.get(&to).cloned().ok_or_else(|| BusError::not_found("target agent is not registered"))?;
        let target_expired = target.status == AgentStatus::Expired;
        let within_grace = target_expired && now <= target.expires_at + to_chrono(cfg.grace_period());
        if target_expired && !within_grace {
            return Err(BusError::not_found("target agent is expired"));
        }

        let message_id = format!("m-{:06}", self.next_message_id);
        self.next_message_id += 1;
        let conversation_id = self.ensure_conversation(req.conversation_id, &[&req.from, &to], now);

        let ttl_secs = req.ttl_secs.unwrap_or(cfg.default_message_ttl_secs);
        let ttl_expires_at = Some(now + chrono::Duration::seconds(ttl_secs as i64));

        let queued_for_agent = target_expired;
        let grace_until = if queued_for_agent { Some(target.expires_at + to_chrono(cfg.grace_period())) } else { None };
        let state = if queued_for_agent { MessageState::Pending } else { MessageState::Completed };
        let delivered_at = if queued_for_agent { None } else { Some(now) };

        let message = Message {
            message_id: message_id.clone(),
            message_type: req.message_type,
            from: req.from.clone(),
            to: to.clone(),
            conversation_id: conversation_id.clone(),
            request_id: req.request_id.clone(),
            in_reply_to: None,
            body: req.body.clone(),
            meta: req.meta.clone().unwrap_or(serde_json::Value::Null),
            attachments: req.attachments.clone(),
            state,
            created_at: now,
            delivered_at,
            last_progress_at: None,
            ttl_expires_at,
            grace_until,
            queued_for_agent,
            last_transition_reason: None,
        };
        self.messages.insert(message_id.clone(), message);

        let mut jobs = Vec::new();
        if !queued_for_agent {
            let event = InboxEvent {
                message_id: message_id.clone(),
                message_type: req.message_type,
                from: req.from.clone(),
                conversation_id: conversation_id.clone(),
                body: req.body,
                meta: req.meta.unwrap_or(serde_json::Value::Null),
                attachments: req.attachments,
                created_at: now,
            };
            self.append_inbox(&to, event, cfg);
            if let Some(job) = self.maybe_schedule_push(&message_id) {
                jobs.push(job);
            }
        }

        if let Some(conversation) = self.conversations.get_mut(&conversation_id) {
            conversation.message_count += 1;
            conversation.last_message_at = now;
            conversation.message_ids.push(message_id.clone());
        }

        self.publish_for(
            "message",
            serde_json::json!({"message_id": message_id, "from": req.from, "to": to}),
            now,
            Some(conversation_id),
            vec![req.from, to],
        );

        Ok((SendOutcome { message_id, duplicate: false }, jobs))
    }

    // -- Inbox poll ------------------------------------------------------

    pub fn inbox_slice(&self, agent_id: &str, cursor: u64) -> BusResult<(Vec<InboxEvent>, u64)> {
        let agent_id = trim(agent_id);
        let active = self.agents.get(&agent_id).is_some_and(|a| a.status == AgentStatus::Active);
        if !active {
            return Err(BusError::unauthorized("agent is not registered or not active"));
        }
        let inbox = self.inboxes.get(&agent_id).cloned().unwrap_or_default();
        let (slice, next) = inbox.slice_from(cursor);
        Ok((slice.to_vec(), next))
    }

    // -- Observe ---------------------------------------------------------

    pub fn observe_slice(
        &self,
        after_id: i64,
        conversation_id: Option<&str>,
        agent_id: Option<&str>,
    ) -> (Vec<ObserveEvent>, u64) {
        let matches = |e: &&ObserveEvent| -> bool {
            if e.id as i64 <= after_id {
                return false;
            }
            if let Some(cid) = conversation_id {
                if e.conversation_id.as_deref() != Some(cid) {
                    return false;
                }
            }
            if let Some(aid) = agent_id {
                if !e.agent_ids.iter().any(|a| a == aid) {
                    return false;
                }
            }
            true
        };
        let events: Vec<ObserveEvent> = self.observe_events.iter().filter(matches).cloned().collect();
        let last_id = self.observe_events.last().map(|e| e.id).unwrap_or(after_id.max(0) as u64);
        (events, last_id)
    }

    // -- Conversations -----------------------------------------------------

    pub fn conversation_messages(
        &self,
        conversation_id: &str,
        cursor: usize,
        limit: usize,
    ) -> BusResult<Vec<Message>> {
        let conversation = self
            .conversations
            .get(conversation_id)
            .ok_or_else(|| BusError::not_found("conversation not found"))?;
        let ids = conversation.message_ids.iter().skip(cursor).take(limit);
        Ok(ids.filter_map(|id| self.messages.get(id).cloned()).collect())
    }

    pub fn list_conversations(&self) -> Vec<Conversation> {
        self.conversations.values().cloned().collect()
    }

    pub fn create_conversation(
        &mut self,
        conversation_id: Option<String>,
        title: Option<String>,
        participants: Vec<String>,
        meta: serde_json::Value,
        now: DateTime<Utc>,
    ) -> BusResult<Conversation> {
        let id = match conversation_id.map(|id| trim(&id)).filter(|id| !id.is_empty()) {
            Some(id) => {
                if self.conversations.contains_key(&id) {
                    return Err(BusError::rejected("conversation already exists"));
                }
                id
            }
            None => {
                let id = format!("c-{:06}", self.next_conversation_id);
                self.next_conversation_id += 1;
                id
            }
        };
        let conversation = Conversation {
            conversation_id: id.clone(),
            title,
            participants,
            status: "open".to_owned(),
            message_count: 0,
            created_at: now,
            last_message_at: now,
            meta,
            message_ids: Vec::new(),
        };
        self.conversations.insert(id, conversation.clone());
        Ok(conversation)
    }

    pub fn health(&self) -> serde_json::Value {
        serde_json::json!({
            "agent_count": self.agents.len(),
            "message_count": self.messages.len(),
            "conversation_count": self.conversations.len(),
            "observe_event_count": self.observe_events.len(),
            "push_successes": self.push_successes,
            "push_failures": self.push_failures,
            "last_persist_error": self.last_persist_error,
        })
    }
}

fn status_str(status: AckStatus) -> &'static str {
    match status {
        AckStatus::Accepted => "accepted",
        AckStatus::Rejected => "rejected",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> BrokerConfig {
        BrokerConfig::default()
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-02-17T00:00:00Z").unwrap_or_default().with_timezone(&Utc)
    }

    fn register(inner: &mut Inner, id: &str, ttl: u64) {
        inner
            .register_agent(
                RegisterRequest {
                    agent_id: id.to_owned(),
                    capabilities: vec![],
                    description: String::new(),
                    mode: DeliveryMode::Pull,
                    callback_url: None,
                    ttl_secs: Some(ttl),
                },
                now(),
                &cfg(),
            )
            .expect("register should succeed");
    }

    #[test]
    fn round_trip_send_ack_complete() {
        let mut inner = Inner::new();
        register(&mut inner, "a", 60);
        register(&mut inner, "b", 60);
        let (outcome, _) = inner
            .send_message(
                SendRequest {
                    from: "a".into(),
                    to: "b".into(),
                    request_id: "rid-1".into(),
                    message_type: MessageType::Request,
                    body: "hello".into(),
                    conversation_id: None,
                    meta: None,
                    attachments: vec![],
                    ttl_secs: None,
                    in_reply_to: None,
                },
                now(),
                &cfg(),
            )
            .expect("send should succeed");
        assert!(!outcome.duplicate);
        let (events, _) = inner.inbox_slice("b", 0).expect("inbox read should succeed");
        assert_eq!(events.len(), 1);

        inner.ack("b", &outcome.message_id, AckStatus::Accepted, now()).expect("ack should succeed");
        assert_eq!(inner.messages[&outcome.message_id].state, MessageState::Executing);

        inner
            .post_event(
                "b",
                &outcome.message_id,
                PostEventKind::Final,
                "done".into(),
                serde_json::Value::Null,
                now(),
                &cfg(),
            )
            .expect("final event should succeed");
        assert_eq!(inner.messages[&outcome.message_id].state, MessageState::Completed);
    }

    #[test]
    fn concurrent_identical_sends_deduplicate() {
        let mut inner = Inner::new();
        register(&mut inner, "a", 60);
        register(&mut inner, "b", 60);
        let mut non_duplicate_count = 0;
        let mut message_ids = std::collections::HashSet::new();
        for _ in 0..32 {
            let (outcome, _) = inner
                .send_message(
                    SendRequest {
                        from: "a".into(),
                        to: "b".into(),
                        request_id: "rid-concurrent".into(),
                        message_type: MessageType::Request,
                        body: "hello".into(),
                        conversation_id: None,
                        meta: None,
                        attachments: vec![],
                        ttl_secs: None,
                        in_reply_to: None,
                    },
                    now(),
                    &cfg(),
                )
                .expect("send should succeed");
            message_ids.insert(outcome.message_id);
            if !outcome.duplicate {
                non_duplicate_count += 1;
            }
        }
        assert_eq!(message_ids.len(), 1);
        assert_eq!(non_duplicate_count, 1);
        let (events, _) = inner.inbox_slice("b", 0).expect("inbox read should succeed");
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn ack_timeout_transitions_to_error() {
        let mut inner = Inner::new();
        register(&mut inner, "a", 60);
        register(&mut inner, "b", 60);
        let (outcome, _) = inner
            .send_message(
                SendRequest {
                    from: "a".into(),
                    to: "b".into(),
                    request_id: "rid-1".into(),
                    message_type: MessageType::Request,
                    body: "hello".into(),
                    conversation_id: None,
                    meta: None,
                    attachments: vec![],
                    ttl_secs: None,
                    in_reply_to: None,
                },
                now(),
                &cfg(),
            )
            .expect("send should succeed");
        let later = now() + chrono::Duration::seconds(11);
        inner.sweep(later, &cfg());
        assert_eq!(inner.messages[&outcome.message_id].state, MessageState::Error);
        assert_eq!(
            inner.messages[&outcome.message_id].last_transition_reason.as_deref(),
            Some("ack timeout")
        );
    }

    #[test]
    fn grace_delivery_on_reregister() {
        let mut inner = Inner::new();
        register(&mut inner, "a", 60);
        register(&mut inner, "b", 1);
        let t1 = now() + chrono::Duration::seconds(2);
        let (outcome, _) = inner
            .send_message(
                SendRequest {
                    from: "a".into(),
                    to: "b".into(),
                    request_id: "rid-1".into(),
                    message_type: MessageType::Request,
                    body: "hello".into(),
                    conversation_id: None,
                    meta: None,
                    attachments: vec![],
                    ttl_secs: None,
                    in_reply_to: None,
                },
                t1,
                &cfg(),
            )
            .expect("send within grace should succeed");
        assert!(inner.messages[&outcome.message_id].queued_for_agent);

        register(&mut inner, "b", 60);
        inner.sweep(t1, &cfg());
        assert_eq!(inner.messages[&outcome.message_id].state, MessageState::Waiting);
        let (events, _) = inner.inbox_slice("b", 0).expect("inbox read should succeed");
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn grace_lapse_errors_message() {
        let mut inner = Inner::new();
        register(&mut inner, "a", 60);
        register(&mut inner, "b", 1);
        let t1 = now() + chrono::Duration::seconds(2);
        let (outcome, _) = inner
            .send_message(
                SendRequest {
                    from: "a".into(),
                    to: "b".into(),
                    request_id: "rid-1".into(),
                    message_type: MessageType::Request,
                    body: "hello".into(),
                    conversation_id: None,
                    meta: None,
                    attachments: vec![],
                    ttl_secs: None,
                    in_reply_to: None,
                },
                t1,
                &cfg(),
            )
            .expect("send within grace should succeed");
        let t2 = now() + chrono::Duration::seconds(40);
        inner.sweep(t2, &cfg());
        assert_eq!(inner.messages[&outcome.message_id].state, MessageState::Error);
    }
}
