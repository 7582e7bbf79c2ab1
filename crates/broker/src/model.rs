// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Entity records and state enums for the broker core, per `spec.md` §3.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Delivery mode an agent registers under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    Pull,
    Push,
}

/// An agent's liveness state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Expired,
}

/// A registered agent and its current lease, per `spec.md` §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub agent_id: String,
    pub capabilities: HashSet<String>,
    pub description: String,
    pub mode: DeliveryMode,
    pub callback_url: Option<String>,
    pub status: AgentStatus,
    pub registered_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub ttl_secs: u64,
}

/// A thread of messages, created lazily on first reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub conversation_id: String,
    pub title: Option<String>,
    pub participants: Vec<String>,
    pub status: String,
    pub message_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_message_at: DateTime<Utc>,
    pub meta: serde_json::Value,
    /// Ordered list of message ids in this conversation.
    pub message_ids: Vec<String>,
}

/// The three message kinds a broker can route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Request,
    Response,
    Inform,
}

/// Message lifecycle state, per the state machine in `spec.md` §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageState {
    Pending,
    Waiting,
    Executing,
    Completed,
    Rejected,
    Error,
}

impl MessageState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Rejected | Self::Error)
    }
}

/// A referenced file or blob attached to a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    pub name: String,
    pub content_type: String,
    pub size: u64,
    pub sha256: String,
}

/// A message and its full lifecycle state, per `spec.md` §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub from: String,
    pub to: String,
    pub conversation_id: String,
    pub request_id: String,
    pub in_reply_to: Option<String>,
    pub body: String,
    pub meta: serde_json::Value,
    pub attachments: Vec<Attachment>,
    pub state: MessageState,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub last_progress_at: Option<DateTime<Utc>>,
    pub ttl_expires_at: Option<DateTime<Utc>>,
    pub grace_until: Option<DateTime<Utc>>,
    pub queued_for_agent: bool,
    /// Set when a sweep or event transition drives the message to a terminal
    /// or error state; surfaced on `state_change` observe events.
    pub last_transition_reason: Option<String>,
}

/// A materialized per-agent delivery record, per `spec.md` §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxEvent {
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

/// One agent's inbox: a trimmable queue plus the count already trimmed from
/// its head, so cursors stay absolute even after a head-trim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Inbox {
    pub base: u64,
    pub events: Vec<InboxEvent>,
}

impl Inbox {
    /// The absolute index one past the last surviving event.
    pub fn end(&self) -> u64 {
        self.base + self.events.len() as u64
    }

    /// Append an event, head-trimming down to `max_events` if needed.
    pub fn push(&mut self, event: InboxEvent, max_events: usize) {
        self.events.push(event);
        if self.events.len() > max_events {
            let overflow = self.events.len() - max_events;
            self.events.drain(0..overflow);
            self.base += overflow as u64;
        }
    }

    /// Return the slice of events at or after the given absolute cursor,
    /// clamped into `[base, end]`, plus the clamped cursor used.
    pub fn slice_from(&self, cursor: u64) -> (&[InboxEvent], u64) {
        let end = self.end();
        let clamped = cursor.clamp(self.base, end);
        if clamped >= end {
            return (&[], end);
        }
        let offset = (clamped - self.base) as usize;
        (&self.events[offset..], end)
    }
}

/// `(from, to, request_id)` deduplication key, lexically concatenated with a
/// unit-separator so composite lookups are single-key hash-map lookups.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn new(from: &str, to: &str, request_id: &str) -> Self {
        Self(format!("{from}\u{1f}{to}\u{1f}{request_id}"))
    }

    /// Reconstruct a key from its already-joined raw form, as read back from
    /// a persisted snapshot.
    pub fn from_raw(raw: String) -> Self {
        Self(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The resolved message and insertion time for a dedup key.
#[derive(Debug, Clone)]
pub struct IdempotencyEntry {
    pub message_id: String,
    pub created_at: DateTime<Utc>,
}

/// A globally ordered, broker-emitted audit record, per `spec.md` §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObserveEvent {
    pub id: u64,
    #[serde(rename = "type")]
    pub event_type: String,
    pub at: DateTime<Utc>,
    pub data: serde_json::Value,
    pub conversation_id: Option<String>,
    pub agent_ids: Vec<String>,
}
