// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Relational persistence backend (`sqlx` against SQLite).
//!
//! Grounded on `mqk-db`'s `PgPoolOptions`/`sqlx::query`/`sqlx::query_as` idiom,
//! adapted to SQLite so the broker stays a single-node process per
//! `spec.md` §1's non-goals. Tables: `agents`, `conversations`, `messages`,
//! `conversation_messages`, `counters`. Inboxes, observe events, and
//! idempotency are intentionally not persisted here — see `spec.md` §4.2 and
//! §9's open question on the asymmetry between backends.

use anyhow::Context;
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

use super::Persistence;
use crate::model::{Agent, AgentStatus, Conversation, DeliveryMode, Message, MessageState, MessageType};
use crate::state::Snapshot;

pub struct RelationalStore {
    pool: SqlitePool,
}

impl RelationalStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("failed to connect to relational store")?;
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            create table if not exists agents (
                agent_id text primary key,
                capabilities text not null,
                description text not null,
                mode text not null,
                callback_url text,
                status text not null,
                registered_at text not null,
                expires_at text not null,
                ttl_secs integer not null
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("creating agents table")?;

        sqlx::query(
            r#"
            create table if not exists conversations (
                conversation_id text primary key,
                title text,
                participants text not null,
                status text not null,
                message_count integer not null,
                created_at text not null,
                last_message_at text not null,
                meta text not null
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("creating conversations table")?;

        sqlx::query(
            r#"
            create table if not exists messages (
                message_id text primary key,
                type text not null,
                "from" text not null,
                "to" text not null,
                conversation_id text not null,
                request_id text not null,
                in_reply_to text,
                body text not null,
                meta text not null,
                attachments text not null,
                state text not null,
                created_at text not null,
                delivered_at text,
                last_progress_at text,
                ttl_expires_at text,
                grace_until text,
                queued_for_agent integer not null,
                last_transition_reason text
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("creating messages table")?;

        sqlx::query(
            r#"
            create table if not exists conversation_messages (
                conversation_id text not null,
                message_id text not null,
                position integer not null,
                primary key (conversation_id, position)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("creating conversation_messages table")?;

        sqlx::query(
            r#"
            create table if not exists counters (
                name text primary key,
                value integer not null
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("creating counters table")?;

        Ok(())
    }
}

#[async_trait]
impl Persistence for RelationalStore {
    async fn load(&self) -> anyhow::Result<Option<Snapshot>> {
        let agent_rows = sqlx::query("select * from agents").fetch_all(&self.pool).await.context("loading agents")?;
        let mut agents = Vec::new();
        for row in agent_rows {
            let capabilities: String = row.try_get("capabilities")?;
            let mode: String = row.try_get("mode")?;
            let status: String = row.try_get("status")?;
            agents.push(Agent {
                agent_id: row.try_get("agent_id")?,
                capabilities: serde_json::from_str(&capabilities).unwrap_or_default(),
                description: row.try_get("description")?,
                mode: if mode == "push" { DeliveryMode::Push } else { DeliveryMode::Pull },
                callback_url: row.try_get("callback_url")?,
                status: if status == "active" { AgentStatus::Active } else { AgentStatus::Expired },
                registered_at: parse_ts(row.try_get("registered_at")?),
                expires_at: parse_ts(row.try_get("expires_at")?),
                ttl_secs: row.try_get::<i64, _>("ttl_secs")? as u64,
            });
        }
        if agents.is_empty() {
            let row_count: i64 =
                sqlx::query_scalar("select count(*) from conversations").fetch_one(&self.pool).await.unwrap_or(0);
            if row_count == 0 {
                return Ok(None);
            }
        }

        let conversation_rows =
            sqlx::query("select * from conversations").fetch_all(&self.pool).await.context("loading conversations")?;
        let mut conversations = Vec::new();
        let mut conversation_messages = std::collections::HashMap::new();
        for row in conversation_rows {
            let conversation_id: String = row.try_get("conversation_id")?;
            let participants: String = row.try_get("participants")?;
            let meta: String = row.try_get("meta")?;
            let message_rows = sqlx::query(
                "select message_id from conversation_messages where conversation_id = ? order by position",
            )
            .bind(&conversation_id)
            .fetch_all(&self.pool)
            .await
            .context("loading conversation_messages")?;
            let message_ids: Vec<String> =
                message_rows.iter().map(|r| r.get::<String, _>("message_id")).collect();
            conversation_messages.insert(conversation_id.clone(), message_ids.clone());
            conversations.push(Conversation {
                conversation_id,
                title: row.try_get("title")?,
                participants: serde_json::from_str(&participants).unwrap_or_default(),
                status: row.try_get("status")?,
                message_count: row.try_get::<i64, _>("message_count")? as u64,
                created_at: parse_ts(row.try_get("created_at")?),
                last_message_at: parse_ts(row.try_get("last_message_at")?),
                meta: serde_json::from_str(&meta).unwrap_or(serde_json::Value::Null),
                message_ids,
            });
        }

        let message_rows =
            sqlx::query("select * from messages").fetch_all(&self.pool).await.context("loading messages")?;
        let mut messages = Vec::new();
        for row in message_rows {
            let message_type: String = row.try_get("type")?;
            let state: String = row.try_get("state")?;
            let meta: String = row.try_get("meta")?;
            let attachments: String = row.try_get("attachments")?;
            messages.push(Message {
                message_id: row.try_get("message_id")?,
                message_type: parse_message_type(&message_type),
                from: row.try_get("from")?,
                to: row.try_get("to")?,
                conversation_id: row.try_get("conversation_id")?,
                request_id: row.try_get("request_id")?,
                in_reply_to: row.try_get("in_reply_to")?,
                body: row.try_get("body")?,
                meta: serde_json::from_str(&meta).unwrap_or(serde_json::Value::Null),
                attachments: serde_json::from_str(&attachments).unwrap_or_default(),
                state: parse_message_state(&state),
                created_at: parse_ts(row.try_get("created_at")?),
                delivered_at: row.try_get::<Option<String>, _>("delivered_at")?.map(parse_ts),
                last_progress_at: row.try_get::<Option<String>, _>("last_progress_at")?.map(parse_ts),
                ttl_expires_at: row.try_get::<Option<String>, _>("ttl_expires_at")?.map(parse_ts),
                grace_until: row.try_get::<Option<String>, _>("grace_until")?.map(parse_ts),
                queued_for_agent: row.try_get::<i64, _>("queued_for_agent")? != 0,
                last_transition_reason: row.try_get("last_transition_reason")?,
            });
        }

        let next_message_id = counter(&self.pool, "next_message_id").await?;
        let next_conversation_id = counter(&self.pool, "next_conversation_id").await?;
        let next_observe_id = counter(&self.pool, "next_observe_id").await?;
        let push_successes = counter(&self.pool, "push_successes").await?;
        let push_failures = counter(&self.pool, "push_failures").await?;

        Ok(Some(Snapshot {
            next_conversation_id,
            next_message_id,
            next_observe_id,
            push_failures,
            push_successes,
            agents,
            conversations,
            messages,
            conversation_messages,
            inboxes: Default::default(),
            observe_events: Vec::new(),
            idempotency: Vec::new(),
        }))
    }

    async fn save(&self, snapshot: &Snapshot) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await.context("beginning relational write-through")?;

        sqlx::query("delete from agents").execute(&mut *tx).await?;
        for agent in &snapshot.agents {
            sqlx::query(
                "insert into agents (agent_id, capabilities, description, mode, callback_url, status, registered_at, expires_at, ttl_secs) values (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&agent.agent_id)
            .bind(serde_json::to_string(&agent.capabilities).unwrap_or_else(|_| "[]".to_owned()))
            .bind(&agent.description)
            .bind(if agent.mode == DeliveryMode::Push { "push" } else { "pull" })
            .bind(&agent.callback_url)
            .bind(if agent.status == AgentStatus::Active { "active" } else { "expired" })
            .bind(agent.registered_at.to_rfc3339())
            .bind(agent.expires_at.to_rfc3339())
            .bind(agent.ttl_secs as i64)
            .execute(&mut *tx)
            .await
            .context("upserting agent")?;
        }

        sqlx::query("delete from conversations").execute(&mut *tx).await?;
        sqlx::query("delete from conversation_messages").execute(&mut *tx).await?;
        for conversation in &snapshot.conversations {
            sqlx::query(
                "insert into conversations (conversation_id, title, participants, status, message_count, created_at, last_message_at, meta) values (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&conversation.conversation_id)
            .bind(&conversation.title)
            .bind(serde_json::to_string(&conversation.participants).unwrap_or_else(|_| "[]".to_owned()))
            .bind(&conversation.status)
            .bind(conversation.message_count as i64)
            .bind(conversation.created_at.to_rfc3339())
            .bind(conversation.last_message_at.to_rfc3339())
            .bind(conversation.meta.to_string())
            .execute(&mut *tx)
            .await
            .context("upserting conversation")?;

            for (position, message_id) in conversation.message_ids.iter().enumerate() {
                sqlx::query(
                    "insert into conversation_messages (conversation_id, message_id, position) values (?, ?, ?)",
                )
                .bind(&conversation.conversation_id)
                .bind(message_id)
                .bind(position as i64)
                .execute(&mut *tx)
                .await
                .context("inserting conversation_message position")?;
            }
        }

        sqlx::query("delete from messages").execute(&mut *tx).await?;
        for message in &snapshot.messages {
            sqlx::query(
                r#"insert into messages (message_id, type, "from", "to", conversation_id, request_id, in_reply_to, body, meta, attachments, state, created_at, delivered_at, last_progress_at, ttl_expires_at, grace_until, queued_for_agent, last_transition_reason) values (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(&message.message_id)
            .bind(message_type_str(message.message_type))
            .bind(&message.from)
            .bind(&message.to)
            .bind(&message.conversation_id)
            .bind(&message.request_id)
            .bind(&message.in_reply_to)
            .bind(&message.body)
            .bind(message.meta.to_string())
            .bind(serde_json::to_string(&message.attachments).unwrap_or_default())
            .bind(message_state_str(message.state))
            .bind(message.created_at.to_rfc3339())
            .bind(message.delivered_at.map(|t| t.to_rfc3339()))
            .bind(message.last_progress_at.map(|t| t.to_rfc3339()))
            .bind(message.ttl_expires_at.map(|t| t.to_rfc3339()))
            .bind(message.grace_until.map(|t| t.to_rfc3339()))
            .bind(message.queued_for_agent as i64)
            .bind(&message.last_transition_reason)
            .execute(&mut *tx)
            .await
            .context("upserting message")?;
        }

        set_counter(&mut tx, "next_message_id", snapshot.next_message_id as i64).await?;
        set_counter(&mut tx, "next_conversation_id", snapshot.next_conversation_id as i64).await?;
        set_counter(&mut tx, "next_observe_id", snapshot.next_observe_id as i64).await?;
        set_counter(&mut tx, "push_successes", snapshot.push_successes as i64).await?;
        set_counter(&mut tx, "push_failures", snapshot.push_failures as i64).await?;

        tx.commit().await.context("committing relational write-through")?;
        Ok(())
    }
}

async fn counter(pool: &SqlitePool, name: &str) -> anyhow::Result<u64> {
    let value: Option<i64> =
        sqlx::query_scalar("select value from counters where name = ?").bind(name).fetch_optional(pool).await?;
    Ok(value.unwrap_or(0) as u64)
}

async fn set_counter(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>, name: &str, value: i64) -> anyhow::Result<()> {
    sqlx::query("insert into counters (name, value) values (?, ?) on conflict(name) do update set value = excluded.value")
        .bind(name)
        .bind(value)
        .execute(&mut **tx)
        .await
        .context("upserting counter")?;
    Ok(())
}

fn parse_ts(s: String) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::parse_from_rfc3339(&s).map(|d| d.with_timezone(&chrono::Utc)).unwrap_or_else(|_| chrono::Utc::now())
}

fn message_type_str(t: MessageType) -> &'static str {
    match t {
        MessageType::Request => "request",
        MessageType::Response => "response",
        MessageType::Inform => "inform",
    }
}

fn parse_message_type(s: &str) -> MessageType {
    match s {
        "response" => MessageType::Response,
        "inform" => MessageType::Inform,
        _ => MessageType::Request,
    }
}

fn message_state_str(s: MessageState) -> &'static str {
    match s {
        MessageState::Pending => "pending",
        MessageState::Waiting => "waiting",
        MessageState::Executing => "executing",
        MessageState::Completed => "completed",
        MessageState::Rejected => "rejected",
        MessageState::Error => "error",
    }
}

fn parse_message_state(s: &str) -> MessageState {
    match s {
        "waiting" => MessageState::Waiting,
        "executing" => MessageState::Executing,
        "completed" => MessageState::Completed,
        "rejected" => MessageState::Rejected,
        "error" => MessageState::Error,
        _ => MessageState::Pending,
    }
}
