// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The async-facing broker API: locks `Inner`, mutates, persists, and
//! schedules push deliveries outside the lock. Per `spec.md` §5, the broker
//! has one mutex serialising all state mutations and reads; long-poll
//! readers acquire, sweep, try to fulfil, release, sleep, and retry.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::clock::SharedClock;
use crate::config::BrokerConfig;
use crate::error::{BusError, BusResult};
use crate::model::{InboxEvent, ObserveEvent};
use crate::persistence::Persistence;
use crate::push::PushDispatcher;
use crate::secrets::SecurityContext;
use crate::state::{
    AckStatus, Inner, PostEventKind, PushJob, RegisterOutcome, RegisterRequest, SendOutcome, SendRequest,
};

/// Shared broker state: the locked core plus its ambient collaborators.
pub struct Broker {
    inner: Mutex<Inner>,
    pub config: BrokerConfig,
    pub clock: SharedClock,
    pub security: SecurityContext,
    persistence: Arc<dyn Persistence>,
    push: PushDispatcher,
    pub shutdown: CancellationToken,
}

impl Broker {
    pub async fn new(
        config: BrokerConfig,
        clock: SharedClock,
        persistence: Arc<dyn Persistence>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<Arc<Self>> {
        let inner = match persistence.load().await? {
            Some(snapshot) => Inner::restore(snapshot),
            None => Inner::new(),
        };
        let security = SecurityContext::new(config.agent_allowlist.clone(), config.human_allowlist.clone());
        let push = PushDispatcher::new(config.push_max_attempts, config.push_base_backoff());
        Ok(Arc::new(Self {
            inner: Mutex::new(inner),
            config,
            clock,
            security,
            persistence,
            push,
            shutdown,
        }))
    }

    async fn persist_best_effort(&self, inner: &Inner) {
        if let Err(err) = self.persistence.save(&inner.snapshot()).await {
            tracing::warn!(error = %err, "best-effort persist failed");
        }
    }

    async fn persist_or_fail(&self, inner: &Inner) -> BusResult<()> {
        self.persistence
            .save(&inner.snapshot())
            .await
            .map_err(|err| BusError::internal(format!("persistence write failed: {err}")))
    }

    async fn dispatch(self: &Arc<Self>, jobs: Vec<PushJob>) {
        for job in jobs {
            self.push.schedule(Arc::clone(self), job);
        }
    }

    pub(crate) async fn record_push_result(&self, success: bool) {
        let mut inner = self.inner.lock().await;
        if success {
            inner.push_successes += 1;
        } else {
            inner.push_failures += 1;
        }
        self.persist_best_effort(&inner).await;
    }

    pub async fn register(self: &Arc<Self>, req: RegisterRequest) -> BusResult<RegisterOutcome> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        inner.sweep(now, &self.config);
        let outcome = inner.register_agent(req, now, &self.config)?;
        self.persist_or_fail(&inner).await?;
        Ok(outcome)
    }

    pub async fn send(self: &Arc<Self>, req: SendRequest) -> BusResult<SendOutcome> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        inner.sweep(now, &self.config);
        let (outcome, jobs) = inner.send_message(req, now, &self.config)?;
        self.persist_or_fail(&inner).await?;
        drop(inner);
        self.dispatch(jobs).await;
        Ok(outcome)
    }

    pub async fn ack(self: &Arc<Self>, agent_id: &str, message_id: &str, status: AckStatus) -> BusResult<()> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        inner.sweep(now, &self.config);
        inner.ack(agent_id, message_id, status, now)?;
        self.persist_or_fail(&inner).await?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn post_event(
        self: &Arc<Self>,
        actor: &str,
        message_id: &str,
        kind: PostEventKind,
        body: String,
        meta: serde_json::Value,
    ) -> BusResult<()> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        inner.sweep(now, &self.config);
        inner.post_event(actor, message_id, kind, body, meta, now, &self.config)?;
        self.persist_or_fail(&inner).await?;
        Ok(())
    }

    pub async fn inject(
        self: &Arc<Self>,
        identity: &str,
        to: Option<String>,
        body: String,
        meta: Option<serde_json::Value>,
        conversation_id: Option<String>,
    ) -> BusResult<SendOutcome> {
        if !self.security.human_allowlist.allows(identity) {
            return Err(BusError::unauthorized("identity is not on the human allowlist"));
        }
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        inner.sweep(now, &self.config);
        let (outcome, jobs) = inner.inject(identity, to, body, meta, conversation_id, now, &self.config)?;
        self.persist_or_fail(&inner).await?;
        drop(inner);
        self.dispatch(jobs).await;
        Ok(outcome)
    }

    pub async fn list_agents(&self, capability: Option<&str>) -> Vec<crate::model::Agent> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        inner.sweep(now, &self.config);
        let agents = inner.list_agents(capability);
        self.persist_best_effort(&inner).await;
        agents
    }

    pub async fn list_conversations(&self) -> Vec<crate::model::Conversation> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        inner.sweep(now, &self.config);
        inner.list_conversations()
    }

    pub async fn create_conversation(
        self: &Arc<Self>,
        conversation_id: Option<String>,
        title: Option<String>,
        participants: Vec<String>,
        meta: serde_json::Value,
    ) -> BusResult<crate::model::Conversation> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        inner.sweep(now, &self.config);
        let conversation = inner.create_conversation(conversation_id, title, participants, meta, now)?;
        self.persist_or_fail(&inner).await?;
        Ok(conversation)
    }

    pub async fn conversation_messages(
        &self,
        conversation_id: &str,
        cursor: usize,
        limit: usize,
    ) -> BusResult<Vec<crate::model::Message>> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        inner.sweep(now, &self.config);
        inner.conversation_messages(conversation_id, cursor, limit)
    }

    pub async fn health(&self) -> serde_json::Value {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        inner.sweep(now, &self.config);
        let health = inner.health();
        self.persist_best_effort(&inner).await;
        health
    }

    /// Long-poll inbox read, per `spec.md` §4.1.7. Sleeps outside the lock
    /// between empty scans.
    pub async fn poll_inbox(
        &self,
        agent_id: &str,
        cursor: u64,
        wait: std::time::Duration,
    ) -> BusResult<(Vec<InboxEvent>, u64)> {
        let wait = wait.min(self.config.inbox_wait_max());
        let deadline = Instant::now() + wait;
        loop {
            let now = self.clock.now();
            let mut inner = self.inner.lock().await;
            inner.sweep(now, &self.config);
            let (events, next) = inner.inbox_slice(agent_id, cursor)?;
            drop(inner);
            if !events.is_empty() || Instant::now() >= deadline {
                return Ok((events, next));
            }
            tokio::select! {
                _ = tokio::time::sleep(self.config.inbox_poll_interval()) => {}
                _ = self.shutdown.cancelled() => return Ok((Vec::new(), cursor)),
            }
        }
    }

    /// Long-poll observe read, per `spec.md` §4.1.8.
    pub async fn poll_observe(
        &self,
        after_id: i64,
        conversation_id: Option<&str>,
        agent_id: Option<&str>,
        wait: std::time::Duration,
    ) -> (Vec<ObserveEvent>, u64) {
        let wait = wait.min(self.config.inbox_wait_max());
        let deadline = Instant::now() + wait;
        loop {
            let now = self.clock.now();
            let mut inner = self.inner.lock().await;
            inner.sweep(now, &self.config);
            let (events, last_id) = inner.observe_slice(after_id, conversation_id, agent_id);
            drop(inner);
            if !events.is_empty() || Instant::now() >= deadline {
                return (events, last_id);
            }
            tokio::select! {
                _ = tokio::time::sleep(self.config.observe_poll_interval()) => {}
                _ = self.shutdown.cancelled() => return (Vec::new(), after_id.max(0) as u64),
            }
        }
    }
}
