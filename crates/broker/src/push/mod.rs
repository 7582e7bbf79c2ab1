// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Push dispatcher: schedules out-of-lock deliveries to push-mode agents'
//! callback URLs with bounded retry and exponential backoff, per
//! `spec.md` §4.6.
//!
//! The retry loop's spawn-and-select shape is grounded on the reference's
//! `upstream::health::spawn_health_checker`, adapted to run once per
//! delivery rather than on a repeating interval.

mod client;

pub use client::PushClient;

use std::sync::Arc;
use std::time::Duration;

use crate::broker::Broker;
use crate::state::PushJob;

#[derive(Clone)]
pub struct PushDispatcher {
    client: PushClient,
    max_attempts: u32,
    base_backoff: Duration,
}

impl PushDispatcher {
    pub fn new(max_attempts: u32, base_backoff: Duration) -> Self {
        Self { client: PushClient::new(), max_attempts, base_backoff }
    }

    /// Spawn the bounded retry loop for one delivery. Runs to completion
    /// independent of client disconnects, per `spec.md` §5.
    pub fn schedule(&self, broker: Arc<Broker>, job: PushJob) {
        let client = self.client.clone();
        let max_attempts = self.max_attempts.max(1);
        let base_backoff = self.base_backoff;
        tokio::spawn(async move {
            let mut backoff = base_backoff;
            let mut success = false;
            for attempt in 1..=max_attempts {
                match client.deliver(&job).await {
                    Ok(()) => {
                        success = true;
                        break;
                    }
                    Err(err) => {
                        tracing::warn!(
                            message_id = %job.message_id,
                            attempt,
                            error = %err,
                            "push delivery attempt failed"
                        );
                        if attempt < max_attempts {
                            tokio::select! {
                                _ = tokio::time::sleep(backoff) => {}
                                _ = broker.shutdown.cancelled() => break,
                            }
                            backoff *= 2;
                        }
                    }
                }
            }
            broker.record_push_result(success).await;
        });
    }
}
