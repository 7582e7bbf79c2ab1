// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP client for delivering a single push-mode callback.
//!
//! Grounded on the reference's `UpstreamClient`: a thin `reqwest::Client`
//! wrapper with a fixed timeout and one method per call shape needed.

use reqwest::Client;

use crate::state::PushJob;

/// Thin wrapper around `reqwest` for callback delivery.
#[derive(Clone)]
pub struct PushClient {
    client: Client,
}

impl PushClient {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// POST the job payload, per `spec.md` §4.6. Success is any 2xx.
    pub async fn deliver(&self, job: &PushJob) -> anyhow::Result<()> {
        let payload = serde_json::json!({
            "message_id": job.message_id,
            "type": job.message_type,
            "from": job.from,
            "conversation_id": job.conversation_id,
            "body": job.body,
            "meta": job.meta,
            "attachments": job.attachments,
            "created_at": job.created_at,
        });
        self.client.post(&job.callback_url).json(&payload).send().await?.error_for_status()?;
        Ok(())
    }
}

impl Default for PushClient {
    fn default() -> Self {
        Self::new()
    }
}
