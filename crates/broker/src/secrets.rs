// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-agent shared-secret registry and the optional allowlists that gate
//! registration and injection.
//!
//! Per `spec.md` §9 design notes, this is one explicit "security context"
//! value threaded through the HTTP layer, not a process-wide singleton.

use std::collections::HashSet;

use tokio::sync::RwLock;

/// Secrets keyed by trimmed agent id, populated at registration time and
/// consulted on every signed call.
#[derive(Default)]
pub struct SecretRegistry {
    secrets: RwLock<std::collections::HashMap<String, String>>,
}

impl SecretRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, agent_id: &str, secret: String) {
        self.secrets.write().await.insert(agent_id.to_owned(), secret);
    }

    pub async fn get(&self, agent_id: &str) -> Option<String> {
        self.secrets.read().await.get(agent_id).cloned()
    }
}

/// An optional allowlist; an empty list means unrestricted, matching
/// `spec.md` §6's `AGENT_ALLOWLIST`/`HUMAN_ALLOWLIST` semantics.
#[derive(Debug, Clone, Default)]
pub struct Allowlist {
    entries: HashSet<String>,
}

impl Allowlist {
    pub fn from_entries<I: IntoIterator<Item = String>>(entries: I) -> Self {
        Self { entries: entries.into_iter().map(|e| e.trim().to_owned()).filter(|e| !e.is_empty()).collect() }
    }

    pub fn allows(&self, id: &str) -> bool {
        self.entries.is_empty() || self.entries.contains(id.trim())
    }
}

/// The security context threaded through the HTTP layer: secrets plus both
/// allowlists, built once at process start from configuration.
pub struct SecurityContext {
    pub secrets: SecretRegistry,
    pub agent_allowlist: Allowlist,
    pub human_allowlist: Allowlist,
}

impl SecurityContext {
    pub fn new(agent_allowlist: Vec<String>, human_allowlist: Vec<String>) -> Self {
        Self {
            secrets: SecretRegistry::new(),
            agent_allowlist: Allowlist::from_entries(agent_allowlist),
            human_allowlist: Allowlist::from_entries(human_allowlist),
        }
    }
}
