// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Write-through persistence adapter, per `spec.md` §4.2.
//!
//! Two interchangeable implementations wrap the broker core rather than
//! replace it: a snapshot-file backend and a relational (`sqlx`) backend.
//! A third, no-op `MemoryStore`, backs `STORE_BACKEND=memory` and tests.

mod relational;
mod snapshot;

pub use relational::RelationalStore;
pub use snapshot::SnapshotStore;

use async_trait::async_trait;

use crate::state::Snapshot;

/// Adapter between the broker core and durable storage.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Load a snapshot on startup. `Ok(None)` means no prior state — this is
    /// non-fatal. A corrupt snapshot is a hard startup error.
    async fn load(&self) -> anyhow::Result<Option<Snapshot>>;

    /// Write the full broker state through. Read-only callers may treat a
    /// failure as best-effort (see `spec.md` §9's open question on
    /// `ListAgents`/`Health`); mutating callers must surface it.
    async fn save(&self, snapshot: &Snapshot) -> anyhow::Result<()>;
}

/// No-op backend: never persists, always loads empty. Used for
/// `STORE_BACKEND=memory` and as the default in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryStore;

#[async_trait]
impl Persistence for MemoryStore {
    async fn load(&self) -> anyhow::Result<Option<Snapshot>> {
        Ok(None)
    }

    async fn save(&self, _snapshot: &Snapshot) -> anyhow::Result<()> {
        Ok(())
    }
}
