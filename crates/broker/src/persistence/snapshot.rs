// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Snapshot-file persistence backend.
//!
//! Grounded on the reference's `credential::persist::{load,save}` atomic
//! write pattern, extended with an explicit `fsync` on the temp file before
//! rename per `spec.md` §4.2's durability requirement.

use std::io::Write as _;
use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::Mutex;

use super::Persistence;
use crate::state::Snapshot;

/// File-backed snapshot store. Serializes every write through its own lock so
/// two concurrent saves never race on the same `rename`.
pub struct SnapshotStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl SnapshotStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path, write_lock: Mutex::new(()) }
    }
}

#[async_trait]
impl Persistence for SnapshotStore {
    async fn load(&self) -> anyhow::Result<Option<Snapshot>> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || load_blocking(&path))
            .await
            .context("snapshot load task panicked")?
    }

    async fn save(&self, snapshot: &Snapshot) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.path.clone();
        let json = serde_json::to_vec_pretty(snapshot).context("serializing snapshot")?;
        tokio::task::spawn_blocking(move || save_blocking(&path, &json))
            .await
            .context("snapshot save task panicked")?
    }
}

fn load_blocking(path: &std::path::Path) -> anyhow::Result<Option<Snapshot>> {
    let contents = match std::fs::read(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).context("reading snapshot file"),
    };
    let snapshot: Snapshot =
        serde_json::from_slice(&contents).context("snapshot file is corrupt, refusing to start")?;
    Ok(Some(snapshot))
}

fn save_blocking(path: &std::path::Path, json: &[u8]) -> anyhow::Result<()> {
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = std::fs::File::create(&tmp_path).context("creating snapshot temp file")?;
        file.write_all(json).context("writing snapshot temp file")?;
        file.sync_all().context("fsyncing snapshot temp file")?;
    }
    std::fs::rename(&tmp_path, path).context("renaming snapshot temp file into place")?;
    Ok(())
}
