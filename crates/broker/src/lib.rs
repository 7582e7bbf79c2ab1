// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent message bus: an HTTP broker routing request/response/inform
//! messages between registered agents, per `spec.md`.

pub mod broker;
pub mod clock;
pub mod config;
pub mod error;
pub mod model;
pub mod persistence;
pub mod push;
pub mod secrets;
pub mod state;
pub mod transport;

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use crate::broker::Broker;
use crate::clock::system_clock;
use crate::config::{BrokerConfig, StoreBackend};
use crate::persistence::{MemoryStore, Persistence, RelationalStore, SnapshotStore};
use crate::transport::build_router;

async fn build_persistence(config: &BrokerConfig) -> anyhow::Result<Arc<dyn Persistence>> {
    match config.store_backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore)),
        StoreBackend::Persistent => {
            let path = config
                .state_file
                .clone()
                .context("STATE_FILE is required when STORE_BACKEND=persistent")?;
            Ok(Arc::new(SnapshotStore::new(path)))
        }
        StoreBackend::Relational => {
            let path = config
                .state_file
                .clone()
                .context("STATE_FILE is required when STORE_BACKEND=relational")?;
            let url = format!("sqlite://{}?mode=rwc", path.display());
            Ok(Arc::new(RelationalStore::connect(&url).await?))
        }
    }
}

/// Run the broker until shutdown (Ctrl-C or SIGTERM).
pub async fn run(config: BrokerConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();

    let persistence = build_persistence(&config).await?;
    let broker = Broker::new(config, system_clock(), persistence, shutdown.clone()).await?;

    tracing::info!("agent message bus listening on {addr}");
    let router = build_router(Arc::clone(&broker));
    let listener = TcpListener::bind(&addr).await.context("binding listener")?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .context("serving bus API")?;

    Ok(())
}

async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to install SIGTERM handler, falling back to ctrl-c only");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    token.cancel();
}
