// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP transport for the agent message bus.

pub mod auth;
pub mod http;
pub mod sse;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::broker::Broker;

/// Build the axum `Router` with all bus routes, per `spec.md` §4.4.
pub fn build_router(broker: Arc<Broker>) -> Router {
    Router::new()
        .route("/v1/agents/register", post(http::register_agent))
        .route("/v1/agents", get(http::list_agents))
        .route("/v1/messages", post(http::send_message))
        .route("/v1/acks", post(http::ack))
        .route("/v1/events", post(http::post_event))
        .route("/v1/inbox", get(http::poll_inbox))
        .route("/v1/conversations", get(http::list_conversations).post(http::create_conversation))
        .route("/v1/conversations/{id}/messages", get(http::conversation_messages))
        .route("/v1/inject", post(http::inject))
        .route("/v1/observe", get(sse::observe))
        .route("/v1/health", get(http::health))
        .route("/v1/system/status", get(http::system_status))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(broker)
}
