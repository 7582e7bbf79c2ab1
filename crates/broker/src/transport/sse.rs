// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `GET /v1/observe` — the audit-log SSE stream, per `spec.md` §4.5.
//!
//! No reference analog: the mux's dashboard feed is a live broadcast
//! (`events.rs`'s `Aggregator`), but this endpoint fans out the same
//! polling cursor the JSON `/v1/inbox` endpoint uses, just framed as
//! `text/event-stream` instead of re-polled JSON.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::http::HeaderMap;
use futures_util::stream::{self, Stream};
use serde::Deserialize;

use crate::broker::Broker;
use crate::model::ObserveEvent;

const WAIT_PER_POLL: Duration = Duration::from_secs(20);

#[derive(Debug, Deserialize)]
pub struct ObserveQuery {
    #[serde(default)]
    pub cursor: Option<i64>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
}

fn resume_cursor(query: &ObserveQuery, headers: &HeaderMap) -> i64 {
    if let Some(cursor) = query.cursor {
        return cursor.max(0);
    }
    headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok())
        .map(|v| v.max(0))
        .unwrap_or(0)
}

pub async fn observe(
    State(broker): State<Arc<Broker>>,
    headers: HeaderMap,
    Query(query): Query<ObserveQuery>,
) -> impl IntoResponse {
    let start_cursor = resume_cursor(&query, &headers);
    let conversation_id = query.conversation_id;
    let agent_id = query.agent_id;

    let state = (broker, start_cursor, conversation_id, agent_id, VecDeque::<ObserveEvent>::new());
    let events: std::pin::Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>> = Box::pin(stream::unfold(
        state,
        |(broker, cursor, conversation_id, agent_id, mut pending)| async move {
            if pending.is_empty() {
                let (events, next_cursor) =
                    broker.poll_observe(cursor, conversation_id.as_deref(), agent_id.as_deref(), WAIT_PER_POLL).await;
                if events.is_empty() {
                    let frame = Event::default().comment("keep-alive");
                    return Some((Ok(frame), (broker, next_cursor as i64, conversation_id, agent_id, pending)));
                }
                pending.extend(events);
            }
            // One SSE frame per observe record, per `spec.md` §4.5.
            let record = match pending.pop_front() {
                Some(record) => record,
                None => {
                    let frame = Event::default().comment("keep-alive");
                    return Some((Ok(frame), (broker, cursor, conversation_id, agent_id, pending)));
                }
            };
            let next_cursor = record.id as i64;
            let frame = Event::default()
                .id(record.id.to_string())
                .event(record.event_type.as_str())
                .json_data(&record.data)
                .unwrap_or_else(|_| Event::default().comment("encode-error"));
            Some((Ok(frame), (broker, next_cursor, conversation_id, agent_id, pending)))
        },
    ));

    Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("keep-alive"))
}
