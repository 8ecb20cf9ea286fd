//! Node status handlers.
//!
//! - GET /      -> node identity and state
//! - GET /info  -> same body

use std::sync::{Arc, PoisonError};

use axum::{Json, extract::State};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::services::engine::Engine;

#[derive(Serialize)]
pub struct NodeInfoResponse {
    id: String,
    node_type: &'static str,
    start_time: String,
    up_time: i64,
    node_state: &'static str,
    node_number: i64,
    node_count: i64,
}

/// `GET /` and `GET /info`
pub async fn info(State(engine): State<Arc<Engine>>) -> Json<NodeInfoResponse> {
    let node = engine
        .node
        .read()
        .unwrap_or_else(PoisonError::into_inner);
    Json(NodeInfoResponse {
        id: node.id.clone(),
        node_type: "an",
        start_time: unix_time_to_utc(node.start_time),
        up_time: Utc::now().timestamp() - node.start_time,
        node_state: node.state.as_str(),
        node_number: node.node_number,
        node_count: node.node_count,
    })
}

fn unix_time_to_utc(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_default()
}
