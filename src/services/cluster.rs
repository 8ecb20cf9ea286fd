//! Registration and health checking against the head node.
//!
//! While INITIALIZING the node registers itself; afterwards it polls the
//! head node's `/nodestate`, refreshes the SN/DN url tables, and follows the
//! cluster in and out of READY. The reconciliation loop holds off until the
//! node reaches READY.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError};

use serde_json::{Value, json};
use tracing::{error, info, warn};

use crate::models::node::NodeState;
use crate::services::engine::Engine;

/// Periodic cluster task; never returns.
pub async fn health_check(engine: Arc<Engine>, http: reqwest::Client) {
    info!("health check start");
    let sleep_secs = engine.config.node_sleep_time;
    loop {
        if engine.node_state() == NodeState::Initializing {
            register(&engine, &http).await;
        } else {
            check_node_state(&engine, &http).await;
        }
        info!("health check sleep: {}", sleep_secs);
        tokio::time::sleep(std::time::Duration::from_secs(sleep_secs)).await;
    }
}

/// Register with the head node. Idempotent; safe to repeat if the head node
/// seems to have forgotten us.
async fn register(engine: &Engine, http: &reqwest::Client) {
    let req = format!("{}/register", engine.config.head_url());
    let body = {
        let node = engine
            .node
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        json!({"id": node.id, "port": engine.config.an_port, "node_type": "an"})
    };
    info!("register req: {} body: {}", req, body);

    let rsp = match http.post(&req).json(&body).send().await {
        Ok(rsp) => rsp,
        Err(err) => {
            error!("failed to register: {}", err);
            return;
        }
    };
    let rsp_json: Value = match rsp.json().await {
        Ok(json) => json,
        Err(err) => {
            error!("failed to parse register response: {}", err);
            return;
        }
    };
    info!("register response: {}", rsp_json);

    let mut node = engine
        .node
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    if let Some(n) = rsp_json.get("node_number").and_then(Value::as_i64) {
        node.node_number = n;
    }
    if let Some(n) = rsp_json.get("node_count").and_then(Value::as_i64) {
        node.node_count = n;
    }
    info!("setting node_state to WAITING");
    node.state = NodeState::Waiting; // wait for other nodes to be active
}

/// Verify vitals with the head node and refresh the SN/DN url tables.
async fn check_node_state(engine: &Engine, http: &reqwest::Client) {
    let req = format!("{}/nodestate", engine.config.head_url());
    info!("health check req {}", req);

    let rsp_json: Value = match http.get(&req).send().await {
        Ok(rsp) => match rsp.json().await {
            Ok(json) => json,
            Err(err) => {
                warn!("invalid health check response: {}", err);
                return;
            }
        },
        Err(err) => {
            warn!("health check request failed: {}", err);
            return;
        }
    };

    let Some(nodes) = rsp_json.get("nodes").and_then(Value::as_array) else {
        warn!("invalid health check response: no nodes table");
        return;
    };

    let (own_id, own_number) = {
        let node = engine
            .node
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        (node.id.clone(), node.node_number)
    };

    let mut sn_urls = BTreeMap::new();
    let mut dn_urls = BTreeMap::new();
    let mut reregister = false;
    for entry in nodes {
        let node_type = entry.get("node_type").and_then(Value::as_str).unwrap_or("");
        let node_number = entry
            .get("node_number")
            .and_then(Value::as_i64)
            .unwrap_or(-1);
        if node_type == "an" && node_number == own_number {
            // this should be this node
            let head_id = entry.get("id").and_then(Value::as_str).unwrap_or("");
            if head_id != own_id {
                warn!(
                    "mis-matched node ids, app: {} vs head: {} - re-initializing",
                    own_id, head_id
                );
                reregister = true;
            }
        }
        let Some(host) = entry.get("host").and_then(Value::as_str) else {
            continue; // not online
        };
        let port = entry.get("port").and_then(Value::as_i64).unwrap_or(0);
        let url = format!("http://{}:{}", host, port);
        match node_type {
            "dn" => {
                dn_urls.insert(node_number, url);
            }
            "sn" => {
                sn_urls.insert(node_number, url);
            }
            _ => {}
        }
    }

    let cluster_state = rsp_json
        .get("cluster_state")
        .and_then(Value::as_str)
        .unwrap_or("");
    info!("cluster_state: {}", cluster_state);

    let mut node = engine
        .node
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    node.sn_urls = sn_urls;
    node.dn_urls = dn_urls;
    if reregister {
        node.state = NodeState::Initializing;
    } else if node.state == NodeState::Waiting && cluster_state == "READY" {
        info!("setting node_state to READY");
        node.state = NodeState::Ready;
    } else if node.state == NodeState::Ready && cluster_state != "READY" {
        info!("setting node_state to WAITING");
        node.state = NodeState::Waiting;
    }
}
