//! Pending-queue applier.
//!
//! Data nodes notify this node about PUTs and DELETEs; the notifications sit
//! in a FIFO until the reconciliation loop drains them here, folding each one
//! into the object graph and collecting the per-domain dirty set handed to
//! the publisher afterwards.

use std::collections::{BTreeMap, HashSet};

use tracing::{error, info, warn};

use crate::models::ids::{self, IdClass};
use crate::services::engine::Engine;
use crate::services::graph::ObjectGraph;
use crate::services::sweeper;

/// Notification action reported by a data node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Put,
    Delete,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Put => "PUT",
            Action::Delete => "DELETE",
        }
    }
}

/// One queued notification.
#[derive(Debug, Clone)]
pub struct PendingItem {
    pub objid: String,
    pub action: Action,
}

/// Dirty set accumulated while draining: domain -> ids applied under it.
pub type DirtyMap = BTreeMap<String, HashSet<String>>;

/// Drain the pending queue in arrival order, applying every notification to
/// the graph and resolving each object to its domain for the dirty map.
///
/// Items are popped one at a time so handler appends interleave cleanly with
/// a long drain.
pub async fn drain(engine: &Engine, graph: &mut ObjectGraph) -> DirtyMap {
    let mut dirty = DirtyMap::new();
    while let Some(item) = engine.pop_pending() {
        info!(
            "pop from pending queue: obj: {} action: {}",
            item.objid,
            item.action.as_str()
        );
        match ids::classify(&item.objid) {
            Ok(IdClass::Domain) => match item.action {
                Action::Put => domain_create(engine, graph, &item.objid).await,
                Action::Delete => domain_delete(graph, &item.objid),
            },
            Ok(IdClass::Uuid(_) | IdClass::Chunk) => {
                // resolve before applying so deletes can still walk the
                // parent chain; retry afterwards for objects the graph
                // first learns about from this event
                let mut domain = domain_for(engine, graph, &item.objid).await;
                match item.action {
                    Action::Put => obj_update(engine, graph, &item.objid).await,
                    Action::Delete => obj_delete(engine, graph, &item.objid).await,
                }
                if domain.is_none() {
                    domain = domain_for(engine, graph, &item.objid).await;
                }
                match domain {
                    Some(domain) => {
                        dirty.entry(domain).or_default().insert(item.objid.clone());
                    }
                    None => warn!("couldn't find domain for objid: {}", item.objid),
                }
            }
            Err(_) => error!("unexpected objid in pending queue: {}", item.objid),
        }
    }
    dirty
}

/// Apply a PUT notification for a UUID or chunk id.
///
/// The object is stat-refreshed from the store; a replace keeps the mark,
/// root and chunk attachments of the old record. Finally the object is
/// linked into its owning root, materializing placeholder parents when the
/// event arrives ahead of a scan.
pub async fn obj_update(engine: &Engine, graph: &mut ObjectGraph, objid: &str) {
    info!("obj update: {}", objid);
    let Ok(key) = ids::key_of(objid) else {
        error!("got unexpected objid: {}", objid);
        return;
    };
    let stats = match engine.store.stat(&key).await {
        Ok(stats) => stats,
        Err(err) => {
            warn!("obj update - stat error for key {}: {}", key, err);
            return;
        }
    };
    if let Err(err) = graph.upsert_object(objid, &stats) {
        error!("obj update: {}", err);
        return;
    }
    match root_for(engine, objid).await {
        Some(rootid) => graph.attach_to_root(objid, &rootid),
        None => warn!("couldn't get root for update objid: {}", objid),
    }
}

/// Apply a DELETE notification for a UUID or chunk id.
///
/// Deleting a group that serves as a domain root cascades: the root's
/// members are force-swept and dependent domain records dropped.
pub async fn obj_delete(engine: &Engine, graph: &mut ObjectGraph, objid: &str) {
    info!("obj delete: {}", objid);
    graph.record_deleted(objid);
    let was_root = graph.is_root(objid);
    if graph.remove_object(objid).is_none() {
        warn!("expected to find objid in s3keys: {}", objid);
        return;
    }
    if was_root {
        info!("deleted group {} was a root, cascading", objid);
        sweeper::root_delete(engine, graph, objid).await;
    }
}

/// Apply a PUT notification for a domain.
pub async fn domain_create(engine: &Engine, graph: &mut ObjectGraph, domain: &str) {
    info!("domain create: {}", domain);
    if graph.contains_domain(domain) {
        warn!("domain {} not expected in domains", domain);
        return;
    }
    let key = &domain[1..];
    let stats = match engine.store.stat(key).await {
        Ok(stats) => stats,
        Err(err) => {
            warn!("domain create - stat error for key {}: {}", key, err);
            return;
        }
    };
    let root = match engine.store.get_json(key).await {
        Ok(json) => json
            .get("root")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        Err(err) => {
            warn!("domain create - fetch error for key {}: {}", key, err);
            return;
        }
    };
    graph.insert_domain(domain, &stats, root);
}

/// Apply a DELETE notification for a domain. No cascade: objects under the
/// root become unreachable and the next scan sweeps them, TTL permitting.
pub fn domain_delete(graph: &mut ObjectGraph, domain: &str) {
    info!("domain delete: {}", domain);
    if !graph.contains_domain(domain) {
        warn!("expected to find domain {} in collection", domain);
        return;
    }
    graph.remove_domain(domain);
}

/// Domain owning an object: the graph's parent chain first, then the
/// object's stored JSON as a fallback.
async fn domain_for(engine: &Engine, graph: &ObjectGraph, objid: &str) -> Option<String> {
    if let Some(domain) = graph.domain_of(objid) {
        return Some(domain);
    }
    let target = if ids::is_valid_chunk_id(objid) {
        ids::dataset_of(objid).ok()?
    } else {
        objid.to_string()
    };
    let key = ids::key_of(&target).ok()?;
    match engine.store.get_json(&key).await {
        Ok(json) => {
            let domain = json
                .get("domain")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            if domain.is_none() {
                warn!("expected to find domain key in object: {}", target);
            }
            domain
        }
        Err(err) => {
            warn!("got {} fetching obj: {}", err, target);
            None
        }
    }
}

/// Root group owning an object, read from its (or, for a chunk, its
/// dataset's) stored JSON.
async fn root_for(engine: &Engine, objid: &str) -> Option<String> {
    let target = if ids::is_valid_chunk_id(objid) {
        ids::dataset_of(objid).ok()?
    } else {
        objid.to_string()
    };
    let key = ids::key_of(&target).ok()?;
    match engine.store.get_json(&key).await {
        Ok(json) => json
            .get("root")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        Err(err) => {
            warn!("got {} fetching obj: {}", err, target);
            None
        }
    }
}
