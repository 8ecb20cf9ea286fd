//! Bucket lister and reachability marker.
//!
//! Listing hydrates the graph from a full bucket enumeration; marking walks
//! the hard links of every domain root to flag reachable objects. Objects
//! that stay unmarked are what the sweeper later removes.

use std::collections::{HashSet, VecDeque};

use tracing::{debug, info, warn};

use crate::models::ids::{self, IdClass, ObjKind};
use crate::models::record::RootRecord;
use crate::services::engine::Engine;
use crate::services::graph::ObjectGraph;
use crate::services::store::StoreError;

/// Hydrate the graph from a full bucket listing.
///
/// Every key is classified and folded in: UUID and chunk keys become object
/// records (idempotently: a re-list refreshes stats but keeps marks and
/// chunk attachments), domain keys additionally fetch the domain JSON for
/// the root id. Manifest keys (dot-prefixed basenames) are ignored. Failing
/// keys are logged and skipped; only a failed listing fails the pass.
pub async fn list_keys(engine: &Engine, graph: &mut ObjectGraph) -> Result<(), StoreError> {
    let entries = engine.store.list_keys().await?;
    info!("list keys: {} keys", entries.len());

    for (key, stats) in entries {
        let basename = key.rsplit('/').next().unwrap_or(&key);
        if basename.starts_with('.') {
            continue; // content manifest
        }

        if ids::is_valid_uuid(&key) || ids::is_valid_chunk_id(&key) {
            if let Err(err) = graph.upsert_object(&key, &stats) {
                warn!("list keys: {}", err);
            }
            continue;
        }

        let domain = format!("/{key}");
        if !ids::is_valid_domain(&domain) {
            debug!("list keys: skipping unrecognized key {}", key);
            continue;
        }
        match engine.store.get_json(&key).await {
            Ok(json) => {
                let root = json
                    .get("root")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                graph.insert_domain(&domain, &stats, root);
            }
            Err(err) => warn!("list keys: skipping domain key {}: {}", key, err),
        }
    }
    Ok(())
}

/// Mark every object reachable from a domain's root.
///
/// Walks hard links breadth-first from the root group, marking groups,
/// datasets (plus all their chunks) and datatypes. With `update_links` the
/// root's per-kind collections are replaced by the walk result once the walk
/// completes. A fetch failure mid-walk drops the partial rebuild and
/// conservatively marks the root's current members instead, so a flaky
/// store can never expose live objects to the sweeper.
pub async fn mark_domain(
    engine: &Engine,
    graph: &mut ObjectGraph,
    domain: &str,
    update_links: bool,
) {
    let Some(rootid) = graph.domain_root(domain) else {
        info!("folder domain, skipping: {}", domain);
        return;
    };
    debug!("mark domain {} from root {}", domain, rootid);
    graph.ensure_root(&rootid);

    let mut rebuilt = RootRecord::default();
    let mut queue = VecDeque::from([rootid.clone()]);
    let mut seen = HashSet::from([rootid.clone()]);
    while let Some(groupid) = queue.pop_front() {
        graph.mark_used(&groupid);
        rebuilt.groups.insert(groupid.clone());

        let json = match engine.store.get_json(&groupid).await {
            Ok(json) => json,
            Err(err) => {
                warn!(
                    "mark walk for domain {} failed fetching group {}: {}",
                    domain, groupid, err
                );
                graph.mark_root_members(&rootid);
                return;
            }
        };
        let Some(links) = json.get("links").and_then(|v| v.as_object()) else {
            continue;
        };
        for (name, link) in links {
            if link.get("class").and_then(|v| v.as_str()) != Some("H5L_TYPE_HARD") {
                continue;
            }
            let Some(target) = link.get("id").and_then(|v| v.as_str()) else {
                warn!("hard link {} in group {} has no id", name, groupid);
                continue;
            };
            match ids::classify(target) {
                Ok(IdClass::Uuid(ObjKind::Group)) => {
                    if seen.insert(target.to_string()) {
                        queue.push_back(target.to_string());
                    }
                }
                Ok(IdClass::Uuid(kind)) => {
                    if !graph.mark_used(target) {
                        warn!("linked object {} not found in s3keys", target);
                    }
                    rebuilt.collection_mut(kind).insert(target.to_string());
                    if kind == ObjKind::Dataset {
                        for chunk in graph.chunks_of(target) {
                            graph.mark_used(&chunk);
                        }
                    }
                }
                _ => warn!(
                    "link {} in group {} has unexpected id {}",
                    name, groupid, target
                ),
            }
        }
    }

    if update_links {
        graph.set_root_collections(&rootid, rebuilt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::store::mem::MemStore;
    use crate::services::testutil::{
        CHUNKS, DOMAIN, DSET, GROUP_A, GROUP_B, ROOT, engine_with, seed_bucket, stats,
    };
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn hydrates_and_marks_a_seeded_bucket() {
        let store = Arc::new(MemStore::default());
        seed_bucket(&store);
        let engine = engine_with(store.clone());
        let mut graph = ObjectGraph::new();

        list_keys(&engine, &mut graph).await.unwrap();
        mark_domain(&engine, &mut graph, DOMAIN, true).await;

        // every object is reachable and marked
        for id in [ROOT, GROUP_A, GROUP_B, DSET] {
            assert!(graph.get(id).unwrap().used, "{id} should be marked");
        }
        for chunk in CHUNKS {
            assert!(graph.get(chunk).unwrap().used, "{chunk} should be marked");
        }

        // byte accounting matches the sum of the seeded sizes
        assert_eq!(
            graph.bytes_in_bucket(),
            2 + 10 + 11 + 12 + 20 + 100 + 101 + 102
        );

        // root collections rebuilt from the walk
        let root = graph.root_record(ROOT).unwrap();
        assert_eq!(root.groups.len(), 3);
        assert_eq!(root.datasets.len(), 1);
        assert!(root.datatypes.is_empty());
    }

    #[tokio::test]
    async fn double_scan_is_idempotent() {
        let store = Arc::new(MemStore::default());
        seed_bucket(&store);
        let engine = engine_with(store.clone());
        let mut graph = ObjectGraph::new();

        list_keys(&engine, &mut graph).await.unwrap();
        mark_domain(&engine, &mut graph, DOMAIN, true).await;
        let stats_before = graph.stats(0);

        list_keys(&engine, &mut graph).await.unwrap();
        mark_domain(&engine, &mut graph, DOMAIN, true).await;

        assert_eq!(graph.stats(0), stats_before);
        assert!(graph.get(DSET).unwrap().used);
        assert_eq!(graph.chunks_of(DSET).len(), 3);
    }

    #[tokio::test]
    async fn manifest_keys_are_ignored() {
        let store = Arc::new(MemStore::default());
        seed_bucket(&store);
        store.insert("home/.groups.txt", stats(5), None);
        let engine = engine_with(store.clone());
        let mut graph = ObjectGraph::new();

        list_keys(&engine, &mut graph).await.unwrap();
        assert!(graph.get("/home/.groups.txt").is_none());
        assert_eq!(graph.stats(0).object_count, 8);
    }

    #[tokio::test]
    async fn unreachable_objects_stay_unmarked() {
        let store = Arc::new(MemStore::default());
        seed_bucket(&store);
        let stray = "d-00000000-0000-0000-0000-00000000dddd";
        store.insert(
            stray,
            stats(30),
            Some(json!({"root": ROOT, "domain": DOMAIN})),
        );
        let engine = engine_with(store.clone());
        let mut graph = ObjectGraph::new();

        list_keys(&engine, &mut graph).await.unwrap();
        mark_domain(&engine, &mut graph, DOMAIN, true).await;

        assert!(!graph.get(stray).unwrap().used);
        assert!(graph.get(DSET).unwrap().used);
    }

    #[tokio::test]
    async fn failed_walk_marks_members_conservatively() {
        let store = Arc::new(MemStore::default());
        seed_bucket(&store);
        let engine = engine_with(store.clone());
        let mut graph = ObjectGraph::new();

        list_keys(&engine, &mut graph).await.unwrap();
        mark_domain(&engine, &mut graph, DOMAIN, true).await;
        graph.clear_marks();

        // losing a group's JSON aborts the walk but keeps known members safe
        store.objects.lock().unwrap().remove(GROUP_A);
        mark_domain(&engine, &mut graph, DOMAIN, true).await;

        assert!(graph.get(DSET).unwrap().used);
        for chunk in CHUNKS {
            assert!(graph.get(chunk).unwrap().used);
        }
        // the previous collections survive the aborted rebuild
        assert_eq!(graph.root_record(ROOT).unwrap().groups.len(), 3);
    }

    #[tokio::test]
    async fn mark_without_update_links_keeps_collections() {
        let store = Arc::new(MemStore::default());
        seed_bucket(&store);
        let engine = engine_with(store.clone());
        let mut graph = ObjectGraph::new();

        list_keys(&engine, &mut graph).await.unwrap();
        mark_domain(&engine, &mut graph, DOMAIN, true).await;
        graph.clear_marks();
        // drop a link from the walk source
        store.insert(
            GROUP_A,
            stats(11),
            Some(json!({"root": ROOT, "domain": DOMAIN, "links": {}})),
        );

        mark_domain(&engine, &mut graph, DOMAIN, false).await;
        // dataset is no longer reachable, but the collections are untouched
        assert!(!graph.get(DSET).unwrap().used);
        assert_eq!(graph.root_record(ROOT).unwrap().datasets.len(), 1);
    }
}
