//! Per-domain content manifests.
//!
//! For every domain the bucket carries plain-text listings of its groups,
//! datasets and datatypes, plus one chunk listing per dataset. Offline
//! tools read these instead of re-listing the bucket. Lines are sorted by
//! id; each holds id, etag, last-modified and size, space-separated.

use std::collections::HashSet;

use bytes::Bytes;
use tracing::{info, warn};

use crate::models::ids::{self, ObjKind};
use crate::services::engine::Engine;
use crate::services::graph::ObjectGraph;

/// Write the content manifests of one domain.
///
/// With `objs_updated` set (the incremental path) a kind is republished only
/// if the dirty set touches it (a chunk id counts as a dirty dataset), and
/// a dataset's chunk manifest only if one of its own chunks is dirty.
/// Folder domains have no contents and are skipped. Existing manifests are
/// left alone unless the force-recreate toggle is on.
pub async fn update_domain_content(
    engine: &Engine,
    graph: &ObjectGraph,
    domain: &str,
    objs_updated: Option<&HashSet<String>>,
) {
    info!("update domain content: {}", domain);
    if !graph.contains_domain(domain) {
        warn!("expected to find domain: {}", domain);
        return;
    }
    let Some(rootid) = graph.domain_root(domain) else {
        info!("folder domain, skipping: {}", domain);
        return;
    };
    let Some(root) = graph.root_record(&rootid) else {
        warn!("expected to find root {} in roots collection", rootid);
        return;
    };

    for kind in [ObjKind::Group, ObjKind::Datatype, ObjKind::Dataset] {
        if let Some(updated) = objs_updated
            && !touches_kind(updated, kind)
        {
            info!("no updates for collection: {}", kind.collection());
            continue;
        }

        let col_key = format!("{}/.{}.txt", &domain[1..], kind.collection());
        if !engine.config.force_content_list && manifest_exists(engine, &col_key).await {
            continue;
        }

        let members = root.collection(kind);
        if members.is_empty() {
            continue;
        }

        let mut text = String::new();
        for objid in members {
            let Some(rec) = graph.get(objid) else {
                warn!("manifest for {}: {} not found in s3keys", domain, objid);
                continue;
            };
            let Some(etag) = &rec.etag else {
                warn!("obj {} not initialized, omitting from manifest", objid);
                continue;
            };
            text.push_str(&format!(
                "{} {} {} {}\n",
                objid, etag, rec.last_modified, rec.size
            ));

            if kind == ObjKind::Dataset && chunks_dirty(objs_updated, objid) {
                update_dataset_contents(engine, graph, domain, objid).await;
            }
        }

        info!("write collection key: {}, count: {}", col_key, members.len());
        if let Err(err) = engine.store.put_bytes(&col_key, Bytes::from(text)).await {
            warn!("error writing collection key {}: {}", col_key, err);
        }
    }
    info!("update domain content: {} done", domain);
}

/// Write the chunk manifest of one dataset.
///
/// Lines are sorted by chunk id and lead with the coordinate suffix (the
/// dataset prefix stripped). Chunks that have not been stat-refreshed yet
/// carry no etag and are omitted with a warning.
pub async fn update_dataset_contents(
    engine: &Engine,
    graph: &ObjectGraph,
    domain: &str,
    dsetid: &str,
) {
    info!("update dataset contents: {}", dsetid);
    let chunk_ids = graph.chunks_of(dsetid);
    if chunk_ids.is_empty() {
        info!("no chunks for dataset {}", dsetid);
        return;
    }

    let col_key = format!("{}/.{}.chunks.txt", &domain[1..], dsetid);
    if !engine.config.force_content_list && manifest_exists(engine, &col_key).await {
        return;
    }

    let mut text = String::new();
    for chunkid in &chunk_ids {
        let Some(rec) = graph.get(chunkid) else {
            warn!("chunk manifest for {}: {} not found in s3keys", dsetid, chunkid);
            continue;
        };
        let Some(etag) = &rec.etag else {
            warn!("chunk {} not initialized, omitting from manifest", chunkid);
            continue;
        };
        let Ok(suffix) = ids::chunk_suffix(chunkid) else {
            warn!("unexpected chunk id {} in dataset {}", chunkid, dsetid);
            continue;
        };
        text.push_str(&format!(
            "{} {} {} {}\n",
            suffix, etag, rec.last_modified, rec.size
        ));
    }

    info!("write chunk collection key: {}, count: {}", col_key, chunk_ids.len());
    if let Err(err) = engine.store.put_bytes(&col_key, Bytes::from(text)).await {
        warn!("error writing chunk collection key {}: {}", col_key, err);
    }
}

/// Whether a dirty set requires republishing a kind. Chunk updates dirty
/// the datasets kind.
fn touches_kind(updated: &HashSet<String>, kind: ObjKind) -> bool {
    updated.iter().any(|objid| {
        if ids::is_valid_chunk_id(objid) {
            kind == ObjKind::Dataset
        } else {
            ids::kind_of(objid) == Ok(kind)
        }
    })
}

/// Whether a dataset's chunk manifest is due: always on the full path, and
/// on the incremental path only when one of its own chunks is dirty.
fn chunks_dirty(objs_updated: Option<&HashSet<String>>, dsetid: &str) -> bool {
    match objs_updated {
        None => true,
        Some(updated) => updated.iter().any(|objid| {
            ids::is_valid_chunk_id(objid)
                && ids::dataset_of(objid).ok().as_deref() == Some(dsetid)
        }),
    }
}

async fn manifest_exists(engine: &Engine, key: &str) -> bool {
    match engine.store.is_key(key).await {
        Ok(exists) => exists,
        Err(err) => {
            warn!("error checking for key {}: {}", key, err);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::scanner;
    use crate::services::store::StoreClient;
    use crate::services::store::mem::MemStore;
    use crate::services::testutil::{
        CHUNKS, DOMAIN, DSET, GROUP_A, GROUP_B, ROOT, engine_with, seed_bucket, stats,
    };
    use std::sync::Arc;

    async fn scanned(store: &Arc<MemStore>) -> (Engine, ObjectGraph) {
        let engine = engine_with(store.clone());
        let mut graph = ObjectGraph::new();
        scanner::list_keys(&engine, &mut graph).await.unwrap();
        scanner::mark_domain(&engine, &mut graph, DOMAIN, true).await;
        (engine, graph)
    }

    #[tokio::test]
    async fn writes_sorted_manifests_for_a_scanned_domain() {
        let store = Arc::new(MemStore::default());
        seed_bucket(&store);
        let (engine, graph) = scanned(&store).await;

        update_domain_content(&engine, &graph, DOMAIN, None).await;

        let groups = store.manifest("home/.groups.txt").unwrap();
        let mut expected: Vec<&str> = vec![ROOT, GROUP_A, GROUP_B];
        expected.sort();
        let listed: Vec<&str> = groups
            .lines()
            .map(|line| line.split(' ').next().unwrap())
            .collect();
        assert_eq!(listed, expected);

        let datasets = store.manifest("home/.datasets.txt").unwrap();
        assert_eq!(datasets, format!("{DSET} etag-20 1000 20\n"));

        // no datatypes in the fixture: the manifest is not written
        assert!(store.manifest("home/.datatypes.txt").is_none());

        let chunks = store.manifest(&format!("home/.{DSET}.chunks.txt")).unwrap();
        assert_eq!(
            chunks,
            "0_0 etag-100 1000 100\n0_1 etag-101 1000 101\n1_0 etag-102 1000 102\n"
        );
    }

    #[tokio::test]
    async fn manifest_lines_match_record_fields() {
        let store = Arc::new(MemStore::default());
        seed_bucket(&store);
        let (engine, graph) = scanned(&store).await;
        update_domain_content(&engine, &graph, DOMAIN, None).await;

        let groups = store.manifest("home/.groups.txt").unwrap();
        for line in groups.lines() {
            let fields: Vec<&str> = line.split(' ').collect();
            assert_eq!(fields.len(), 4);
            let rec = graph.get(fields[0]).unwrap();
            assert_eq!(fields[1], rec.etag.as_deref().unwrap());
            assert_eq!(fields[2], rec.last_modified.to_string());
            assert_eq!(fields[3], rec.size.to_string());
        }
    }

    #[tokio::test]
    async fn dirty_set_limits_republishing() {
        let store = Arc::new(MemStore::default());
        seed_bucket(&store);
        let (engine, graph) = scanned(&store).await;

        // only a group changed: datasets and chunk manifests stay unwritten
        let dirty: HashSet<String> = [GROUP_A.to_string()].into();
        update_domain_content(&engine, &graph, DOMAIN, Some(&dirty)).await;
        assert!(store.manifest("home/.groups.txt").is_some());
        assert!(store.manifest("home/.datasets.txt").is_none());
        assert!(store.manifest(&format!("home/.{DSET}.chunks.txt")).is_none());
    }

    #[tokio::test]
    async fn dirty_chunk_republishes_datasets_and_chunk_manifest() {
        let store = Arc::new(MemStore::default());
        seed_bucket(&store);
        let (engine, graph) = scanned(&store).await;

        let dirty: HashSet<String> = [CHUNKS[1].to_string()].into();
        update_domain_content(&engine, &graph, DOMAIN, Some(&dirty)).await;
        assert!(store.manifest("home/.groups.txt").is_none());
        assert!(store.manifest("home/.datasets.txt").is_some());
        assert!(store.manifest(&format!("home/.{DSET}.chunks.txt")).is_some());
    }

    #[tokio::test]
    async fn existing_manifests_are_skipped_without_force() {
        let store = Arc::new(MemStore::default());
        seed_bucket(&store);
        let (mut engine, graph) = scanned(&store).await;
        engine.config.force_content_list = false;
        store
            .put_bytes("home/.groups.txt", Bytes::from_static(b"stale\n"))
            .await
            .unwrap();

        update_domain_content(&engine, &graph, DOMAIN, None).await;
        // the stale manifest survives, the missing one is created
        assert_eq!(store.manifest("home/.groups.txt").unwrap(), "stale\n");
        assert!(store.manifest("home/.datasets.txt").is_some());
    }

    #[tokio::test]
    async fn uninitialized_records_are_omitted() {
        // a chunk event can outrun its dataset: the placeholder dataset has
        // no etag yet and must not produce a manifest line
        let store = Arc::new(MemStore::default());
        let engine = engine_with(store.clone());
        let mut graph = ObjectGraph::new();
        graph.insert_domain(DOMAIN, &stats(2), Some(ROOT.to_string()));
        let orphan_chunk = "c-00000000-0000-0000-0000-00000000dddd_0";
        graph.upsert_object(orphan_chunk, &stats(5)).unwrap();
        graph.attach_to_root(orphan_chunk, ROOT);

        update_domain_content(&engine, &graph, DOMAIN, None).await;
        let datasets = store.manifest("home/.datasets.txt").unwrap();
        assert_eq!(datasets, "");
    }

    #[tokio::test]
    async fn folder_domains_publish_nothing() {
        let store = Arc::new(MemStore::default());
        store.insert("folder", stats(1), Some(serde_json::json!({"owner": "x"})));
        let engine = engine_with(store.clone());
        let mut graph = ObjectGraph::new();
        scanner::list_keys(&engine, &mut graph).await.unwrap();

        update_domain_content(&engine, &graph, "/folder", None).await;
        assert!(store.objects.lock().unwrap().keys().all(|k| !k.contains("/.")));
    }
}
