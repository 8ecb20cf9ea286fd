//! Garbage collection of unreachable objects.
//!
//! After a mark pass, records still carrying `used == false` are unlinked
//! and eligible for deletion. Deletes go through the owning data node; the
//! graph is only mutated after the DN confirms, so a failed delete leaves
//! the record in place to be retried on the next cycle.

use chrono::Utc;
use tracing::{info, warn};

use crate::models::ids::{self, ObjKind};
use crate::services::engine::Engine;
use crate::services::graph::ObjectGraph;

/// Outcome of one sweep attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    Swept,
    /// Too young to delete.
    Skipped,
    Failed,
}

/// Delete every unlinked object, datasets first so their chunks follow,
/// then datatypes, then groups.
pub async fn sweep_objs(engine: &Engine, graph: &mut ObjectGraph) {
    info!("sweep pass");
    let mut swept: u64 = 0;

    for dsetid in unused_ids(graph, ObjKind::Dataset) {
        // capture the chunk list before the dataset record goes away
        let chunk_ids = graph.chunks_of(&dsetid);
        if sweep_obj(engine, graph, &dsetid, false).await != SweepOutcome::Swept {
            continue;
        }
        swept += 1;
        for chunkid in chunk_ids {
            if sweep_obj(engine, graph, &chunkid, false).await == SweepOutcome::Swept {
                swept += 1;
            }
        }
    }

    for datatypeid in unused_ids(graph, ObjKind::Datatype) {
        if sweep_obj(engine, graph, &datatypeid, false).await == SweepOutcome::Swept {
            swept += 1;
        }
    }

    for groupid in unused_ids(graph, ObjKind::Group) {
        if sweep_obj(engine, graph, &groupid, false).await == SweepOutcome::Swept {
            swept += 1;
        }
    }

    graph.count_swept(swept);
    info!("sweep pass done, {} objects deleted", swept);
}

/// Delete one object if it is old enough.
///
/// The object must be indexed; unless `force`, objects modified within
/// `anonymous_ttl` seconds are skipped. The DN delete suppresses its
/// notification round-trip; only a confirmed delete removes the record and
/// adjusts the byte count.
pub async fn sweep_obj(
    engine: &Engine,
    graph: &mut ObjectGraph,
    objid: &str,
    force: bool,
) -> SweepOutcome {
    info!("sweep obj {}", objid);
    let Some(rec) = graph.get(objid) else {
        warn!("sweep obj: {} not found", objid);
        return SweepOutcome::Failed;
    };
    let last_modified = rec.last_modified;
    let num_bytes = rec.size;

    let now = Utc::now().timestamp();
    if !force && now - last_modified < engine.config.anonymous_ttl as i64 {
        info!("obj {} isn't old enough to delete yet", objid);
        return SweepOutcome::Skipped;
    }

    let collection = match ids::collection_for(objid) {
        Ok(collection) => collection,
        Err(err) => {
            warn!("sweep obj: {}", err);
            return SweepOutcome::Failed;
        }
    };

    info!("delete object {}, [{} bytes]", objid, num_bytes);
    if let Err(err) = engine.store.delete_obj(objid, collection).await {
        warn!("error deleting obj {}: {}", objid, err);
        return SweepOutcome::Failed;
    }

    graph.remove_object(objid);
    SweepOutcome::Swept
}

/// Force-delete everything under a root: its groups and datatypes, then
/// every dataset's chunks followed by the dataset itself. The root record
/// and any domain records pointing at it are dropped afterwards.
pub async fn root_delete(engine: &Engine, graph: &mut ObjectGraph, rootid: &str) {
    info!("root delete: {}", rootid);
    let Some(root) = graph.root_record(rootid) else {
        warn!("expected to find {} in roots collection", rootid);
        return;
    };
    let group_ids: Vec<String> = root.groups.iter().cloned().collect();
    let datatype_ids: Vec<String> = root.datatypes.iter().cloned().collect();
    let dataset_ids: Vec<String> = root.datasets.iter().cloned().collect();

    let mut swept: u64 = 0;
    for groupid in group_ids {
        if sweep_obj(engine, graph, &groupid, true).await == SweepOutcome::Swept {
            swept += 1;
        }
    }
    for datatypeid in datatype_ids {
        if sweep_obj(engine, graph, &datatypeid, true).await == SweepOutcome::Swept {
            swept += 1;
        }
    }
    for dsetid in dataset_ids {
        for chunkid in graph.chunks_of(&dsetid) {
            if sweep_obj(engine, graph, &chunkid, true).await == SweepOutcome::Swept {
                swept += 1;
            }
        }
        if sweep_obj(engine, graph, &dsetid, true).await == SweepOutcome::Swept {
            swept += 1;
        }
    }
    graph.count_swept(swept);
    graph.remove_root(rootid);
}

fn unused_ids(graph: &ObjectGraph, kind: ObjKind) -> Vec<String> {
    graph
        .kind_ids(kind)
        .into_iter()
        .filter(|objid| graph.get(objid).is_some_and(|rec| !rec.used))
        .collect()
}
