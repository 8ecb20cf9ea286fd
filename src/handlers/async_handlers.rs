//! Reconciliation-node HTTP handlers.
//!
//! - GET    /async_info -> bucket statistics
//! - PUT    /objects    -> enqueue PUT notifications
//! - DELETE /objects    -> enqueue DELETE notifications
//!
//! Notification bodies carry `{"objids": [...]}`. The whole batch is
//! validated before anything is enqueued, so a rejected request leaves the
//! queue untouched. Domain ids are accepted but silently ignored.

use std::sync::Arc;

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::errors::AppError;
use crate::models::ids;
use crate::models::stats::BucketStats;
use crate::services::applier::{Action, PendingItem};
use crate::services::engine::Engine;

#[derive(Debug, Deserialize)]
pub struct ObjectsBody {
    pub objids: Vec<String>,
}

#[derive(Serialize)]
pub struct AsyncInfoResponse {
    bucket_stats: BucketStats,
}

/// `GET /async_info`
pub async fn get_async_info(State(engine): State<Arc<Engine>>) -> Json<AsyncInfoResponse> {
    Json(AsyncInfoResponse {
        bucket_stats: engine.bucket_stats(),
    })
}

/// `PUT /objects` — notify creation/update of objects.
pub async fn put_objects(
    State(engine): State<Arc<Engine>>,
    body: Result<Json<ObjectsBody>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    info!("PUT objects");
    let Json(body) = body.map_err(reject_body)?;
    enqueue_objects(&engine, &body.objids, Action::Put)?;
    Ok(Json(json!({})))
}

/// `DELETE /objects` — notify deletion of objects.
pub async fn delete_objects(
    State(engine): State<Arc<Engine>>,
    body: Result<Json<ObjectsBody>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    info!("DELETE objects");
    let Json(body) = body.map_err(reject_body)?;
    enqueue_objects(&engine, &body.objids, Action::Delete)?;
    Ok(Json(json!({})))
}

fn reject_body(err: JsonRejection) -> AppError {
    let msg = format!("expected objids body: {}", err.body_text());
    warn!("{}", msg);
    AppError::bad_request(msg)
}

/// Validate a batch and append it to the pending queue.
///
/// Every id must be a valid domain, UUID or chunk id or the whole batch is
/// rejected with 400 and nothing is enqueued. Domain ids pass validation
/// but are not queued.
pub(crate) fn enqueue_objects(
    engine: &Engine,
    objids: &[String],
    action: Action,
) -> Result<(), AppError> {
    for objid in objids {
        if !ids::is_valid_domain(objid)
            && !ids::is_valid_uuid(objid)
            && !ids::is_valid_chunk_id(objid)
        {
            let msg = format!("invalid id: {}", objid);
            warn!("{}", msg);
            return Err(AppError::bad_request(msg));
        }
    }
    for objid in objids {
        if ids::is_valid_domain(objid) {
            // ignore domain events
            continue;
        }
        info!(
            "adding obj: {} action: {} to pending queue",
            objid,
            action.as_str()
        );
        engine.enqueue(PendingItem {
            objid: objid.clone(),
            action,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::store::mem::MemStore;
    use crate::services::testutil::{DSET, GROUP_A, engine_with};
    use axum::http::StatusCode;

    #[test]
    fn invalid_id_rejects_the_whole_batch() {
        let engine = engine_with(Arc::new(MemStore::default()));
        let batch = vec![GROUP_A.to_string(), "not-a-uuid".to_string()];

        let err = enqueue_objects(&engine, &batch, Action::Put).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(engine.pending_len(), 0);
    }

    #[test]
    fn domain_ids_are_silently_ignored() {
        let engine = engine_with(Arc::new(MemStore::default()));
        let batch = vec!["/home/test.h5".to_string(), GROUP_A.to_string()];

        enqueue_objects(&engine, &batch, Action::Put).unwrap();
        assert_eq!(engine.pending_len(), 1);
        assert_eq!(engine.pop_pending().unwrap().objid, GROUP_A);
    }

    #[test]
    fn batches_keep_arrival_order() {
        let engine = engine_with(Arc::new(MemStore::default()));
        enqueue_objects(&engine, &[GROUP_A.to_string()], Action::Put).unwrap();
        enqueue_objects(&engine, &[DSET.to_string()], Action::Delete).unwrap();

        let first = engine.pop_pending().unwrap();
        assert_eq!((first.objid.as_str(), first.action), (GROUP_A, Action::Put));
        let second = engine.pop_pending().unwrap();
        assert_eq!((second.objid.as_str(), second.action), (DSET, Action::Delete));
    }

    #[test]
    fn stats_body_has_the_expected_shape() {
        let engine = engine_with(Arc::new(MemStore::default()));
        let body = serde_json::to_value(AsyncInfoResponse {
            bucket_stats: engine.bucket_stats(),
        })
        .unwrap();
        let stats = body.get("bucket_stats").unwrap();
        for field in [
            "object_count",
            "domain_count",
            "root_count",
            "group_count",
            "dataset_count",
            "datatype_count",
            "chunk_count",
            "storage_size",
            "pending_count",
            "deleted_count",
        ] {
            assert!(stats.get(field).is_some(), "missing {field}");
        }
    }
}
