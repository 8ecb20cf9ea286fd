//! Object-store boundary.
//!
//! The reconciliation core talks to the bucket through the [`StoreClient`]
//! trait: stat a key, fetch a JSON object, write manifest bytes, list the
//! bucket, and delete an object through its owning data node. The production
//! implementation backs the first four onto S3 and the delete onto the DN
//! HTTP interface; tests substitute an in-memory store.

use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::models::node::NodeRuntime;
use crate::models::record::ObjStats;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key `{0}` not found")]
    NotFound(String),
    #[error("store request failed: {0}")]
    Request(String),
    #[error("store request for `{0}` timed out")]
    Timeout(String),
    #[error("object `{0}` is not valid JSON: {1}")]
    BadObject(String, String),
    #[error("no data node available for `{0}`")]
    NoDataNode(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Bucket operations the reconciliation core depends on.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Stat attributes for a key.
    async fn stat(&self, key: &str) -> StoreResult<ObjStats>;

    /// Fetch a key and parse its contents as JSON.
    async fn get_json(&self, key: &str) -> StoreResult<Value>;

    /// Write raw bytes to a key, replacing any existing object.
    async fn put_bytes(&self, key: &str, data: Bytes) -> StoreResult<()>;

    /// Whether a key exists.
    async fn is_key(&self, key: &str) -> StoreResult<bool>;

    /// Every key in the bucket, with the stat attributes the listing carries.
    async fn list_keys(&self) -> StoreResult<Vec<(String, ObjStats)>>;

    /// Delete an object through its owning data node, suppressing the
    /// notification round-trip.
    async fn delete_obj(&self, objid: &str, collection: &str) -> StoreResult<()>;
}

/// S3-backed store client; deletes are routed to data nodes over HTTP.
pub struct S3StoreClient {
    s3: aws_sdk_s3::Client,
    http: reqwest::Client,
    bucket: String,
    timeout: Duration,
    node: Arc<RwLock<NodeRuntime>>,
}

impl S3StoreClient {
    pub fn new(
        s3: aws_sdk_s3::Client,
        http: reqwest::Client,
        bucket: String,
        timeout: Duration,
        node: Arc<RwLock<NodeRuntime>>,
    ) -> Self {
        Self {
            s3,
            http,
            bucket,
            timeout,
            node,
        }
    }

    async fn bounded<T, F>(&self, key: &str, fut: F) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>> + Send,
    {
        match timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(key.to_string())),
        }
    }
}

#[async_trait]
impl StoreClient for S3StoreClient {
    async fn stat(&self, key: &str) -> StoreResult<ObjStats> {
        let req = self.s3.head_object().bucket(&self.bucket).key(key).send();
        self.bounded(key, async {
            match req.await {
                Ok(out) => Ok(ObjStats {
                    etag: out.e_tag().map(strip_quotes).unwrap_or_default(),
                    size: out.content_length().unwrap_or(0).max(0) as u64,
                    last_modified: out.last_modified().map(|t| t.secs()).unwrap_or(0),
                }),
                Err(SdkError::ServiceError(err)) if err.err().is_not_found() => {
                    Err(StoreError::NotFound(key.to_string()))
                }
                Err(err) => Err(StoreError::Request(err.to_string())),
            }
        })
        .await
    }

    async fn get_json(&self, key: &str) -> StoreResult<Value> {
        let req = self.s3.get_object().bucket(&self.bucket).key(key).send();
        let data = self
            .bounded(key, async {
                let out = match req.await {
                    Ok(out) => out,
                    Err(SdkError::ServiceError(err)) if err.err().is_no_such_key() => {
                        return Err(StoreError::NotFound(key.to_string()));
                    }
                    Err(err) => return Err(StoreError::Request(err.to_string())),
                };
                out.body
                    .collect()
                    .await
                    .map(|agg| agg.into_bytes())
                    .map_err(|err| StoreError::Request(err.to_string()))
            })
            .await?;
        serde_json::from_slice(&data)
            .map_err(|err| StoreError::BadObject(key.to_string(), err.to_string()))
    }

    async fn put_bytes(&self, key: &str, data: Bytes) -> StoreResult<()> {
        debug!("put {} bytes to key {}", data.len(), key);
        let req = self
            .s3
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .send();
        self.bounded(key, async {
            req.await
                .map(|_| ())
                .map_err(|err| StoreError::Request(err.to_string()))
        })
        .await
    }

    async fn is_key(&self, key: &str) -> StoreResult<bool> {
        match self.stat(key).await {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn list_keys(&self) -> StoreResult<Vec<(String, ObjStats)>> {
        let mut entries = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut req = self.s3.list_objects_v2().bucket(&self.bucket);
            if let Some(t) = &token {
                req = req.continuation_token(t);
            }
            let resp = self
                .bounded("<list>", async {
                    req.send()
                        .await
                        .map_err(|err| StoreError::Request(err.to_string()))
                })
                .await?;
            for obj in resp.contents() {
                let Some(key) = obj.key() else { continue };
                entries.push((
                    key.to_string(),
                    ObjStats {
                        etag: obj.e_tag().map(strip_quotes).unwrap_or_default(),
                        size: obj.size().unwrap_or(0).max(0) as u64,
                        last_modified: obj.last_modified().map(|t| t.secs()).unwrap_or(0),
                    },
                ));
            }
            match resp.next_continuation_token() {
                Some(next) if resp.is_truncated() == Some(true) => {
                    token = Some(next.to_string());
                }
                _ => break,
            }
        }
        debug!("listed {} keys", entries.len());
        Ok(entries)
    }

    async fn delete_obj(&self, objid: &str, collection: &str) -> StoreResult<()> {
        let dn_url = {
            let node = self
                .node
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            node.dn_url_for(objid).map(str::to_string)
        };
        let Some(dn_url) = dn_url else {
            return Err(StoreError::NoDataNode(objid.to_string()));
        };

        let url = format!("{}/{}/{}", dn_url, collection, objid);
        let resp = self
            .http
            .delete(&url)
            .query(&[("Notify", "0")])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| StoreError::Request(err.to_string()))?;
        if !resp.status().is_success() {
            warn!("DN delete {} returned {}", url, resp.status());
            return Err(StoreError::Request(format!(
                "DN delete returned {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

/// S3 reports etags wrapped in double quotes; store them bare.
fn strip_quotes(etag: &str) -> String {
    etag.trim_matches('"').to_string()
}
