//! Shared fixtures for the service tests: a small seeded bucket and an
//! engine wired to the in-memory store.

use std::sync::{Arc, RwLock};

use serde_json::json;

use crate::config::AppConfig;
use crate::models::node::NodeRuntime;
use crate::models::record::ObjStats;
use crate::services::engine::Engine;
use crate::services::store::mem::MemStore;

pub(crate) const ROOT: &str = "g-00000000-0000-0000-0000-00000000aaaa";
pub(crate) const GROUP_A: &str = "g-00000000-0000-0000-0000-00000000bbbb";
pub(crate) const GROUP_B: &str = "g-00000000-0000-0000-0000-00000000b0b0";
pub(crate) const DSET: &str = "d-00000000-0000-0000-0000-00000000cccc";
pub(crate) const CHUNKS: [&str; 3] = [
    "c-00000000-0000-0000-0000-00000000cccc_0_0",
    "c-00000000-0000-0000-0000-00000000cccc_0_1",
    "c-00000000-0000-0000-0000-00000000cccc_1_0",
];
pub(crate) const DOMAIN: &str = "/home/test.h5";

pub(crate) fn stats(size: u64) -> ObjStats {
    ObjStats {
        etag: format!("etag-{size}"),
        size,
        last_modified: 1000,
    }
}

pub(crate) fn hard_link(id: &str) -> serde_json::Value {
    json!({"class": "H5L_TYPE_HARD", "id": id})
}

/// One domain, one root, two groups, one dataset with three chunks.
pub(crate) fn seed_bucket(store: &MemStore) {
    store.insert(
        "home/test.h5",
        stats(2),
        Some(json!({"root": ROOT, "owner": "test"})),
    );
    store.insert(
        ROOT,
        stats(10),
        Some(json!({
            "root": ROOT,
            "domain": DOMAIN,
            "links": {"a": hard_link(GROUP_A), "b": hard_link(GROUP_B)},
        })),
    );
    store.insert(
        GROUP_A,
        stats(11),
        Some(json!({
            "root": ROOT,
            "domain": DOMAIN,
            "links": {"data": hard_link(DSET), "sym": {"class": "H5L_TYPE_SOFT", "h5path": "/x"}},
        })),
    );
    store.insert(
        GROUP_B,
        stats(12),
        Some(json!({"root": ROOT, "domain": DOMAIN, "links": {}})),
    );
    store.insert(DSET, stats(20), Some(json!({"root": ROOT, "domain": DOMAIN})));
    for (i, chunk) in CHUNKS.iter().enumerate() {
        store.insert(chunk, stats(100 + i as u64), None);
    }
}

pub(crate) fn test_config() -> AppConfig {
    AppConfig {
        an_port: 6100,
        bucket_name: "test-bucket".to_string(),
        aws_region: "us-east-1".to_string(),
        aws_access_key_id: "test".to_string(),
        aws_secret_access_key: "test".to_string(),
        s3_gateway: None,
        head_host: "localhost".to_string(),
        head_port: 5100,
        anonymous_ttl: 0,
        s3_sync_interval: 3600,
        async_sleep_time: 1,
        node_sleep_time: 1,
        max_tcp_connections: 10,
        store_timeout: 5,
        force_content_list: true,
    }
}

pub(crate) fn engine_with(store: Arc<MemStore>) -> Engine {
    Engine::new(
        test_config(),
        store,
        Arc::new(RwLock::new(NodeRuntime::new())),
    )
}
