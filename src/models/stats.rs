//! High-level bucket statistics served by `GET /async_info`.

use serde::Serialize;

/// Counter snapshot over the object graph.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct BucketStats {
    pub object_count: usize,
    pub domain_count: usize,
    pub root_count: usize,
    pub group_count: usize,
    pub dataset_count: usize,
    pub datatype_count: usize,
    pub chunk_count: usize,
    /// Total bytes across every object in the bucket.
    pub storage_size: u64,
    /// Notifications waiting in the pending queue.
    pub pending_count: usize,
    /// Objects removed by the sweeper since startup.
    pub deleted_count: u64,
}
