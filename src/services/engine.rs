//! Shared node state and the reconciliation loop.
//!
//! [`Engine`] is the single bag of state every service function receives:
//! configuration, the store client, cluster runtime, the pending queue and
//! the cached stats snapshot. The object graph itself is deliberately *not*
//! in here; it is owned by the reconciliation task and never shared, so the
//! HTTP handlers are limited to appending notifications and reading stats,
//! both non-suspending.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::AppConfig;
use crate::models::node::{NodeRuntime, NodeState};
use crate::models::stats::BucketStats;
use crate::services::applier::{self, PendingItem};
use crate::services::graph::ObjectGraph;
use crate::services::publisher;
use crate::services::scanner;
use crate::services::store::{StoreClient, StoreError};
use crate::services::sweeper;

pub struct Engine {
    pub config: AppConfig,
    pub store: Arc<dyn StoreClient>,
    pub node: Arc<RwLock<NodeRuntime>>,
    pending: Mutex<VecDeque<PendingItem>>,
    stats: RwLock<BucketStats>,
}

impl Engine {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn StoreClient>,
        node: Arc<RwLock<NodeRuntime>>,
    ) -> Self {
        Self {
            config,
            store,
            node,
            pending: Mutex::new(VecDeque::new()),
            stats: RwLock::new(BucketStats::default()),
        }
    }

    /// Append a notification to the pending queue.
    pub fn enqueue(&self, item: PendingItem) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(item);
    }

    /// Pop the oldest pending notification.
    pub fn pop_pending(&self) -> Option<PendingItem> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    pub fn pending_len(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn node_state(&self) -> NodeState {
        self.node
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .state
    }

    /// Cached stats with a live pending-queue length.
    pub fn bucket_stats(&self) -> BucketStats {
        let mut stats = self
            .stats
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        stats.pending_count = self.pending_len();
        stats
    }

    /// Refresh the cached stats snapshot from the graph.
    pub fn refresh_stats(&self, graph: &ObjectGraph) {
        let snapshot = graph.stats(self.pending_len());
        *self
            .stats
            .write()
            .unwrap_or_else(PoisonError::into_inner) = snapshot;
    }
}

/// Long-running reconciliation task.
///
/// Waits for the cluster to report READY, runs one full
/// scan → mark → sweep → publish cycle, then settles into the steady loop:
/// sleep, drain the pending queue, republish the dirty domains. Full
/// re-scans repeat on the `s3_sync_interval` cadence. Nothing in here is
/// fatal; per-object failures are logged and the loop moves on.
pub async fn run(engine: Arc<Engine>) {
    let mut graph = ObjectGraph::new();

    while engine.node_state() != NodeState::Ready {
        info!("bucket check waiting for node state to be READY");
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    if let Err(err) = full_cycle(&engine, &mut graph).await {
        warn!("initial bucket scan failed: {}", err);
    }
    let mut last_sync = Instant::now();

    let sleep_secs = engine.config.async_sleep_time;
    let sync_interval = Duration::from_secs(engine.config.s3_sync_interval);
    loop {
        info!("bucket check sleeping for {}s", sleep_secs);
        tokio::time::sleep(Duration::from_secs(sleep_secs)).await;

        if last_sync.elapsed() >= sync_interval {
            match full_cycle(&engine, &mut graph).await {
                Ok(()) => last_sync = Instant::now(),
                Err(err) => warn!("bucket re-scan failed: {}", err),
            }
        }

        let dirty = applier::drain(&engine, &mut graph).await;
        if !dirty.is_empty() {
            info!("{} domains will be updated", dirty.len());
            for (domain, objids) in &dirty {
                publisher::update_domain_content(&engine, &graph, domain, Some(objids)).await;
            }
        }
        engine.refresh_stats(&graph);
    }
}

/// One full pass over the bucket: hydrate, mark every domain, sweep, and
/// republish every domain's manifests.
pub async fn full_cycle(engine: &Engine, graph: &mut ObjectGraph) -> Result<(), StoreError> {
    info!("bucket scan start");
    graph.clear_marks();
    scanner::list_keys(engine, graph).await?;

    info!("mark domain objects");
    for domain in graph.domain_names() {
        scanner::mark_domain(engine, graph, &domain, true).await;
    }

    sweeper::sweep_objs(engine, graph).await;
    engine.refresh_stats(graph);

    for domain in graph.domain_names() {
        publisher::update_domain_content(engine, graph, &domain, None).await;
    }
    info!("bucket scan done");
    Ok(())
}
