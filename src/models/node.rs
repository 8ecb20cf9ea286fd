//! Runtime identity and cluster membership state of this node.

use std::collections::BTreeMap;
use std::hash::{DefaultHasher, Hash, Hasher};

use chrono::Utc;
use uuid::Uuid;

/// Lifecycle of the node within the cluster.
///
/// INITIALIZING until registered with the head node, WAITING until the
/// cluster reports READY, then READY. The reconciliation loop only runs
/// while READY.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Initializing,
    Waiting,
    Ready,
}

impl NodeState {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeState::Initializing => "INITIALIZING",
            NodeState::Waiting => "WAITING",
            NodeState::Ready => "READY",
        }
    }
}

/// Mutable node state shared between the cluster task, the store client and
/// the HTTP handlers.
#[derive(Debug)]
pub struct NodeRuntime {
    pub id: String,
    pub state: NodeState,
    pub node_number: i64,
    pub node_count: i64,
    /// Epoch seconds.
    pub start_time: i64,
    /// Data-node base urls by node number, kept fresh by the cluster task.
    pub dn_urls: BTreeMap<i64, String>,
    pub sn_urls: BTreeMap<i64, String>,
}

impl NodeRuntime {
    pub fn new() -> Self {
        Self {
            id: format!("an-{}", Uuid::new_v4()),
            state: NodeState::Initializing,
            node_number: -1,
            node_count: -1,
            start_time: Utc::now().timestamp(),
            dn_urls: BTreeMap::new(),
            sn_urls: BTreeMap::new(),
        }
    }

    /// Data node responsible for `objid`, chosen by hashing the id over the
    /// registered DN nodes.
    pub fn dn_url_for(&self, objid: &str) -> Option<&str> {
        if self.dn_urls.is_empty() {
            return None;
        }
        let mut hasher = DefaultHasher::new();
        objid.hash(&mut hasher);
        let idx = (hasher.finish() % self.dn_urls.len() as u64) as usize;
        self.dn_urls.values().nth(idx).map(String::as_str)
    }
}

impl Default for NodeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dn_routing_is_stable() {
        let mut node = NodeRuntime::new();
        assert_eq!(node.dn_url_for("g-x"), None);

        node.dn_urls.insert(0, "http://dn0:6101".to_string());
        node.dn_urls.insert(1, "http://dn1:6101".to_string());

        let first = node.dn_url_for("g-abc").map(str::to_string);
        for _ in 0..10 {
            assert_eq!(node.dn_url_for("g-abc").map(str::to_string), first);
        }
    }
}
