//! Per-object records held by the in-memory object graph.

use std::collections::BTreeSet;

use crate::models::ids::ObjKind;

/// Stat attributes of a stored object, as reported by the bucket.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjStats {
    pub etag: String,
    pub size: u64,
    /// Epoch seconds.
    pub last_modified: i64,
}

/// Canonical record for one bucket object.
///
/// Exactly one record exists per object; every index in the graph refers to
/// it by id. `etag` is `None` for placeholder records that have not been
/// stat-refreshed yet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectRecord {
    pub etag: Option<String>,
    pub size: u64,
    /// Epoch seconds.
    pub last_modified: i64,
    /// Set by the mark pass; unreachable records stay `false`.
    pub used: bool,
    /// Root group id, for domain records. `None` marks a folder domain.
    pub root: Option<String>,
    /// Chunk ids owned by a dataset record.
    pub chunks: Option<BTreeSet<String>>,
}

impl ObjectRecord {
    /// Fresh record from bucket stats, unmarked and unattached.
    pub fn from_stats(stats: &ObjStats) -> Self {
        Self {
            etag: Some(stats.etag.clone()),
            size: stats.size,
            last_modified: stats.last_modified,
            ..Self::default()
        }
    }

    /// Empty placeholder for a parent that events referenced before any
    /// scan hydrated it.
    pub fn placeholder() -> Self {
        Self::default()
    }
}

/// Per-kind membership of one domain root, as id sets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RootRecord {
    pub groups: BTreeSet<String>,
    pub datasets: BTreeSet<String>,
    pub datatypes: BTreeSet<String>,
}

impl RootRecord {
    pub fn collection(&self, kind: ObjKind) -> &BTreeSet<String> {
        match kind {
            ObjKind::Group => &self.groups,
            ObjKind::Dataset => &self.datasets,
            ObjKind::Datatype => &self.datatypes,
        }
    }

    pub fn collection_mut(&mut self, kind: ObjKind) -> &mut BTreeSet<String> {
        match kind {
            ObjKind::Group => &mut self.groups,
            ObjKind::Dataset => &mut self.datasets,
            ObjKind::Datatype => &mut self.datatypes,
        }
    }

    /// All member ids across the three collections.
    pub fn members(&self) -> impl Iterator<Item = &String> {
        self.groups
            .iter()
            .chain(self.datasets.iter())
            .chain(self.datatypes.iter())
    }
}
