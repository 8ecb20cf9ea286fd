//! In-memory mirror of the bucket.
//!
//! One canonical [`ObjectRecord`] per object lives in the `s3keys` arena,
//! keyed by store key. Every other structure (the per-kind id sets, the
//! domain set, the per-root collections and the chunk sets inside dataset
//! records) holds ids referring back into the arena, never a second copy
//! of a record. Removing an object is one arena removal plus index fix-ups.
//!
//! The graph is owned by the reconciliation task; nothing here performs I/O.

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::warn;

use crate::models::ids::{self, IdClass, IdError, ObjKind};
use crate::models::record::{ObjStats, ObjectRecord, RootRecord};
use crate::models::stats::BucketStats;

#[derive(Debug, Default)]
pub struct ObjectGraph {
    /// Arena: store key -> canonical record. Authoritative for existence.
    s3keys: HashMap<String, ObjectRecord>,
    /// Domain names present in the bucket.
    domains: BTreeSet<String>,
    /// Root group id -> per-kind membership.
    roots: HashMap<String, RootRecord>,
    groups: BTreeSet<String>,
    datasets: BTreeSet<String>,
    datatypes: BTreeSet<String>,
    chunks: BTreeSet<String>,
    bytes_in_bucket: i64,
    /// Ids removed by DELETE events, kept for auditing.
    deleted_objids: HashSet<String>,
    /// Objects removed by the sweeper.
    deleted_count: u64,
}

impl ObjectGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record for an object id, if present.
    pub fn get(&self, objid: &str) -> Option<&ObjectRecord> {
        let key = ids::key_of(objid).ok()?;
        self.s3keys.get(&key)
    }

    pub fn contains_domain(&self, domain: &str) -> bool {
        self.domains.contains(domain)
    }

    /// Root group id of a domain. `None` for folder domains and for
    /// domains the graph does not know.
    pub fn domain_root(&self, domain: &str) -> Option<String> {
        self.get(domain)?.root.clone()
    }

    pub fn domain_names(&self) -> Vec<String> {
        self.domains.iter().cloned().collect()
    }

    pub fn root_record(&self, rootid: &str) -> Option<&RootRecord> {
        self.roots.get(rootid)
    }

    pub fn is_root(&self, objid: &str) -> bool {
        self.roots.contains_key(objid)
    }

    pub fn bytes_in_bucket(&self) -> i64 {
        self.bytes_in_bucket
    }

    /// Ids in a kind index, sorted.
    pub fn kind_ids(&self, kind: ObjKind) -> Vec<String> {
        self.kind_index(kind).iter().cloned().collect()
    }

    /// Chunk ids attached to a dataset record, sorted.
    pub fn chunks_of(&self, dsetid: &str) -> Vec<String> {
        self.get(dsetid)
            .and_then(|rec| rec.chunks.as_ref())
            .map(|chunks| chunks.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Insert or refresh an object record from bucket stats.
    ///
    /// A replace preserves everything except the stat attributes: the `used`
    /// mark, a domain's `root` and a dataset's `chunks` survive. Chunks are
    /// attached to their dataset, materializing a placeholder dataset record
    /// when events outran the scan.
    pub fn upsert_object(&mut self, objid: &str, stats: &ObjStats) -> Result<(), IdError> {
        let class = ids::classify(objid)?;
        if class == IdClass::Domain {
            return Err(IdError::InvalidId(objid.to_string()));
        }
        let key = ids::key_of(objid)?;

        let mut rec = ObjectRecord::from_stats(stats);
        let old_size = match self.s3keys.get(&key) {
            Some(old) => {
                rec.used = old.used;
                rec.root = old.root.clone();
                rec.chunks = old.chunks.clone();
                old.size as i64
            }
            None => 0,
        };

        match class {
            IdClass::Uuid(kind) => {
                if kind == ObjKind::Dataset && rec.chunks.is_none() {
                    rec.chunks = Some(BTreeSet::new());
                }
                self.kind_index_mut(kind).insert(objid.to_string());
            }
            IdClass::Chunk => {
                self.chunks.insert(objid.to_string());
                let dsetid = ids::dataset_of(objid)?;
                self.attach_chunk(&dsetid, objid);
            }
            IdClass::Domain => unreachable!("rejected above"),
        }

        self.bytes_in_bucket += rec.size as i64 - old_size;
        self.s3keys.insert(key, rec);
        Ok(())
    }

    /// Insert or refresh a domain record.
    ///
    /// A root id that is not a valid group id is dropped with a warning; a
    /// kept root gets an empty placeholder so the domain never points at a
    /// missing root record.
    pub fn insert_domain(&mut self, domain: &str, stats: &ObjStats, root: Option<String>) {
        if !ids::is_valid_domain(domain) {
            warn!("refusing to insert invalid domain `{}`", domain);
            return;
        }
        let key = domain[1..].to_string();
        let root = match root {
            Some(rootid) if ids::is_valid_uuid(&rootid) => Some(rootid),
            Some(rootid) => {
                warn!("domain {} has invalid root `{}`", domain, rootid);
                None
            }
            None => None,
        };

        let mut rec = ObjectRecord::from_stats(stats);
        rec.root = root.clone();
        let old_size = self.s3keys.get(&key).map(|old| old.size as i64).unwrap_or(0);
        self.bytes_in_bucket += rec.size as i64 - old_size;
        self.s3keys.insert(key, rec);
        self.domains.insert(domain.to_string());

        if let Some(rootid) = root {
            self.ensure_root(&rootid);
        }
    }

    /// Remove a domain record. Objects under its root are untouched; a later
    /// scan sees them as unreachable.
    pub fn remove_domain(&mut self, domain: &str) -> Option<ObjectRecord> {
        if !self.domains.remove(domain) {
            return None;
        }
        let key = &domain[1..];
        match self.s3keys.remove(key) {
            Some(rec) => {
                self.bytes_in_bucket -= rec.size as i64;
                Some(rec)
            }
            None => {
                warn!("expected to find domain key `{}` in s3keys", key);
                None
            }
        }
    }

    /// Remove an object from the arena and every index that refers to it.
    pub fn remove_object(&mut self, objid: &str) -> Option<ObjectRecord> {
        let key = ids::key_of(objid).ok()?;
        let rec = self.s3keys.remove(&key)?;
        self.bytes_in_bucket -= rec.size as i64;

        match ids::classify(objid) {
            Ok(IdClass::Chunk) => {
                self.chunks.remove(objid);
                if let Ok(dsetid) = ids::dataset_of(objid)
                    && let Some(chunks) = self
                        .s3keys
                        .get_mut(&dsetid)
                        .and_then(|dset| dset.chunks.as_mut())
                {
                    chunks.remove(objid);
                }
            }
            Ok(IdClass::Uuid(kind)) => {
                self.kind_index_mut(kind).remove(objid);
                for root in self.roots.values_mut() {
                    root.collection_mut(kind).remove(objid);
                }
            }
            _ => {}
        }
        Some(rec)
    }

    /// Make sure a root record exists, materializing an empty collection set
    /// and an arena placeholder when events referenced it first.
    pub fn ensure_root(&mut self, rootid: &str) {
        self.roots.entry(rootid.to_string()).or_default();
        self.s3keys
            .entry(rootid.to_string())
            .or_insert_with(ObjectRecord::placeholder);
    }

    /// Attach an object to the collections of its owning root.
    ///
    /// For chunks this links the parent dataset into the root (creating a
    /// placeholder dataset when needed); the chunk itself is already inside
    /// the dataset's chunk set from [`upsert_object`].
    pub fn attach_to_root(&mut self, objid: &str, rootid: &str) {
        self.ensure_root(rootid);
        match ids::classify(objid) {
            Ok(IdClass::Chunk) => {
                let Ok(dsetid) = ids::dataset_of(objid) else {
                    return;
                };
                self.attach_chunk(&dsetid, objid);
                if let Some(root) = self.roots.get_mut(rootid) {
                    root.datasets.insert(dsetid);
                }
            }
            Ok(IdClass::Uuid(kind)) => {
                if let Some(root) = self.roots.get_mut(rootid) {
                    root.collection_mut(kind).insert(objid.to_string());
                }
            }
            _ => warn!("cannot attach `{}` to root {}", objid, rootid),
        }
    }

    /// Drop a root record and any domain records pointing at it.
    pub fn remove_root(&mut self, rootid: &str) {
        self.roots.remove(rootid);
        let orphaned: Vec<String> = self
            .domains
            .iter()
            .filter(|domain| {
                self.s3keys
                    .get(&domain[1..])
                    .is_some_and(|rec| rec.root.as_deref() == Some(rootid))
            })
            .cloned()
            .collect();
        for domain in orphaned {
            self.remove_domain(&domain);
        }
    }

    /// Reset every `used` mark ahead of a fresh mark pass.
    pub fn clear_marks(&mut self) {
        for rec in self.s3keys.values_mut() {
            rec.used = false;
        }
    }

    /// Replace a root's collections with the result of a completed link
    /// walk. Partial walks never reach this; their rebuilt state is dropped.
    pub fn set_root_collections(&mut self, rootid: &str, rebuilt: RootRecord) {
        self.ensure_root(rootid);
        if let Some(root) = self.roots.get_mut(rootid) {
            *root = rebuilt;
        }
    }

    /// Mark an object reachable. False when the id is unknown.
    pub fn mark_used(&mut self, objid: &str) -> bool {
        let Ok(key) = ids::key_of(objid) else {
            return false;
        };
        match self.s3keys.get_mut(&key) {
            Some(rec) => {
                rec.used = true;
                true
            }
            None => false,
        }
    }

    /// Conservatively mark every current member of a root (chunks included)
    /// so an interrupted walk cannot expose live objects to the sweeper.
    pub fn mark_root_members(&mut self, rootid: &str) {
        let Some(root) = self.roots.get(rootid) else {
            return;
        };
        let members: Vec<String> = root.members().cloned().collect();
        self.mark_used(rootid);
        for objid in members {
            self.mark_used(&objid);
            for chunk in self.chunks_of(&objid) {
                self.mark_used(&chunk);
            }
        }
    }

    /// Resolve an object to its domain through the stored parent chain:
    /// chunk -> dataset, member -> root, root -> domain.
    pub fn domain_of(&self, objid: &str) -> Option<String> {
        let target = if ids::is_valid_chunk_id(objid) {
            ids::dataset_of(objid).ok()?
        } else {
            objid.to_string()
        };
        let rootid = self.roots.iter().find_map(|(rootid, root)| {
            (rootid == &target
                || root.groups.contains(&target)
                || root.datasets.contains(&target)
                || root.datatypes.contains(&target))
            .then_some(rootid.clone())
        })?;
        self.domains
            .iter()
            .find(|domain| {
                self.s3keys
                    .get(&domain[1..])
                    .is_some_and(|rec| rec.root.as_deref() == Some(rootid.as_str()))
            })
            .cloned()
    }

    pub fn record_deleted(&mut self, objid: &str) {
        self.deleted_objids.insert(objid.to_string());
    }

    pub fn count_swept(&mut self, n: u64) {
        self.deleted_count += n;
    }

    /// Counter snapshot for the status view.
    pub fn stats(&self, pending_count: usize) -> BucketStats {
        BucketStats {
            object_count: self.s3keys.len(),
            domain_count: self.domains.len(),
            root_count: self.roots.len(),
            group_count: self.groups.len(),
            dataset_count: self.datasets.len(),
            datatype_count: self.datatypes.len(),
            chunk_count: self.chunks.len(),
            storage_size: self.bytes_in_bucket.max(0) as u64,
            pending_count,
            deleted_count: self.deleted_count,
        }
    }

    fn kind_index(&self, kind: ObjKind) -> &BTreeSet<String> {
        match kind {
            ObjKind::Group => &self.groups,
            ObjKind::Dataset => &self.datasets,
            ObjKind::Datatype => &self.datatypes,
        }
    }

    fn kind_index_mut(&mut self, kind: ObjKind) -> &mut BTreeSet<String> {
        match kind {
            ObjKind::Group => &mut self.groups,
            ObjKind::Dataset => &mut self.datasets,
            ObjKind::Datatype => &mut self.datatypes,
        }
    }

    /// Insert a chunk into its dataset's chunk set, creating a placeholder
    /// dataset record when the dataset is not hydrated yet. Placeholders are
    /// kept out of the kind index until a scan or PUT fills in real stats.
    fn attach_chunk(&mut self, dsetid: &str, chunkid: &str) {
        let dset = self
            .s3keys
            .entry(dsetid.to_string())
            .or_insert_with(ObjectRecord::placeholder);
        dset.chunks
            .get_or_insert_with(BTreeSet::new)
            .insert(chunkid.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT: &str = "g-00000000-0000-0000-0000-00000000aaaa";
    const GROUP: &str = "g-00000000-0000-0000-0000-00000000bbbb";
    const DSET: &str = "d-00000000-0000-0000-0000-00000000cccc";
    const CHUNK0: &str = "c-00000000-0000-0000-0000-00000000cccc_0";
    const CHUNK1: &str = "c-00000000-0000-0000-0000-00000000cccc_1";
    const DOMAIN: &str = "/home/test.h5";

    fn stats(size: u64) -> ObjStats {
        ObjStats {
            etag: format!("etag-{size}"),
            size,
            last_modified: 1000,
        }
    }

    #[test]
    fn upsert_tracks_bytes_and_indexes() {
        let mut graph = ObjectGraph::new();
        graph.upsert_object(GROUP, &stats(10)).unwrap();
        graph.upsert_object(DSET, &stats(20)).unwrap();

        assert_eq!(graph.bytes_in_bucket(), 30);
        assert_eq!(graph.kind_ids(ObjKind::Group), vec![GROUP.to_string()]);
        assert_eq!(graph.kind_ids(ObjKind::Dataset), vec![DSET.to_string()]);
        assert!(graph.get(DSET).unwrap().chunks.is_some());

        // replace adjusts bytes by the delta
        graph.upsert_object(GROUP, &stats(15)).unwrap();
        assert_eq!(graph.bytes_in_bucket(), 35);
        assert_eq!(graph.stats(0).object_count, 2);
    }

    #[test]
    fn replace_preserves_marks_and_chunks() {
        let mut graph = ObjectGraph::new();
        graph.upsert_object(DSET, &stats(20)).unwrap();
        graph.upsert_object(CHUNK0, &stats(5)).unwrap();
        graph.mark_used(DSET);

        graph.upsert_object(DSET, &stats(25)).unwrap();
        let rec = graph.get(DSET).unwrap();
        assert!(rec.used);
        assert_eq!(rec.chunks.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn chunk_before_dataset_materializes_placeholder() {
        let mut graph = ObjectGraph::new();
        graph.upsert_object(CHUNK0, &stats(5)).unwrap();

        // placeholder dataset exists in the arena but not in the kind index
        let dset = graph.get(DSET).unwrap();
        assert!(dset.etag.is_none());
        assert!(dset.chunks.as_ref().unwrap().contains(CHUNK0));
        assert!(graph.kind_ids(ObjKind::Dataset).is_empty());

        // a later stat refresh keeps the attached chunk and joins the index
        graph.upsert_object(DSET, &stats(20)).unwrap();
        let dset = graph.get(DSET).unwrap();
        assert_eq!(dset.etag.as_deref(), Some("etag-20"));
        assert!(dset.chunks.as_ref().unwrap().contains(CHUNK0));
        assert_eq!(graph.kind_ids(ObjKind::Dataset), vec![DSET.to_string()]);
    }

    #[test]
    fn remove_object_fixes_every_index() {
        let mut graph = ObjectGraph::new();
        graph.upsert_object(DSET, &stats(20)).unwrap();
        graph.upsert_object(CHUNK0, &stats(5)).unwrap();
        graph.upsert_object(CHUNK1, &stats(7)).unwrap();
        graph.attach_to_root(DSET, ROOT);
        assert_eq!(graph.bytes_in_bucket(), 32);

        let rec = graph.remove_object(CHUNK0).unwrap();
        assert_eq!(rec.size, 5);
        assert_eq!(graph.bytes_in_bucket(), 27);
        assert!(!graph.get(DSET).unwrap().chunks.as_ref().unwrap().contains(CHUNK0));

        graph.remove_object(DSET).unwrap();
        assert!(graph.get(DSET).is_none());
        assert!(graph.kind_ids(ObjKind::Dataset).is_empty());
        assert!(graph.root_record(ROOT).unwrap().datasets.is_empty());
        // the remaining chunk is swept separately
        assert_eq!(graph.stats(0).chunk_count, 1);
    }

    #[test]
    fn domain_lifecycle() {
        let mut graph = ObjectGraph::new();
        graph.insert_domain(DOMAIN, &stats(3), Some(ROOT.to_string()));
        assert!(graph.contains_domain(DOMAIN));
        assert_eq!(graph.domain_root(DOMAIN).as_deref(), Some(ROOT));
        // root placeholder materialized
        assert!(graph.root_record(ROOT).is_some());
        assert!(graph.get(ROOT).is_some());

        assert!(graph.remove_domain(DOMAIN).is_some());
        assert!(!graph.contains_domain(DOMAIN));
        assert_eq!(graph.bytes_in_bucket(), 0);
    }

    #[test]
    fn invalid_root_is_dropped() {
        let mut graph = ObjectGraph::new();
        graph.insert_domain(DOMAIN, &stats(3), Some("not-a-root".to_string()));
        assert_eq!(graph.domain_root(DOMAIN), None);
    }

    #[test]
    fn domain_resolution_follows_parent_chain() {
        let mut graph = ObjectGraph::new();
        graph.insert_domain(DOMAIN, &stats(3), Some(ROOT.to_string()));
        graph.upsert_object(DSET, &stats(20)).unwrap();
        graph.upsert_object(CHUNK0, &stats(5)).unwrap();
        graph.attach_to_root(DSET, ROOT);

        assert_eq!(graph.domain_of(DSET).as_deref(), Some(DOMAIN));
        assert_eq!(graph.domain_of(CHUNK0).as_deref(), Some(DOMAIN));
        assert_eq!(graph.domain_of(ROOT).as_deref(), Some(DOMAIN));
        assert_eq!(graph.domain_of(GROUP), None);
    }

    #[test]
    fn root_removal_drops_dependent_domains() {
        let mut graph = ObjectGraph::new();
        graph.insert_domain(DOMAIN, &stats(3), Some(ROOT.to_string()));
        graph.remove_root(ROOT);
        assert!(!graph.contains_domain(DOMAIN));
        assert!(graph.root_record(ROOT).is_none());
    }

    #[test]
    fn marks_clear_and_set() {
        let mut graph = ObjectGraph::new();
        graph.upsert_object(GROUP, &stats(10)).unwrap();
        assert!(graph.mark_used(GROUP));
        assert!(graph.get(GROUP).unwrap().used);
        graph.clear_marks();
        assert!(!graph.get(GROUP).unwrap().used);
        assert!(!graph.mark_used("g-00000000-0000-0000-0000-000000009999"));
    }

    #[test]
    fn conservative_mark_covers_members_and_chunks() {
        let mut graph = ObjectGraph::new();
        graph.upsert_object(DSET, &stats(20)).unwrap();
        graph.upsert_object(CHUNK0, &stats(5)).unwrap();
        graph.attach_to_root(DSET, ROOT);

        graph.mark_root_members(ROOT);
        assert!(graph.get(DSET).unwrap().used);
        assert!(graph.get(CHUNK0).unwrap().used);
    }
}
