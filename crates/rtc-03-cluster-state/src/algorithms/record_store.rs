//! # Record Store
//!
//! Live resource records plus the tombstone bookkeeping that lets vacant
//! records be garbage collected.
//!
//! A record that stays vacant for the retention period is buried: the record
//! is dropped and its advertised versions are kept, for one more retention
//! period, as the low-water mark of the resource. While a mark is held,
//! peer state at or below it is stale, and peer state above it revives the
//! record from the mark so that older slots still lose the merge.

use shared_types::{FilterId, NodeId, RoomId};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::time::Instant;

use super::reconcile::is_newer;
use crate::domain::{ResourceRecord, ResourceVersion, Slot, Version};

/// Low-water mark of a collected record.
#[derive(Clone, Debug)]
struct Mark {
    advertised: ResourceVersion,
    buried_at: Instant,
}

/// Replicated records of one node
#[derive(Debug, Default)]
pub struct RecordStore {
    records: HashMap<RoomId, ResourceRecord>,
    /// When each vacant record last became vacant.
    vacant_since: HashMap<RoomId, Instant>,
    marks: HashMap<RoomId, Mark>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, resource: &RoomId) -> Option<&ResourceRecord> {
        self.records.get(resource)
    }

    pub fn get_mut(&mut self, resource: &RoomId) -> Option<&mut ResourceRecord> {
        self.records.get_mut(resource)
    }

    pub fn records(&self) -> impl Iterator<Item = &ResourceRecord> {
        self.records.values()
    }

    pub fn records_mut(&mut self) -> impl Iterator<Item = &mut ResourceRecord> {
        self.records.values_mut()
    }

    /// Number of live records, tombstones included.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of low-water marks still held.
    pub fn mark_count(&self) -> usize {
        self.marks.len()
    }

    /// The live record of a filter's resource.
    ///
    /// A missing record is revived from its low-water mark when one is held,
    /// otherwise created vacant at `version`.
    pub fn entry(&mut self, filter_id: &FilterId, filter: &str, version: &Version) -> &mut ResourceRecord {
        let resource = RoomId::for_filter(filter_id);
        let marks = &mut self.marks;
        self.records
            .entry(resource)
            .or_insert_with_key(|resource| match marks.remove(resource) {
                Some(mark) => revive(filter_id.clone(), filter.to_string(), mark.advertised),
                None => ResourceRecord::vacant(filter_id.clone(), filter.to_string(), version.clone()),
            })
    }

    /// Whether a peer's advertised state holds anything we lack.
    ///
    /// A held mark counts as local state.
    pub fn is_newer(&self, remote: &ResourceVersion) -> bool {
        match (self.records.get(&remote.resource), self.marks.get(&remote.resource)) {
            (Some(local), _) => is_newer(remote, Some(local)),
            (None, Some(mark)) => above_mark(remote, &mark.advertised),
            (None, None) => true,
        }
    }

    /// Resources a peer advertises newer state for, in advertised order.
    pub fn newer_resources(&self, remote: &[ResourceVersion]) -> Vec<RoomId> {
        remote
            .iter()
            .filter(|advertised| self.is_newer(advertised))
            .map(|advertised| advertised.resource.clone())
            .collect()
    }

    /// Track whether a record is vacant after a mutation.
    pub fn refresh(&mut self, resource: &RoomId, now: Instant) {
        match self.records.get(resource) {
            Some(record) if record.is_vacant() => {
                self.vacant_since.entry(resource.clone()).or_insert(now);
            }
            _ => {
                self.vacant_since.remove(resource);
            }
        }
    }

    /// `refresh` every record.
    pub fn refresh_all(&mut self, now: Instant) {
        let resources: Vec<RoomId> = self.records.keys().cloned().collect();
        for resource in &resources {
            self.refresh(resource, now);
        }
    }

    /// Bury records vacant for at least `retention`, except those `held`
    /// reports busy, and forget marks older than `retention`.
    ///
    /// Returns the resources buried.
    pub fn gc_expired(
        &mut self,
        now: Instant,
        retention: Duration,
        held: impl Fn(&RoomId) -> bool,
    ) -> Vec<RoomId> {
        self.marks
            .retain(|_, mark| now.saturating_duration_since(mark.buried_at) < retention);

        let expired: Vec<RoomId> = self
            .vacant_since
            .iter()
            .filter(|(resource, since)| now.saturating_duration_since(**since) >= retention && !held(resource))
            .map(|(resource, _)| resource.clone())
            .collect();

        let mut buried = Vec::with_capacity(expired.len());
        for resource in expired {
            self.vacant_since.remove(&resource);
            let Some(record) = self.records.remove(&resource) else {
                continue;
            };
            if !record.is_vacant() {
                self.records.insert(resource, record);
                continue;
            }
            self.marks.insert(
                resource.clone(),
                Mark {
                    advertised: record.advertised(),
                    buried_at: now,
                },
            );
            buried.push(resource);
        }
        buried
    }
}

fn above_mark(remote: &ResourceVersion, mark: &ResourceVersion) -> bool {
    remote.version > mark.version
        || remote
            .seqs
            .iter()
            .any(|(node, seq)| *seq > mark.seqs.get(node).copied().unwrap_or(0))
}

/// A vacant record carrying the versions of a mark.
fn revive(filter_id: FilterId, filter: String, mark: ResourceVersion) -> ResourceRecord {
    let mut record = ResourceRecord::vacant(filter_id, filter, mark.version);
    record.slots = mark
        .seqs
        .into_iter()
        .map(|(node, seq): (NodeId, u64)| {
            (
                node,
                Slot {
                    seq,
                    members: BTreeSet::new(),
                },
            )
        })
        .collect();
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::ConnectionId;

    const RETENTION: Duration = Duration::from_secs(10);

    fn node(id: &str) -> NodeId {
        NodeId::new(id)
    }

    fn filter(id: &str) -> FilterId {
        FilterId::new(id)
    }

    /// Writes `seq` into `writer`'s slot of resource `id`.
    fn write(store: &mut RecordStore, id: &str, writer: &str, seq: u64, members: &[&str], now: Instant) {
        let record = store.entry(&filter(id), "{}", &Version::initial(node(writer)));
        record.slots.insert(
            node(writer),
            Slot {
                seq,
                members: members.iter().map(|c| ConnectionId::new(*c)).collect(),
            },
        );
        record.version = Version { counter: seq, node: node(writer) };
        store.refresh(&RoomId::for_filter(&filter(id)), now);
    }

    fn advertised(id: &str, writer: &str, seq: u64) -> ResourceVersion {
        ResourceVersion {
            resource: RoomId::new(id),
            version: Version { counter: seq, node: node(writer) },
            seqs: [(node(writer), seq)].into_iter().collect(),
        }
    }

    #[test]
    fn test_vacant_records_buried_after_retention() {
        let t0 = Instant::now();
        let mut store = RecordStore::new();
        write(&mut store, "f1", "a", 1, &["a1"], t0);
        write(&mut store, "f2", "a", 1, &["a1"], t0);
        write(&mut store, "f1", "a", 2, &[], t0);

        assert!(store.gc_expired(t0 + RETENTION / 2, RETENTION, |_| false).is_empty());
        assert_eq!(store.len(), 2);

        let buried = store.gc_expired(t0 + RETENTION, RETENTION, |_| false);
        assert_eq!(buried, vec![RoomId::new("f1")]);
        assert_eq!(store.len(), 1);
        assert_eq!(store.mark_count(), 1);
    }

    #[test]
    fn test_refilled_record_is_not_buried() {
        let t0 = Instant::now();
        let mut store = RecordStore::new();
        write(&mut store, "f1", "a", 1, &[], t0);
        write(&mut store, "f1", "b", 1, &["b1"], t0);

        assert!(store.gc_expired(t0 + RETENTION, RETENTION, |_| false).is_empty());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_held_resource_is_skipped() {
        let t0 = Instant::now();
        let mut store = RecordStore::new();
        write(&mut store, "f1", "a", 1, &[], t0);

        assert!(store.gc_expired(t0 + RETENTION, RETENTION, |_| true).is_empty());
        assert_eq!(store.gc_expired(t0 + RETENTION, RETENTION, |_| false).len(), 1);
    }

    #[test]
    fn test_mark_rejects_stale_state_and_revives_newer() {
        let t0 = Instant::now();
        let mut store = RecordStore::new();
        write(&mut store, "f1", "b", 1, &["b1"], t0);
        write(&mut store, "f1", "b", 2, &[], t0);
        store.gc_expired(t0 + RETENTION, RETENTION, |_| false);

        assert!(!store.is_newer(&advertised("f1", "b", 1)));
        assert!(!store.is_newer(&advertised("f1", "b", 2)));
        assert!(store.is_newer(&advertised("f1", "b", 3)));
        assert!(store.is_newer(&advertised("f9", "b", 1)));

        // Revival restores the buried seqs.
        let record = store.entry(&filter("f1"), "{}", &Version::initial(node("a")));
        assert_eq!(record.seq_of(&node("b")), 2);
        assert!(record.is_vacant());
        assert_eq!(store.mark_count(), 0);
    }

    #[test]
    fn test_marks_expire_after_second_retention() {
        let t0 = Instant::now();
        let mut store = RecordStore::new();
        write(&mut store, "f1", "a", 1, &[], t0);
        store.gc_expired(t0 + RETENTION, RETENTION, |_| false);
        assert_eq!(store.mark_count(), 1);

        store.gc_expired(t0 + RETENTION * 2, RETENTION, |_| false);
        assert_eq!(store.mark_count(), 0);
        assert!(store.is_empty());
    }
}
