//! Cluster State Manager
//!
//! Orchestrates the room registry, the lock manager and the transport.
//!
//! Local mutations follow one path: lock the resource, mutate the registry,
//! write our own slot under a new version, broadcast the delta, release.
//! Peer state arrives either as deltas (merged without locking, since a
//! delta only ever touches its writer's slot) or through a sync round, which
//! preempts the resource lock before adopting.
//!
//! Records that stay vacant for `tombstone_retention` are collected by
//! `gc`; their low-water marks keep stale peer state from reviving them.
//!
//! Lock order: `records` before the registry and the lock table. No
//! `parking_lot` guard is held across an `.await`.

use async_trait::async_trait;
use parking_lot::RwLock;
use rtc_01_filter_engine::NormalizedFilter;
use rtc_02_room_registry::{RoomRegistry, RoomRegistryApi, UnsubscribeOutcome};
use rtc_telemetry::metrics::{
    CLUSTER_DELTAS, CLUSTER_DESYNCS, CLUSTER_SYNCS, CLUSTER_SYNC_DURATION, DOCUMENTS_TESTED,
    LOCK_BUSY, LOCK_TIMEOUTS, ROOMS_MATCHED, TOMBSTONES_COLLECTED,
};
use rtc_telemetry::time_histogram;
use shared_types::{ConnectionId, Document, NodeId, NodeState, RoomId, Subscriber};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::algorithms::{merge_record, write_own_slot, LockGuard, LockManager, MergeOutcome, RecordStore};
use crate::config::ClusterConfig;
use crate::domain::{
    ClusterDelta, ClusterError, DeltaOutcome, FilterRegistration, LockMode, ResourceRecord,
    ResourceState, ResourceVersion, SyncKind, SyncReport, Version,
};
use crate::ports::{ClusterApi, ClusterTransport};

/// Cluster state manager
///
/// Implements the `ClusterApi` port over an injected transport.
pub struct ClusterStateManager<T: ClusterTransport> {
    config: ClusterConfig,
    registry: Arc<RoomRegistry>,
    transport: T,
    locks: LockManager,
    /// Replicated records, tombstones included.
    records: RwLock<RecordStore>,
    state: RwLock<NodeState>,
}

impl<T: ClusterTransport> ClusterStateManager<T> {
    pub fn new(config: ClusterConfig, registry: Arc<RoomRegistry>, transport: T) -> Result<Self, ClusterError> {
        config.validate()?;
        Ok(Self {
            config,
            registry,
            transport,
            locks: LockManager::new(),
            records: RwLock::new(RecordStore::new()),
            state: RwLock::new(NodeState::Joining),
        })
    }

    pub fn node_id(&self) -> &NodeId {
        &self.config.node_id
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn node_state(&self) -> NodeState {
        *self.state.read()
    }

    /// Advertised versions of every record, ordered by resource.
    pub fn versions(&self) -> Vec<ResourceVersion> {
        let mut versions: Vec<ResourceVersion> = self
            .records
            .read()
            .records()
            .map(ResourceRecord::advertised)
            .collect();
        versions.sort_by(|a, b| a.resource.cmp(&b.resource));
        versions
    }

    /// Full records, all of them or the requested ones that exist.
    pub fn snapshot(&self, resources: Option<&[RoomId]>) -> Vec<ResourceRecord> {
        let records = self.records.read();
        let mut snapshot: Vec<ResourceRecord> = match resources {
            Some(wanted) => wanted.iter().filter_map(|id| records.get(id)).cloned().collect(),
            None => records.records().cloned().collect(),
        };
        snapshot.sort_by(|a, b| a.resource.cmp(&b.resource));
        snapshot
    }

    pub fn record(&self, resource: &RoomId) -> Option<ResourceRecord> {
        self.records.read().get(resource).cloned()
    }

    pub fn record_count(&self) -> usize {
        self.records.read().len()
    }

    /// Low-water marks left by collected records.
    pub fn mark_count(&self) -> usize {
        self.records.read().mark_count()
    }

    /// Join the cluster: pull a full snapshot from every reachable peer,
    /// then start serving.
    ///
    /// Fails and stays `Joining` when peers exist but none answered.
    pub async fn start(&self) -> Result<SyncReport, ClusterError> {
        self.set_state(NodeState::Syncing);
        let report = self.sync_round(SyncKind::Full).await;

        if report.peers > 0 && report.failed_peers.len() == report.peers {
            self.set_state(NodeState::Joining);
            return Err(ClusterError::Transport(format!(
                "no peer answered the initial sync ({} asked)",
                report.peers
            )));
        }

        self.set_state(NodeState::Running);
        info!(
            node = %self.node_id(),
            peers = report.peers,
            records = self.record_count(),
            "Cluster node running"
        );
        Ok(report)
    }

    /// Subscribe a local connection with an explicit lock mode.
    pub async fn register_filter_with(
        &self,
        body: &Document,
        connection: ConnectionId,
        mode: LockMode,
    ) -> Result<FilterRegistration, ClusterError> {
        self.ensure_running()?;
        let filter = self.registry.compile(body)?;
        let room_id = RoomId::for_filter(&filter.id);
        let own = self.node_id();

        let guard = self.acquire(&room_id, ResourceState::LockedForCreate, mode).await?;
        let (outcome, delta) = {
            let mut records = self.records.write();
            guard.ensure_valid()?;

            let outcome = self
                .registry
                .subscribe_normalized(&filter, Subscriber::new(own.clone(), connection.clone()));
            let delta = outcome.subscribed.then(|| {
                let record = records.entry(&filter.id, &filter.canonical, &Version::initial(own.clone()));
                let delta = write_own_slot(record, own, self.registry.members_of(&room_id, own), 0);
                records.refresh(&room_id, Instant::now());
                delta
            });
            (outcome, delta)
        };

        if let Some(delta) = &delta {
            self.publish(delta).await;
        }
        drop(guard);

        debug!(
            room_id = %room_id,
            connection = %connection,
            subscribed = outcome.subscribed,
            room_created = outcome.room_created,
            "Filter registered"
        );
        Ok(FilterRegistration {
            filter_id: outcome.filter_id,
            room_id: outcome.room_id,
            subscribed: outcome.subscribed,
            room_created: outcome.room_created,
        })
    }

    /// Unsubscribe a local connection with an explicit lock mode.
    pub async fn remove_subscription_with(
        &self,
        room_id: &RoomId,
        connection: &ConnectionId,
        mode: LockMode,
    ) -> Result<UnsubscribeOutcome, ClusterError> {
        self.ensure_running()?;
        let own = self.node_id();

        let guard = self.acquire(room_id, ResourceState::LockedForDelete, mode).await?;
        let (outcome, delta) = {
            let mut records = self.records.write();
            guard.ensure_valid()?;

            let outcome = self
                .registry
                .unsubscribe(room_id, &Subscriber::new(own.clone(), connection.clone()));
            let delta = match (outcome, records.get_mut(room_id)) {
                (UnsubscribeOutcome::Removed { .. }, Some(record)) => {
                    let delta = write_own_slot(record, own, self.registry.members_of(room_id, own), 0);
                    records.refresh(room_id, Instant::now());
                    Some(delta)
                }
                _ => None,
            };
            (outcome, delta)
        };

        if let Some(delta) = &delta {
            self.publish(delta).await;
        }
        drop(guard);

        debug!(room_id = %room_id, connection = %connection, outcome = ?outcome, "Subscription removed");
        Ok(outcome)
    }

    /// Drop a connection from every room it joined. Returns the rooms left.
    ///
    /// Every room is attempted; the first failure is returned afterwards.
    pub async fn disconnect(&self, connection: &ConnectionId) -> Result<usize, ClusterError> {
        self.ensure_running()?;
        let rooms = self
            .registry
            .rooms_of(&Subscriber::new(self.node_id().clone(), connection.clone()));

        let mut left = 0;
        let mut first_error = None;
        for room_id in &rooms {
            match self
                .remove_subscription_with(room_id, connection, self.config.lock_mode())
                .await
            {
                Ok(UnsubscribeOutcome::Removed { .. }) => left += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!(room_id = %room_id, connection = %connection, error = %e, "Disconnect left room subscribed");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                debug!(connection = %connection, rooms = left, "Connection disconnected");
                Ok(left)
            }
        }
    }

    /// Merge a delta broadcast by `origin`.
    ///
    /// Stale and duplicate slots are ignored. A delta whose filter does not
    /// compile to its advertised id is a `ClusterDesync`.
    pub fn apply_delta(&self, origin: &NodeId, delta: ClusterDelta) -> Result<DeltaOutcome, ClusterError> {
        if &delta.node == self.node_id() {
            warn!(origin = %origin, resource = %delta.resource, "Delta for our own slot ignored");
            CLUSTER_DELTAS.with_label_values(&["ignored"]).inc();
            return Ok(DeltaOutcome::Ignored);
        }
        if &delta.node != origin {
            CLUSTER_DESYNCS.inc();
            return Err(ClusterError::desync(
                &delta.resource,
                format!("delta for {} sent by {}", delta.node, origin),
            ));
        }

        let remote = delta.into_record();
        let filter = self.verify(&remote).inspect_err(|_| CLUSTER_DESYNCS.inc())?;
        let newer = self.records.read().is_newer(&remote.advertised());
        let changed = newer && !self.merge_into_local(&remote, &filter).0.changed.is_empty();

        if !changed {
            debug!(origin = %origin, resource = %remote.resource, "Stale delta ignored");
            CLUSTER_DELTAS.with_label_values(&["ignored"]).inc();
            Ok(DeltaOutcome::Ignored)
        } else {
            debug!(origin = %origin, resource = %remote.resource, version = remote.version.counter, "Delta applied");
            CLUSTER_DELTAS.with_label_values(&["applied"]).inc();
            Ok(DeltaOutcome::Applied)
        }
    }

    /// Forget every slot held by a departed node.
    pub fn handle_node_left(&self, node: &NodeId) -> BTreeSet<RoomId> {
        if node == self.node_id() {
            return BTreeSet::new();
        }
        let mut records = self.records.write();
        for record in records.records_mut() {
            record.slots.remove(node);
        }
        records.refresh_all(Instant::now());
        let touched = self.registry.evict_node(node);
        info!(node = %node, rooms = touched.len(), "Departed node's slots dropped");
        touched
    }

    /// Collect records vacant for longer than `tombstone_retention`.
    ///
    /// Call from a timer task; `ClusterBusAdapter::run` does so once per
    /// retention period. Locked resources are left for the next pass.
    /// Returns the number of records collected.
    pub fn gc(&self) -> usize {
        let collected = self
            .records
            .write()
            .gc_expired(Instant::now(), self.config.tombstone_retention, |resource| {
                self.locks.state(resource).is_locked()
            });

        if !collected.is_empty() {
            TOMBSTONES_COLLECTED.inc_by(collected.len() as f64);
            debug!(node = %self.node_id(), collected = collected.len(), "Vacant records collected");
        }
        collected.len()
    }

    fn set_state(&self, state: NodeState) {
        let mut current = self.state.write();
        if *current != state {
            debug!(node = %self.config.node_id, from = ?*current, to = ?state, "Node state changed");
            *current = state;
        }
    }

    fn ensure_running(&self) -> Result<(), ClusterError> {
        let state = self.node_state();
        if state.is_serving() {
            Ok(())
        } else {
            Err(ClusterError::NotReady { state })
        }
    }

    async fn acquire(
        &self,
        resource: &RoomId,
        intent: ResourceState,
        mode: LockMode,
    ) -> Result<LockGuard, ClusterError> {
        let result = match mode {
            LockMode::TryOnce => self.locks.try_acquire(resource, intent),
            LockMode::Until(deadline) => self.locks.acquire_until(resource, intent, deadline).await,
        };
        match &result {
            Err(ClusterError::ResourceBusy { .. }) => LOCK_BUSY.inc(),
            Err(ClusterError::LockTimeout { .. }) => LOCK_TIMEOUTS.inc(),
            _ => {}
        }
        result
    }

    /// Compile a peer's filter body and check it against the advertised ids.
    fn verify(&self, record: &ResourceRecord) -> Result<NormalizedFilter, ClusterError> {
        let body: Document = serde_json::from_str(&record.filter)
            .map_err(|e| ClusterError::desync(&record.resource, format!("filter is not JSON: {e}")))?;
        let filter = self
            .registry
            .compile(&body)
            .map_err(|e| ClusterError::desync(&record.resource, format!("filter does not compile: {e}")))?;

        if filter.id != record.filter_id {
            return Err(ClusterError::desync(
                &record.resource,
                format!("filter compiles to {}, advertised {}", filter.id, record.filter_id),
            ));
        }
        if RoomId::for_filter(&filter.id) != record.resource {
            return Err(ClusterError::desync(&record.resource, "resource does not match filter id"));
        }
        Ok(filter)
    }

    /// Merge a verified record and mirror the changed slots into the registry.
    ///
    /// Returns the re-announcement of our own slot when a peer held a newer
    /// copy of it.
    fn merge_into_local(
        &self,
        remote: &ResourceRecord,
        filter: &NormalizedFilter,
    ) -> (MergeOutcome, Option<ClusterDelta>) {
        let own = self.node_id();
        let mut records = self.records.write();
        let local = records.entry(&remote.filter_id, &remote.filter, &remote.version);

        let outcome = merge_record(local, remote, own);
        for node in &outcome.changed {
            if let Some(slot) = local.slots.get(node) {
                self.registry.set_node_members(filter, node, &slot.members);
            }
        }

        let rebroadcast = outcome.own_seq_ahead.map(|floor| {
            warn!(resource = %remote.resource, peer_seq = floor, "Peer holds a newer copy of our slot");
            write_own_slot(local, own, self.registry.members_of(&remote.resource, own), floor)
        });
        records.refresh(&remote.resource, Instant::now());
        (outcome, rebroadcast)
    }

    /// Adopt a peer record if it holds anything we lack.
    fn adopt(&self, remote: &ResourceRecord) -> Result<Option<(MergeOutcome, Option<ClusterDelta>)>, ClusterError> {
        if !self.records.read().is_newer(&remote.advertised()) {
            return Ok(None);
        }
        let filter = self.verify(remote)?;
        let _guard = self.locks.preempt(&remote.resource);
        Ok(Some(self.merge_into_local(remote, &filter)))
    }

    async fn pull(&self, peer: &NodeId, kind: SyncKind) -> Result<Vec<ResourceRecord>, ClusterError> {
        match kind {
            SyncKind::Full => self.transport.fetch_snapshot(peer, None).await,
            SyncKind::Versions => {
                let advertised = self.transport.fetch_versions(peer).await?;
                let wanted = self.records.read().newer_resources(&advertised);
                if wanted.is_empty() {
                    return Ok(Vec::new());
                }
                self.transport.fetch_snapshot(peer, Some(wanted)).await
            }
        }
    }

    /// One synchronisation round against every reachable peer.
    async fn sync_round(&self, kind: SyncKind) -> SyncReport {
        let _timer = time_histogram!(CLUSTER_SYNC_DURATION);
        CLUSTER_SYNCS.with_label_values(&[kind.label()]).inc();

        let peers = self.transport.peers().await;
        let mut report = SyncReport::new(kind);
        report.peers = peers.len();
        let mut rebroadcasts = Vec::new();

        for peer in peers {
            let records = match self.pull(&peer, kind).await {
                Ok(records) => records,
                Err(e) => {
                    warn!(peer = %peer, kind = kind.label(), error = %e, "Peer sync failed");
                    report.failed_peers.push(peer);
                    continue;
                }
            };

            for record in &records {
                match self.adopt(record) {
                    Ok(Some((outcome, rebroadcast))) => {
                        if !outcome.is_noop() {
                            report.adopted += 1;
                        }
                        rebroadcasts.extend(rebroadcast);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        CLUSTER_DESYNCS.inc();
                        warn!(peer = %peer, resource = %record.resource, error = %e, "Peer record rejected");
                        report.desynced.push(record.resource.clone());
                    }
                }
            }
        }

        report.rebroadcast = rebroadcasts.len();
        for delta in &rebroadcasts {
            self.publish(delta).await;
        }

        info!(
            node = %self.node_id(),
            kind = kind.label(),
            peers = report.peers,
            failed = report.failed_peers.len(),
            adopted = report.adopted,
            desynced = report.desynced.len(),
            "Cluster sync finished"
        );
        report
    }

    async fn publish(&self, delta: &ClusterDelta) {
        match self.transport.broadcast(delta).await {
            Ok(receivers) => {
                CLUSTER_DELTAS.with_label_values(&["sent"]).inc();
                debug!(resource = %delta.resource, seq = delta.slot.seq, receivers, "Delta broadcast");
            }
            // Peers catch up on their next sync.
            Err(e) => warn!(resource = %delta.resource, error = %e, "Delta broadcast failed"),
        }
    }
}

#[async_trait]
impl<T: ClusterTransport + 'static> ClusterApi for ClusterStateManager<T> {
    async fn register_filter(
        &self,
        body: &Document,
        connection: ConnectionId,
    ) -> Result<FilterRegistration, ClusterError> {
        self.register_filter_with(body, connection, self.config.lock_mode())
            .await
    }

    async fn remove_subscription(
        &self,
        room_id: &RoomId,
        connection: &ConnectionId,
    ) -> Result<UnsubscribeOutcome, ClusterError> {
        self.remove_subscription_with(room_id, connection, self.config.lock_mode())
            .await
    }

    fn test_document(&self, document: &Document) -> BTreeSet<RoomId> {
        let rooms = self.registry.test_document(document);
        DOCUMENTS_TESTED.inc();
        ROOMS_MATCHED.inc_by(rooms.len() as f64);
        rooms
    }

    async fn cluster_sync(&self) -> Result<SyncReport, ClusterError> {
        let report = self.sync_round(SyncKind::Versions).await;
        if report.desynced.is_empty() {
            return Ok(report);
        }
        warn!(desynced = report.desynced.len(), "Version sync hit inconsistent records, pulling full snapshots");
        Ok(self.sync_round(SyncKind::Full).await)
    }

    async fn cluster_sync_all(&self) -> Result<SyncReport, ClusterError> {
        Ok(self.sync_round(SyncKind::Full).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClusterConfigBuilder;
    use crate::domain::Slot;
    use crate::ports::MockTransport;
    use serde_json::json;
    use shared_types::FilterId;
    use std::time::Duration;

    const RETENTION: Duration = Duration::from_secs(60);

    fn conn(id: &str) -> ConnectionId {
        ConnectionId::new(id)
    }

    async fn running(node: &str) -> ClusterStateManager<MockTransport> {
        let manager = ClusterStateManager::new(
            ClusterConfig::for_node(node),
            Arc::new(RoomRegistry::with_defaults()),
            MockTransport::new(),
        )
        .unwrap();
        manager.start().await.unwrap();
        manager
    }

    async fn running_with_retention(node: &str) -> ClusterStateManager<MockTransport> {
        let config = ClusterConfigBuilder::new()
            .node_id(NodeId::new(node))
            .tombstone_retention(RETENTION)
            .build()
            .unwrap();
        let manager =
            ClusterStateManager::new(config, Arc::new(RoomRegistry::with_defaults()), MockTransport::new()).unwrap();
        manager.start().await.unwrap();
        manager
    }

    /// A delta as node `writer` would broadcast it.
    fn peer_delta(
        manager: &ClusterStateManager<MockTransport>,
        body: &Document,
        writer: &str,
        seq: u64,
        members: &[&str],
    ) -> ClusterDelta {
        let filter = manager.registry().compile(body).unwrap();
        ClusterDelta {
            resource: RoomId::for_filter(&filter.id),
            filter_id: filter.id,
            filter: filter.canonical,
            version: Version { counter: seq, node: NodeId::new(writer) },
            node: NodeId::new(writer),
            slot: Slot {
                seq,
                members: members.iter().map(|id| conn(id)).collect(),
            },
        }
    }

    #[tokio::test]
    async fn test_traffic_rejected_before_start() {
        let manager = ClusterStateManager::new(
            ClusterConfig::for_node("a"),
            Arc::new(RoomRegistry::with_defaults()),
            MockTransport::new(),
        )
        .unwrap();

        let result = manager.register_filter(&json!({}), conn("c1")).await;
        assert_eq!(result.unwrap_err(), ClusterError::NotReady { state: NodeState::Joining });

        let report = manager.start().await.unwrap();
        assert_eq!(report.peers, 0);
        assert_eq!(manager.node_state(), NodeState::Running);
    }

    #[tokio::test]
    async fn test_register_broadcasts_own_slot() {
        let manager = running("a").await;
        let body = json!({"term": {"city": "NYC"}});

        let first = manager.register_filter(&body, conn("c1")).await.unwrap();
        assert!(first.subscribed && first.room_created);

        let again = manager.register_filter(&body, conn("c1")).await.unwrap();
        assert!(!again.subscribed);

        let sent = manager.transport().sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].node, NodeId::new("a"));
        assert_eq!(sent[0].slot.members, BTreeSet::from([conn("c1")]));

        let record = manager.record(&first.room_id).unwrap();
        assert_eq!(record.version.counter, 1);
        assert_eq!(manager.locks().entry_count(), 0);
    }

    #[tokio::test]
    async fn test_remove_keeps_tombstone_record() {
        let manager = running("a").await;
        let registration = manager.register_filter(&json!({"exists": "name"}), conn("c1")).await.unwrap();

        let outcome = manager.remove_subscription(&registration.room_id, &conn("c1")).await.unwrap();
        assert_eq!(outcome, UnsubscribeOutcome::Removed { room_destroyed: true });
        assert!(!manager.registry().contains_room(&registration.room_id));

        let record = manager.record(&registration.room_id).unwrap();
        assert!(record.is_vacant());
        assert_eq!(record.seq_of(&NodeId::new("a")), 2);

        // Duplicate unsubscribe is a silent no-op.
        let again = manager.remove_subscription(&registration.room_id, &conn("c1")).await.unwrap();
        assert_eq!(again, UnsubscribeOutcome::UnknownRoom);
        assert_eq!(manager.transport().sent().len(), 2);
    }

    #[tokio::test]
    async fn test_busy_resource_fails_fast() {
        let manager = running("a").await;
        let body = json!({"term": {"city": "NYC"}});
        let room_id = RoomId::for_filter(&manager.registry().compile(&body).unwrap().id);

        let _held = manager.locks().try_acquire(&room_id, ResourceState::LockedForDelete).unwrap();
        let result = manager.register_filter(&body, conn("c1")).await;
        assert!(matches!(result, Err(ClusterError::ResourceBusy { .. })));
        assert!(!manager.registry().contains_room(&room_id));
    }

    #[tokio::test]
    async fn test_broadcast_failure_keeps_local_state() {
        let manager = ClusterStateManager::new(
            ClusterConfig::for_node("a"),
            Arc::new(RoomRegistry::with_defaults()),
            MockTransport::failing(),
        )
        .unwrap();
        manager.start().await.unwrap();

        let registration = manager.register_filter(&json!({}), conn("c1")).await.unwrap();
        assert!(manager.registry().contains_room(&registration.room_id));
    }

    #[tokio::test]
    async fn test_apply_delta_mirrors_remote_members() {
        let manager = running("a").await;
        let body = json!({"term": {"city": "NYC"}});
        let delta = peer_delta(&manager, &body, "b", 1, &["b1"]);
        let room_id = delta.resource.clone();

        assert_eq!(manager.apply_delta(&NodeId::new("b"), delta.clone()).unwrap(), DeltaOutcome::Applied);
        assert_eq!(manager.registry().members_of(&room_id, &NodeId::new("b")), BTreeSet::from([conn("b1")]));
        assert_eq!(manager.test_document(&json!({"city": "NYC"})), BTreeSet::from([room_id.clone()]));

        // Replays and older slots change nothing.
        assert_eq!(manager.apply_delta(&NodeId::new("b"), delta).unwrap(), DeltaOutcome::Ignored);

        let emptied = peer_delta(&manager, &body, "b", 2, &[]);
        assert_eq!(manager.apply_delta(&NodeId::new("b"), emptied).unwrap(), DeltaOutcome::Applied);
        assert!(!manager.registry().contains_room(&room_id));

        let stale = peer_delta(&manager, &body, "b", 1, &["b1"]);
        assert_eq!(manager.apply_delta(&NodeId::new("b"), stale).unwrap(), DeltaOutcome::Ignored);
        assert!(!manager.registry().contains_room(&room_id));
    }

    #[tokio::test]
    async fn test_apply_delta_rejects_mismatched_filter() {
        let manager = running("a").await;
        let mut delta = peer_delta(&manager, &json!({"exists": "name"}), "b", 1, &["b1"]);
        delta.filter_id = FilterId::new("not-the-hash");

        let result = manager.apply_delta(&NodeId::new("b"), delta);
        assert!(matches!(result, Err(ClusterError::ClusterDesync { .. })));
        assert_eq!(manager.registry().room_count(), 0);
    }

    #[tokio::test]
    async fn test_apply_delta_rejects_forwarded_slot() {
        let manager = running("a").await;
        let delta = peer_delta(&manager, &json!({}), "b", 1, &["b1"]);

        let result = manager.apply_delta(&NodeId::new("c"), delta);
        assert!(matches!(result, Err(ClusterError::ClusterDesync { .. })));
    }

    #[tokio::test]
    async fn test_node_left_evicts_its_members() {
        let manager = running("a").await;
        let body = json!({"exists": "name"});
        let registration = manager.register_filter(&body, conn("a1")).await.unwrap();
        manager
            .apply_delta(&NodeId::new("b"), peer_delta(&manager, &body, "b", 1, &["b1"]))
            .unwrap();

        let touched = manager.handle_node_left(&NodeId::new("b"));
        assert_eq!(touched, BTreeSet::from([registration.room_id.clone()]));
        assert_eq!(manager.registry().subscribers(&registration.room_id).unwrap().len(), 1);
        assert_eq!(manager.record(&registration.room_id).unwrap().seq_of(&NodeId::new("b")), 0);

        assert!(manager.handle_node_left(&NodeId::new("a")).is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_leaves_every_room() {
        let manager = running("a").await;
        manager.register_filter(&json!({"exists": "name"}), conn("c1")).await.unwrap();
        manager.register_filter(&json!({"term": {"city": "NYC"}}), conn("c1")).await.unwrap();
        manager.register_filter(&json!({"term": {"city": "NYC"}}), conn("c2")).await.unwrap();

        assert_eq!(manager.disconnect(&conn("c1")).await.unwrap(), 2);
        assert_eq!(manager.registry().room_count(), 1);
        assert_eq!(manager.disconnect(&conn("c1")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_versions_and_snapshot_are_sorted() {
        let manager = running("a").await;
        manager.register_filter(&json!({"exists": "x"}), conn("c1")).await.unwrap();
        manager.register_filter(&json!({"exists": "y"}), conn("c1")).await.unwrap();

        let versions = manager.versions();
        assert_eq!(versions.len(), 2);
        assert!(versions[0].resource < versions[1].resource);

        let wanted = vec![versions[1].resource.clone(), RoomId::new("missing")];
        let snapshot = manager.snapshot(Some(&wanted));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].resource, versions[1].resource);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gc_collects_vacant_records() {
        let manager = running_with_retention("a").await;
        for i in 0..100 {
            let registration = manager.register_filter(&json!({"term": {"f": i}}), conn("c1")).await.unwrap();
            manager.remove_subscription(&registration.room_id, &conn("c1")).await.unwrap();
        }
        assert_eq!(manager.registry().room_count(), 0);
        assert_eq!(manager.record_count(), 100);

        // Not vacant for long enough yet.
        assert_eq!(manager.gc(), 0);

        tokio::time::advance(RETENTION).await;
        assert_eq!(manager.gc(), 100);
        assert_eq!(manager.record_count(), 0);
        assert!(manager.versions().is_empty());
        assert!(manager.snapshot(None).is_empty());
        assert_eq!(manager.mark_count(), 100);

        // Marks go one retention period later.
        tokio::time::advance(RETENTION).await;
        assert_eq!(manager.gc(), 0);
        assert_eq!(manager.mark_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gc_skips_occupied_and_locked_records() {
        let manager = running_with_retention("a").await;
        manager.register_filter(&json!({"exists": "kept"}), conn("c1")).await.unwrap();
        let gone = manager.register_filter(&json!({"exists": "gone"}), conn("c1")).await.unwrap();
        manager.remove_subscription(&gone.room_id, &conn("c1")).await.unwrap();

        tokio::time::advance(RETENTION).await;
        let held = manager.locks().try_acquire(&gone.room_id, ResourceState::LockedForCreate).unwrap();
        assert_eq!(manager.gc(), 0);
        assert_eq!(manager.record_count(), 2);

        drop(held);
        assert_eq!(manager.gc(), 1);
        assert_eq!(manager.record_count(), 1);
        assert!(manager.record(&gone.room_id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_delta_after_gc_does_not_revive_room() {
        let manager = running_with_retention("a").await;
        let body = json!({"term": {"city": "NYC"}});
        let b = NodeId::new("b");
        manager.apply_delta(&b, peer_delta(&manager, &body, "b", 1, &["b1"])).unwrap();
        manager.apply_delta(&b, peer_delta(&manager, &body, "b", 2, &[])).unwrap();

        tokio::time::advance(RETENTION).await;
        assert_eq!(manager.gc(), 1);

        let stale = peer_delta(&manager, &body, "b", 1, &["b1"]);
        let room_id = stale.resource.clone();
        assert_eq!(manager.apply_delta(&b, stale).unwrap(), DeltaOutcome::Ignored);
        assert!(!manager.registry().contains_room(&room_id));
        assert_eq!(manager.record_count(), 0);

        let fresh = peer_delta(&manager, &body, "b", 3, &["b2"]);
        assert_eq!(manager.apply_delta(&b, fresh).unwrap(), DeltaOutcome::Applied);
        assert_eq!(manager.registry().members_of(&room_id, &b), BTreeSet::from([conn("b2")]));
        assert_eq!(manager.record(&room_id).unwrap().seq_of(&b), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubscribe_after_gc_continues_own_seq() {
        let manager = running_with_retention("a").await;
        let body = json!({"exists": "name"});
        let registration = manager.register_filter(&body, conn("c1")).await.unwrap();
        manager.remove_subscription(&registration.room_id, &conn("c1")).await.unwrap();

        tokio::time::advance(RETENTION).await;
        assert_eq!(manager.gc(), 1);

        manager.register_filter(&body, conn("c1")).await.unwrap();
        let record = manager.record(&registration.room_id).unwrap();
        assert_eq!(record.seq_of(&NodeId::new("a")), 3);
        assert_eq!(manager.transport().sent().last().unwrap().slot.seq, 3);
    }
}
