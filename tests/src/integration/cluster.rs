//! # Cluster Integration Tests
//!
//! Several nodes share one in-memory cluster bus. Each node's bus adapter is
//! drained explicitly so delivery order is deterministic.
//!
//! ## Flows Tested:
//!
//! 1. **Delta replication**: a subscription on one node matches on every node
//! 2. **Concurrent creation**: partitioned nodes converge after `sync_all`,
//!    identical filters collapse into one room
//! 3. **Partition + retry**: a node cut off from deltas catches up on sync
//! 4. **Membership**: a departed node's connections are evicted
//! 5. **Locking**: waits, timeouts and readiness
//! 6. **Tombstones**: vacant records are collected and stay collected

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use rtc_02_room_registry::RoomRegistry;
    use rtc_03_cluster_state::{
        join_bus, BusClusterTransport, ClusterApi, ClusterBusAdapter, ClusterConfig,
        ClusterConfigBuilder, ClusterError, ResourceState,
    };
    use shared_bus::InMemoryClusterBus;
    use shared_types::{ConnectionId, NodeId, NodeState, RoomId};

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    type Node = ClusterBusAdapter<BusClusterTransport>;

    fn attach(bus: &Arc<InMemoryClusterBus>, config: ClusterConfig) -> Node {
        join_bus(bus, config, Arc::new(RoomRegistry::with_defaults())).unwrap()
    }

    async fn started(bus: &Arc<InMemoryClusterBus>, id: &str) -> Node {
        let node = attach(bus, ClusterConfig::for_node(id));
        node.manager().start().await.unwrap();
        node
    }

    fn conn(id: &str) -> ConnectionId {
        ConnectionId::new(id)
    }

    fn node_id(id: &str) -> NodeId {
        NodeId::new(id)
    }

    async fn drain_all(nodes: &mut [&mut Node]) {
        for node in nodes.iter_mut() {
            node.drain().await;
        }
    }

    // =============================================================================
    // DELTA REPLICATION
    // =============================================================================

    #[tokio::test]
    async fn test_subscription_matches_on_every_node() {
        let bus = Arc::new(InMemoryClusterBus::new());
        let mut a = started(&bus, "a").await;
        let mut b = started(&bus, "b").await;
        let mut c = started(&bus, "c").await;

        let room = a
            .manager()
            .register_filter(&json!({"term": {"city": "NYC"}}), conn("a1"))
            .await
            .unwrap()
            .room_id;
        drain_all(&mut [&mut a, &mut b, &mut c]).await;

        for node in [&a, &b, &c] {
            assert_eq!(
                node.manager().test_document(&json!({"city": "NYC"})),
                BTreeSet::from([room.clone()])
            );
        }

        a.manager().remove_subscription(&room, &conn("a1")).await.unwrap();
        drain_all(&mut [&mut a, &mut b, &mut c]).await;
        for node in [&a, &b, &c] {
            assert!(node.manager().test_document(&json!({"city": "NYC"})).is_empty());
        }
    }

    // =============================================================================
    // CONCURRENT CREATION
    // =============================================================================

    #[tokio::test]
    async fn test_concurrent_distinct_filters_survive_sync_all() {
        let bus = Arc::new(InMemoryClusterBus::new());
        let mut a = started(&bus, "a").await;
        let mut b = started(&bus, "b").await;

        bus.set_reachable(&node_id("a"), false);
        bus.set_reachable(&node_id("b"), false);
        let from_a = a.manager().register_filter(&json!({"exists": "x"}), conn("a1")).await.unwrap();
        let from_b = b.manager().register_filter(&json!({"exists": "y"}), conn("b1")).await.unwrap();
        assert_ne!(from_a.filter_id, from_b.filter_id);
        drain_all(&mut [&mut a, &mut b]).await;

        bus.set_reachable(&node_id("a"), true);
        bus.set_reachable(&node_id("b"), true);
        a.manager().cluster_sync_all().await.unwrap();
        b.manager().cluster_sync_all().await.unwrap();

        let expected = BTreeSet::from([from_a.room_id.clone(), from_b.room_id.clone()]);
        for node in [&a, &b] {
            assert_eq!(node.manager().registry().room_ids(), expected);
            assert_eq!(node.manager().test_document(&json!({"x": 1, "y": 2})), expected);
        }
    }

    #[tokio::test]
    async fn test_concurrent_identical_filters_converge() {
        let bus = Arc::new(InMemoryClusterBus::new());
        let mut a = started(&bus, "a").await;
        let mut b = started(&bus, "b").await;

        bus.set_reachable(&node_id("a"), false);
        bus.set_reachable(&node_id("b"), false);
        let body = json!({"and": [{"term": {"city": "NYC"}}, {"range": {"age": {"gte": 18}}}]});
        // Same filter, written with its clauses in the other order.
        let reordered = json!({"and": [{"range": {"age": {"gte": 18}}}, {"term": {"city": "NYC"}}]});
        let from_a = a.manager().register_filter(&body, conn("a1")).await.unwrap();
        let from_b = b.manager().register_filter(&reordered, conn("b1")).await.unwrap();
        assert_eq!(from_a.filter_id, from_b.filter_id);
        drain_all(&mut [&mut a, &mut b]).await;

        bus.set_reachable(&node_id("a"), true);
        bus.set_reachable(&node_id("b"), true);
        a.manager().cluster_sync_all().await.unwrap();
        b.manager().cluster_sync_all().await.unwrap();

        for node in [&a, &b] {
            let registry = node.manager().registry();
            assert_eq!(registry.room_count(), 1);
            assert_eq!(registry.filter_count(), 1);
            assert_eq!(registry.subscribers(&from_a.room_id).unwrap().len(), 2);
        }
        assert_eq!(a.manager().versions(), b.manager().versions());
    }

    // =============================================================================
    // PARTITION + RETRY
    // =============================================================================

    #[tokio::test]
    async fn test_partitioned_node_recovers_with_version_sync() {
        let bus = Arc::new(InMemoryClusterBus::new());
        let mut a = started(&bus, "a").await;
        let mut b = started(&bus, "b").await;

        let kept = a.manager().register_filter(&json!({"exists": "kept"}), conn("a1")).await.unwrap();
        drain_all(&mut [&mut a, &mut b]).await;

        bus.set_reachable(&node_id("b"), false);
        let added = a.manager().register_filter(&json!({"exists": "added"}), conn("a1")).await.unwrap();
        a.manager().remove_subscription(&kept.room_id, &conn("a1")).await.unwrap();
        drain_all(&mut [&mut a, &mut b]).await;
        assert!(b.manager().registry().contains_room(&kept.room_id));
        assert!(!b.manager().registry().contains_room(&added.room_id));

        bus.set_reachable(&node_id("b"), true);
        let report = b.manager().cluster_sync().await.unwrap();
        assert!(report.is_clean());
        assert_eq!(report.adopted, 2);
        assert_eq!(
            b.manager().registry().room_ids(),
            BTreeSet::from([added.room_id.clone()])
        );

        // Nothing left to pull.
        let again = b.manager().cluster_sync().await.unwrap();
        assert_eq!(again.adopted, 0);
    }

    #[tokio::test]
    async fn test_start_fails_when_no_peer_answers() {
        let bus = Arc::new(InMemoryClusterBus::new());
        // A peer whose process is gone: still listed, never answers.
        drop(started(&bus, "ghost").await);

        let a = attach(&bus, ClusterConfig::for_node("a"));
        let result = a.manager().start().await;
        assert!(matches!(result, Err(ClusterError::Transport(_))));
        assert_eq!(a.manager().node_state(), NodeState::Joining);

        bus.leave(&node_id("ghost"));
        a.manager().start().await.unwrap();
        assert_eq!(a.manager().node_state(), NodeState::Running);
    }

    // =============================================================================
    // MEMBERSHIP
    // =============================================================================

    #[tokio::test]
    async fn test_departed_node_connections_are_evicted() {
        let bus = Arc::new(InMemoryClusterBus::new());
        let mut a = started(&bus, "a").await;
        let mut b = started(&bus, "b").await;

        let body = json!({"exists": "name"});
        let room = a.manager().register_filter(&body, conn("a1")).await.unwrap().room_id;
        b.manager().register_filter(&body, conn("b1")).await.unwrap();
        drain_all(&mut [&mut a, &mut b]).await;
        assert_eq!(b.manager().registry().subscribers(&room).unwrap().len(), 2);

        bus.leave(&node_id("a"));
        b.drain().await;
        let remaining = b.manager().registry().subscribers(&room).unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(remaining.iter().all(|s| s.node == node_id("b")));
    }

    // =============================================================================
    // LOCKING AND READINESS
    // =============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_waiting_subscription_proceeds_after_release() {
        let bus = Arc::new(InMemoryClusterBus::new());
        let config = ClusterConfigBuilder::new()
            .node_id(node_id("a"))
            .lock_wait(Duration::from_millis(500))
            .build()
            .unwrap();
        let a = attach(&bus, config);
        a.manager().start().await.unwrap();

        let body = json!({"exists": "name"});
        let room = RoomId::for_filter(&a.manager().registry().compile(&body).unwrap().id);
        let held = a.manager().locks().try_acquire(&room, ResourceState::LockedForDelete).unwrap();

        let release = async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            drop(held);
        };
        let (registration, ()) = tokio::join!(a.manager().register_filter(&body, conn("a1")), release);
        assert!(registration.unwrap().subscribed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiting_subscription_times_out() {
        let bus = Arc::new(InMemoryClusterBus::new());
        let config = ClusterConfigBuilder::new()
            .node_id(node_id("a"))
            .lock_wait(Duration::from_millis(50))
            .build()
            .unwrap();
        let a = attach(&bus, config);
        a.manager().start().await.unwrap();

        let body = json!({"exists": "name"});
        let room = RoomId::for_filter(&a.manager().registry().compile(&body).unwrap().id);
        let _held = a.manager().locks().try_acquire(&room, ResourceState::LockedForCreate).unwrap();

        let result = a.manager().register_filter(&body, conn("a1")).await;
        assert!(matches!(result, Err(ClusterError::LockTimeout { .. })));
        assert!(result.unwrap_err().is_retryable());
        assert_eq!(a.manager().registry().room_count(), 0);
    }

    #[tokio::test]
    async fn test_subscription_rejected_until_started() {
        let bus = Arc::new(InMemoryClusterBus::new());
        let a = attach(&bus, ClusterConfig::for_node("a"));

        let result = a.manager().register_filter(&json!({}), conn("a1")).await;
        assert_eq!(
            result.unwrap_err(),
            ClusterError::NotReady {
                state: NodeState::Joining
            }
        );
        // Matching never waits on cluster state.
        assert!(a.manager().test_document(&json!({})).is_empty());
    }

    // =============================================================================
    // TOMBSTONE COLLECTION
    // =============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_collected_records_stay_collected_across_sync() {
        let retention = Duration::from_secs(30);
        let bus = Arc::new(InMemoryClusterBus::new());
        let config = |id: &str| {
            ClusterConfigBuilder::new()
                .node_id(node_id(id))
                .tombstone_retention(retention)
                .build()
                .unwrap()
        };
        let mut a = attach(&bus, config("a"));
        a.manager().start().await.unwrap();
        let mut b = attach(&bus, config("b"));
        b.manager().start().await.unwrap();

        for i in 0..50 {
            let room = a
                .manager()
                .register_filter(&json!({"term": {"f": i}}), conn("a1"))
                .await
                .unwrap()
                .room_id;
            a.manager().remove_subscription(&room, &conn("a1")).await.unwrap();
        }
        drain_all(&mut [&mut a, &mut b]).await;
        assert_eq!(b.manager().record_count(), 50);

        // Only `a` collects; `b` still advertises the tombstones.
        tokio::time::advance(retention).await;
        assert_eq!(a.manager().gc(), 50);

        let report = a.manager().cluster_sync().await.unwrap();
        assert_eq!(report.adopted, 0);
        let report = a.manager().cluster_sync_all().await.unwrap();
        assert_eq!(report.adopted, 0);
        assert_eq!(a.manager().record_count(), 0);

        assert_eq!(b.manager().gc(), 50);
        assert_eq!(b.manager().record_count(), 0);
        assert!(b.manager().versions().is_empty());
    }
}
