//! # Integration Test Flows
//!
//! Single-node flows through the cluster state manager, the room registry
//! and the filter engine:
//!
//! 1. **Subscribe → match → unsubscribe**: the room follows its connections
//! 2. **Deduplication**: identical bodies share one filter and its conditions
//! 3. **Teardown**: the last unsubscribe removes every condition
//! 4. **Operand edges**: range bounds and negation of absent fields

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use serde_json::json;

    use rtc_02_room_registry::{RoomRegistry, UnsubscribeOutcome};
    use rtc_03_cluster_state::{ClusterApi, ClusterConfig, ClusterStateManager, MockTransport};
    use shared_types::{ConnectionId, Document, RoomId};

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    async fn single_node() -> ClusterStateManager<MockTransport> {
        let manager = ClusterStateManager::new(
            ClusterConfig::for_node("solo"),
            Arc::new(RoomRegistry::with_defaults()),
            MockTransport::new(),
        )
        .unwrap();
        manager.start().await.unwrap();
        manager
    }

    fn conn(id: &str) -> ConnectionId {
        ConnectionId::new(id)
    }

    async fn room_for(manager: &ClusterStateManager<MockTransport>, body: Document, connection: &str) -> RoomId {
        manager.register_filter(&body, conn(connection)).await.unwrap().room_id
    }

    fn rooms(ids: &[&RoomId]) -> BTreeSet<RoomId> {
        ids.iter().map(|id| (*id).clone()).collect()
    }

    // =============================================================================
    // SUBSCRIBE → MATCH → UNSUBSCRIBE
    // =============================================================================

    #[tokio::test]
    async fn test_city_scenario() {
        let node = single_node().await;

        let r1 = room_for(&node, json!({"term": {"city": "NYC"}}), "c1").await;
        assert_eq!(node.test_document(&json!({"city": "NYC", "job": "x"})), rooms(&[&r1]));
        assert!(node.test_document(&json!({"city": "LA"})).is_empty());

        let outcome = node.remove_subscription(&r1, &conn("c1")).await.unwrap();
        assert_eq!(outcome, UnsubscribeOutcome::Removed { room_destroyed: true });
        assert!(node.test_document(&json!({"city": "NYC"})).is_empty());
    }

    #[tokio::test]
    async fn test_room_survives_until_last_connection_leaves() {
        let node = single_node().await;
        let body = json!({"exists": "name"});
        let room = room_for(&node, body.clone(), "c1").await;
        assert_eq!(room_for(&node, body, "c2").await, room);

        node.remove_subscription(&room, &conn("c1")).await.unwrap();
        assert_eq!(node.test_document(&json!({"name": "x"})), rooms(&[&room]));

        node.remove_subscription(&room, &conn("c2")).await.unwrap();
        assert!(node.test_document(&json!({"name": "x"})).is_empty());
    }

    // =============================================================================
    // DEDUPLICATION AND TEARDOWN
    // =============================================================================

    #[tokio::test]
    async fn test_identical_bodies_share_filter_and_conditions() {
        let node = single_node().await;
        let registry = node.registry();

        let first = node
            .register_filter(&json!({"term": {"city": "NYC"}}), conn("c1"))
            .await
            .unwrap();
        let conditions = registry.condition_count();

        // Structurally identical bodies compile to the same filter.
        let second = node
            .register_filter(&json!({"and": [{"term": {"city": "NYC"}}]}), conn("c2"))
            .await
            .unwrap();
        assert_eq!(second.filter_id, first.filter_id);
        assert!(!second.room_created);
        assert_eq!(registry.filter_count(), 1);
        assert_eq!(registry.condition_count(), conditions);

        // A different filter reuses the shared condition.
        node.register_filter(
            &json!({"and": [{"term": {"city": "NYC"}}, {"exists": "job"}]}),
            conn("c3"),
        )
        .await
        .unwrap();
        assert_eq!(registry.filter_count(), 2);
        assert_eq!(registry.condition_count(), 2);
    }

    #[tokio::test]
    async fn test_teardown_removes_every_condition() {
        let node = single_node().await;
        let body = json!({"or": [
            {"range": {"age": {"gte": 18}}},
            {"and": [{"term": {"city": "NYC"}}, {"not": {"exists": "banned"}}]}
        ]});
        let room = room_for(&node, body, "c1").await;
        assert!(node.registry().condition_count() > 0);

        node.disconnect(&conn("c1")).await.unwrap();
        assert_eq!(node.registry().condition_count(), 0);
        assert_eq!(node.registry().filter_count(), 0);
        assert!(node.test_document(&json!({"age": 30})).is_empty());
        assert!(node.record(&room).unwrap().is_vacant());
    }

    // =============================================================================
    // OPERAND EDGES
    // =============================================================================

    #[tokio::test]
    async fn test_range_bounds() {
        let node = single_node().await;
        let gte = room_for(&node, json!({"range": {"n": {"gte": 10}}}), "c1").await;
        let gt = room_for(&node, json!({"range": {"n": {"gt": 10}}}), "c1").await;
        let half_open = room_for(&node, json!({"range": {"n": {"gte": 10, "lt": 20}}}), "c1").await;

        assert_eq!(node.test_document(&json!({"n": 10})), rooms(&[&gte, &half_open]));
        assert_eq!(node.test_document(&json!({"n": 20})), rooms(&[&gte, &gt]));
        assert_eq!(node.test_document(&json!({"n": 15})), rooms(&[&gte, &gt, &half_open]));
        assert!(node.test_document(&json!({"n": 9})).is_empty());
    }

    #[tokio::test]
    async fn test_negated_term_matches_other_values_and_absence() {
        let node = single_node().await;
        let room = room_for(&node, json!({"not": {"term": {"city": "NYC"}}}), "c1").await;

        assert_eq!(node.test_document(&json!({"city": "LA"})), rooms(&[&room]));
        assert_eq!(node.test_document(&json!({"job": "x"})), rooms(&[&room]));
        assert!(node.test_document(&json!({"city": "NYC"})).is_empty());
    }

    #[tokio::test]
    async fn test_invalid_filter_leaves_no_trace() {
        let node = single_node().await;
        let result = node
            .register_filter(&json!({"range": {"n": {"around": 3}}}), conn("c1"))
            .await;

        assert!(result.is_err());
        assert_eq!(node.registry().room_count(), 0);
        assert_eq!(node.record_count(), 0);
        assert!(node.transport().sent().is_empty());
    }
}
