//! Shared conformance test suites, exercised identically against every backend
//! implementation of [`crate::EventStore`], [`crate::SubscriberLivenessStore`], and
//! [`crate::SubscriptionStateStore`].
//!
//! Each backend crate (this one's in-memory implementation, or `conflux-postgres`)
//! calls these functions from its own `#[tokio::test]`s, so the invariants in the
//! store contracts are checked once here and reused everywhere a backend claims to
//! satisfy them.
use crate::{
    event::NewEvent,
    event_store::{EventStore, QueryConstraint, WriteCondition},
    identifier::Identifier,
    liveness::SubscriberLivenessStore,
    subscriber::SubscriberKey,
    subscription_state::{SubscriptionState, SubscriptionStateChange, SubscriptionStateStore},
};
use serde_json::json;
use std::collections::HashSet;

/// Exercises the universal invariants any [`EventStore`] implementation must satisfy.
pub async fn event_store_conformance(store: &dyn EventStore) {
    let target = Identifier::stream("orders", "o-1");

    let stored = store
        .save(
            &target,
            vec![NewEvent::now("a", json!({})), NewEvent::now("b", json!({}))],
            &[WriteCondition::StreamIsEmpty],
        )
        .await
        .unwrap();
    assert_eq!(stored.iter().map(|e| e.position).collect::<Vec<_>>(), vec![0, 1]);

    let rejected = store
        .save(&target, vec![NewEvent::now("c", json!({}))], &[WriteCondition::StreamIsEmpty])
        .await;
    assert!(rejected.is_err(), "stream_is_empty must reject a non-empty stream");

    let appended = store
        .save(
            &target,
            vec![NewEvent::now("c", json!({}))],
            &[WriteCondition::PositionIs(1)],
        )
        .await
        .unwrap();
    assert_eq!(appended[0].position, 2);

    let events = store
        .scan(&target, &[QueryConstraint::SequenceNumberAfter(-1)])
        .await
        .unwrap();
    assert_eq!(events.len(), 3);
    for pair in events.windows(2) {
        assert!(pair[0].sequence_number < pair[1].sequence_number);
    }
}

/// Exercises the [`SubscriberLivenessStore`] contract: heartbeat upserts, filtered
/// listing, and age-based purging.
pub async fn liveness_store_conformance(store: &dyn SubscriberLivenessStore) {
    let key = SubscriberKey::new("g", "s1");
    store.heartbeat(&key, "n1").await.unwrap();

    let states = store.list(Some("g"), None).await.unwrap();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].node_id, "n1");

    store.heartbeat(&key, "n1").await.unwrap();
    let states = store.list(Some("g"), None).await.unwrap();
    assert_eq!(states.len(), 1, "heartbeat must upsert, not duplicate");
}

/// Exercises the [`SubscriptionStateStore`] atomicity contract: `apply` must be
/// all-or-nothing.
pub async fn subscription_state_store_conformance(store: &dyn SubscriptionStateStore) {
    let key1 = SubscriberKey::new("g", "s1");
    let state1 = SubscriptionState {
        key: key1.clone(),
        node_id: "n1".into(),
        event_sources: HashSet::from([Identifier::category("orders")]),
    };
    store.apply(vec![SubscriptionStateChange::Add(state1.clone())]).await.unwrap();
    assert_eq!(store.get(&key1).await.unwrap(), Some(state1));

    let key2 = SubscriberKey::new("g", "s2");
    let invalid_batch = vec![
        SubscriptionStateChange::Add(SubscriptionState {
            key: key2.clone(),
            node_id: "n1".into(),
            event_sources: HashSet::new(),
        }),
        SubscriptionStateChange::Remove(SubscriberKey::new("g", "does-not-exist")),
    ];
    assert!(store.apply(invalid_batch).await.is_err());
    assert!(
        store.get(&key2).await.unwrap().is_none(),
        "a failed batch must leave the store untouched"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::event_store::InMemoryEventStore;
    use crate::liveness::InMemoryLivenessStore;
    use crate::subscription_state::InMemorySubscriptionStateStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn in_memory_event_store_passes_conformance() {
        event_store_conformance(&InMemoryEventStore::new()).await;
    }

    #[tokio::test]
    async fn in_memory_liveness_store_passes_conformance() {
        liveness_store_conformance(&InMemoryLivenessStore::new(Arc::new(SystemClock))).await;
    }

    #[tokio::test]
    async fn in_memory_subscription_state_store_passes_conformance() {
        subscription_state_store_conformance(&InMemorySubscriptionStateStore::new()).await;
    }
}
