//! The event store: an append-only log of events, organised into streams and categories.
//!
//! Implementations must serialise writers per stream so that [`WriteCondition`]s are
//! evaluated against a consistent tip (see the crate-level docs for the concurrency
//! contract). [`InMemoryEventStore`] satisfies this with a single mutex guarding all
//! writes; a SQL-backed implementation (see `conflux-postgres`) uses an exclusive table
//! lock for the same purpose.
use crate::{
    error::{Error, Result},
    event::{NewEvent, StoredEvent},
    identifier::Identifier,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// A condition checked against a stream's current tip before a [`EventStore::save`] is
/// allowed to commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteCondition {
    /// The stream must have no events at all.
    StreamIsEmpty,
    /// The stream's tip must be at exactly this position.
    PositionIs(i64),
}

impl WriteCondition {
    fn evaluate(&self, tip: Option<i64>) -> bool {
        match (self, tip) {
            (WriteCondition::StreamIsEmpty, None) => true,
            (WriteCondition::StreamIsEmpty, Some(_)) => false,
            (WriteCondition::PositionIs(n), Some(tip)) => *n == tip,
            (WriteCondition::PositionIs(_), None) => false,
        }
    }
}

/// A restriction on a [`EventStore::scan`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryConstraint {
    /// Only yield events whose sequence number is strictly greater than this one.
    SequenceNumberAfter(i64),
}

/// Default number of rows fetched per internal page during a scan.
pub const DEFAULT_SCAN_PAGE_SIZE: usize = 100;

/// The durable, append-only event store.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends `events` to the stream named by `target`, enforcing every condition in
    /// `conditions`. All-or-nothing: if any condition fails, no event is persisted.
    async fn save(
        &self,
        target: &Identifier,
        events: Vec<NewEvent>,
        conditions: &[WriteCondition],
    ) -> Result<Vec<StoredEvent>>;

    /// Returns events matching `target` and `constraints`, in ascending sequence-number
    /// order. Implementations may page internally; a caller that wants to keep scanning
    /// re-invokes `scan` with a `SequenceNumberAfter` constraint derived from the last
    /// event it saw.
    async fn scan(
        &self,
        target: &Identifier,
        constraints: &[QueryConstraint],
    ) -> Result<Vec<StoredEvent>>;
}

fn sequence_after(constraints: &[QueryConstraint]) -> i64 {
    constraints
        .iter()
        .map(|c| match c {
            QueryConstraint::SequenceNumberAfter(n) => *n,
        })
        .max()
        .unwrap_or(0)
}

#[derive(Default)]
struct StoreState {
    events: Vec<StoredEvent>,
    // current tip position per (category, stream)
    tips: HashMap<(String, String), i64>,
    next_sequence_number: i64,
}

/// An in-memory [`EventStore`], serialising all writers on a single internal mutex.
///
/// Suitable for tests and single-process deployments; not durable across restarts.
pub struct InMemoryEventStore {
    state: Mutex<StoreState>,
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
        }
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn save(
        &self,
        target: &Identifier,
        events: Vec<NewEvent>,
        conditions: &[WriteCondition],
    ) -> Result<Vec<StoredEvent>> {
        let (category, stream) = match target {
            Identifier::Stream { category, stream } => (category.clone(), stream.clone()),
            _ => {
                return Err(Error::UnsupportedQuery(
                    "save requires a Stream identifier".into(),
                ))
            }
        };

        let mut state = self.state.lock().expect("event store mutex poisoned");
        let key = (category.clone(), stream.clone());
        let tip = state.tips.get(&key).copied();

        for condition in conditions {
            if !condition.evaluate(tip) {
                return Err(Error::UnmetWriteCondition { category, stream });
            }
        }

        let mut position = tip.map(|p| p + 1).unwrap_or(0);
        let mut stored = Vec::with_capacity(events.len());
        for event in events {
            let sequence_number = state.next_sequence_number;
            state.next_sequence_number += 1;
            let stored_event = StoredEvent {
                id: uuid::Uuid::new_v4().to_string(),
                category: category.clone(),
                stream: stream.clone(),
                position,
                sequence_number,
                name: event.name,
                payload: event.payload,
                observed_at: event.observed_at,
                occurred_at: event.occurred_at,
            };
            state.events.push(stored_event.clone());
            stored.push(stored_event);
            position += 1;
        }
        state.tips.insert(key, position - 1);

        Ok(stored)
    }

    async fn scan(
        &self,
        target: &Identifier,
        constraints: &[QueryConstraint],
    ) -> Result<Vec<StoredEvent>> {
        let after = sequence_after(constraints);
        let state = self.state.lock().expect("event store mutex poisoned");
        let mut matched: Vec<StoredEvent> = state
            .events
            .iter()
            .filter(|e| e.sequence_number > after && target.matches(&e.category, &e.stream))
            .cloned()
            .collect();
        matched.sort_by_key(|e| e.sequence_number);
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(name: &str) -> NewEvent {
        NewEvent::now(name, json!({}))
    }

    #[tokio::test]
    async fn save_assigns_consecutive_positions_and_sequence_numbers() {
        let store = InMemoryEventStore::new();
        let target = Identifier::stream("orders", "o-1");
        let stored = store
            .save(&target, vec![event("a"), event("b")], &[])
            .await
            .unwrap();
        assert_eq!(stored[0].position, 0);
        assert_eq!(stored[1].position, 1);
        assert!(stored[1].sequence_number > stored[0].sequence_number);
    }

    #[tokio::test]
    async fn stream_is_empty_rejects_when_stream_has_events() {
        let store = InMemoryEventStore::new();
        let target = Identifier::stream("orders", "o-1");
        store.save(&target, vec![event("a")], &[]).await.unwrap();

        let err = store
            .save(&target, vec![event("b")], &[WriteCondition::StreamIsEmpty])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnmetWriteCondition { .. }));
    }

    #[tokio::test]
    async fn position_is_rejects_on_stale_tip() {
        let store = InMemoryEventStore::new();
        let target = Identifier::stream("orders", "o-1");
        store.save(&target, vec![event("a")], &[]).await.unwrap();

        let err = store
            .save(&target, vec![event("b")], &[WriteCondition::PositionIs(5)])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnmetWriteCondition { .. }));
    }

    #[tokio::test]
    async fn scan_returns_events_in_sequence_order_across_streams() {
        let store = InMemoryEventStore::new();
        store
            .save(&Identifier::stream("orders", "o-1"), vec![event("a")], &[])
            .await
            .unwrap();
        store
            .save(&Identifier::stream("orders", "o-2"), vec![event("b")], &[])
            .await
            .unwrap();

        let all = store
            .scan(&Identifier::category("orders"), &[QueryConstraint::SequenceNumberAfter(-1)])
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].sequence_number < all[1].sequence_number);
    }

    #[tokio::test]
    async fn scan_is_restartable_via_sequence_number_after() {
        let store = InMemoryEventStore::new();
        let target = Identifier::stream("orders", "o-1");
        store
            .save(&target, vec![event("a"), event("b"), event("c")], &[])
            .await
            .unwrap();

        let first_page = store
            .scan(&target, &[QueryConstraint::SequenceNumberAfter(-1)])
            .await
            .unwrap();
        let last_seen = first_page[0].sequence_number;

        let rest = store
            .scan(&target, &[QueryConstraint::SequenceNumberAfter(last_seen)])
            .await
            .unwrap();
        assert_eq!(rest.len(), 2);
    }

    #[tokio::test]
    async fn concurrent_writers_are_serialised() {
        use std::sync::Arc;
        let store = Arc::new(InMemoryEventStore::new());
        let target = Identifier::stream("orders", "o-1");

        let mut handles = Vec::new();
        for i in 0..10 {
            let store = store.clone();
            let target = target.clone();
            handles.push(tokio::spawn(async move {
                let events = vec![
                    NewEvent::now(format!("event-1-write-{i}"), json!({})),
                    NewEvent::now(format!("event-2-write-{i}"), json!({})),
                    NewEvent::now(format!("event-3-write-{i}"), json!({})),
                ];
                store.save(&target, events, &[]).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let all = store
            .scan(&target, &[QueryConstraint::SequenceNumberAfter(-1)])
            .await
            .unwrap();
        assert_eq!(all.len(), 30);
        let positions: Vec<i64> = all.iter().map(|e| e.position).collect();
        let mut sorted = positions.clone();
        sorted.sort();
        assert_eq!(sorted, (0..30).collect::<Vec<_>>());
    }
}
