//! A thin client of the event store and subscriber SPI that folds a source's events
//! into a materialised view.
//!
//! This module is not part of the broker's internals; it depends only on the public
//! [`crate::Subscriber`]/[`crate::EventSourceView`] interfaces, the same as any other
//! consumer would.
use crate::{
    error::Result,
    event::StoredEvent,
    event_source::EventSourceView,
    subscriber::{Subscriber, SubscriberKey},
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// A materialised view folded from a sequence of events.
pub trait Projection: Send + Sync {
    /// A stable identifier for this projection instance, e.g. the id of the entity
    /// it tracks.
    fn identity(&self) -> &str;

    /// Folds one event into the projection's state.
    fn apply(&mut self, event: &StoredEvent);
}

/// Stores projections keyed by their identity.
pub struct InMemoryProjectionStore<P> {
    projections: Mutex<HashMap<String, P>>,
}

impl<P> Default for InMemoryProjectionStore<P> {
    fn default() -> Self {
        Self {
            projections: Mutex::new(HashMap::new()),
        }
    }
}

impl<P: Clone> InMemoryProjectionStore<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a clone of the stored projection for `identity`, if any.
    pub fn get(&self, identity: &str) -> Option<P> {
        self.projections
            .lock()
            .expect("projection store mutex poisoned")
            .get(identity)
            .cloned()
    }

    /// Replaces the stored projection for `identity`.
    pub fn put(&self, identity: impl Into<String>, projection: P) {
        self.projections
            .lock()
            .expect("projection store mutex poisoned")
            .insert(identity.into(), projection);
    }
}

/// A [`Subscriber`] that folds events from its assigned sources into a `P`, keyed by
/// the event's stream, and persists the result back to an [`InMemoryProjectionStore`].
pub struct ProjectionSubscriber<P> {
    key: SubscriberKey,
    store: std::sync::Arc<InMemoryProjectionStore<P>>,
    default_projection: std::sync::Arc<dyn Fn(&str) -> P + Send + Sync>,
    scan_position: Mutex<HashMap<String, i64>>,
}

impl<P: Clone + Send + Sync + Projection + 'static> ProjectionSubscriber<P> {
    pub fn new(
        key: SubscriberKey,
        store: std::sync::Arc<InMemoryProjectionStore<P>>,
        default_projection: impl Fn(&str) -> P + Send + Sync + 'static,
    ) -> Self {
        Self {
            key,
            store,
            default_projection: std::sync::Arc::new(default_projection),
            scan_position: Mutex::new(HashMap::new()),
        }
    }

    async fn fold(&self, source: &EventSourceView) -> Result<()> {
        let identity = source.identifier().to_string();
        let from = self
            .scan_position
            .lock()
            .expect("projection subscriber mutex poisoned")
            .get(&identity)
            .copied();

        let events = source.iterate(from).await?;
        if events.is_empty() {
            return Ok(());
        }

        let mut projection = self
            .store
            .get(&identity)
            .unwrap_or_else(|| (self.default_projection)(&identity));
        let mut last_seen = from.unwrap_or(-1);
        for event in &events {
            projection.apply(event);
            last_seen = event.sequence_number;
        }
        self.store.put(identity.clone(), projection);
        self.scan_position
            .lock()
            .expect("projection subscriber mutex poisoned")
            .insert(identity, last_seen);
        Ok(())
    }
}

#[async_trait]
impl<P: Clone + Send + Sync + Projection + 'static> Subscriber for ProjectionSubscriber<P> {
    fn key(&self) -> SubscriberKey {
        self.key.clone()
    }

    async fn accept(&self, source: EventSourceView) -> Result<()> {
        self.fold(&source).await
    }

    async fn withdraw(&self, _source: EventSourceView) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::NewEvent;
    use crate::event_store::{EventStore, InMemoryEventStore};
    use crate::identifier::Identifier;
    use serde_json::json;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Counter {
        identity: String,
        count: usize,
    }

    impl Projection for Counter {
        fn identity(&self) -> &str {
            &self.identity
        }

        fn apply(&mut self, _event: &StoredEvent) {
            self.count += 1;
        }
    }

    #[tokio::test]
    async fn accept_folds_existing_events_into_the_projection() {
        let store: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new());
        let target = Identifier::stream("orders", "o-1");
        store
            .save(&target, vec![NewEvent::now("a", json!({})), NewEvent::now("b", json!({}))], &[])
            .await
            .unwrap();

        let projections = Arc::new(InMemoryProjectionStore::<Counter>::new());
        let subscriber = ProjectionSubscriber::new(
            SubscriberKey::new("g", "s1"),
            projections.clone(),
            |identity| Counter {
                identity: identity.to_string(),
                count: 0,
            },
        );

        let view = EventSourceView::new(target.clone(), store);
        subscriber.accept(view).await.unwrap();

        let projection = projections.get(&target.to_string()).unwrap();
        assert_eq!(projection.count, 2);
    }
}
