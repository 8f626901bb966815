//! Read-only views over an [`Identifier`], used by subscribers to consume events without
//! depending on a concrete [`EventStore`] backend.
use crate::{
    error::Result,
    event::StoredEvent,
    event_store::{EventStore, QueryConstraint},
    identifier::Identifier,
};
use async_trait::async_trait;
use std::sync::Arc;

/// A read-only handle bound to an [`Identifier`] and a backing [`EventStore`].
#[derive(Clone)]
pub struct EventSourceView {
    identifier: Identifier,
    store: Arc<dyn EventStore>,
}

impl EventSourceView {
    pub fn new(identifier: Identifier, store: Arc<dyn EventStore>) -> Self {
        Self { identifier, store }
    }

    /// The identifier this view is bound to.
    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    /// The most recently stored event matching this view's identifier, if any.
    pub async fn latest(&self) -> Result<Option<StoredEvent>> {
        let events = self
            .store
            .scan(&self.identifier, &[QueryConstraint::SequenceNumberAfter(-1)])
            .await?;
        Ok(events.into_iter().last())
    }

    /// Events at or after `from` (exclusive), in ascending sequence-number order.
    pub async fn iterate(&self, from: Option<i64>) -> Result<Vec<StoredEvent>> {
        self.store
            .scan(
                &self.identifier,
                &[QueryConstraint::SequenceNumberAfter(from.unwrap_or(-1))],
            )
            .await
    }
}

impl PartialEq for EventSourceView {
    fn eq(&self, other: &Self) -> bool {
        self.identifier == other.identifier
    }
}

/// Resolves an [`Identifier`] to a ready-to-use [`EventSourceView`].
///
/// Kept as a trait (rather than a free function) so the subscription observer can be
/// tested against a mock factory without a real store.
#[async_trait]
pub trait EventSourceFactory: Send + Sync {
    async fn create(&self, identifier: &Identifier) -> Result<EventSourceView>;
}

/// An [`EventSourceFactory`] backed by a single [`EventStore`].
pub struct StoreEventSourceFactory {
    store: Arc<dyn EventStore>,
}

impl StoreEventSourceFactory {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventSourceFactory for StoreEventSourceFactory {
    async fn create(&self, identifier: &Identifier) -> Result<EventSourceView> {
        Ok(EventSourceView::new(identifier.clone(), self.store.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::NewEvent;
    use crate::event_store::InMemoryEventStore;
    use serde_json::json;

    #[tokio::test]
    async fn factory_creates_a_view_bound_to_the_identifier() {
        let store: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new());
        let factory = StoreEventSourceFactory::new(store.clone());
        let id = Identifier::stream("orders", "o-1");

        store
            .save(&id, vec![NewEvent::now("a", json!({}))], &[])
            .await
            .unwrap();

        let view = factory.create(&id).await.unwrap();
        let latest = view.latest().await.unwrap().unwrap();
        assert_eq!(latest.name, "a");
    }
}
