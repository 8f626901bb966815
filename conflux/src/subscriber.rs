//! The subscriber SPI and the per-node registry of subscriber instances.
use crate::{error::{Error, Result}, event_source::EventSourceView};
use async_trait::async_trait;
use indexmap::IndexMap;
use std::sync::Arc;

/// Identifies a logical subscriber: `group` partitions the workload, `id` names one
/// instance of it. Two subscribers with equal `(group, id)` anywhere in the fleet are
/// the same logical subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberKey {
    pub group: String,
    pub id: String,
}

impl SubscriberKey {
    pub fn new(group: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            id: id.into(),
        }
    }
}

/// A consumer of events from one or more [`EventSourceView`]s, assigned and driven by
/// the broker. Implementors never call back into the broker; they only react to
/// `accept`/`withdraw`.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// This subscriber's key.
    fn key(&self) -> SubscriberKey;

    /// Called when `source` has been newly assigned to this subscriber. Must not
    /// return until the subscriber is ready to (or has started to) consume `source`.
    async fn accept(&self, source: EventSourceView) -> Result<()>;

    /// Called when `source` is no longer assigned to this subscriber. Must not return
    /// until the subscriber has stopped consuming `source`.
    async fn withdraw(&self, source: EventSourceView) -> Result<()>;
}

/// The set of subscriber instances running on this node, keyed by [`SubscriberKey`].
///
/// Backed by an [`IndexMap`] rather than a `HashMap` so that [`SubscriberRegistry::list`]
/// returns entries in insertion order.
#[derive(Default)]
pub struct SubscriberRegistry {
    subscribers: std::sync::Mutex<IndexMap<SubscriberKey, Arc<dyn Subscriber>>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `subscriber`, overwriting any existing entry with the same key. An
    /// overwrite keeps the key's original insertion position.
    pub fn add(&self, subscriber: Arc<dyn Subscriber>) {
        let key = subscriber.key();
        self.subscribers
            .lock()
            .expect("subscriber registry mutex poisoned")
            .insert(key, subscriber);
    }

    /// Removes the subscriber with `key`. Fails if no subscriber is registered under it.
    pub fn remove(&self, key: &SubscriberKey) -> Result<()> {
        self.subscribers
            .lock()
            .expect("subscriber registry mutex poisoned")
            .shift_remove(key)
            .map(|_| ())
            .ok_or_else(|| Error::UnknownSubscriber {
                group: key.group.clone(),
                id: key.id.clone(),
            })
    }

    /// Returns the subscriber registered under `key`, if any.
    pub fn get(&self, key: &SubscriberKey) -> Option<Arc<dyn Subscriber>> {
        self.subscribers
            .lock()
            .expect("subscriber registry mutex poisoned")
            .get(key)
            .cloned()
    }

    /// Returns all currently registered subscribers, in the order they were first added.
    pub fn list(&self) -> Vec<Arc<dyn Subscriber>> {
        self.subscribers
            .lock()
            .expect("subscriber registry mutex poisoned")
            .values()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;

    mock! {
        pub TestSubscriber {}

        #[async_trait]
        impl Subscriber for TestSubscriber {
            fn key(&self) -> SubscriberKey;
            async fn accept(&self, source: EventSourceView) -> Result<()>;
            async fn withdraw(&self, source: EventSourceView) -> Result<()>;
        }
    }

    #[test]
    fn add_overwrites_on_key_collision() {
        let registry = SubscriberRegistry::new();
        let mut first = MockTestSubscriber::new();
        first
            .expect_key()
            .return_const(SubscriberKey::new("g", "s1"));
        registry.add(Arc::new(first));

        let mut second = MockTestSubscriber::new();
        second
            .expect_key()
            .return_const(SubscriberKey::new("g", "s1"));
        registry.add(Arc::new(second));

        assert_eq!(registry.list().len(), 1);
    }

    #[test]
    fn remove_fails_on_absence() {
        let registry = SubscriberRegistry::new();
        assert!(registry.remove(&SubscriberKey::new("g", "s1")).is_err());
    }

    #[test]
    fn list_returns_insertion_order() {
        let registry = SubscriberRegistry::new();
        for id in ["s3", "s1", "s2"] {
            let mut mock = MockTestSubscriber::new();
            mock.expect_key().return_const(SubscriberKey::new("g", id));
            registry.add(Arc::new(mock));
        }

        let ids: Vec<_> = registry.list().iter().map(|s| s.key().id).collect();
        assert_eq!(ids, vec!["s3", "s1", "s2"]);
    }
}
