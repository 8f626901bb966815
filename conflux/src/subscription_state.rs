//! Subscription state: the authoritative record of which event sources each subscriber
//! is currently assigned to consume.
use crate::{error::Error, error::Result, identifier::Identifier, subscriber::SubscriberKey};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// The current assignment of a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionState {
    pub key: SubscriberKey,
    pub node_id: String,
    pub event_sources: HashSet<Identifier>,
}

/// A single change to apply to the subscription state store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionStateChange {
    /// `key` must not currently exist.
    Add(SubscriptionState),
    /// `key` must currently exist; replaces its `event_sources`/`node_id`.
    Replace(SubscriptionState),
    /// `key` must currently exist; removes it entirely.
    Remove(SubscriberKey),
}

impl SubscriptionStateChange {
    pub fn key(&self) -> &SubscriberKey {
        match self {
            SubscriptionStateChange::Add(s) => &s.key,
            SubscriptionStateChange::Replace(s) => &s.key,
            SubscriptionStateChange::Remove(k) => k,
        }
    }
}

/// Persists [`SubscriptionState`] and applies changesets atomically.
#[async_trait]
pub trait SubscriptionStateStore: Send + Sync {
    /// Lists current subscription states, optionally filtered by node and/or group.
    async fn list(&self, node_id: Option<&str>, group: Option<&str>) -> Result<Vec<SubscriptionState>>;

    /// Returns the subscription state for `key`, if any.
    async fn get(&self, key: &SubscriberKey) -> Result<Option<SubscriptionState>>;

    /// Applies every change in `changes`, or none of them. A single invalid change
    /// (wrong existence precondition) fails the whole batch.
    async fn apply(&self, changes: Vec<SubscriptionStateChange>) -> Result<()>;
}

/// An in-memory [`SubscriptionStateStore`].
#[derive(Default)]
pub struct InMemorySubscriptionStateStore {
    states: Mutex<HashMap<SubscriberKey, SubscriptionState>>,
}

impl InMemorySubscriptionStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriptionStateStore for InMemorySubscriptionStateStore {
    async fn list(&self, node_id: Option<&str>, group: Option<&str>) -> Result<Vec<SubscriptionState>> {
        let states = self.states.lock().expect("subscription state mutex poisoned");
        Ok(states
            .values()
            .filter(|s| node_id.map_or(true, |n| s.node_id == n))
            .filter(|s| group.map_or(true, |g| s.key.group == g))
            .cloned()
            .collect())
    }

    async fn get(&self, key: &SubscriberKey) -> Result<Option<SubscriptionState>> {
        let states = self.states.lock().expect("subscription state mutex poisoned");
        Ok(states.get(key).cloned())
    }

    async fn apply(&self, changes: Vec<SubscriptionStateChange>) -> Result<()> {
        let mut states = self.states.lock().expect("subscription state mutex poisoned");

        // Validate every change against current state before mutating anything, so a
        // single bad change leaves the store completely untouched.
        for change in &changes {
            let exists = states.contains_key(change.key());
            let valid = match change {
                SubscriptionStateChange::Add(_) => !exists,
                SubscriptionStateChange::Replace(_) => exists,
                SubscriptionStateChange::Remove(_) => exists,
            };
            if !valid {
                let key = change.key();
                return Err(Error::ConflictingChange(key.group.clone(), key.id.clone()));
            }
        }

        for change in changes {
            match change {
                SubscriptionStateChange::Add(state) | SubscriptionStateChange::Replace(state) => {
                    states.insert(state.key.clone(), state);
                }
                SubscriptionStateChange::Remove(key) => {
                    states.remove(&key);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(group: &str, id: &str, sources: &[Identifier]) -> SubscriptionState {
        SubscriptionState {
            key: SubscriberKey::new(group, id),
            node_id: "n1".into(),
            event_sources: sources.iter().cloned().collect(),
        }
    }

    #[tokio::test]
    async fn add_then_list_returns_the_state() {
        let store = InMemorySubscriptionStateStore::new();
        let s = state("g", "s1", &[Identifier::category("orders")]);
        store.apply(vec![SubscriptionStateChange::Add(s.clone())]).await.unwrap();
        assert_eq!(store.list(None, None).await.unwrap(), vec![s]);
    }

    #[tokio::test]
    async fn apply_is_atomic_rejecting_whole_batch_on_one_invalid_change() {
        let store = InMemorySubscriptionStateStore::new();
        let add_invalid_remove = vec![
            SubscriptionStateChange::Add(state("g", "k1", &[])),
            SubscriptionStateChange::Remove(SubscriberKey::new("g", "k2")),
        ];
        let err = store.apply(add_invalid_remove).await.unwrap_err();
        assert!(matches!(err, Error::ConflictingChange(_, _)));
        assert!(store.list(None, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn replace_requires_existing_key() {
        let store = InMemorySubscriptionStateStore::new();
        let err = store
            .apply(vec![SubscriptionStateChange::Replace(state("g", "s1", &[]))])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConflictingChange(_, _)));
    }

    #[tokio::test]
    async fn add_requires_absent_key() {
        let store = InMemorySubscriptionStateStore::new();
        let s = state("g", "s1", &[]);
        store.apply(vec![SubscriptionStateChange::Add(s.clone())]).await.unwrap();
        let err = store
            .apply(vec![SubscriptionStateChange::Add(s)])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConflictingChange(_, _)));
    }
}
