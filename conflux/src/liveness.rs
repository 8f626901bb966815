//! Subscriber liveness: every node heartbeats the subscribers it owns so the
//! coordinator can tell which ones are healthy.
use crate::{clock::Clock, error::Result, subscriber::SubscriberKey};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// The last-seen record for one subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberState {
    pub key: SubscriberKey,
    pub node_id: String,
    pub last_seen: DateTime<Utc>,
}

impl SubscriberState {
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        now - self.last_seen > max_age
    }
}

/// Persists subscriber heartbeats.
#[async_trait]
pub trait SubscriberLivenessStore: Send + Sync {
    /// Upserts the heartbeat for `key`, owned by `node_id`, at the store's notion of now.
    async fn heartbeat(&self, key: &SubscriberKey, node_id: &str) -> Result<()>;

    /// Lists subscriber states, optionally filtered by `group` and by `max_age` (only
    /// states seen within `max_age` of now are returned).
    async fn list(&self, group: Option<&str>, max_age: Option<Duration>) -> Result<Vec<SubscriberState>>;

    /// Deletes records whose `last_seen` is older than `max_age`.
    async fn purge(&self, max_age: Duration) -> Result<u64>;
}

/// An in-memory [`SubscriberLivenessStore`].
pub struct InMemoryLivenessStore {
    clock: Arc<dyn Clock>,
    records: Mutex<HashMap<SubscriberKey, SubscriberState>>,
}

impl InMemoryLivenessStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            records: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl SubscriberLivenessStore for InMemoryLivenessStore {
    async fn heartbeat(&self, key: &SubscriberKey, node_id: &str) -> Result<()> {
        let now = self.clock.now();
        let mut records = self.records.lock().expect("liveness store mutex poisoned");
        records.insert(
            key.clone(),
            SubscriberState {
                key: key.clone(),
                node_id: node_id.to_string(),
                last_seen: now,
            },
        );
        Ok(())
    }

    async fn list(&self, group: Option<&str>, max_age: Option<Duration>) -> Result<Vec<SubscriberState>> {
        let now = self.clock.now();
        let records = self.records.lock().expect("liveness store mutex poisoned");
        Ok(records
            .values()
            .filter(|s| group.map_or(true, |g| s.key.group == g))
            .filter(|s| max_age.map_or(true, |age| !s.is_stale(now, age)))
            .cloned()
            .collect())
    }

    async fn purge(&self, max_age: Duration) -> Result<u64> {
        let now = self.clock.now();
        let mut records = self.records.lock().expect("liveness store mutex poisoned");
        let before = records.len();
        records.retain(|_, s| !s.is_stale(now, max_age));
        Ok((before - records.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;

    fn key() -> SubscriberKey {
        SubscriberKey::new("g", "s1")
    }

    #[tokio::test]
    async fn heartbeat_then_list_returns_the_subscriber() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let store = InMemoryLivenessStore::new(clock);
        store.heartbeat(&key(), "n1").await.unwrap();
        let states = store.list(Some("g"), None).await.unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].node_id, "n1");
    }

    #[tokio::test]
    async fn list_excludes_stale_records() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let store = InMemoryLivenessStore::new(clock.clone());
        store.heartbeat(&key(), "n1").await.unwrap();

        clock.advance(Duration::seconds(120));
        let states = store.list(None, Some(Duration::seconds(60))).await.unwrap();
        assert!(states.is_empty());
    }

    #[tokio::test]
    async fn purge_removes_records_past_max_age() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let store = InMemoryLivenessStore::new(clock.clone());
        store.heartbeat(&key(), "n1").await.unwrap();

        clock.advance(Duration::seconds(600));
        let purged = store.purge(Duration::seconds(300)).await.unwrap();
        assert_eq!(purged, 1);
        assert!(store.list(None, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_heartbeat_survives_a_purge() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let store = InMemoryLivenessStore::new(clock.clone());
        store.heartbeat(&key(), "n1").await.unwrap();
        clock.advance(Duration::seconds(600));

        // a fresh heartbeat lands after the purge threshold check would have fired
        store.heartbeat(&key(), "n1").await.unwrap();
        store.purge(Duration::seconds(300)).await.unwrap();

        let states = store.list(None, None).await.unwrap();
        assert_eq!(states.len(), 1);
    }
}
