//! The subscription coordinator: elected via a lock, it periodically reconciles desired
//! subscriber assignments against the authoritative subscription state.
use crate::{
    error::Result,
    liveness::SubscriberLivenessStore,
    lock::LockManager,
    source_mapping::SourceMappingRegistry,
    subscriber::SubscriberKey,
    subscription_state::{SubscriptionState, SubscriptionStateChange, SubscriptionStateStore},
};
use chrono::Duration;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{debug, warn};

/// The well-known lock name coordinators contend for; at most one coordinator runs at
/// a time across the fleet.
pub const COORDINATOR_LOCK: &str = "coordinator";

/// Tunables for [`SubscriptionCoordinator::tick`].
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorConfig {
    pub tick_interval: StdDuration,
    pub staleness_threshold: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            tick_interval: StdDuration::from_secs(1),
            staleness_threshold: Duration::seconds(60),
        }
    }
}

pub struct SubscriptionCoordinator {
    locks: Arc<dyn LockManager>,
    liveness: Arc<dyn SubscriberLivenessStore>,
    state: Arc<dyn SubscriptionStateStore>,
    sources: Arc<SourceMappingRegistry>,
    config: CoordinatorConfig,
}

impl SubscriptionCoordinator {
    pub fn new(
        locks: Arc<dyn LockManager>,
        liveness: Arc<dyn SubscriberLivenessStore>,
        state: Arc<dyn SubscriptionStateStore>,
        sources: Arc<SourceMappingRegistry>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            locks,
            liveness,
            state,
            sources,
            config,
        }
    }

    /// Runs a single reconciliation attempt. If the coordinator lock cannot be
    /// acquired, this is a no-op (some other node is coordinating this tick).
    pub async fn tick(&self) -> Result<()> {
        let Some(guard) = self.locks.try_lock(COORDINATOR_LOCK).await else {
            debug!("coordinator lock held elsewhere, skipping tick");
            return Ok(());
        };

        let alive = self
            .liveness
            .list(None, Some(self.config.staleness_threshold))
            .await?;
        let current = self.state.list(None, None).await?;

        let changes = reconcile(&alive, &current, &self.sources);
        if !changes.is_empty() {
            if let Err(err) = self.state.apply(changes).await {
                warn!(error = %err, "coordinator failed to apply subscription changeset, will retry next tick");
            }
        }

        guard.release().await;
        Ok(())
    }

    pub fn tick_interval(&self) -> StdDuration {
        self.config.tick_interval
    }
}

/// Computes the diff between desired and current subscription state.
///
/// Desired state is deterministic given `alive` and `sources`: subscribers within a
/// group are sorted by `(node_id, id)`, sources are sorted canonically, and source `i`
/// is assigned to subscriber `i mod N`. This stability means an unchanged membership
/// and mapping always produces an empty diff.
fn reconcile(
    alive: &[crate::liveness::SubscriberState],
    current: &[SubscriptionState],
    sources: &SourceMappingRegistry,
) -> Vec<SubscriptionStateChange> {
    let mut alive_by_group: HashMap<&str, Vec<&crate::liveness::SubscriberState>> = HashMap::new();
    for s in alive {
        alive_by_group.entry(&s.key.group).or_default().push(s);
    }
    for subs in alive_by_group.values_mut() {
        subs.sort_by(|a, b| (&a.node_id, &a.key.id).cmp(&(&b.node_id, &b.key.id)));
    }

    let mut current_by_key: HashMap<&SubscriberKey, &SubscriptionState> =
        current.iter().map(|s| (&s.key, s)).collect();

    let mut groups: BTreeSet<&str> = alive_by_group.keys().copied().collect();
    groups.extend(current.iter().map(|s| s.key.group.as_str()));

    let mut desired: HashMap<SubscriberKey, SubscriptionState> = HashMap::new();

    for group in groups {
        let subscribers = alive_by_group.get(group).cloned().unwrap_or_default();
        if subscribers.is_empty() {
            continue; // nothing desired; any current state in this group will be removed below
        }

        let mut assigned: HashMap<SubscriberKey, HashSet<crate::identifier::Identifier>> = subscribers
            .iter()
            .map(|s| (s.key.clone(), HashSet::new()))
            .collect();

        let mut source_ids: Vec<_> = sources.get(group).into_iter().collect();
        source_ids.sort();

        for (i, source) in source_ids.into_iter().enumerate() {
            let subscriber = subscribers[i % subscribers.len()];
            assigned.get_mut(&subscriber.key).unwrap().insert(source);
        }

        for subscriber in subscribers {
            desired.insert(
                subscriber.key.clone(),
                SubscriptionState {
                    key: subscriber.key.clone(),
                    node_id: subscriber.node_id.clone(),
                    event_sources: assigned.remove(&subscriber.key).unwrap_or_default(),
                },
            );
        }
    }

    let mut changes = Vec::new();

    for (key, desired_state) in &desired {
        match current_by_key.remove(key) {
            None => changes.push(SubscriptionStateChange::Add(desired_state.clone())),
            Some(current_state) => {
                if current_state.event_sources != desired_state.event_sources
                    || current_state.node_id != desired_state.node_id
                {
                    changes.push(SubscriptionStateChange::Replace(desired_state.clone()));
                }
            }
        }
    }

    // anything left in current_by_key has no desired counterpart: remove it.
    for key in current_by_key.keys() {
        changes.push(SubscriptionStateChange::Remove((*key).clone()));
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::identifier::Identifier;
    use crate::liveness::InMemoryLivenessStore;
    use crate::lock::InMemoryLockManager;
    use crate::subscription_state::InMemorySubscriptionStateStore;
    use chrono::Utc;

    async fn setup() -> (
        SubscriptionCoordinator,
        Arc<InMemoryLivenessStore>,
        Arc<InMemorySubscriptionStateStore>,
        Arc<SourceMappingRegistry>,
    ) {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let locks = Arc::new(InMemoryLockManager::new());
        let liveness = Arc::new(InMemoryLivenessStore::new(clock));
        let state = Arc::new(InMemorySubscriptionStateStore::new());
        let sources = Arc::new(SourceMappingRegistry::new());
        let coordinator = SubscriptionCoordinator::new(
            locks,
            liveness.clone(),
            state.clone(),
            sources.clone(),
            CoordinatorConfig::default(),
        );
        (coordinator, liveness, state, sources)
    }

    #[tokio::test]
    async fn rebalances_sources_across_healthy_subscribers() {
        let (coordinator, liveness, state, sources) = setup().await;
        sources.register(
            "g",
            [
                Identifier::category("A"),
                Identifier::category("B"),
                Identifier::category("C"),
            ],
        );
        liveness.heartbeat(&SubscriberKey::new("g", "s1"), "n1").await.unwrap();
        liveness.heartbeat(&SubscriberKey::new("g", "s2"), "n1").await.unwrap();

        coordinator.tick().await.unwrap();

        let states = state.list(None, None).await.unwrap();
        assert_eq!(states.len(), 2);
        let union: HashSet<_> = states.iter().flat_map(|s| s.event_sources.clone()).collect();
        assert_eq!(
            union,
            HashSet::from([
                Identifier::category("A"),
                Identifier::category("B"),
                Identifier::category("C"),
            ])
        );
    }

    #[tokio::test]
    async fn second_tick_with_unchanged_input_is_a_no_op() {
        let (coordinator, liveness, state, sources) = setup().await;
        sources.register("g", [Identifier::category("A")]);
        liveness.heartbeat(&SubscriberKey::new("g", "s1"), "n1").await.unwrap();

        coordinator.tick().await.unwrap();
        let after_first = state.list(None, None).await.unwrap();
        coordinator.tick().await.unwrap();
        let after_second = state.list(None, None).await.unwrap();

        assert_eq!(after_first, after_second);
    }

    #[tokio::test]
    async fn removes_assignment_when_subscriber_goes_stale() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let locks = Arc::new(InMemoryLockManager::new());
        let liveness = Arc::new(InMemoryLivenessStore::new(clock.clone()));
        let state = Arc::new(InMemorySubscriptionStateStore::new());
        let sources = Arc::new(SourceMappingRegistry::new());
        let coordinator = SubscriptionCoordinator::new(
            locks,
            liveness.clone(),
            state.clone(),
            sources.clone(),
            CoordinatorConfig::default(),
        );

        sources.register(
            "g",
            [Identifier::category("A"), Identifier::category("B"), Identifier::category("C")],
        );
        liveness.heartbeat(&SubscriberKey::new("g", "s1"), "n1").await.unwrap();
        liveness.heartbeat(&SubscriberKey::new("g", "s2"), "n1").await.unwrap();
        coordinator.tick().await.unwrap();

        clock.advance(Duration::seconds(120));
        liveness.heartbeat(&SubscriberKey::new("g", "s1"), "n1").await.unwrap();
        coordinator.tick().await.unwrap();

        let states = state.list(None, None).await.unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].key, SubscriberKey::new("g", "s1"));
        assert_eq!(states[0].event_sources.len(), 3);
    }
}
