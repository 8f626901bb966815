//! The event broker: composes the lock manager, liveness store, subscription state
//! store, coordinator and observer into a single lifecycle.
use crate::{
    config::BrokerConfig,
    coordinator::{CoordinatorConfig, SubscriptionCoordinator},
    error::Result,
    event_source::EventSourceFactory,
    liveness::SubscriberLivenessStore,
    lock::LockManager,
    observer::SubscriptionObserver,
    source_mapping::SourceMappingRegistry,
    subscriber::{Subscriber, SubscriberRegistry},
    subscription_state::SubscriptionStateStore,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Orchestrates the coordinator and observer ticks until cancelled.
pub struct EventBroker {
    node_id: String,
    registry: Arc<SubscriberRegistry>,
    coordinator: Arc<SubscriptionCoordinator>,
    observer: Arc<SubscriptionObserver>,
    config: BrokerConfig,
    cancellation: CancellationToken,
}

impl EventBroker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_id: impl Into<String>,
        locks: Arc<dyn LockManager>,
        liveness: Arc<dyn SubscriberLivenessStore>,
        state: Arc<dyn SubscriptionStateStore>,
        sources: Arc<SourceMappingRegistry>,
        factory: Arc<dyn EventSourceFactory>,
        config: BrokerConfig,
    ) -> Self {
        let node_id = node_id.into();
        let registry = Arc::new(SubscriberRegistry::new());
        let coordinator = Arc::new(SubscriptionCoordinator::new(
            locks,
            liveness.clone(),
            state.clone(),
            sources,
            CoordinatorConfig {
                tick_interval: config.coordinator_tick,
                staleness_threshold: config.staleness_threshold,
            },
        ));
        let observer = Arc::new(SubscriptionObserver::new(
            node_id.clone(),
            state,
            liveness,
            registry.clone(),
            factory,
        ));
        Self {
            node_id,
            registry,
            coordinator,
            observer,
            config,
            cancellation: CancellationToken::new(),
        }
    }

    /// Registers a subscriber to run on this node.
    pub fn register(&self, subscriber: Arc<dyn Subscriber>) {
        self.registry.add(subscriber);
    }

    /// Deregisters a subscriber from this node by key. Fails if no subscriber is
    /// registered under `key`.
    pub fn deregister(&self, key: &crate::subscriber::SubscriberKey) -> Result<()> {
        self.registry.remove(key)
    }

    /// Drives coordinator and observer ticks until [`EventBroker::shutdown`] is called.
    /// Returns cleanly on cancellation; an in-flight tick is always allowed to finish.
    pub async fn run(&self) -> Result<()> {
        info!(node_id = %self.node_id, "event broker starting");
        let mut coordinator_interval = tokio::time::interval(self.config.coordinator_tick);
        let mut observer_interval = tokio::time::interval(self.config.observer_tick);

        loop {
            tokio::select! {
                _ = self.cancellation.cancelled() => {
                    info!(node_id = %self.node_id, "event broker shutting down");
                    break;
                }
                _ = coordinator_interval.tick() => {
                    if let Err(err) = self.coordinator.tick().await {
                        error!(error = %err, "coordinator tick failed");
                    }
                }
                _ = observer_interval.tick() => {
                    if let Err(err) = self.observer.tick().await {
                        error!(error = %err, "observer tick failed");
                    }
                }
            }
        }
        Ok(())
    }

    /// Cancels [`EventBroker::run`], withdraws every local subscriber from its
    /// currently assigned sources, and deregisters them locally.
    pub async fn shutdown(&self) {
        self.cancellation.cancel();
        self.observer.withdraw_all().await;
        for subscriber in self.registry.list() {
            let _ = self.registry.remove(&subscriber.key());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::event_source::StoreEventSourceFactory;
    use crate::event_store::InMemoryEventStore;
    use crate::liveness::InMemoryLivenessStore;
    use crate::lock::InMemoryLockManager;
    use crate::subscription_state::InMemorySubscriptionStateStore;
    use chrono::Utc;
    use std::time::Duration;

    #[tokio::test]
    async fn run_returns_promptly_after_shutdown() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let locks: Arc<dyn LockManager> = Arc::new(InMemoryLockManager::new());
        let liveness: Arc<dyn SubscriberLivenessStore> = Arc::new(InMemoryLivenessStore::new(clock));
        let state: Arc<dyn SubscriptionStateStore> = Arc::new(InMemorySubscriptionStateStore::new());
        let sources = Arc::new(SourceMappingRegistry::new());
        let store: Arc<dyn crate::event_store::EventStore> = Arc::new(InMemoryEventStore::new());
        let factory = Arc::new(StoreEventSourceFactory::new(store));

        let broker = Arc::new(EventBroker::new(
            "n1",
            locks,
            liveness,
            state,
            sources,
            factory,
            BrokerConfig::default().with_coordinator_tick(Duration::from_millis(10)),
        ));

        let run_handle = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.run().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.shutdown().await;

        tokio::time::timeout(Duration::from_secs(1), run_handle)
            .await
            .expect("run() should return promptly after shutdown")
            .unwrap()
            .unwrap();
    }
}
