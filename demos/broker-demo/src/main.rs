//! Minimal end-to-end walkthrough of the broker: a single node appends a handful of
//! orders events, registers one subscriber against the `orders` category, and lets the
//! coordinator and observer reconcile and heartbeat until shutdown.
use async_trait::async_trait;
use conflux::{
    BrokerConfig, Clock, EventBroker, EventSourceView, Identifier, InMemoryEventStore,
    InMemoryLivenessStore, InMemoryLockManager, InMemorySubscriptionStateStore, NewEvent, Result,
    SourceMappingRegistry, Subscriber, SubscriberKey, SystemClock,
};
use conflux::{EventStore, StoreEventSourceFactory};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

struct LoggingSubscriber {
    key: SubscriberKey,
}

#[async_trait]
impl Subscriber for LoggingSubscriber {
    fn key(&self) -> SubscriberKey {
        self.key.clone()
    }

    async fn accept(&self, source: EventSourceView) -> Result<()> {
        info!(subscriber = ?self.key, source = %source.identifier(), "accepted source");
        for event in source.iterate(None).await? {
            info!(subscriber = ?self.key, event = %event.name, stream = %event.stream, "observed event");
        }
        Ok(())
    }

    async fn withdraw(&self, source: EventSourceView) -> Result<()> {
        info!(subscriber = ?self.key, source = %source.identifier(), "withdrew source");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new());
    store
        .save(
            &Identifier::stream("orders", "o-1"),
            vec![NewEvent::now("order_placed", serde_json::json!({ "total": 42 }))],
            &[],
        )
        .await?;

    let locks = Arc::new(InMemoryLockManager::new());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let liveness = Arc::new(InMemoryLivenessStore::new(clock));
    let state = Arc::new(InMemorySubscriptionStateStore::new());
    let sources = Arc::new(SourceMappingRegistry::new());
    sources.register("orders-readers", [Identifier::category("orders")]);
    let factory = Arc::new(StoreEventSourceFactory::new(store.clone()));

    let broker = Arc::new(EventBroker::new(
        "demo-node",
        locks,
        liveness,
        state,
        sources,
        factory,
        BrokerConfig::default()
            .with_coordinator_tick(Duration::from_millis(100))
            .with_observer_tick(Duration::from_millis(100)),
    ));
    broker.register(Arc::new(LoggingSubscriber {
        key: SubscriberKey::new("orders-readers", "worker-1"),
    }));

    let run_handle = {
        let broker = broker.clone();
        tokio::spawn(async move { broker.run().await })
    };

    tokio::time::sleep(Duration::from_secs(1)).await;
    broker.shutdown().await;
    run_handle.await.expect("broker task panicked")?;

    Ok(())
}
