//! The subscription observer: on each node, keeps local subscriber instances aligned
//! with the sources assigned to them in the subscription state store.
use crate::{
    error::Result,
    event_source::EventSourceFactory,
    identifier::Identifier,
    liveness::SubscriberLivenessStore,
    subscriber::{SubscriberKey, SubscriberRegistry},
    subscription_state::SubscriptionStateStore,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

pub struct SubscriptionObserver {
    node_id: String,
    state: Arc<dyn SubscriptionStateStore>,
    liveness: Arc<dyn SubscriberLivenessStore>,
    registry: Arc<SubscriberRegistry>,
    factory: Arc<dyn EventSourceFactory>,
    // sources each subscriber is currently known to be consuming, per our own bookkeeping
    holding: Mutex<HashMap<SubscriberKey, HashSet<Identifier>>>,
}

impl SubscriptionObserver {
    pub fn new(
        node_id: impl Into<String>,
        state: Arc<dyn SubscriptionStateStore>,
        liveness: Arc<dyn SubscriberLivenessStore>,
        registry: Arc<SubscriberRegistry>,
        factory: Arc<dyn EventSourceFactory>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            state,
            liveness,
            registry,
            factory,
            holding: Mutex::new(HashMap::new()),
        }
    }

    /// Runs a single reconciliation pass: resolves newly-assigned sources, withdraws
    /// unassigned ones, and heartbeats every local subscriber regardless of outcome.
    pub async fn tick(&self) -> Result<()> {
        let assignments = self.state.list(Some(&self.node_id), None).await?;

        for assignment in &assignments {
            let Some(subscriber) = self.registry.get(&assignment.key) else {
                continue; // deregistered locally; coordinator will notice via staleness
            };

            let mut holding = self.holding.lock().await;
            let currently_held = holding.entry(assignment.key.clone()).or_default().clone();

            let to_accept: Vec<_> = assignment
                .event_sources
                .difference(&currently_held)
                .cloned()
                .collect();
            let to_withdraw: Vec<_> = currently_held
                .difference(&assignment.event_sources)
                .cloned()
                .collect();
            drop(holding);

            for identifier in to_withdraw {
                let view = match self.factory.create(&identifier).await {
                    Ok(view) => view,
                    Err(err) => {
                        warn!(
                            subscriber = ?assignment.key,
                            source = %identifier,
                            error = %err,
                            "failed to resolve event source to withdraw, will retry next tick"
                        );
                        continue;
                    }
                };
                match subscriber.withdraw(view).await {
                    Ok(()) => {
                        self.holding
                            .lock()
                            .await
                            .entry(assignment.key.clone())
                            .or_default()
                            .remove(&identifier);
                    }
                    Err(err) => warn!(
                        subscriber = ?assignment.key,
                        source = %identifier,
                        error = %err,
                        "withdraw failed, will retry next tick"
                    ),
                }
            }

            for identifier in to_accept {
                let view = match self.factory.create(&identifier).await {
                    Ok(view) => view,
                    Err(err) => {
                        warn!(
                            subscriber = ?assignment.key,
                            source = %identifier,
                            error = %err,
                            "failed to resolve event source to accept, will retry next tick"
                        );
                        continue;
                    }
                };
                match subscriber.accept(view).await {
                    Ok(()) => {
                        self.holding
                            .lock()
                            .await
                            .entry(assignment.key.clone())
                            .or_default()
                            .insert(identifier);
                    }
                    Err(err) => warn!(
                        subscriber = ?assignment.key,
                        source = %identifier,
                        error = %err,
                        "accept failed, will retry next tick"
                    ),
                }
            }
        }

        for subscriber in self.registry.list() {
            self.liveness.heartbeat(&subscriber.key(), &self.node_id).await?;
        }

        Ok(())
    }

    /// Withdraws every local subscriber from every source it currently holds, per our
    /// own bookkeeping, and clears that bookkeeping. Used during broker shutdown.
    pub async fn withdraw_all(&self) {
        let held: Vec<_> = {
            let holding = self.holding.lock().await;
            holding
                .iter()
                .map(|(key, sources)| (key.clone(), sources.clone()))
                .collect()
        };

        for (key, sources) in held {
            let Some(subscriber) = self.registry.get(&key) else {
                continue;
            };
            for identifier in sources {
                let view = match self.factory.create(&identifier).await {
                    Ok(view) => view,
                    Err(err) => {
                        warn!(
                            subscriber = ?key,
                            source = %identifier,
                            error = %err,
                            "failed to resolve event source to withdraw during shutdown"
                        );
                        continue;
                    }
                };
                if let Err(err) = subscriber.withdraw(view).await {
                    warn!(
                        subscriber = ?key,
                        source = %identifier,
                        error = %err,
                        "withdraw failed during shutdown"
                    );
                }
            }
        }

        self.holding.lock().await.clear();
    }
}
