//! PostgreSQL implementation of [`conflux::SubscriptionStateStore`].
//!
//! `apply` runs inside a single transaction: every change is validated against the
//! current row set before any write happens, and the whole transaction is rolled back
//! if one change doesn't hold, giving the all-or-nothing contract directly rather than
//! through a row-version/optimistic-concurrency column.
use async_trait::async_trait;
use conflux::{
    Error as CoreError, Identifier, Result as CoreResult, SubscriberKey, SubscriptionState,
    SubscriptionStateChange, SubscriptionStateStore,
};
use sqlx::postgres::PgPool;
use sqlx::Row;
use std::collections::HashSet;

#[derive(Clone)]
pub struct PgSubscriptionStateStore {
    pool: PgPool,
}

impl PgSubscriptionStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn sources_to_json(sources: &HashSet<Identifier>) -> serde_json::Value {
    serde_json::Value::Array(sources.iter().map(|s| serde_json::to_value(s).unwrap()).collect())
}

fn json_to_sources(value: serde_json::Value) -> HashSet<Identifier> {
    serde_json::from_value::<Vec<Identifier>>(value)
        .unwrap_or_default()
        .into_iter()
        .collect()
}

#[async_trait]
impl SubscriptionStateStore for PgSubscriptionStateStore {
    async fn list(&self, node_id: Option<&str>, group: Option<&str>) -> CoreResult<Vec<SubscriptionState>> {
        let rows = sqlx::query(
            "SELECT \"group\", id, node_id, event_sources FROM subscriptions \
             WHERE ($1::text IS NULL OR node_id = $1) \
               AND ($2::text IS NULL OR \"group\" = $2)",
        )
        .bind(node_id)
        .bind(group)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::TransientStorage(Box::new(e)))?;

        rows.into_iter()
            .map(row_to_state)
            .collect()
    }

    async fn get(&self, key: &SubscriberKey) -> CoreResult<Option<SubscriptionState>> {
        let row = sqlx::query(
            "SELECT \"group\", id, node_id, event_sources FROM subscriptions WHERE \"group\" = $1 AND id = $2",
        )
        .bind(&key.group)
        .bind(&key.id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CoreError::TransientStorage(Box::new(e)))?;

        row.map(row_to_state).transpose()
    }

    async fn apply(&self, changes: Vec<SubscriptionStateChange>) -> CoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(|e| CoreError::TransientStorage(Box::new(e)))?;

        for change in &changes {
            let key = change.key();
            let exists: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM subscriptions WHERE \"group\" = $1 AND id = $2)",
            )
            .bind(&key.group)
            .bind(&key.id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| CoreError::TransientStorage(Box::new(e)))?;

            let valid = match change {
                SubscriptionStateChange::Add(_) => !exists,
                SubscriptionStateChange::Replace(_) => exists,
                SubscriptionStateChange::Remove(_) => exists,
            };
            if !valid {
                return Err(CoreError::ConflictingChange(key.group.clone(), key.id.clone()));
            }
        }

        for change in changes {
            match change {
                SubscriptionStateChange::Add(state) | SubscriptionStateChange::Replace(state) => {
                    sqlx::query(
                        "INSERT INTO subscriptions (\"group\", id, node_id, event_sources) VALUES ($1, $2, $3, $4) \
                         ON CONFLICT (\"group\", id) DO UPDATE SET node_id = EXCLUDED.node_id, event_sources = EXCLUDED.event_sources",
                    )
                    .bind(&state.key.group)
                    .bind(&state.key.id)
                    .bind(&state.node_id)
                    .bind(sources_to_json(&state.event_sources))
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| CoreError::TransientStorage(Box::new(e)))?;
                }
                SubscriptionStateChange::Remove(key) => {
                    sqlx::query("DELETE FROM subscriptions WHERE \"group\" = $1 AND id = $2")
                        .bind(&key.group)
                        .bind(&key.id)
                        .execute(&mut *tx)
                        .await
                        .map_err(|e| CoreError::TransientStorage(Box::new(e)))?;
                }
            }
        }

        tx.commit().await.map_err(|e| CoreError::TransientStorage(Box::new(e)))?;
        Ok(())
    }
}

fn row_to_state(row: sqlx::postgres::PgRow) -> CoreResult<SubscriptionState> {
    let group: String = row.try_get("group").map_err(|e| CoreError::TransientStorage(Box::new(e)))?;
    let id: String = row.try_get("id").map_err(|e| CoreError::TransientStorage(Box::new(e)))?;
    let node_id: String = row.try_get("node_id").map_err(|e| CoreError::TransientStorage(Box::new(e)))?;
    let event_sources: serde_json::Value = row.try_get("event_sources").map_err(|e| CoreError::TransientStorage(Box::new(e)))?;

    Ok(SubscriptionState {
        key: SubscriberKey::new(group, id),
        node_id,
        event_sources: json_to_sources(event_sources),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrator::Migrator;
    use sqlx::PgPool;

    #[sqlx::test]
    async fn passes_the_shared_conformance_suite(pool: PgPool) {
        Migrator::new(pool.clone()).init_subscription_state_store().await.unwrap();
        conflux::testing::subscription_state_store_conformance(&PgSubscriptionStateStore::new(pool)).await;
    }
}
