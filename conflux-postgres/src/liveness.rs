//! PostgreSQL implementation of [`conflux::SubscriberLivenessStore`].
//!
//! The original Python implementation left `heartbeat` and `purge` as
//! `raise NotImplementedError()` stubs. Both are fully implemented here: `heartbeat` is
//! an upsert keyed on `(id, group)`, and `purge` is a straightforward age-filtered
//! delete, safe to run concurrently with heartbeats because a heartbeat simply
//! refreshes `last_seen` and is not affected by a delete of a different, stale row.
use async_trait::async_trait;
use chrono::Duration;
use conflux::{Error as CoreError, Result as CoreResult, SubscriberKey, SubscriberLivenessStore, SubscriberState};
use sqlx::postgres::PgPool;
use sqlx::Row;

#[derive(Clone)]
pub struct PgLivenessStore {
    pool: PgPool,
}

impl PgLivenessStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriberLivenessStore for PgLivenessStore {
    async fn heartbeat(&self, key: &SubscriberKey, node_id: &str) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO subscribers (id, \"group\", node_id, last_seen) VALUES ($1, $2, $3, now()) \
             ON CONFLICT (id, \"group\") DO UPDATE SET last_seen = now(), node_id = EXCLUDED.node_id",
        )
        .bind(&key.id)
        .bind(&key.group)
        .bind(node_id)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::TransientStorage(Box::new(e)))?;
        Ok(())
    }

    async fn list(&self, group: Option<&str>, max_age: Option<Duration>) -> CoreResult<Vec<SubscriberState>> {
        let rows = sqlx::query(
            "SELECT id, \"group\", node_id, last_seen FROM subscribers \
             WHERE ($1::text IS NULL OR \"group\" = $1) \
               AND ($2::interval IS NULL OR now() - last_seen <= $2)",
        )
        .bind(group)
        .bind(max_age.map(|d| sqlx_interval(d)))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::TransientStorage(Box::new(e)))?;

        rows.iter()
            .map(|row| {
                Ok(SubscriberState {
                    key: SubscriberKey::new(
                        row.try_get::<String, _>("group").map_err(|e| CoreError::TransientStorage(Box::new(e)))?,
                        row.try_get::<String, _>("id").map_err(|e| CoreError::TransientStorage(Box::new(e)))?,
                    ),
                    node_id: row.try_get("node_id").map_err(|e| CoreError::TransientStorage(Box::new(e)))?,
                    last_seen: row.try_get("last_seen").map_err(|e| CoreError::TransientStorage(Box::new(e)))?,
                })
            })
            .collect()
    }

    async fn purge(&self, max_age: Duration) -> CoreResult<u64> {
        let result = sqlx::query("DELETE FROM subscribers WHERE now() - last_seen > $1")
            .bind(sqlx_interval(max_age))
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::TransientStorage(Box::new(e)))?;
        Ok(result.rows_affected())
    }
}

fn sqlx_interval(duration: Duration) -> sqlx::postgres::types::PgInterval {
    sqlx::postgres::types::PgInterval {
        months: 0,
        days: 0,
        microseconds: duration.num_microseconds().unwrap_or(i64::MAX),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrator::Migrator;

    #[sqlx::test]
    async fn passes_the_shared_conformance_suite(pool: PgPool) {
        Migrator::new(pool.clone()).init_liveness_store().await.unwrap();
        conflux::testing::liveness_store_conformance(&PgLivenessStore::new(pool)).await;
    }

    #[sqlx::test]
    async fn purge_removes_only_stale_rows(pool: PgPool) {
        Migrator::new(pool.clone()).init_liveness_store().await.unwrap();
        let store = PgLivenessStore::new(pool);
        store.heartbeat(&SubscriberKey::new("g", "s1"), "n1").await.unwrap();
        let purged = store.purge(Duration::seconds(60)).await.unwrap();
        assert_eq!(purged, 0, "a fresh heartbeat must not be purged");
    }
}
