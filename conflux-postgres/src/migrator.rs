//! Database initialization for the event store, liveness store, and subscription state
//! store.
//!
//! `Migrator` is intended to be run once during application startup or from dedicated
//! administrative tooling, not on every process launch.
use crate::Error;
use sqlx::postgres::PgPool;

/// Creates the tables and indexes backing [`crate::PgEventStore`],
/// [`crate::PgLivenessStore`], and [`crate::PgSubscriptionStateStore`].
pub struct Migrator {
    pool: PgPool,
}

impl Migrator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates every table this crate's stores need, if they don't already exist.
    pub async fn run(&self) -> Result<(), Error> {
        self.init_event_store().await?;
        self.init_liveness_store().await?;
        self.init_subscription_state_store().await?;
        Ok(())
    }

    pub async fn init_event_store(&self) -> Result<(), Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS events (
                sequence_number BIGSERIAL PRIMARY KEY,
                id TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                category TEXT NOT NULL,
                stream TEXT NOT NULL,
                position INT NOT NULL,
                payload JSONB NOT NULL,
                observed_at TIMESTAMPTZ NOT NULL,
                occurred_at TIMESTAMPTZ NOT NULL,
                UNIQUE (category, stream, position)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_category ON events (category)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_events_category_stream ON events (category, stream)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_events_category_sequence_number ON events (category, sequence_number)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn init_liveness_store(&self) -> Result<(), Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS subscribers (
                id TEXT NOT NULL,
                \"group\" TEXT NOT NULL,
                node_id TEXT NOT NULL,
                last_seen TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (id, \"group\")
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_subscribers_last_seen ON subscribers (last_seen)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn init_subscription_state_store(&self) -> Result<(), Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS subscriptions (
                \"group\" TEXT NOT NULL,
                id TEXT NOT NULL,
                node_id TEXT NOT NULL,
                event_sources JSONB NOT NULL,
                PRIMARY KEY (\"group\", id)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_subscriptions_node_id ON subscriptions (node_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
