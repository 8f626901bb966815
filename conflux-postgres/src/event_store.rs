//! PostgreSQL implementation of [`conflux::EventStore`].
//!
//! Concurrency is serialised with an exclusive table lock taken inside the same
//! transaction as the read-tip-then-insert sequence, matching the original system's
//! `LOCK TABLE ... IN EXCLUSIVE MODE` strategy rather than a SERIALIZABLE-transaction
//! retry loop: every writer, regardless of target stream, takes the same lock, so tip
//! reads inside the transaction are guaranteed linearizable with respect to commits.
use crate::error::map_concurrency_err;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conflux::{
    Error as CoreError, EventStore, Identifier, NewEvent, QueryConstraint, Result as CoreResult,
    StoredEvent, WriteCondition,
};
use sqlx::postgres::PgPool;
use sqlx::Row;

/// A PostgreSQL-backed [`EventStore`].
#[derive(Clone)]
pub struct PgEventStore {
    pub(crate) pool: PgPool,
    page_size: i64,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool, page_size: conflux::DEFAULT_SCAN_PAGE_SIZE as i64 }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size as i64;
        self
    }
}

fn row_to_event(row: &sqlx::postgres::PgRow) -> Result<StoredEvent, sqlx::Error> {
    Ok(StoredEvent {
        id: row.try_get("id")?,
        category: row.try_get("category")?,
        stream: row.try_get("stream")?,
        position: row.try_get::<i32, _>("position")? as i64,
        sequence_number: row.try_get("sequence_number")?,
        name: row.try_get("name")?,
        payload: row.try_get("payload")?,
        observed_at: row.try_get("observed_at")?,
        occurred_at: row.try_get("occurred_at")?,
    })
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn save(
        &self,
        target: &Identifier,
        events: Vec<NewEvent>,
        conditions: &[WriteCondition],
    ) -> CoreResult<Vec<StoredEvent>> {
        let (category, stream) = match target {
            Identifier::Stream { category, stream } => (category.clone(), stream.clone()),
            _ => {
                return Err(CoreError::UnsupportedQuery(
                    "save requires a Stream identifier".into(),
                ))
            }
        };

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_concurrency_err(e, &category, &stream))?;

        sqlx::query("LOCK TABLE ONLY events IN EXCLUSIVE MODE")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_concurrency_err(e, &category, &stream))?;

        let tip: Option<i32> = sqlx::query_scalar(
            "SELECT position FROM events WHERE category = $1 AND stream = $2 ORDER BY position DESC LIMIT 1",
        )
        .bind(&category)
        .bind(&stream)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_concurrency_err(e, &category, &stream))?;

        for condition in conditions {
            let satisfied = match condition {
                WriteCondition::StreamIsEmpty => tip.is_none(),
                WriteCondition::PositionIs(n) => tip == Some(*n as i32),
            };
            if !satisfied {
                return Err(CoreError::UnmetWriteCondition { category, stream });
            }
        }

        let mut position = tip.map(|p| p + 1).unwrap_or(0);
        let mut stored = Vec::with_capacity(events.len());
        for event in events {
            let id = uuid::Uuid::new_v4().to_string();
            let row = sqlx::query(
                "INSERT INTO events (id, name, category, stream, position, payload, observed_at, occurred_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
                 RETURNING sequence_number",
            )
            .bind(&id)
            .bind(&event.name)
            .bind(&category)
            .bind(&stream)
            .bind(position)
            .bind(&event.payload)
            .bind(event.observed_at)
            .bind(event.occurred_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_concurrency_err(e, &category, &stream))?;

            stored.push(StoredEvent {
                id,
                category: category.clone(),
                stream: stream.clone(),
                position: position as i64,
                sequence_number: row.try_get("sequence_number").map_err(|e| map_concurrency_err(e, &category, &stream))?,
                name: event.name,
                payload: event.payload,
                observed_at: event.observed_at,
                occurred_at: event.occurred_at,
            });
            position += 1;
        }

        tx.commit()
            .await
            .map_err(|e| map_concurrency_err(e, &category, &stream))?;

        Ok(stored)
    }

    async fn scan(
        &self,
        target: &Identifier,
        constraints: &[QueryConstraint],
    ) -> CoreResult<Vec<StoredEvent>> {
        let mut after = constraints
            .iter()
            .map(|c| match c {
                QueryConstraint::SequenceNumberAfter(n) => *n,
            })
            .max()
            .unwrap_or(-1);

        let (category, stream) = match target {
            Identifier::Log => (None, None),
            Identifier::Category { category } => (Some(category.clone()), None),
            Identifier::Stream { category, stream } => (Some(category.clone()), Some(stream.clone())),
        };

        let mut results = Vec::new();
        loop {
            let rows = sqlx::query(
                "SELECT * FROM events \
                 WHERE sequence_number > $1 \
                   AND ($2::text IS NULL OR category = $2) \
                   AND ($3::text IS NULL OR stream = $3) \
                 ORDER BY sequence_number ASC \
                 LIMIT $4",
            )
            .bind(after)
            .bind(&category)
            .bind(&stream)
            .bind(self.page_size)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CoreError::TransientStorage(Box::new(e)))?;

            let page_len = rows.len();
            for row in &rows {
                let event = row_to_event(row).map_err(|e| CoreError::TransientStorage(Box::new(e)))?;
                after = event.sequence_number;
                results.push(event);
            }

            if (page_len as i64) < self.page_size {
                break;
            }
        }

        Ok(results)
    }
}

/// Current wall-clock time as Postgres would record it; kept here rather than in the
/// core crate since only the SQL backends need to ask the database for its own clock.
pub async fn database_now(pool: &PgPool) -> Result<DateTime<Utc>, sqlx::Error> {
    sqlx::query_scalar("SELECT now()").fetch_one(pool).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrator::Migrator;

    #[sqlx::test]
    async fn passes_the_shared_conformance_suite(pool: PgPool) {
        Migrator::new(pool.clone()).init_event_store().await.unwrap();
        conflux::testing::event_store_conformance(&PgEventStore::new(pool)).await;
    }
}
