//! PostgreSQL implementation of [`conflux::LockManager`] using session-level advisory
//! locks.
//!
//! Unlike the in-memory manager, a held lock here is tied to a dedicated database
//! connection: the advisory lock is released either explicitly or when that connection
//! closes, so a crashed coordinator cannot leave the lock permanently held.
use async_trait::async_trait;
use conflux::{LockGuard, LockHandle, LockManager};
use sqlx::postgres::PgPool;
use std::hash::{Hash, Hasher};

fn lock_key(name: &str) -> i64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    name.hash(&mut hasher);
    hasher.finish() as i64
}

/// A [`LockManager`] backed by Postgres `pg_advisory_lock`/`pg_try_advisory_lock`.
pub struct PgLockManager {
    pool: PgPool,
}

impl PgLockManager {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

struct PgLockHandle {
    conn: Option<sqlx::pool::PoolConnection<sqlx::Postgres>>,
    key: i64,
}

async fn unlock(conn: &mut sqlx::pool::PoolConnection<sqlx::Postgres>, key: i64) {
    let _ = sqlx::query("SELECT pg_advisory_unlock($1)")
        .bind(key)
        .execute(&mut **conn)
        .await;
}

#[async_trait]
impl LockHandle for PgLockHandle {
    async fn release(mut self: Box<Self>) {
        if let Some(mut conn) = self.conn.take() {
            unlock(&mut conn, self.key).await;
        }
    }
}

impl Drop for PgLockHandle {
    fn drop(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            let key = self.key;
            tokio::spawn(async move { unlock(&mut conn, key).await });
        }
    }
}

#[async_trait]
impl LockManager for PgLockManager {
    async fn try_lock(&self, name: &str) -> Option<LockGuard> {
        let key = lock_key(name);
        let mut conn = self.pool.acquire().await.ok()?;
        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(key)
            .fetch_one(&mut *conn)
            .await
            .ok()?;
        if acquired {
            Some(LockGuard::new(Box::new(PgLockHandle { conn: Some(conn), key })))
        } else {
            None
        }
    }

    async fn wait_for_lock(&self, name: &str) -> LockGuard {
        let key = lock_key(name);
        let mut conn = self
            .pool
            .acquire()
            .await
            .expect("acquiring a pooled connection for an advisory lock");
        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(key)
            .execute(&mut *conn)
            .await
            .expect("pg_advisory_lock");
        LockGuard::new(Box::new(PgLockHandle { conn: Some(conn), key }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::PgPool;

    #[sqlx::test]
    async fn try_lock_excludes_concurrent_holders(pool: PgPool) {
        let mgr = PgLockManager::new(pool);
        let guard = mgr.try_lock("coordinator").await;
        assert!(guard.is_some());
        assert!(mgr.try_lock("coordinator").await.is_none());
    }

    #[sqlx::test]
    async fn releasing_allows_reacquisition(pool: PgPool) {
        let mgr = PgLockManager::new(pool);
        let guard = mgr.try_lock("coordinator").await.unwrap();
        guard.release().await;
        assert!(mgr.try_lock("coordinator").await.is_some());
    }
}
