//! SQLite-backed `JobBroker` (C8), built on the `broker_jobs` table
//! (spec §4.9). SQLite has no `FOR UPDATE SKIP LOCKED`; claiming instead
//! uses a single atomic `UPDATE ... WHERE id = (SELECT ...) RETURNING`,
//! which SQLite's single-writer model makes race-free without an
//! explicit lock.

use chrono::{DateTime, Utc};

use super::{EnqueueOptions, JobBroker, JobHandle};
use crate::clock::new_id;
use crate::error::BrokerError;
use crate::storage::DbPool;

pub struct SqliteBroker {
    pool: DbPool,
}

impl SqliteBroker {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl JobBroker for SqliteBroker {
    async fn enqueue(&self, queue: &str, payload: &str, options: EnqueueOptions) -> Result<(), BrokerError> {
        let id = new_id();
        let visible_at = Utc::now() + chrono::Duration::milliseconds(options.delay_ms as i64);

        sqlx::query(
            "INSERT INTO broker_jobs (id, queue, payload, dedup_key, visible_at, created_at) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(queue, dedup_key) WHERE dedup_key IS NOT NULL DO NOTHING",
        )
        .bind(&id)
        .bind(queue)
        .bind(payload)
        .bind(&options.dedup_key)
        .bind(visible_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| BrokerError::Storage(crate::error::StorageError::Query { source: e }))?;

        Ok(())
    }

    async fn claim(&self, queue: &str, visibility_timeout_ms: u64) -> Result<Option<(JobHandle, String)>, BrokerError> {
        let lease = new_id();
        let now = Utc::now();
        let invisible_until: DateTime<Utc> = now + chrono::Duration::milliseconds(visibility_timeout_ms as i64);

        let row: Option<(String, String)> = sqlx::query_as(
            "UPDATE broker_jobs SET claimed_by = ?, claimed_at = ?, visible_at = ? \
             WHERE id = ( \
                 SELECT id FROM broker_jobs \
                 WHERE queue = ? AND visible_at <= ? AND claimed_by IS NULL \
                 ORDER BY visible_at LIMIT 1 \
             ) \
             RETURNING id, payload",
        )
        .bind(&lease)
        .bind(now)
        .bind(invisible_until)
        .bind(queue)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BrokerError::Storage(crate::error::StorageError::Query { source: e }))?;

        Ok(row.map(|(id, payload)| (JobHandle { id, queue: queue.to_string() }, payload)))
    }

    async fn ack(&self, handle: &JobHandle) -> Result<(), BrokerError> {
        sqlx::query("DELETE FROM broker_jobs WHERE id = ?")
            .bind(&handle.id)
            .execute(&self.pool)
            .await
            .map_err(|e| BrokerError::Storage(crate::error::StorageError::Query { source: e }))?;
        Ok(())
    }

    async fn nack(&self, handle: &JobHandle, requeue_delay_ms: u64) -> Result<(), BrokerError> {
        let visible_at = Utc::now() + chrono::Duration::milliseconds(requeue_delay_ms as i64);
        sqlx::query("UPDATE broker_jobs SET claimed_by = NULL, claimed_at = NULL, visible_at = ? WHERE id = ?")
            .bind(visible_at)
            .bind(&handle.id)
            .execute(&self.pool)
            .await
            .map_err(|e| BrokerError::Storage(crate::error::StorageError::Query { source: e }))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::init_test_db;

    #[tokio::test]
    async fn enqueue_then_claim_returns_payload() {
        let pool = init_test_db().await.unwrap();
        let broker = SqliteBroker::new(pool);

        broker.enqueue("posts", "payload-1", EnqueueOptions::default()).await.unwrap();
        let (handle, payload) = broker.claim("posts", 30_000).await.unwrap().unwrap();
        assert_eq!(payload, "payload-1");
        assert_eq!(handle.queue, "posts");
    }

    #[tokio::test]
    async fn claimed_job_is_invisible_until_visibility_timeout_elapses() {
        let pool = init_test_db().await.unwrap();
        let broker = SqliteBroker::new(pool);

        broker.enqueue("posts", "payload-1", EnqueueOptions::default()).await.unwrap();
        broker.claim("posts", 30_000).await.unwrap().unwrap();

        assert!(broker.claim("posts", 30_000).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ack_removes_job_permanently() {
        let pool = init_test_db().await.unwrap();
        let broker = SqliteBroker::new(pool);

        broker.enqueue("posts", "payload-1", EnqueueOptions::default()).await.unwrap();
        let (handle, _) = broker.claim("posts", 30_000).await.unwrap().unwrap();
        broker.ack(&handle).await.unwrap();

        assert!(broker.claim("posts", 30_000).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn nack_makes_job_reclaimable_after_delay() {
        let pool = init_test_db().await.unwrap();
        let broker = SqliteBroker::new(pool);

        broker.enqueue("posts", "payload-1", EnqueueOptions::default()).await.unwrap();
        let (handle, _) = broker.claim("posts", 30_000).await.unwrap().unwrap();
        broker.nack(&handle, 0).await.unwrap();

        assert!(broker.claim("posts", 30_000).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn dedup_key_collision_is_a_no_op() {
        let pool = init_test_db().await.unwrap();
        let broker = SqliteBroker::new(pool);

        let opts = EnqueueOptions { delay_ms: 0, dedup_key: Some("post-1".to_string()) };
        broker.enqueue("posts", "first", opts.clone()).await.unwrap();
        broker.enqueue("posts", "second", opts).await.unwrap();

        let (_, payload) = broker.claim("posts", 30_000).await.unwrap().unwrap();
        assert_eq!(payload, "first");
        assert!(broker.claim("posts", 30_000).await.unwrap().is_none());
    }
}
