//! Append-only `PostOutcome` records (spec §3/§4.7) — the audit trail per
//! Post attempt. Never updated, only inserted and read.

use chrono::{DateTime, Utc};

use super::models::{OutcomeKind, PostOutcomeRow};
use super::DbPool;
use crate::clock::new_id;
use crate::error::StorageError;

pub struct NewOutcome {
    pub post_id: String,
    pub attempt_number: i64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub outcome: OutcomeKind,
    pub error_kind: Option<String>,
    pub platform_response_excerpt: Option<String>,
}

pub async fn record_outcome(pool: &DbPool, new: NewOutcome) -> Result<PostOutcomeRow, StorageError> {
    let id = new_id();
    sqlx::query(
        "INSERT INTO post_outcomes \
         (id, post_id, attempt_number, started_at, ended_at, outcome, error_kind, platform_response_excerpt) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&new.post_id)
    .bind(new.attempt_number)
    .bind(new.started_at)
    .bind(new.ended_at)
    .bind(new.outcome.as_str())
    .bind(&new.error_kind)
    .bind(&new.platform_response_excerpt)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    sqlx::query_as::<_, PostOutcomeRow>("SELECT * FROM post_outcomes WHERE id = ?")
        .bind(&id)
        .fetch_one(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })
}

pub async fn list_for_post(pool: &DbPool, post_id: &str) -> Result<Vec<PostOutcomeRow>, StorageError> {
    sqlx::query_as::<_, PostOutcomeRow>(
        "SELECT * FROM post_outcomes WHERE post_id = ? ORDER BY attempt_number",
    )
    .bind(post_id)
    .fetch_all(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })
}
