//! CRUD operations for `Schedule` rows (spec §3/§4.6).
//!
//! The Scheduler owns the transactional firing logic (claim + materialize
//! + enqueue + state transition, all in one transaction) directly against
//! the pool rather than through this module, so that claim and
//! materialization share a single SQLite write transaction. This module
//! covers plain CRUD and the due-candidate listing the Scheduler starts
//! from.

use chrono::{DateTime, Utc};

use super::models::{PlatformTarget, ScheduleRow};
use super::DbPool;
use crate::clock::new_id;
use crate::error::StorageError;

pub struct NewSchedule {
    pub user_id: String,
    pub video_id: String,
    pub targets: Vec<PlatformTarget>,
    pub scheduled_instant: DateTime<Utc>,
}

pub async fn create_schedule(pool: &DbPool, new: NewSchedule) -> Result<ScheduleRow, StorageError> {
    let id = new_id();
    let now = Utc::now();
    let platforms_json = serde_json::to_string(&new.targets).unwrap_or_else(|_| "[]".to_string());
    sqlx::query(
        "INSERT INTO schedules (id, user_id, video_id, platforms_json, scheduled_instant, state, created_at) \
         VALUES (?, ?, ?, ?, ?, 'PENDING', ?)",
    )
    .bind(&id)
    .bind(&new.user_id)
    .bind(&new.video_id)
    .bind(&platforms_json)
    .bind(new.scheduled_instant)
    .bind(now)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    get_schedule(pool, &id)
        .await?
        .ok_or_else(|| StorageError::NotFound { what: format!("schedule {id}") })
}

pub async fn get_schedule(pool: &DbPool, id: &str) -> Result<Option<ScheduleRow>, StorageError> {
    sqlx::query_as::<_, ScheduleRow>("SELECT * FROM schedules WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })
}

pub async fn list_for_user(pool: &DbPool, user_id: &str) -> Result<Vec<ScheduleRow>, StorageError> {
    sqlx::query_as::<_, ScheduleRow>("SELECT * FROM schedules WHERE user_id = ? ORDER BY scheduled_instant")
        .bind(user_id)
        .fetch_all(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })
}

/// `PENDING` schedules due by `horizon` (spec §4.6 step 1's
/// `scheduled_instant <= now() + tick/2`). Read-only; the Scheduler
/// re-checks state when it claims each candidate inside its own
/// transaction.
pub async fn list_due(pool: &DbPool, horizon: DateTime<Utc>) -> Result<Vec<ScheduleRow>, StorageError> {
    sqlx::query_as::<_, ScheduleRow>(
        "SELECT * FROM schedules WHERE state = 'PENDING' AND scheduled_instant <= ? ORDER BY scheduled_instant",
    )
    .bind(horizon)
    .fetch_all(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })
}

pub async fn cancel_if_pending(pool: &DbPool, id: &str) -> Result<bool, StorageError> {
    let result = sqlx::query("UPDATE schedules SET state = 'CANCELED' WHERE id = ? AND state = 'PENDING'")
        .bind(id)
        .execute(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(result.rows_affected() > 0)
}
