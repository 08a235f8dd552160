//! CRUD operations for `RecurringSchedule` rows (spec §3/§4.6). Cadence
//! math (computing `next_occurrence`) lives in `scheduler.rs`, which is
//! the component that owns the firing transaction; this module only
//! persists whatever the scheduler computes.

use chrono::{DateTime, Utc};

use super::models::{Cadence, PlatformTarget, RecurringScheduleRow};
use super::DbPool;
use crate::clock::new_id;
use crate::error::StorageError;

pub struct NewRecurringSchedule {
    pub user_id: String,
    pub video_id: String,
    pub targets: Vec<PlatformTarget>,
    pub cadence: Cadence,
    pub variants: Vec<String>,
    pub first_occurrence: DateTime<Utc>,
}

pub async fn create_recurring_schedule(
    pool: &DbPool,
    new: NewRecurringSchedule,
) -> Result<RecurringScheduleRow, StorageError> {
    let id = new_id();
    let now = Utc::now();
    let platforms_json = serde_json::to_string(&new.targets).unwrap_or_else(|_| "[]".to_string());
    let cadence_json = serde_json::to_string(&new.cadence).expect("Cadence always serializes");
    let variants_json = serde_json::to_string(&new.variants).unwrap_or_else(|_| "[]".to_string());

    sqlx::query(
        "INSERT INTO recurring_schedules \
         (id, user_id, video_id, platforms_json, cadence_json, variants_json, variant_cursor, \
          state, next_occurrence, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, 0, 'ACTIVE', ?, ?)",
    )
    .bind(&id)
    .bind(&new.user_id)
    .bind(&new.video_id)
    .bind(&platforms_json)
    .bind(&cadence_json)
    .bind(&variants_json)
    .bind(new.first_occurrence)
    .bind(now)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    get_recurring_schedule(pool, &id)
        .await?
        .ok_or_else(|| StorageError::NotFound { what: format!("recurring_schedule {id}") })
}

pub async fn get_recurring_schedule(pool: &DbPool, id: &str) -> Result<Option<RecurringScheduleRow>, StorageError> {
    sqlx::query_as::<_, RecurringScheduleRow>("SELECT * FROM recurring_schedules WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })
}

pub async fn list_for_user(pool: &DbPool, user_id: &str) -> Result<Vec<RecurringScheduleRow>, StorageError> {
    sqlx::query_as::<_, RecurringScheduleRow>(
        "SELECT * FROM recurring_schedules WHERE user_id = ? ORDER BY created_at",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })
}

/// `ACTIVE` recurring schedules due by `horizon` (spec §4.6 step 3).
pub async fn list_due(pool: &DbPool, horizon: DateTime<Utc>) -> Result<Vec<RecurringScheduleRow>, StorageError> {
    sqlx::query_as::<_, RecurringScheduleRow>(
        "SELECT * FROM recurring_schedules WHERE state = 'ACTIVE' AND next_occurrence <= ? \
         ORDER BY next_occurrence",
    )
    .bind(horizon)
    .fetch_all(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })
}

/// Advance the cursor (modulo the caller's variant-list length) and set
/// the newly computed `next_occurrence`, in the same transaction the
/// scheduler uses to materialize the firing's Posts.
pub async fn advance_after_firing(
    pool: &DbPool,
    id: &str,
    new_cursor: i64,
    next_occurrence: DateTime<Utc>,
) -> Result<(), StorageError> {
    sqlx::query("UPDATE recurring_schedules SET variant_cursor = ?, next_occurrence = ? WHERE id = ?")
        .bind(new_cursor)
        .bind(next_occurrence)
        .bind(id)
        .execute(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

pub async fn pause(pool: &DbPool, id: &str) -> Result<bool, StorageError> {
    let result = sqlx::query("UPDATE recurring_schedules SET state = 'PAUSED' WHERE id = ? AND state = 'ACTIVE'")
        .bind(id)
        .execute(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(result.rows_affected() > 0)
}

pub async fn resume(pool: &DbPool, id: &str, next_occurrence: DateTime<Utc>) -> Result<bool, StorageError> {
    let result = sqlx::query(
        "UPDATE recurring_schedules SET state = 'ACTIVE', next_occurrence = ? WHERE id = ? AND state = 'PAUSED'",
    )
    .bind(next_occurrence)
    .bind(id)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(result.rows_affected() > 0)
}

pub async fn cancel(pool: &DbPool, id: &str) -> Result<bool, StorageError> {
    let result = sqlx::query(
        "UPDATE recurring_schedules SET state = 'CANCELED' WHERE id = ? AND state IN ('ACTIVE', 'PAUSED')",
    )
    .bind(id)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(result.rows_affected() > 0)
}
