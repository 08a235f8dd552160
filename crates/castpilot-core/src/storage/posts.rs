//! `Post` state-machine transitions (spec §3/§4.7). Every transition is a
//! single transaction; a `Post` takes exactly one terminal transition.

use chrono::Utc;

use super::models::{PostRow, PostStatus};
use super::DbPool;
use crate::error::StorageError;

pub async fn get_post(pool: &DbPool, id: &str) -> Result<Option<PostRow>, StorageError> {
    sqlx::query_as::<_, PostRow>("SELECT * FROM posts WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })
}

pub async fn list_posts_for_user(pool: &DbPool, user_id: &str) -> Result<Vec<PostRow>, StorageError> {
    sqlx::query_as::<_, PostRow>("SELECT * FROM posts WHERE user_id = ? ORDER BY created_at DESC")
        .bind(user_id)
        .fetch_all(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })
}

/// The per-platform `Post` fan-out for one `MultiPost`, in creation order.
pub async fn list_for_multi_post(pool: &DbPool, multi_post_id: &str) -> Result<Vec<PostRow>, StorageError> {
    sqlx::query_as::<_, PostRow>("SELECT * FROM posts WHERE multi_post_id = ? ORDER BY created_at")
        .bind(multi_post_id)
        .fetch_all(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })
}

/// Claim a `Post` for processing: `PENDING -> PROCESSING`, incrementing
/// the attempt counter. Returns `Ok(None)` if the post is no longer in a
/// claimable state (spec §4.7 step 1's idempotency guard — the dispatcher
/// acks and drops in that case rather than erroring).
pub async fn claim_for_processing(pool: &DbPool, post_id: &str) -> Result<Option<PostRow>, StorageError> {
    let mut tx = pool.begin().await.map_err(|e| StorageError::Query { source: e })?;

    let current = sqlx::query_as::<_, PostRow>("SELECT * FROM posts WHERE id = ?")
        .bind(post_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| StorageError::Query { source: e })?;

    let Some(current) = current else { return Ok(None) };
    if !matches!(current.post_status(), PostStatus::Pending | PostStatus::Processing) {
        tx.commit().await.map_err(|e| StorageError::Query { source: e })?;
        return Ok(None);
    }

    let now = Utc::now();
    sqlx::query(
        "UPDATE posts SET status = 'PROCESSING', attempt_count = attempt_count + 1, updated_at = ? \
         WHERE id = ?",
    )
    .bind(now)
    .bind(post_id)
    .execute(&mut *tx)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    let updated = sqlx::query_as::<_, PostRow>("SELECT * FROM posts WHERE id = ?")
        .bind(post_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| StorageError::Query { source: e })?;

    tx.commit().await.map_err(|e| StorageError::Query { source: e })?;
    Ok(Some(updated))
}

/// `-> POSTED`, recording the platform's post id/URL and completion
/// instant (the governor's cooldown anchor, spec §4.5).
pub async fn transition_posted(
    pool: &DbPool,
    post_id: &str,
    platform_post_id: &str,
    platform_url: &str,
) -> Result<(), StorageError> {
    let now = Utc::now();
    sqlx::query(
        "UPDATE posts SET status = 'POSTED', platform_post_id = ?, platform_url = ?, \
         last_error_kind = NULL, last_error_message = NULL, updated_at = ?, completed_at = ? WHERE id = ?",
    )
    .bind(platform_post_id)
    .bind(platform_url)
    .bind(now)
    .bind(now)
    .bind(post_id)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

/// `-> FAILED`, recording the mapped error kind. `last_error_message`
/// must never carry tokens, ciphertext, or stack traces (spec §7) —
/// callers are responsible for sanitizing before calling this.
pub async fn transition_failed(
    pool: &DbPool,
    post_id: &str,
    error_kind: &str,
    error_message: &str,
) -> Result<(), StorageError> {
    let now = Utc::now();
    sqlx::query(
        "UPDATE posts SET status = 'FAILED', last_error_kind = ?, last_error_message = ?, \
         updated_at = ? WHERE id = ?",
    )
    .bind(error_kind)
    .bind(error_message)
    .bind(now)
    .bind(post_id)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

/// `-> PENDING` after a transient failure that will be retried (the
/// dispatcher re-enqueues with delay and leaves the Post claimable
/// again).
pub async fn revert_to_pending(pool: &DbPool, post_id: &str) -> Result<(), StorageError> {
    sqlx::query("UPDATE posts SET status = 'PENDING', updated_at = ? WHERE id = ?")
        .bind(Utc::now())
        .bind(post_id)
        .execute(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

/// User-initiated cancellation of a still-`PENDING` Post (spec §5).
pub async fn cancel_if_pending(pool: &DbPool, post_id: &str) -> Result<bool, StorageError> {
    let result = sqlx::query("UPDATE posts SET status = 'CANCELED', updated_at = ? WHERE id = ? AND status = 'PENDING'")
        .bind(Utc::now())
        .bind(post_id)
        .execute(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(result.rows_affected() > 0)
}

/// The most recent `POSTED` completion instant for (user, platform,
/// video), consulted by the Repost Governor (spec §4.5's cooldown
/// lookup, backed by `idx_posts_governor_lookup`).
pub async fn last_posted_completion(
    pool: &DbPool,
    user_id: &str,
    video_id: &str,
    platform: &str,
) -> Result<Option<chrono::DateTime<Utc>>, StorageError> {
    let row: Option<(Option<chrono::DateTime<Utc>>,)> = sqlx::query_as(
        "SELECT completed_at FROM posts \
         WHERE user_id = ? AND video_id = ? AND platform = ? AND status = 'POSTED' \
         ORDER BY completed_at DESC LIMIT 1",
    )
    .bind(user_id)
    .bind(video_id)
    .bind(platform)
    .fetch_optional(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    Ok(row.and_then(|(completed_at,)| completed_at))
}
