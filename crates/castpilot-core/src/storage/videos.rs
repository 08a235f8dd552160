//! CRUD operations for `Video` rows (spec §3). Videos are immutable once
//! `ready` except for the user-editable caption/tag defaults.

use chrono::Utc;

use super::models::{VideoRow, VideoStatus};
use super::DbPool;
use crate::clock::new_id;
use crate::error::StorageError;

/// Attributes supplied when a video intent is first created (upload still
/// in progress, spec §6 `create_video_intent`).
pub struct NewVideo {
    pub owner_user_id: String,
    pub storage_key: String,
}

pub async fn create_video(pool: &DbPool, new: NewVideo) -> Result<VideoRow, StorageError> {
    let id = new_id();
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO videos (id, owner_user_id, storage_key, status, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&new.owner_user_id)
    .bind(&new.storage_key)
    .bind(VideoStatus::Uploading.as_str())
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    get_video(pool, &id)
        .await?
        .ok_or_else(|| StorageError::NotFound { what: format!("video {id}") })
}

/// Format metadata declared once the upload completes (spec §6
/// `complete_video_upload`), transitioning `uploading -> ready`.
pub struct CompletedFormat {
    pub container: String,
    pub codec: String,
    pub duration_ms: i64,
    pub width: i64,
    pub height: i64,
    pub size_bytes: i64,
}

pub async fn complete_upload(
    pool: &DbPool,
    video_id: &str,
    format: CompletedFormat,
) -> Result<VideoRow, StorageError> {
    let now = Utc::now();
    sqlx::query(
        "UPDATE videos SET status = ?, container = ?, codec = ?, duration_ms = ?, width = ?, \
         height = ?, size_bytes = ?, updated_at = ? WHERE id = ?",
    )
    .bind(VideoStatus::Ready.as_str())
    .bind(&format.container)
    .bind(&format.codec)
    .bind(format.duration_ms)
    .bind(format.width)
    .bind(format.height)
    .bind(format.size_bytes)
    .bind(now)
    .bind(video_id)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    get_video(pool, video_id)
        .await?
        .ok_or_else(|| StorageError::NotFound { what: format!("video {video_id}") })
}

pub async fn mark_failed(pool: &DbPool, video_id: &str) -> Result<(), StorageError> {
    sqlx::query("UPDATE videos SET status = ?, updated_at = ? WHERE id = ?")
        .bind(VideoStatus::Failed.as_str())
        .bind(Utc::now())
        .bind(video_id)
        .execute(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

pub async fn get_video(pool: &DbPool, id: &str) -> Result<Option<VideoRow>, StorageError> {
    sqlx::query_as::<_, VideoRow>("SELECT * FROM videos WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{init_test_db, users::ensure_user};

    #[tokio::test]
    async fn create_then_complete_transitions_to_ready() {
        let pool = init_test_db().await.unwrap();
        ensure_user(&pool, "u1", "h").await.unwrap();
        let video = create_video(
            &pool,
            NewVideo {
                owner_user_id: "u1".to_string(),
                storage_key: "videos/u1/v1.mp4".to_string(),
            },
        )
        .await
        .unwrap();
        assert_eq!(video.video_status(), VideoStatus::Uploading);

        let ready = complete_upload(
            &pool,
            &video.id,
            CompletedFormat {
                container: "mp4".to_string(),
                codec: "h264".to_string(),
                duration_ms: 15_000,
                width: 1080,
                height: 1920,
                size_bytes: 5_000_000,
            },
        )
        .await
        .unwrap();
        assert_eq!(ready.video_status(), VideoStatus::Ready);
        assert_eq!(ready.container.as_deref(), Some("mp4"));
    }

    #[tokio::test]
    async fn mark_failed_sets_failed_status() {
        let pool = init_test_db().await.unwrap();
        ensure_user(&pool, "u1", "h").await.unwrap();
        let video = create_video(
            &pool,
            NewVideo {
                owner_user_id: "u1".to_string(),
                storage_key: "k".to_string(),
            },
        )
        .await
        .unwrap();
        mark_failed(&pool, &video.id).await.unwrap();
        let row = get_video(&pool, &video.id).await.unwrap().unwrap();
        assert_eq!(row.video_status(), VideoStatus::Failed);
    }
}
