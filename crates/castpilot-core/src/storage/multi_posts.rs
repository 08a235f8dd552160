//! `MultiPost` creation: one video fanned out to N per-platform `Post`
//! rows inside a single transaction (spec §3/§4.6's outbox-style
//! guarantee — materialized Posts are never created without the
//! MultiPost that owns them).

use chrono::Utc;

use super::models::{MultiPostRow, PlatformTarget, PostRow};
use super::DbPool;
use crate::clock::new_id;
use crate::error::StorageError;

pub struct NewMultiPost {
    pub user_id: String,
    pub video_id: String,
    pub targets: Vec<PlatformTarget>,
}

/// Create a `MultiPost` and one `PENDING` `Post` per target platform,
/// returning the parent and its children. Callers (the Scheduler or the
/// immediate-post service operation) are responsible for enqueuing one
/// broker job per returned `Post` in the same transaction boundary this
/// function participates in — see `scheduler.rs`/`service.rs`.
pub async fn create_multi_post(pool: &DbPool, new: NewMultiPost) -> Result<(MultiPostRow, Vec<PostRow>), StorageError> {
    let mut tx = pool.begin().await.map_err(|e| StorageError::Query { source: e })?;

    let multi_post_id = new_id();
    let now = Utc::now();
    sqlx::query("INSERT INTO multi_posts (id, user_id, video_id, created_at) VALUES (?, ?, ?, ?)")
        .bind(&multi_post_id)
        .bind(&new.user_id)
        .bind(&new.video_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| StorageError::Query { source: e })?;

    let mut post_ids = Vec::with_capacity(new.targets.len());
    for target in &new.targets {
        let post_id = new_id();
        let tags_json = serde_json::to_string(&target.tags).unwrap_or_else(|_| "[]".to_string());
        sqlx::query(
            "INSERT INTO posts \
             (id, multi_post_id, user_id, video_id, platform, caption, tags, status, \
              attempt_count, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, 'PENDING', 0, ?, ?)",
        )
        .bind(&post_id)
        .bind(&multi_post_id)
        .bind(&new.user_id)
        .bind(&new.video_id)
        .bind(&target.platform)
        .bind(&target.caption)
        .bind(&tags_json)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
        post_ids.push(post_id);
    }

    tx.commit().await.map_err(|e| StorageError::Query { source: e })?;

    let multi_post = get_multi_post(pool, &multi_post_id)
        .await?
        .ok_or_else(|| StorageError::NotFound { what: format!("multi_post {multi_post_id}") })?;
    let mut posts = Vec::with_capacity(post_ids.len());
    for id in &post_ids {
        posts.push(
            super::posts::get_post(pool, id)
                .await?
                .ok_or_else(|| StorageError::NotFound { what: format!("post {id}") })?,
        );
    }

    Ok((multi_post, posts))
}

pub async fn get_multi_post(pool: &DbPool, id: &str) -> Result<Option<MultiPostRow>, StorageError> {
    sqlx::query_as::<_, MultiPostRow>("SELECT * FROM multi_posts WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::models::PostStatus;
    use crate::storage::{init_test_db, users::ensure_user, videos};

    #[tokio::test]
    async fn create_multi_post_fans_out_one_pending_post_per_target() {
        let pool = init_test_db().await.unwrap();
        ensure_user(&pool, "u1", "h").await.unwrap();
        let video = videos::create_video(
            &pool,
            videos::NewVideo { owner_user_id: "u1".to_string(), storage_key: "k".to_string() },
        )
        .await
        .unwrap();

        let (multi_post, posts) = create_multi_post(
            &pool,
            NewMultiPost {
                user_id: "u1".to_string(),
                video_id: video.id.clone(),
                targets: vec![
                    PlatformTarget { platform: "YOUTUBE".to_string(), caption: "a".to_string(), tags: vec![] },
                    PlatformTarget { platform: "TIKTOK".to_string(), caption: "b".to_string(), tags: vec![] },
                ],
            },
        )
        .await
        .unwrap();

        assert_eq!(multi_post.video_id, video.id);
        assert_eq!(posts.len(), 2);
        for post in &posts {
            assert_eq!(post.post_status(), PostStatus::Pending);
            assert_eq!(post.multi_post_id, multi_post.id);
        }
    }
}
