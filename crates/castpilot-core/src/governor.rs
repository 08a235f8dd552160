//! Repost Governor (C5, spec §4.5): enforces the per-(user, platform,
//! video) 24-hour cooldown and selects caption variants for recurring
//! schedules.

use chrono::Utc;

use crate::error::GovernorError;
use crate::platform::PlatformId;
use crate::storage::{posts, DbPool};

/// The cooldown window measured from a prior success's completion
/// instant (spec §4.5). This specification treats only `POSTED` as
/// cooldown-bearing — see `DESIGN.md`'s Open Question resolution.
pub const COOLDOWN_HOURS: i64 = 24;

#[derive(Debug, Clone, PartialEq)]
pub enum GovernorDecision {
    Allowed,
    Denied { hours_remaining: i64 },
}

/// `check(user, platform, video)`. The platform identifier is accepted
/// case-insensitively here too (the governor is reachable directly from
/// the dispatcher, not only through the service-API boundary), and
/// normalized before lookup.
pub async fn check(
    pool: &DbPool,
    user_id: &str,
    platform: &str,
    video_id: &str,
) -> Result<GovernorDecision, GovernorError> {
    let platform_id = PlatformId::parse(platform).ok_or_else(|| GovernorError::UnknownPlatform(platform.to_string()))?;

    let last_completed = posts::last_posted_completion(pool, user_id, video_id, platform_id.as_str()).await?;

    let Some(last_completed) = last_completed else {
        return Ok(GovernorDecision::Allowed);
    };

    let elapsed_hours = (Utc::now() - last_completed).num_hours();
    if elapsed_hours >= COOLDOWN_HOURS {
        Ok(GovernorDecision::Allowed)
    } else {
        Ok(GovernorDecision::Denied { hours_remaining: COOLDOWN_HOURS - elapsed_hours })
    }
}

/// Select the caption for a recurring firing at `cursor`: the variant at
/// `variants[cursor mod len]` when the variant list is non-empty, else
/// the schedule's base per-platform caption (spec §4.5).
pub fn select_caption<'a>(variants: &'a [String], cursor: i64, base_caption: &'a str) -> &'a str {
    if variants.is_empty() {
        return base_caption;
    }
    let len = variants.len() as i64;
    &variants[(cursor.rem_euclid(len)) as usize]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::models::PlatformTarget;
    use crate::storage::{init_test_db, multi_posts, posts as posts_repo, users::ensure_user, videos};
    use chrono::Duration;

    #[tokio::test]
    async fn allowed_when_no_prior_post() {
        let pool = init_test_db().await.unwrap();
        ensure_user(&pool, "u1", "h").await.unwrap();
        let video = videos::create_video(
            &pool,
            videos::NewVideo { owner_user_id: "u1".to_string(), storage_key: "k".to_string() },
        )
        .await
        .unwrap();

        let decision = check(&pool, "u1", "youtube", &video.id).await.unwrap();
        assert_eq!(decision, GovernorDecision::Allowed);
    }

    #[tokio::test]
    async fn denied_within_24_hours_of_prior_success() {
        let pool = init_test_db().await.unwrap();
        ensure_user(&pool, "u1", "h").await.unwrap();
        let video = videos::create_video(
            &pool,
            videos::NewVideo { owner_user_id: "u1".to_string(), storage_key: "k".to_string() },
        )
        .await
        .unwrap();
        let (_, created) = multi_posts::create_multi_post(
            &pool,
            multi_posts::NewMultiPost {
                user_id: "u1".to_string(),
                video_id: video.id.clone(),
                targets: vec![PlatformTarget { platform: "YOUTUBE".to_string(), caption: "a".to_string(), tags: vec![] }],
            },
        )
        .await
        .unwrap();
        let post = &created[0];
        posts_repo::claim_for_processing(&pool, &post.id).await.unwrap();
        posts_repo::transition_posted(&pool, &post.id, "yt_1", "https://y/1").await.unwrap();

        let decision = check(&pool, "u1", "YOUTUBE", &video.id).await.unwrap();
        match decision {
            GovernorDecision::Denied { hours_remaining } => assert_eq!(hours_remaining, 24),
            other => panic!("expected denial, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_platform_is_rejected() {
        let pool = init_test_db().await.unwrap();
        let err = check(&pool, "u1", "myspace", "v1").await.unwrap_err();
        assert!(matches!(err, GovernorError::UnknownPlatform(_)));
    }

    #[test]
    fn select_caption_wraps_cursor_modulo_len() {
        let variants = vec!["v0".to_string(), "v1".to_string(), "v2".to_string()];
        assert_eq!(select_caption(&variants, 0, "base"), "v0");
        assert_eq!(select_caption(&variants, 1, "base"), "v1");
        assert_eq!(select_caption(&variants, 3, "base"), "v0");
        assert_eq!(select_caption(&variants, 4, "base"), "v1");
    }

    #[test]
    fn select_caption_falls_back_to_base_when_variants_empty() {
        assert_eq!(select_caption(&[], 5, "base"), "base");
    }
}
