//! Service-API surface (spec §6): the synchronous operations an excluded
//! HTTP layer calls into. Every operation here returns a [`ServiceError`]
//! directly; background dispatch failures never surface through this
//! module, they land on `Post.last_error_kind`/`last_error_message`
//! instead (spec §4.7).
//!
//! Platform-string normalization happens exactly once, at this boundary
//! (spec §6): every operation that accepts a raw platform string runs it
//! through [`PlatformId::parse`] before anything else sees it.

use std::time::Duration;

use base64::Engine;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use hmac::{Hmac, Mac};
use reqwest::Url;
use sha2::Sha256;

use crate::clock::new_id;
use crate::config::Config;
use crate::error::{PlatformError, SchedulingError, ServiceError, StorageError, TokenError};
use crate::object_store::ObjectStore;
use crate::platform::{PlatformAdapter, PlatformId};
use crate::scheduler;
use crate::secrets::SecretStore;
use crate::storage::connections::{self, NewConnection};
use crate::storage::models::{
    Cadence, MultiPostRow, PlatformConnectionRow, PlatformTarget, PostRow, RecurringScheduleRow, ScheduleRow,
    VideoRow,
};
use crate::storage::{multi_posts, posts, recurring_schedules, schedules, videos, DbPool};

type HmacSha256 = Hmac<Sha256>;

/// Minimum lead time a one-shot `Schedule` must have over its creation
/// instant (spec §3's `Schedule` invariant). Exactly this much lead time
/// is accepted, not just strictly more.
const MIN_SCHEDULE_LEAD: ChronoDuration = ChronoDuration::minutes(5);

/// How long a minted OAuth state token stays valid.
const OAUTH_STATE_TTL: Duration = Duration::from_secs(600);

/// How long a presigned upload URL stays valid.
const UPLOAD_URL_TTL: Duration = Duration::from_secs(900);

fn normalize_platform(raw: &str) -> Result<PlatformId, ServiceError> {
    PlatformId::parse(raw).ok_or_else(|| SchedulingError::UnknownPlatform(raw.to_string()).into())
}

fn validate_caption(platform: PlatformId, caption: &str) -> Result<(), ServiceError> {
    let limit = platform.caption_limit();
    let len = caption.chars().count();
    if len > limit {
        return Err(PlatformError::CaptionTooLong { len, limit }.into());
    }
    Ok(())
}

/// Normalize and validate a caller-supplied target list: every platform
/// string must parse, every caption must fit that platform's limit, and
/// the canonical (uppercase) platform string is what gets persisted.
fn normalize_targets(targets: Vec<PlatformTarget>) -> Result<Vec<PlatformTarget>, ServiceError> {
    if targets.is_empty() {
        return Err(SchedulingError::NoTargetPlatforms.into());
    }
    targets
        .into_iter()
        .map(|target| {
            let platform = normalize_platform(&target.platform)?;
            validate_caption(platform, &target.caption)?;
            Ok(PlatformTarget { platform: platform.as_str().to_string(), ..target })
        })
        .collect()
}

/// Sign `payload` with the process-wide encryption key, reused here as
/// the OAuth state signing key rather than introducing a second
/// configuration secret (see `DESIGN.md`).
fn hmac_hex(signing_key: &str, payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(signing_key.as_bytes()).expect("hmac accepts any key length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Mint a short-lived, signed OAuth state token binding `user_id` and
/// `platform` together (spec §6: "State is a short-lived, signed token
/// minted by `start_platform_oauth`").
fn mint_oauth_state(signing_key: &str, user_id: &str, platform: PlatformId) -> String {
    let expires_at = Utc::now() + ChronoDuration::from_std(OAUTH_STATE_TTL).unwrap();
    let payload = format!("{}|{}|{}", user_id, platform.as_str(), expires_at.timestamp());
    let encoded = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(payload.as_bytes());
    let signature = hmac_hex(signing_key, encoded.as_bytes());
    format!("{encoded}.{signature}")
}

/// Validate a state token minted by [`mint_oauth_state`], checking the
/// signature, expiry, and that it was minted for this exact (user,
/// platform) pair. Any failure yields `AUTH_STATE_INVALID` (spec §6).
fn validate_oauth_state(
    signing_key: &str,
    state: &str,
    expected_user_id: &str,
    expected_platform: PlatformId,
) -> Result<(), ServiceError> {
    let (encoded, signature) = state.split_once('.').ok_or(ServiceError::AuthStateInvalid)?;
    if hmac_hex(signing_key, encoded.as_bytes()) != signature {
        return Err(ServiceError::AuthStateInvalid);
    }
    let payload_bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|_| ServiceError::AuthStateInvalid)?;
    let payload = String::from_utf8(payload_bytes).map_err(|_| ServiceError::AuthStateInvalid)?;
    let mut parts = payload.splitn(3, '|');
    let user_id = parts.next().ok_or(ServiceError::AuthStateInvalid)?;
    let platform = parts.next().ok_or(ServiceError::AuthStateInvalid)?;
    let expires_at = parts
        .next()
        .ok_or(ServiceError::AuthStateInvalid)?
        .parse::<i64>()
        .map_err(|_| ServiceError::AuthStateInvalid)?;

    if user_id != expected_user_id || platform != expected_platform.as_str() {
        return Err(ServiceError::AuthStateInvalid);
    }
    if Utc::now().timestamp() > expires_at {
        return Err(ServiceError::AuthStateInvalid);
    }
    Ok(())
}

/// A freshly created `Video` intent, plus the URL the caller uploads raw
/// bytes to (spec §6 `create_video_intent`).
#[derive(Debug, Clone)]
pub struct VideoIntent {
    pub video: VideoRow,
    pub upload_url: Url,
}

/// Create a `Video` row in `uploading` state and a presigned PUT URL for
/// the caller to upload bytes to directly; the core never proxies the
/// upload itself (spec §11).
pub async fn create_video_intent(
    pool: &DbPool,
    object_store: &dyn ObjectStore,
    user_id: &str,
) -> Result<VideoIntent, ServiceError> {
    let storage_key = format!("videos/{user_id}/{}", new_id());
    let video = videos::create_video(
        pool,
        videos::NewVideo { owner_user_id: user_id.to_string(), storage_key: storage_key.clone() },
    )
    .await?;
    let upload_url = object_store.presigned_put_url(&storage_key, UPLOAD_URL_TTL)?;
    Ok(VideoIntent { video, upload_url })
}

/// Declare the upload finished and its format metadata, transitioning
/// `uploading -> ready` (spec §6 `complete_video_upload`).
pub async fn complete_video_upload(
    pool: &DbPool,
    video_id: &str,
    format: videos::CompletedFormat,
) -> Result<VideoRow, ServiceError> {
    Ok(videos::complete_upload(pool, video_id, format).await?)
}

/// The authorization URL to redirect the caller to, plus the signed
/// state token they must echo back to `complete_platform_oauth` (spec
/// §6 `start_platform_oauth`).
#[derive(Debug, Clone)]
pub struct OAuthStart {
    pub authorization_url: String,
    pub state: String,
}

pub fn start_platform_oauth(config: &Config, user_id: &str, platform_raw: &str) -> Result<OAuthStart, ServiceError> {
    let platform = normalize_platform(platform_raw)?;
    let oauth2 = config.platforms.get(platform);
    let state = mint_oauth_state(&config.encryption_key, user_id, platform);
    let adapter = platform.adapter();
    let authorization_url = adapter.build_authorization_url(&oauth2.redirect_uri, &oauth2.client_id, &state);
    Ok(OAuthStart { authorization_url, state })
}

/// Exchange the authorization `code` for tokens, validating `state`
/// first, then seal the tokens and upsert the `PlatformConnection` (spec
/// §6 `complete_platform_oauth`).
pub async fn complete_platform_oauth(
    pool: &DbPool,
    config: &Config,
    secrets: &SecretStore,
    user_id: &str,
    platform_raw: &str,
    code: &str,
    state: &str,
) -> Result<PlatformConnectionRow, ServiceError> {
    let platform = normalize_platform(platform_raw)?;
    validate_oauth_state(&config.encryption_key, state, user_id, platform)?;

    let oauth2 = config.platforms.get(platform);
    let adapter = platform.adapter();
    let bundle = adapter
        .exchange_code_for_tokens(&oauth2.redirect_uri, &oauth2.client_id, &oauth2.client_secret, code)
        .await?;
    let (platform_account_id, display_name) = adapter.fetch_identity(&bundle.access_token).await?;

    let access_token_ciphertext = secrets.seal(bundle.access_token.as_bytes()).map_err(TokenError::from)?;
    let refresh_token_ciphertext = bundle
        .refresh_token
        .as_deref()
        .map(|token| secrets.seal(token.as_bytes()))
        .transpose()
        .map_err(TokenError::from)?;

    Ok(connections::upsert_connection(
        pool,
        NewConnection {
            user_id: user_id.to_string(),
            platform,
            platform_account_id,
            display_name,
            scopes: bundle.scopes,
            access_token_ciphertext,
            refresh_token_ciphertext,
            access_token_expires_at: bundle.expires_at,
        },
    )
    .await?)
}

/// Deactivate the active connection for (user, platform), if any. A
/// no-op, not an error, when no connection is active (spec §6).
pub async fn disconnect_platform(pool: &DbPool, user_id: &str, platform_raw: &str) -> Result<(), ServiceError> {
    let platform = normalize_platform(platform_raw)?;
    if let Some(connection) = connections::get_active_connection(pool, user_id, platform).await? {
        connections::deactivate(pool, &connection.id).await?;
    }
    Ok(())
}

/// Fan one video out to N per-platform `Post`s and enqueue their
/// dispatch jobs immediately (spec §6 `create_multi_post`). Uses the
/// same single-transaction outbox technique as the Scheduler's firing
/// path (`scheduler::materialize_firing`) so a `Post` can never exist
/// without its job here either.
pub async fn create_multi_post(
    pool: &DbPool,
    user_id: &str,
    video_id: &str,
    targets: Vec<PlatformTarget>,
) -> Result<(MultiPostRow, Vec<PostRow>), ServiceError> {
    let targets = normalize_targets(targets)?;

    let mut tx = pool.begin().await.map_err(|e| StorageError::Query { source: e })?;
    let multi_post_id = scheduler::materialize_firing(&mut tx, user_id, video_id, &targets).await?;
    tx.commit().await.map_err(|e| StorageError::Query { source: e })?;

    let multi_post = multi_posts::get_multi_post(pool, &multi_post_id)
        .await?
        .ok_or_else(|| StorageError::NotFound { what: format!("multi_post {multi_post_id}") })?;
    let children = posts::list_for_multi_post(pool, &multi_post_id).await?;
    Ok((multi_post, children))
}

/// Create a one-shot `Schedule`, enforcing the 5-minute minimum lead
/// time (exactly +5 minutes is accepted) (spec §3/§6 `create_schedule`).
pub async fn create_schedule(
    pool: &DbPool,
    user_id: &str,
    video_id: &str,
    targets: Vec<PlatformTarget>,
    scheduled_instant: DateTime<Utc>,
) -> Result<ScheduleRow, ServiceError> {
    let targets = normalize_targets(targets)?;
    if scheduled_instant < Utc::now() + MIN_SCHEDULE_LEAD {
        return Err(SchedulingError::ScheduledTooSoon.into());
    }
    Ok(schedules::create_schedule(
        pool,
        schedules::NewSchedule { user_id: user_id.to_string(), video_id: video_id.to_string(), targets, scheduled_instant },
    )
    .await?)
}

/// Create a `RecurringSchedule`, seeding `first_occurrence` from the
/// cadence relative to now (spec §6 `create_recurring_schedule`).
pub async fn create_recurring_schedule(
    pool: &DbPool,
    user_id: &str,
    video_id: &str,
    targets: Vec<PlatformTarget>,
    cadence: Cadence,
    variants: Vec<String>,
) -> Result<RecurringScheduleRow, ServiceError> {
    let targets = normalize_targets(targets)?;
    let first_occurrence = scheduler::compute_next_occurrence(cadence, Utc::now());
    Ok(recurring_schedules::create_recurring_schedule(
        pool,
        recurring_schedules::NewRecurringSchedule {
            user_id: user_id.to_string(),
            video_id: video_id.to_string(),
            targets,
            cadence,
            variants,
            first_occurrence,
        },
    )
    .await?)
}

/// Pause a `RecurringSchedule`. Idempotent: pausing an already-paused or
/// canceled schedule is a no-op, returning `false`.
pub async fn pause_recurring(pool: &DbPool, id: &str) -> Result<bool, ServiceError> {
    Ok(recurring_schedules::pause(pool, id).await?)
}

/// Resume a paused `RecurringSchedule`, recomputing `next_occurrence`
/// from its cadence relative to now so a long pause doesn't produce a
/// catch-up storm on the next scheduler tick.
pub async fn resume_recurring(pool: &DbPool, id: &str) -> Result<bool, ServiceError> {
    let Some(row) = recurring_schedules::get_recurring_schedule(pool, id).await? else {
        return Ok(false);
    };
    let next_occurrence = scheduler::compute_next_occurrence(row.cadence(), Utc::now());
    Ok(recurring_schedules::resume(pool, id, next_occurrence).await?)
}

/// Cancel a pending one-shot `Schedule`. Returns `false` if it was
/// already fired or canceled.
pub async fn cancel_schedule(pool: &DbPool, id: &str) -> Result<bool, ServiceError> {
    Ok(schedules::cancel_if_pending(pool, id).await?)
}

/// Cancel an active or paused `RecurringSchedule`. Returns `false` if it
/// was already canceled.
pub async fn cancel_recurring_schedule(pool: &DbPool, id: &str) -> Result<bool, ServiceError> {
    Ok(recurring_schedules::cancel(pool, id).await?)
}

pub async fn list_posts(pool: &DbPool, user_id: &str) -> Result<Vec<PostRow>, ServiceError> {
    Ok(posts::list_posts_for_user(pool, user_id).await?)
}

pub async fn get_post(pool: &DbPool, id: &str) -> Result<Option<PostRow>, ServiceError> {
    Ok(posts::get_post(pool, id).await?)
}

/// Cancel a `Post` still in `PENDING`. Not part of spec §6's named
/// operation list, but needed to make `cancel_schedule` actually stop
/// in-flight work. The dispatcher's own idempotency guard
/// (`claim_for_processing` returning `None` on a non-PENDING post) is
/// what keeps a still-outstanding broker job from publishing anyway
/// (see `DESIGN.md`).
pub async fn cancel_post(pool: &DbPool, post_id: &str) -> Result<bool, ServiceError> {
    Ok(posts::cancel_if_pending(pool, post_id).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::InMemoryObjectStore;
    use crate::scheduler::POST_JOB_QUEUE;
    use crate::storage::{init_test_db, users::ensure_user};

    fn config() -> Config {
        let mut config = Config::default();
        config.encryption_key = "process-secret".to_string();
        config.platforms.youtube.client_id = "client-id".to_string();
        config.platforms.youtube.client_secret = "client-secret".to_string();
        config.platforms.youtube.redirect_uri = "https://app.example/oauth/youtube/callback".to_string();
        config
    }

    async fn seed_ready_video(pool: &DbPool, user_id: &str) -> VideoRow {
        let video = videos::create_video(
            pool,
            videos::NewVideo { owner_user_id: user_id.to_string(), storage_key: "k".to_string() },
        )
        .await
        .unwrap();
        videos::complete_upload(
            pool,
            &video.id,
            videos::CompletedFormat {
                container: "mp4".to_string(),
                codec: "h264".to_string(),
                duration_ms: 1000,
                width: 1080,
                height: 1920,
                size_bytes: 1_000_000,
            },
        )
        .await
        .unwrap()
    }

    fn target(platform: &str) -> PlatformTarget {
        PlatformTarget { platform: platform.to_string(), caption: "hello".to_string(), tags: vec![] }
    }

    #[tokio::test]
    async fn create_video_intent_returns_uploading_video_and_url() {
        let pool = init_test_db().await.unwrap();
        ensure_user(&pool, "u1", "h").await.unwrap();
        let store = InMemoryObjectStore::new();

        let intent = create_video_intent(&pool, &store, "u1").await.unwrap();
        assert_eq!(intent.video.owner_user_id, "u1");
        assert!(intent.upload_url.as_str().contains(&intent.video.storage_key));
    }

    #[tokio::test]
    async fn create_multi_post_fans_out_and_enqueues_jobs() {
        let pool = init_test_db().await.unwrap();
        ensure_user(&pool, "u1", "h").await.unwrap();
        let video = seed_ready_video(&pool, "u1").await;

        let (multi_post, children) = create_multi_post(
            &pool,
            "u1",
            &video.id,
            vec![target("youtube"), target("tiktok")],
        )
        .await
        .unwrap();

        assert_eq!(children.len(), 2);
        assert_eq!(multi_post.video_id, video.id);
        let job_count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM broker_jobs WHERE queue = ?")
            .bind(POST_JOB_QUEUE)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(job_count.0, 2);
    }

    #[tokio::test]
    async fn create_multi_post_rejects_unknown_platform() {
        let pool = init_test_db().await.unwrap();
        ensure_user(&pool, "u1", "h").await.unwrap();
        let video = seed_ready_video(&pool, "u1").await;

        let err = create_multi_post(&pool, "u1", &video.id, vec![target("myspace")])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn create_multi_post_rejects_caption_over_platform_limit() {
        let pool = init_test_db().await.unwrap();
        ensure_user(&pool, "u1", "h").await.unwrap();
        let video = seed_ready_video(&pool, "u1").await;

        let long_caption = "a".repeat(300);
        let targets = vec![PlatformTarget { platform: "twitter".to_string(), caption: long_caption, tags: vec![] }];
        let err = create_multi_post(&pool, "u1", &video.id, targets).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn create_schedule_rejects_less_than_five_minutes_out() {
        let pool = init_test_db().await.unwrap();
        ensure_user(&pool, "u1", "h").await.unwrap();
        let video = seed_ready_video(&pool, "u1").await;

        let too_soon = Utc::now() + ChronoDuration::minutes(4);
        let err = create_schedule(&pool, "u1", &video.id, vec![target("youtube")], too_soon)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Scheduling(SchedulingError::ScheduledTooSoon)));
    }

    #[tokio::test]
    async fn create_schedule_accepts_exactly_five_minutes_out() {
        let pool = init_test_db().await.unwrap();
        ensure_user(&pool, "u1", "h").await.unwrap();
        let video = seed_ready_video(&pool, "u1").await;

        let exactly_five = Utc::now() + MIN_SCHEDULE_LEAD + ChronoDuration::seconds(1);
        let row = create_schedule(&pool, "u1", &video.id, vec![target("youtube")], exactly_five)
            .await
            .unwrap();
        assert_eq!(row.video_id, video.id);
    }

    #[tokio::test]
    async fn recurring_lifecycle_pause_resume_cancel() {
        let pool = init_test_db().await.unwrap();
        ensure_user(&pool, "u1", "h").await.unwrap();
        let video = seed_ready_video(&pool, "u1").await;

        let row = create_recurring_schedule(
            &pool,
            "u1",
            &video.id,
            vec![target("youtube")],
            Cadence::Daily { hour: 9, minute: 0 },
            vec![],
        )
        .await
        .unwrap();

        assert!(pause_recurring(&pool, &row.id).await.unwrap());
        assert!(!pause_recurring(&pool, &row.id).await.unwrap());
        assert!(resume_recurring(&pool, &row.id).await.unwrap());
        assert!(cancel_recurring_schedule(&pool, &row.id).await.unwrap());
        assert!(!cancel_recurring_schedule(&pool, &row.id).await.unwrap());
    }

    #[test]
    fn oauth_state_round_trips() {
        let config = config();
        let start = start_platform_oauth(&config, "u1", "youtube").unwrap();
        assert!(start.authorization_url.contains(&start.state));
        validate_oauth_state(&config.encryption_key, &start.state, "u1", PlatformId::Youtube).unwrap();
    }

    #[test]
    fn oauth_state_rejects_wrong_user() {
        let config = config();
        let start = start_platform_oauth(&config, "u1", "youtube").unwrap();
        let err = validate_oauth_state(&config.encryption_key, &start.state, "someone-else", PlatformId::Youtube)
            .unwrap_err();
        assert!(matches!(err, ServiceError::AuthStateInvalid));
    }

    #[test]
    fn oauth_state_rejects_tampered_signature() {
        let config = config();
        let start = start_platform_oauth(&config, "u1", "youtube").unwrap();
        let mut tampered = start.state.clone();
        tampered.push('0');
        let err = validate_oauth_state(&config.encryption_key, &tampered, "u1", PlatformId::Youtube).unwrap_err();
        assert!(matches!(err, ServiceError::AuthStateInvalid));
    }

    #[tokio::test]
    async fn disconnect_platform_is_idempotent_with_no_active_connection() {
        let pool = init_test_db().await.unwrap();
        ensure_user(&pool, "u1", "h").await.unwrap();
        disconnect_platform(&pool, "u1", "youtube").await.unwrap();
    }

    #[tokio::test]
    async fn cancel_post_marks_pending_post_canceled() {
        let pool = init_test_db().await.unwrap();
        ensure_user(&pool, "u1", "h").await.unwrap();
        let video = seed_ready_video(&pool, "u1").await;
        let (_, children) = create_multi_post(&pool, "u1", &video.id, vec![target("youtube")]).await.unwrap();

        assert!(cancel_post(&pool, &children[0].id).await.unwrap());
        let reloaded = posts::get_post(&pool, &children[0].id).await.unwrap().unwrap();
        assert_eq!(reloaded.post_status(), crate::storage::models::PostStatus::Canceled);
    }
}
