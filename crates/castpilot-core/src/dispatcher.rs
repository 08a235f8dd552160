//! Dispatcher / Worker Pool (C7, spec §4.7): concurrent workers claim
//! `PostJob`s from the broker and drive them through a `PlatformAdapter`
//! to a terminal `Post` state, retrying transient failures with
//! full-jitter exponential backoff.
//!
//! Workers are stateless (spec §5): all serialization happens through the
//! job claim (at-most-one worker per job) and the Post state machine
//! (`storage::posts`'s single-transaction transitions), never through an
//! in-process lock here.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::broker::{JobBroker, JobHandle};
use crate::config::Config;
use crate::error::{DispatcherError, ErrorKind, HasErrorKind, PlatformError, TokenError};
use crate::governor::{self, GovernorDecision};
use crate::platform::{PlatformAdapter, PlatformId, PostSpec, PublishCredentials, PublishResult, VideoHandle};
use crate::scheduler::{PostJobPayload, POST_JOB_QUEUE};
use crate::storage::models::{OutcomeKind, PostRow, VideoRow};
use crate::storage::{connections, outcomes, posts, videos, DbPool};
use crate::tokens::TokenManager;

/// Maximum total attempts per Post before a transient failure becomes
/// terminal (spec §4.7's retry policy).
pub const MAX_ATTEMPTS: i64 = 5;

/// Backoff base and cap for the full-jitter formula (spec §4.7):
/// `delay = min(CAP, BASE * 2^(attempt-1)) * rand(0.5, 1.5)`.
pub const BACKOFF_BASE_MS: u64 = 30_000;
pub const BACKOFF_CAP_MS: u64 = 900_000;

const CLAIM_VISIBILITY_TIMEOUT_MS: u64 = 60_000;
const CLAIM_IDLE_POLL: Duration = Duration::from_millis(500);

/// Resolves a [`PlatformAdapter`] for a given platform. Defaults to
/// `PlatformId::adapter`; tests substitute a double via
/// [`Dispatcher::with_adapter_resolver`].
pub type AdapterResolver = Arc<dyn Fn(PlatformId) -> Box<dyn PlatformAdapter> + Send + Sync>;

/// Compute the full-jitter exponential backoff delay for a completed
/// `attempt` (1-indexed), applying an adapter-supplied `retry_after_ms`
/// hint as a floor (`max(hint, computed_delay)`) rather than a ceiling.
pub fn backoff_delay_ms(attempt: i64, retry_after_ms: Option<u64>) -> u64 {
    let exponent = attempt.saturating_sub(1).clamp(0, 32) as u32;
    let computed = BACKOFF_BASE_MS.saturating_mul(1u64 << exponent).min(BACKOFF_CAP_MS);
    let jitter = rand::thread_rng().gen_range(0.5..1.5_f64);
    let jittered = ((computed as f64) * jitter) as u64;
    match retry_after_ms {
        Some(hint) => hint.max(jittered),
        None => jittered,
    }
}

fn kind_str(kind: ErrorKind) -> String {
    serde_json::to_string(&kind).unwrap_or_default().trim_matches('"').to_string()
}

fn video_handle(video: &VideoRow) -> Result<VideoHandle, PlatformError> {
    let not_ready = || PlatformError::MediaUnsupported { message: "video is not ready".to_string() };
    Ok(VideoHandle {
        storage_key: video.storage_key.clone(),
        container: video.container.clone().ok_or_else(not_ready)?,
        codec: video.codec.clone().ok_or_else(not_ready)?,
        size_bytes: video.size_bytes.unwrap_or(0) as u64,
        duration_ms: video.duration_ms.unwrap_or(0) as u64,
    })
}

/// A single dispatcher worker's dependencies. One `Dispatcher` is shared
/// (via `Arc`) across every worker task in the pool.
pub struct Dispatcher {
    pool: DbPool,
    broker: Arc<dyn JobBroker>,
    tokens: Arc<TokenManager>,
    config: Arc<Config>,
    adapter_resolver: AdapterResolver,
}

impl Dispatcher {
    pub fn new(pool: DbPool, broker: Arc<dyn JobBroker>, tokens: Arc<TokenManager>, config: Arc<Config>) -> Self {
        Self { pool, broker, tokens, config, adapter_resolver: Arc::new(PlatformId::adapter) }
    }

    #[cfg(any(test, feature = "test-helpers"))]
    pub fn with_adapter_resolver(mut self, resolver: AdapterResolver) -> Self {
        self.adapter_resolver = resolver;
        self
    }

    /// Run one worker: claim-and-process in a loop until `cancel` fires.
    /// An empty claim or a broker error both fall through to a short idle
    /// sleep rather than busy-polling.
    pub async fn run_worker(&self, worker_name: &str, cancel: CancellationToken) {
        loop {
            let claimed = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tracing::info!(worker = worker_name, "dispatcher worker shutting down");
                    return;
                }
                claimed = self.broker.claim(POST_JOB_QUEUE, CLAIM_VISIBILITY_TIMEOUT_MS) => claimed,
            };

            match claimed {
                Ok(Some((handle, payload))) => {
                    if let Err(e) = self.process_job(&handle, &payload).await {
                        tracing::error!(worker = worker_name, error = %e, "failed to process post job");
                    }
                    continue;
                }
                Ok(None) => {}
                Err(e) => tracing::error!(worker = worker_name, error = %e, "broker claim failed"),
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(CLAIM_IDLE_POLL) => {}
            }
        }
    }

    /// Process exactly one claimed job through spec §4.7's flow. Always
    /// resolves the job (ack or nack) before returning `Ok`; returns `Err`
    /// only for a dispatcher-side storage/broker failure, which leaves the
    /// job's visibility timeout to expire and another worker to retry it.
    #[tracing::instrument(skip(self, handle, payload), fields(post_id))]
    pub async fn process_job(&self, handle: &JobHandle, payload: &str) -> Result<(), DispatcherError> {
        let job: PostJobPayload = match serde_json::from_str(payload) {
            Ok(job) => job,
            Err(e) => {
                tracing::error!(error = %e, "dropping post job with an unparseable payload");
                self.broker.ack(handle).await?;
                return Ok(());
            }
        };
        tracing::Span::current().record("post_id", &job.post_id.as_str());

        // Step 1: claim + idempotency guard.
        let Some(post) = posts::claim_for_processing(&self.pool, &job.post_id).await? else {
            self.broker.ack(handle).await?;
            return Ok(());
        };
        let attempt = post.attempt_count;
        let started_at = Utc::now();

        let Some(platform) = PlatformId::parse(&post.platform) else {
            return self
                .fail_attempt(&post, handle, attempt, started_at, ErrorKind::Validation, "unrecognized platform".to_string(), None)
                .await;
        };

        // Step 2: Repost Governor.
        match governor::check(&self.pool, &post.user_id, platform.as_str(), &post.video_id).await? {
            GovernorDecision::Denied { hours_remaining } => {
                return self
                    .fail_attempt(
                        &post,
                        handle,
                        attempt,
                        started_at,
                        ErrorKind::RepostCooldown,
                        format!("repost cooldown: {hours_remaining}h remaining"),
                        None,
                    )
                    .await;
            }
            GovernorDecision::Allowed => {}
        }

        // Step 3: resolve the PlatformConnection.
        let Some(connection) = connections::get_active_connection(&self.pool, &post.user_id, platform).await? else {
            return self
                .fail_attempt(&post, handle, attempt, started_at, ErrorKind::AuthRevoked, "platform not connected".to_string(), None)
                .await;
        };

        let video_row = videos::get_video(&self.pool, &post.video_id).await?.ok_or_else(|| {
            DispatcherError::Storage(crate::error::StorageError::NotFound { what: format!("video {}", post.video_id) })
        })?;
        let adapter = (self.adapter_resolver)(platform);
        let spec = PostSpec { caption: post.caption.clone(), tags: post.tag_list(), privacy: None, category_id: None };

        // Step 4: pre-flight validation (caption + media), no network call.
        let video_handle = match video_handle(&video_row) {
            Ok(v) => v,
            Err(e) => return self.fail_platform_error(&post, handle, attempt, started_at, e).await,
        };
        if let Err(e) = adapter.pre_flight(&spec, &video_handle) {
            return self.fail_platform_error(&post, handle, attempt, started_at, e).await;
        }

        let oauth1_credential = if adapter.requires_dual_credential() {
            match self.config.twitter_oauth1.to_credential() {
                Some(credential) => Some(credential),
                None => {
                    let e = PlatformError::ConfigMissing {
                        message: format!("{platform} requires an oauth1 app credential that is not configured"),
                    };
                    return self.fail_platform_error(&post, handle, attempt, started_at, e).await;
                }
            }
        } else {
            None
        };

        // Step 5: a valid access token from the Token Lifecycle Manager.
        let oauth_client = self.config.platforms.get(platform);
        let access_token = match self
            .tokens
            .get_valid_access_token(&connection.id, &oauth_client.client_id, &oauth_client.client_secret, adapter.as_ref())
            .await
        {
            Ok(token) => token,
            Err(e) => return self.fail_token_error(&post, handle, attempt, started_at, e).await,
        };

        // Step 6: publish, under the per-attempt deadline (spec §5).
        let credentials = PublishCredentials { oauth2_access_token: access_token, oauth1_credential };
        let deadline = Duration::from_millis(self.config.publish_deadline_ms);
        let publish_result = match tokio::time::timeout(deadline, adapter.publish(&video_handle, &spec, &credentials)).await {
            Ok(result) => result,
            Err(_) => Err(PlatformError::Timeout),
        };

        // An adapter-reported AUTH_EXPIRED forces a refresh and is retried
        // exactly once here, rather than going through the standard
        // attempt/backoff ladder (spec §4.3/§4.4).
        let publish_result = match publish_result {
            Err(PlatformError::AuthExpired) => {
                let refreshed = self
                    .tokens
                    .force_refresh_access_token(
                        &connection.id,
                        &oauth_client.client_id,
                        &oauth_client.client_secret,
                        adapter.as_ref(),
                        &credentials.oauth2_access_token,
                    )
                    .await;
                match refreshed {
                    Ok(refreshed_token) => {
                        let retry_credentials =
                            PublishCredentials { oauth2_access_token: refreshed_token, oauth1_credential: credentials.oauth1_credential.clone() };
                        match tokio::time::timeout(deadline, adapter.publish(&video_handle, &spec, &retry_credentials)).await {
                            Ok(result) => result,
                            Err(_) => Err(PlatformError::Timeout),
                        }
                    }
                    Err(e) => return self.fail_token_error(&post, handle, attempt, started_at, e).await,
                }
            }
            other => other,
        };

        match publish_result {
            Ok(result) => self.succeed_attempt(&post, handle, attempt, started_at, result).await,
            Err(e) => self.fail_platform_error(&post, handle, attempt, started_at, e).await,
        }
    }

    async fn succeed_attempt(
        &self,
        post: &PostRow,
        handle: &JobHandle,
        attempt: i64,
        started_at: DateTime<Utc>,
        result: PublishResult,
    ) -> Result<(), DispatcherError> {
        posts::transition_posted(&self.pool, &post.id, &result.platform_post_id, &result.platform_url).await?;
        outcomes::record_outcome(
            &self.pool,
            outcomes::NewOutcome {
                post_id: post.id.clone(),
                attempt_number: attempt,
                started_at,
                ended_at: Utc::now(),
                outcome: OutcomeKind::Success,
                error_kind: None,
                platform_response_excerpt: None,
            },
        )
        .await?;
        self.broker.ack(handle).await?;
        Ok(())
    }

    async fn fail_platform_error(
        &self,
        post: &PostRow,
        handle: &JobHandle,
        attempt: i64,
        started_at: DateTime<Utc>,
        error: PlatformError,
    ) -> Result<(), DispatcherError> {
        let kind = error.kind();
        let retry_after_ms = error.retry_after_ms();
        self.fail_attempt(post, handle, attempt, started_at, kind, error.to_string(), retry_after_ms).await
    }

    async fn fail_token_error(
        &self,
        post: &PostRow,
        handle: &JobHandle,
        attempt: i64,
        started_at: DateTime<Utc>,
        error: TokenError,
    ) -> Result<(), DispatcherError> {
        let kind = error.kind();
        let retry_after_ms = match &error {
            TokenError::Platform(p) => p.retry_after_ms(),
            _ => None,
        };
        self.fail_attempt(post, handle, attempt, started_at, kind, error.to_string(), retry_after_ms).await
    }

    /// Common tail for every non-success outcome: retryable kinds under
    /// the attempt cap revert to `PENDING` and re-enqueue with backoff;
    /// everything else transitions `FAILED` and acks. Always records a
    /// `PostOutcome` row for the attempt.
    async fn fail_attempt(
        &self,
        post: &PostRow,
        handle: &JobHandle,
        attempt: i64,
        started_at: DateTime<Utc>,
        kind: ErrorKind,
        message: String,
        retry_after_ms: Option<u64>,
    ) -> Result<(), DispatcherError> {
        let ended_at = Utc::now();

        if kind.is_retryable() && attempt < MAX_ATTEMPTS {
            posts::revert_to_pending(&self.pool, &post.id).await?;
            outcomes::record_outcome(
                &self.pool,
                outcomes::NewOutcome {
                    post_id: post.id.clone(),
                    attempt_number: attempt,
                    started_at,
                    ended_at,
                    outcome: OutcomeKind::TransientFail,
                    error_kind: Some(kind_str(kind)),
                    platform_response_excerpt: Some(message),
                },
            )
            .await?;
            let delay = backoff_delay_ms(attempt, retry_after_ms);
            self.broker.nack(handle, delay).await?;
        } else {
            posts::transition_failed(&self.pool, &post.id, &kind_str(kind), &message).await?;
            outcomes::record_outcome(
                &self.pool,
                outcomes::NewOutcome {
                    post_id: post.id.clone(),
                    attempt_number: attempt,
                    started_at,
                    ended_at,
                    outcome: OutcomeKind::PermanentFail,
                    error_kind: Some(kind_str(kind)),
                    platform_response_excerpt: Some(message),
                },
            )
            .await?;
            self.broker.ack(handle).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{sqlite::SqliteBroker, EnqueueOptions};
    use crate::platform::{MediaConstraints, TokenBundle};
    use crate::secrets::SecretStore;
    use crate::storage::models::{PlatformTarget, PostStatus};
    use crate::storage::{init_test_db, multi_posts, users::ensure_user};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    /// A scripted platform double: each `publish` call pops the next
    /// canned response, panicking if the script runs dry. `refresh_bundle`,
    /// when set, lets a test also script and count `refresh` calls.
    struct ScriptedAdapter {
        id: PlatformId,
        responses: StdMutex<VecDeque<Result<PublishResult, PlatformError>>>,
        refresh_bundle: Option<TokenBundle>,
        refresh_calls: StdMutex<usize>,
    }

    impl ScriptedAdapter {
        fn new(id: PlatformId, responses: Vec<Result<PublishResult, PlatformError>>) -> Self {
            Self {
                id,
                responses: StdMutex::new(responses.into_iter().collect()),
                refresh_bundle: None,
                refresh_calls: StdMutex::new(0),
            }
        }

        fn with_refresh_bundle(mut self, bundle: TokenBundle) -> Self {
            self.refresh_bundle = Some(bundle);
            self
        }
    }

    #[async_trait]
    impl PlatformAdapter for ScriptedAdapter {
        fn id(&self) -> PlatformId {
            self.id
        }

        fn media_constraints(&self) -> MediaConstraints {
            MediaConstraints { containers: &["mp4"], codecs: &["h264"], max_size_bytes: u64::MAX }
        }

        fn build_authorization_url(&self, _redirect_uri: &str, _client_id: &str, _state: &str) -> String {
            String::new()
        }

        async fn exchange_code_for_tokens(
            &self,
            _redirect_uri: &str,
            _client_id: &str,
            _client_secret: &str,
            _code: &str,
        ) -> Result<TokenBundle, PlatformError> {
            unimplemented!()
        }

        async fn refresh(&self, _client_id: &str, _client_secret: &str, _refresh_token: &str) -> Result<TokenBundle, PlatformError> {
            *self.refresh_calls.lock().unwrap() += 1;
            self.refresh_bundle.clone().expect("test did not script a refresh response")
        }

        async fn fetch_identity(&self, _access_token: &str) -> Result<(String, String), PlatformError> {
            unimplemented!()
        }

        async fn publish(
            &self,
            _video: &VideoHandle,
            _spec: &PostSpec,
            _credentials: &PublishCredentials,
        ) -> Result<PublishResult, PlatformError> {
            self.responses.lock().unwrap().pop_front().expect("script ran dry")
        }
    }

    fn secret_store() -> SecretStore {
        SecretStore::derive("dispatcher-test-secret", b"dispatcher-test-salt-1")
    }

    async fn seed_ready_video(pool: &DbPool, user_id: &str) -> String {
        ensure_user(pool, user_id, "h").await.unwrap();
        let video = videos::create_video(
            pool,
            videos::NewVideo { owner_user_id: user_id.to_string(), storage_key: "k".to_string() },
        )
        .await
        .unwrap();
        videos::complete_upload(
            pool,
            &video.id,
            videos::CompletedFormat { container: "mp4".to_string(), codec: "h264".to_string(), duration_ms: 1000, width: 1080, height: 1920, size_bytes: 500 },
        )
        .await
        .unwrap();
        video.id
    }

    async fn seed_connection(pool: &DbPool, secrets: &SecretStore, user_id: &str, platform: PlatformId) -> String {
        connections::upsert_connection(
            pool,
            connections::NewConnection {
                user_id: user_id.to_string(),
                platform,
                platform_account_id: "acct".to_string(),
                display_name: "Creator".to_string(),
                scopes: vec![],
                access_token_ciphertext: secrets.seal(b"good-token").unwrap(),
                refresh_token_ciphertext: None,
                access_token_expires_at: Utc::now() + chrono::Duration::hours(1),
            },
        )
        .await
        .unwrap()
        .id
    }

    /// Like [`seed_connection`] but with a refresh token, so a forced
    /// refresh (triggered by an adapter-reported `AUTH_EXPIRED`) has
    /// something to refresh even though the access token isn't yet within
    /// the safety window.
    async fn seed_connection_with_refresh(pool: &DbPool, secrets: &SecretStore, user_id: &str, platform: PlatformId) -> String {
        connections::upsert_connection(
            pool,
            connections::NewConnection {
                user_id: user_id.to_string(),
                platform,
                platform_account_id: "acct".to_string(),
                display_name: "Creator".to_string(),
                scopes: vec![],
                access_token_ciphertext: secrets.seal(b"good-token").unwrap(),
                refresh_token_ciphertext: Some(secrets.seal(b"refresh-token").unwrap()),
                access_token_expires_at: Utc::now() + chrono::Duration::hours(1),
            },
        )
        .await
        .unwrap()
        .id
    }

    async fn seed_post(pool: &DbPool, user_id: &str, video_id: &str, platform: PlatformId) -> PostRow {
        let (_, posts) = multi_posts::create_multi_post(
            pool,
            multi_posts::NewMultiPost {
                user_id: user_id.to_string(),
                video_id: video_id.to_string(),
                targets: vec![PlatformTarget { platform: platform.as_str().to_string(), caption: "hello".to_string(), tags: vec![] }],
            },
        )
        .await
        .unwrap();
        posts.into_iter().next().unwrap()
    }

    fn dispatcher(pool: DbPool, config: Config, resolver: AdapterResolver) -> Dispatcher {
        let broker: Arc<dyn JobBroker> = Arc::new(SqliteBroker::new(pool.clone()));
        let tokens = Arc::new(TokenManager::new(pool.clone(), secret_store()));
        Dispatcher::new(pool, broker, tokens, Arc::new(config)).with_adapter_resolver(resolver)
    }

    #[tokio::test]
    async fn successful_publish_transitions_posted_and_acks() {
        let pool = init_test_db().await.unwrap();
        let secrets = secret_store();
        let video_id = seed_ready_video(&pool, "u1").await;
        seed_connection(&pool, &secrets, "u1", PlatformId::Youtube).await;
        let post = seed_post(&pool, "u1", &video_id, PlatformId::Youtube).await;

        let resolver: AdapterResolver = Arc::new(|id| {
            Box::new(ScriptedAdapter::new(
                id,
                vec![Ok(PublishResult { platform_post_id: "yt_1".to_string(), platform_url: "https://y/1".to_string() })],
            ))
        });
        let dispatcher = dispatcher(pool.clone(), Config::default(), resolver);
        let broker = SqliteBroker::new(pool.clone());
        broker
            .enqueue(POST_JOB_QUEUE, &serde_json::to_string(&PostJobPayload { post_id: post.id.clone() }).unwrap(), EnqueueOptions::default())
            .await
            .unwrap();
        let (handle, payload) = broker.claim(POST_JOB_QUEUE, 30_000).await.unwrap().unwrap();

        dispatcher.process_job(&handle, &payload).await.unwrap();

        let reloaded = posts::get_post(&pool, &post.id).await.unwrap().unwrap();
        assert_eq!(reloaded.post_status(), PostStatus::Posted);
        assert_eq!(reloaded.platform_post_id.as_deref(), Some("yt_1"));
        assert!(broker.claim(POST_JOB_QUEUE, 30_000).await.unwrap().is_none(), "job should have been acked");

        let outcomes_rows = outcomes::list_for_post(&pool, &post.id).await.unwrap();
        assert_eq!(outcomes_rows.len(), 1);
        assert_eq!(outcomes_rows[0].outcome, "SUCCESS");
    }

    #[tokio::test]
    async fn claim_on_already_terminal_post_just_acks() {
        let pool = init_test_db().await.unwrap();
        let video_id = seed_ready_video(&pool, "u1").await;
        let post = seed_post(&pool, "u1", &video_id, PlatformId::Youtube).await;
        posts::claim_for_processing(&pool, &post.id).await.unwrap();
        posts::transition_posted(&pool, &post.id, "yt_1", "https://y/1").await.unwrap();

        let resolver: AdapterResolver = Arc::new(|id| Box::new(ScriptedAdapter::new(id, vec![])));
        let dispatcher = dispatcher(pool.clone(), Config::default(), resolver);
        let broker = SqliteBroker::new(pool.clone());
        broker
            .enqueue(POST_JOB_QUEUE, &serde_json::to_string(&PostJobPayload { post_id: post.id.clone() }).unwrap(), EnqueueOptions::default())
            .await
            .unwrap();
        let (handle, payload) = broker.claim(POST_JOB_QUEUE, 30_000).await.unwrap().unwrap();

        dispatcher.process_job(&handle, &payload).await.unwrap();

        assert!(broker.claim(POST_JOB_QUEUE, 30_000).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn repost_cooldown_denial_fails_post_without_retry() {
        let pool = init_test_db().await.unwrap();
        let secrets = secret_store();
        let video_id = seed_ready_video(&pool, "u1").await;
        seed_connection(&pool, &secrets, "u1", PlatformId::Youtube).await;

        let prior = seed_post(&pool, "u1", &video_id, PlatformId::Youtube).await;
        posts::claim_for_processing(&pool, &prior.id).await.unwrap();
        posts::transition_posted(&pool, &prior.id, "yt_1", "https://y/1").await.unwrap();

        let post = seed_post(&pool, "u1", &video_id, PlatformId::Youtube).await;
        let resolver: AdapterResolver = Arc::new(|id| Box::new(ScriptedAdapter::new(id, vec![])));
        let dispatcher = dispatcher(pool.clone(), Config::default(), resolver);
        let broker = SqliteBroker::new(pool.clone());
        broker
            .enqueue(POST_JOB_QUEUE, &serde_json::to_string(&PostJobPayload { post_id: post.id.clone() }).unwrap(), EnqueueOptions::default())
            .await
            .unwrap();
        let (handle, payload) = broker.claim(POST_JOB_QUEUE, 30_000).await.unwrap().unwrap();

        dispatcher.process_job(&handle, &payload).await.unwrap();

        let reloaded = posts::get_post(&pool, &post.id).await.unwrap().unwrap();
        assert_eq!(reloaded.post_status(), PostStatus::Failed);
        assert_eq!(reloaded.last_error_kind.as_deref(), Some("REPOST_COOLDOWN"));
    }

    #[tokio::test]
    async fn missing_connection_fails_auth_revoked() {
        let pool = init_test_db().await.unwrap();
        let video_id = seed_ready_video(&pool, "u1").await;
        let post = seed_post(&pool, "u1", &video_id, PlatformId::Youtube).await;

        let resolver: AdapterResolver = Arc::new(|id| Box::new(ScriptedAdapter::new(id, vec![])));
        let dispatcher = dispatcher(pool.clone(), Config::default(), resolver);
        let broker = SqliteBroker::new(pool.clone());
        broker
            .enqueue(POST_JOB_QUEUE, &serde_json::to_string(&PostJobPayload { post_id: post.id.clone() }).unwrap(), EnqueueOptions::default())
            .await
            .unwrap();
        let (handle, payload) = broker.claim(POST_JOB_QUEUE, 30_000).await.unwrap().unwrap();

        dispatcher.process_job(&handle, &payload).await.unwrap();

        let reloaded = posts::get_post(&pool, &post.id).await.unwrap().unwrap();
        assert_eq!(reloaded.post_status(), PostStatus::Failed);
        assert_eq!(reloaded.last_error_kind.as_deref(), Some("AUTH_REVOKED"));
    }

    #[tokio::test]
    async fn transient_failure_reverts_to_pending_and_nacks_with_backoff() {
        let pool = init_test_db().await.unwrap();
        let secrets = secret_store();
        let video_id = seed_ready_video(&pool, "u1").await;
        seed_connection(&pool, &secrets, "u1", PlatformId::Youtube).await;
        let post = seed_post(&pool, "u1", &video_id, PlatformId::Youtube).await;

        let resolver: AdapterResolver =
            Arc::new(|id| Box::new(ScriptedAdapter::new(id, vec![Err(PlatformError::RateLimited { retry_after_ms: Some(120_000) })])));
        let dispatcher = dispatcher(pool.clone(), Config::default(), resolver);
        let broker = SqliteBroker::new(pool.clone());
        broker
            .enqueue(POST_JOB_QUEUE, &serde_json::to_string(&PostJobPayload { post_id: post.id.clone() }).unwrap(), EnqueueOptions::default())
            .await
            .unwrap();
        let (handle, payload) = broker.claim(POST_JOB_QUEUE, 30_000).await.unwrap().unwrap();

        dispatcher.process_job(&handle, &payload).await.unwrap();

        let reloaded = posts::get_post(&pool, &post.id).await.unwrap().unwrap();
        assert_eq!(reloaded.post_status(), PostStatus::Pending);
        assert!(broker.claim(POST_JOB_QUEUE, 0).await.unwrap().is_none(), "job should be invisible until the backoff elapses");

        let outcomes_rows = outcomes::list_for_post(&pool, &post.id).await.unwrap();
        assert_eq!(outcomes_rows[0].outcome, "TRANSIENT_FAIL");
    }

    #[tokio::test]
    async fn fifth_failed_attempt_terminates_without_further_retry() {
        let pool = init_test_db().await.unwrap();
        let secrets = secret_store();
        let video_id = seed_ready_video(&pool, "u1").await;
        seed_connection(&pool, &secrets, "u1", PlatformId::Youtube).await;
        let post = seed_post(&pool, "u1", &video_id, PlatformId::Youtube).await;
        let broker = SqliteBroker::new(pool.clone());

        for attempt in 1..=5 {
            let resolver: AdapterResolver =
                Arc::new(|id| Box::new(ScriptedAdapter::new(id, vec![Err(PlatformError::Transient { message: "503".to_string() })])));
            let dispatcher = dispatcher(pool.clone(), Config::default(), resolver);
            broker
                .enqueue(POST_JOB_QUEUE, &serde_json::to_string(&PostJobPayload { post_id: post.id.clone() }).unwrap(), EnqueueOptions::default())
                .await
                .unwrap();
            let (handle, payload) = broker.claim(POST_JOB_QUEUE, 30_000).await.unwrap().unwrap();
            dispatcher.process_job(&handle, &payload).await.unwrap();

            let reloaded = posts::get_post(&pool, &post.id).await.unwrap().unwrap();
            assert_eq!(reloaded.attempt_count, attempt);
            if attempt < 5 {
                assert_eq!(reloaded.post_status(), PostStatus::Pending);
                // Force the next claim to be immediately visible for the test.
                sqlx::query("UPDATE broker_jobs SET visible_at = ?")
                    .bind(Utc::now())
                    .execute(&pool)
                    .await
                    .unwrap();
            } else {
                assert_eq!(reloaded.post_status(), PostStatus::Failed);
            }
        }

        let outcomes_rows = outcomes::list_for_post(&pool, &post.id).await.unwrap();
        assert_eq!(outcomes_rows.len(), 5);
        assert_eq!(outcomes_rows[4].outcome, "PERMANENT_FAIL");
    }

    #[tokio::test]
    async fn auth_expired_forces_refresh_and_retries_once() {
        let pool = init_test_db().await.unwrap();
        let secrets = secret_store();
        let video_id = seed_ready_video(&pool, "u1").await;
        seed_connection_with_refresh(&pool, &secrets, "u1", PlatformId::Youtube).await;
        let post = seed_post(&pool, "u1", &video_id, PlatformId::Youtube).await;

        let resolver: AdapterResolver = Arc::new(|id| {
            Box::new(
                ScriptedAdapter::new(
                    id,
                    vec![
                        Err(PlatformError::AuthExpired),
                        Ok(PublishResult { platform_post_id: "yt_1".to_string(), platform_url: "https://y/1".to_string() }),
                    ],
                )
                .with_refresh_bundle(TokenBundle {
                    access_token: "fresh-token".to_string(),
                    refresh_token: Some("fresh-refresh".to_string()),
                    expires_at: Utc::now() + chrono::Duration::hours(1),
                    scopes: vec![],
                }),
            )
        });
        let dispatcher = dispatcher(pool.clone(), Config::default(), resolver);
        let broker = SqliteBroker::new(pool.clone());
        broker
            .enqueue(POST_JOB_QUEUE, &serde_json::to_string(&PostJobPayload { post_id: post.id.clone() }).unwrap(), EnqueueOptions::default())
            .await
            .unwrap();
        let (handle, payload) = broker.claim(POST_JOB_QUEUE, 30_000).await.unwrap().unwrap();

        dispatcher.process_job(&handle, &payload).await.unwrap();

        let reloaded = posts::get_post(&pool, &post.id).await.unwrap().unwrap();
        assert_eq!(reloaded.post_status(), PostStatus::Posted, "the post-refresh retry should have succeeded");
        assert_eq!(reloaded.attempt_count, 1, "the forced-refresh retry must not consume a second attempt");

        let outcomes_rows = outcomes::list_for_post(&pool, &post.id).await.unwrap();
        assert_eq!(outcomes_rows.len(), 1);
        assert_eq!(outcomes_rows[0].outcome, "SUCCESS");
    }

    #[test]
    fn backoff_delay_respects_base_cap_and_hint_floor() {
        for _ in 0..20 {
            let d1 = backoff_delay_ms(1, None);
            assert!(d1 >= (BACKOFF_BASE_MS / 2) && d1 <= (BACKOFF_BASE_MS * 3 / 2));

            let d_capped = backoff_delay_ms(10, None);
            assert!(d_capped <= (BACKOFF_CAP_MS * 3 / 2));
        }

        let with_hint = backoff_delay_ms(1, Some(10 * BACKOFF_CAP_MS));
        assert_eq!(with_hint, 10 * BACKOFF_CAP_MS);
    }
}
