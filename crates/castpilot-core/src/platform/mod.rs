//! Platform Adapter Framework (C3): a uniform contract over heterogeneous
//! upload protocols.
//!
//! `PlatformId` is the closed variant type the teacher's re-architecture
//! notes call for in place of a string-keyed runtime registry — see
//! `DESIGN.md` for the grounding. No component outside this module branches
//! on platform identity; everything else works against `dyn PlatformAdapter`.

pub mod facebook;
pub mod instagram;
pub mod oauth1;
pub mod tiktok;
pub mod twitter;
pub mod upload;
pub mod youtube;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PlatformError;

/// The closed set of platforms this core integrates with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PlatformId {
    Tiktok,
    Youtube,
    Twitter,
    Instagram,
    Facebook,
}

impl PlatformId {
    /// Parse a platform identifier accepted case-insensitively at the
    /// service-API boundary (spec §6), normalizing to the canonical enum.
    /// This is the single place platform-string normalization happens;
    /// every other component only ever sees a `PlatformId`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "TIKTOK" => Some(Self::Tiktok),
            "YOUTUBE" => Some(Self::Youtube),
            "TWITTER" => Some(Self::Twitter),
            "INSTAGRAM" => Some(Self::Instagram),
            "FACEBOOK" => Some(Self::Facebook),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tiktok => "TIKTOK",
            Self::Youtube => "YOUTUBE",
            Self::Twitter => "TWITTER",
            Self::Instagram => "INSTAGRAM",
            Self::Facebook => "FACEBOOK",
        }
    }

    /// Contract caption limits, spec §4.3.
    pub fn caption_limit(self) -> usize {
        match self {
            Self::Tiktok => 2200,
            Self::Youtube => 5000,
            Self::Twitter => 280,
            Self::Instagram => 2200,
            Self::Facebook => 63206,
        }
    }

    /// Returns the adapter implementation for this platform.
    pub fn adapter(self) -> Box<dyn PlatformAdapter> {
        match self {
            Self::Tiktok => Box::new(tiktok::TikTokAdapter::default()),
            Self::Youtube => Box::new(youtube::YouTubeAdapter::default()),
            Self::Twitter => Box::new(twitter::TwitterAdapter::default()),
            Self::Instagram => Box::new(instagram::InstagramAdapter::default()),
            Self::Facebook => Box::new(facebook::FacebookAdapter::default()),
        }
    }
}

impl std::fmt::Display for PlatformId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Access token + optional refresh token + expiry + granted scopes,
/// returned by OAuth exchange and refresh.
#[derive(Debug, Clone)]
pub struct TokenBundle {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub scopes: Vec<String>,
}

/// What to publish: caption, tags, and platform-specific extras.
///
/// The framework guarantees `caption` has already been validated against
/// `caption_limit()` before an adapter ever sees it.
#[derive(Debug, Clone, Default)]
pub struct PostSpec {
    pub caption: String,
    pub tags: Vec<String>,
    pub privacy: Option<String>,
    pub category_id: Option<String>,
}

/// A handle to video bytes in the object store, plus the declared format
/// metadata an adapter needs for its pre-flight media check.
#[derive(Debug, Clone)]
pub struct VideoHandle {
    pub storage_key: String,
    pub container: String,
    pub codec: String,
    pub size_bytes: u64,
    pub duration_ms: u64,
}

/// Declared accept-set for an adapter's pre-flight media check.
#[derive(Debug, Clone)]
pub struct MediaConstraints {
    pub containers: &'static [&'static str],
    pub codecs: &'static [&'static str],
    pub max_size_bytes: u64,
}

/// Credentials an adapter operation may need. Most platforms use only
/// `oauth2_access_token`; dual-credential platforms (Twitter media upload)
/// additionally require the app-level OAuth 1.0a credential, supplied by
/// the Token Lifecycle Manager (C4).
#[derive(Debug, Clone)]
pub struct PublishCredentials {
    pub oauth2_access_token: String,
    pub oauth1_credential: Option<oauth1::Oauth1Credential>,
}

/// Result of a successful publish: the platform's own post id and URL.
#[derive(Debug, Clone)]
pub struct PublishResult {
    pub platform_post_id: String,
    pub platform_url: String,
}

/// The uniform contract every platform implements (spec §4.3).
///
/// No method here panics on a platform error; every failure is a typed
/// [`PlatformError`], whose [`crate::error::HasErrorKind::kind`] drives the
/// dispatcher's retry policy. Implementations must perform the pre-flight
/// caption/media checks described on each method before making a network
/// call.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn id(&self) -> PlatformId;

    /// Caption limit in characters (spec §4.3 contract values).
    fn caption_limit(&self) -> usize {
        self.id().caption_limit()
    }

    /// Accepted containers/codecs/max size for the pre-flight media check.
    fn media_constraints(&self) -> MediaConstraints;

    /// Declares whether publish needs the dual OAuth 1.0a credential in
    /// addition to the OAuth 2.0 access token (Twitter media upload only).
    fn requires_dual_credential(&self) -> bool {
        false
    }

    fn build_authorization_url(&self, redirect_uri: &str, client_id: &str, state: &str) -> String;

    async fn exchange_code_for_tokens(
        &self,
        redirect_uri: &str,
        client_id: &str,
        client_secret: &str,
        code: &str,
    ) -> Result<TokenBundle, PlatformError>;

    /// Refresh an access token. Fails with
    /// [`PlatformError::RefreshNotSupported`] if the platform has no
    /// refresh flow (kind `CONFIG_MISSING`, treated as fatal-for-refresh by
    /// the Token Lifecycle Manager).
    async fn refresh(
        &self,
        client_id: &str,
        client_secret: &str,
        refresh_token: &str,
    ) -> Result<TokenBundle, PlatformError>;

    async fn fetch_identity(
        &self,
        access_token: &str,
    ) -> Result<(String, String), PlatformError>;

    /// Validate caption length and media constraints without any network
    /// call. Called by the dispatcher's pre-flight step (spec §4.7.4).
    fn pre_flight(&self, spec: &PostSpec, video: &VideoHandle) -> Result<(), PlatformError> {
        let limit = self.caption_limit();
        if spec.caption.chars().count() > limit {
            return Err(PlatformError::CaptionTooLong {
                len: spec.caption.chars().count(),
                limit,
            });
        }
        let constraints = self.media_constraints();
        if !constraints.containers.contains(&video.container.as_str()) {
            return Err(PlatformError::MediaUnsupported {
                message: format!("container '{}' not accepted", video.container),
            });
        }
        if !constraints.codecs.contains(&video.codec.as_str()) {
            return Err(PlatformError::MediaUnsupported {
                message: format!("codec '{}' not accepted", video.codec),
            });
        }
        if video.size_bytes > constraints.max_size_bytes {
            return Err(PlatformError::MediaUnsupported {
                message: format!(
                    "size {} exceeds max {}",
                    video.size_bytes, constraints.max_size_bytes
                ),
            });
        }
        Ok(())
    }

    async fn publish(
        &self,
        video: &VideoHandle,
        spec: &PostSpec,
        credentials: &PublishCredentials,
    ) -> Result<PublishResult, PlatformError>;
}

/// Map an HTTP status code to the standard auth/rate-limit error kinds
/// every adapter needs (spec §4.3 "Rate-limit signalling" /
/// "Authorization failures"). `retry_after_secs` comes from the platform's
/// rate-limit header when present.
pub fn map_http_error(status: u16, retry_after_secs: Option<u64>, body_excerpt: &str) -> PlatformError {
    match status {
        401 => PlatformError::AuthExpired,
        403 => PlatformError::AuthRevoked {
            message: body_excerpt.to_string(),
        },
        429 => PlatformError::RateLimited {
            retry_after_ms: Some(retry_after_secs.unwrap_or(60).saturating_mul(1000)),
        },
        500..=599 => PlatformError::Transient {
            message: format!("http {status}: {body_excerpt}"),
        },
        _ => PlatformError::Permanent {
            message: format!("http {status}: {body_excerpt}"),
        },
    }
}
