//! Instagram adapter: Meta Graph API OAuth 2.0 and the container-based
//! Reels publishing flow (create a media container from a hosted video
//! URL, poll until Meta finishes ingesting it, then publish the container).

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde::Deserialize;
use tokio::time::{sleep, Duration};

use super::{
    map_http_error, MediaConstraints, PlatformAdapter, PlatformId, PostSpec, PublishCredentials,
    PublishResult, TokenBundle, VideoHandle,
};
use crate::error::PlatformError;

const GRAPH_BASE: &str = "https://graph.facebook.com/v19.0";
const AUTH_URL: &str = "https://www.facebook.com/v19.0/dialog/oauth";
const TOKEN_URL: &str = "https://graph.facebook.com/v19.0/oauth/access_token";
const CONTAINER_POLL_ATTEMPTS: u32 = 20;
const CONTAINER_POLL_INTERVAL: Duration = Duration::from_secs(3);

pub struct InstagramAdapter {
    http: reqwest::Client,
}

impl Default for InstagramAdapter {
    fn default() -> Self {
        Self { http: reqwest::Client::new() }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
}

#[derive(Deserialize)]
struct ContainerResponse {
    id: String,
}

#[derive(Deserialize)]
struct ContainerStatusResponse {
    status_code: String,
}

#[derive(Deserialize)]
struct PublishResponse {
    id: String,
}

#[derive(Deserialize)]
struct AccountsResponse {
    data: Vec<InstagramAccount>,
}

#[derive(Deserialize)]
struct InstagramAccount {
    id: String,
    username: Option<String>,
}

#[async_trait]
impl PlatformAdapter for InstagramAdapter {
    fn id(&self) -> PlatformId {
        PlatformId::Instagram
    }

    fn media_constraints(&self) -> MediaConstraints {
        MediaConstraints {
            containers: &["mp4"],
            codecs: &["h264"],
            max_size_bytes: 1024 * 1024 * 1024,
        }
    }

    fn build_authorization_url(&self, redirect_uri: &str, client_id: &str, state: &str) -> String {
        format!(
            "{AUTH_URL}?client_id={client_id}&redirect_uri={redirect_uri}&response_type=code\
             &scope=instagram_content_publish,instagram_basic,pages_show_list&state={state}"
        )
    }

    async fn exchange_code_for_tokens(
        &self,
        redirect_uri: &str,
        client_id: &str,
        client_secret: &str,
        code: &str,
    ) -> Result<TokenBundle, PlatformError> {
        let resp = self
            .http
            .get(TOKEN_URL)
            .query(&[
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("redirect_uri", redirect_uri),
                ("code", code),
            ])
            .send()
            .await
            .map_err(|source| PlatformError::Network { source })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(map_http_error(status, None, &body));
        }

        let token: TokenResponse = resp.json().await.map_err(|source| PlatformError::Network { source })?;
        Ok(TokenBundle {
            access_token: token.access_token,
            refresh_token: None,
            expires_at: Utc::now() + ChronoDuration::seconds(token.expires_in.unwrap_or(5_184_000)),
            scopes: vec![],
        })
    }

    /// Meta's long-lived user tokens have no refresh-token grant; they are
    /// extended by re-exchanging the still-valid token itself.
    async fn refresh(
        &self,
        _client_id: &str,
        client_secret: &str,
        refresh_token: &str,
    ) -> Result<TokenBundle, PlatformError> {
        let resp = self
            .http
            .get(TOKEN_URL)
            .query(&[
                ("grant_type", "fb_exchange_token"),
                ("client_secret", client_secret),
                ("fb_exchange_token", refresh_token),
            ])
            .send()
            .await
            .map_err(|source| PlatformError::Network { source })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            if status == 400 {
                return Err(PlatformError::InvalidGrant { message: body });
            }
            return Err(map_http_error(status, None, &body));
        }

        let token: TokenResponse = resp.json().await.map_err(|source| PlatformError::Network { source })?;
        Ok(TokenBundle {
            access_token: token.access_token,
            refresh_token: Some(refresh_token.to_string()),
            expires_at: Utc::now() + ChronoDuration::seconds(token.expires_in.unwrap_or(5_184_000)),
            scopes: vec![],
        })
    }

    async fn fetch_identity(&self, access_token: &str) -> Result<(String, String), PlatformError> {
        let resp = self
            .http
            .get(format!("{GRAPH_BASE}/me/accounts"))
            .query(&[("fields", "instagram_business_account{id,username}"), ("access_token", access_token)])
            .send()
            .await
            .map_err(|source| PlatformError::Network { source })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(map_http_error(status, None, &body));
        }

        let parsed: AccountsResponse = resp.json().await.map_err(|source| PlatformError::Network { source })?;
        let account = parsed.data.into_iter().next().ok_or_else(|| PlatformError::ConfigMissing {
            message: "no facebook page with a linked instagram business account".to_string(),
        })?;
        Ok((account.id.clone(), account.username.unwrap_or(account.id)))
    }

    async fn publish(
        &self,
        video: &VideoHandle,
        spec: &PostSpec,
        credentials: &PublishCredentials,
    ) -> Result<PublishResult, PlatformError> {
        self.pre_flight(spec, video)?;

        // The connected page's Instagram business account id is resolved
        // once at connection time (`fetch_identity`) and is not needed
        // again here: Meta resolves `/me/media` against the token's
        // associated business account directly.
        let create_resp = self
            .http
            .post(format!("{GRAPH_BASE}/me/media"))
            .query(&[
                ("media_type", "REELS"),
                ("video_url", video.storage_key.as_str()),
                ("caption", spec.caption.as_str()),
                ("access_token", credentials.oauth2_access_token.as_str()),
            ])
            .send()
            .await
            .map_err(|source| PlatformError::Network { source })?;
        if !create_resp.status().is_success() {
            let status = create_resp.status().as_u16();
            let body = create_resp.text().await.unwrap_or_default();
            return Err(map_http_error(status, None, &body));
        }
        let container: ContainerResponse = create_resp.json().await.map_err(|source| PlatformError::Network { source })?;

        let mut ready = false;
        for _ in 0..CONTAINER_POLL_ATTEMPTS {
            let status_resp = self
                .http
                .get(format!("{GRAPH_BASE}/{}", container.id))
                .query(&[("fields", "status_code"), ("access_token", credentials.oauth2_access_token.as_str())])
                .send()
                .await
                .map_err(|source| PlatformError::Network { source })?;
            if !status_resp.status().is_success() {
                let status = status_resp.status().as_u16();
                let body = status_resp.text().await.unwrap_or_default();
                return Err(map_http_error(status, None, &body));
            }
            let parsed: ContainerStatusResponse = status_resp.json().await.map_err(|source| PlatformError::Network { source })?;
            match parsed.status_code.as_str() {
                "FINISHED" => {
                    ready = true;
                    break;
                }
                "ERROR" | "EXPIRED" => {
                    return Err(PlatformError::Transient { message: format!("container ingestion {}", parsed.status_code) });
                }
                _ => sleep(CONTAINER_POLL_INTERVAL).await,
            }
        }
        if !ready {
            return Err(PlatformError::UploadProcessingTimeout {
                waited_ms: (CONTAINER_POLL_ATTEMPTS as u64) * CONTAINER_POLL_INTERVAL.as_millis() as u64,
            });
        }

        let publish_resp = self
            .http
            .post(format!("{GRAPH_BASE}/me/media_publish"))
            .query(&[("creation_id", container.id.as_str()), ("access_token", credentials.oauth2_access_token.as_str())])
            .send()
            .await
            .map_err(|source| PlatformError::Network { source })?;
        if !publish_resp.status().is_success() {
            let status = publish_resp.status().as_u16();
            let body = publish_resp.text().await.unwrap_or_default();
            return Err(map_http_error(status, None, &body));
        }
        let published: PublishResponse = publish_resp.json().await.map_err(|source| PlatformError::Network { source })?;

        Ok(PublishResult {
            platform_url: format!("https://www.instagram.com/reel/{}", published.id),
            platform_post_id: published.id,
        })
    }
}
