//! TikTok adapter: OAuth 2.0 (PKCE-less confidential client) and the
//! Content Posting API's two-phase init/publish upload.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde::Deserialize;

use super::upload::{futures_sleep, poll_until_ready, ChunkedUploadTransport, ProcessingState};
use super::{
    map_http_error, MediaConstraints, PlatformAdapter, PlatformId, PostSpec, PublishCredentials,
    PublishResult, TokenBundle, VideoHandle,
};
use crate::clock::SystemClock;
use crate::error::PlatformError;

const AUTH_URL: &str = "https://www.tiktok.com/v2/auth/authorize/";
const TOKEN_URL: &str = "https://open.tiktokapis.com/v2/oauth/token/";
const INIT_URL: &str = "https://open.tiktokapis.com/v2/post/publish/video/init/";
const STATUS_URL: &str = "https://open.tiktokapis.com/v2/post/publish/status/fetch/";

pub struct TikTokAdapter {
    http: reqwest::Client,
}

impl Default for TikTokAdapter {
    fn default() -> Self {
        Self { http: reqwest::Client::new() }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: i64,
    scope: Option<String>,
}

#[derive(Deserialize)]
struct InitResponse {
    data: InitData,
}

#[derive(Deserialize)]
struct InitData {
    publish_id: String,
    upload_url: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    data: StatusData,
}

#[derive(Deserialize)]
struct StatusData {
    status: String,
    #[serde(default)]
    publicaly_available_post_id: Vec<String>,
}

/// Drives `STATUS_URL` through the shared chunked-upload poll loop. TikTok's
/// init/append phases already ran by the time `publish()` reaches the poll,
/// so only `poll` does real work here.
struct StatusPoller<'a> {
    http: &'a reqwest::Client,
    access_token: &'a str,
}

#[async_trait]
impl ChunkedUploadTransport for StatusPoller<'_> {
    async fn init(&self, _total_size_bytes: u64) -> Result<String, PlatformError> {
        Ok(String::new())
    }

    async fn append(&self, _session_id: &str, _offset: u64, _chunk: &[u8]) -> Result<(), PlatformError> {
        Ok(())
    }

    async fn finalize(&self, _session_id: &str) -> Result<(), PlatformError> {
        Ok(())
    }

    async fn poll(&self, session_id: &str) -> Result<(ProcessingState, Option<(String, String)>), PlatformError> {
        let status_resp = self
            .http
            .post(STATUS_URL)
            .bearer_auth(self.access_token)
            .json(&serde_json::json!({ "publish_id": session_id }))
            .send()
            .await
            .map_err(|source| PlatformError::Network { source })?;
        if !status_resp.status().is_success() {
            let status = status_resp.status().as_u16();
            let body = status_resp.text().await.unwrap_or_default();
            return Err(map_http_error(status, None, &body));
        }
        let status: StatusResponse = status_resp.json().await.map_err(|source| PlatformError::Network { source })?;

        match status.data.status.as_str() {
            "FAILED" => Ok((ProcessingState::Failed, None)),
            "PUBLISH_COMPLETE" => {
                let post_id = status
                    .data
                    .publicaly_available_post_id
                    .into_iter()
                    .next()
                    .unwrap_or_else(|| session_id.to_string());
                let url = format!("https://www.tiktok.com/@me/video/{post_id}");
                Ok((ProcessingState::Ready, Some((post_id, url))))
            }
            _ => Ok((ProcessingState::InProgress, None)),
        }
    }
}

#[async_trait]
impl PlatformAdapter for TikTokAdapter {
    fn id(&self) -> PlatformId {
        PlatformId::Tiktok
    }

    fn media_constraints(&self) -> MediaConstraints {
        MediaConstraints {
            containers: &["mp4"],
            codecs: &["h264", "h265"],
            max_size_bytes: 4 * 1024 * 1024 * 1024,
        }
    }

    fn build_authorization_url(&self, redirect_uri: &str, client_id: &str, state: &str) -> String {
        format!(
            "{AUTH_URL}?client_key={client_id}&redirect_uri={redirect_uri}&response_type=code\
             &scope=video.publish,user.info.basic&state={state}"
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
            .post(TOKEN_URL)
            .form(&[
                ("client_key", client_id),
                ("client_secret", client_secret),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("grant_type", "authorization_code"),
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
            refresh_token: token.refresh_token,
            expires_at: Utc::now() + ChronoDuration::seconds(token.expires_in),
            scopes: token.scope.map(|s| s.split(',').map(String::from).collect()).unwrap_or_default(),
        })
    }

    async fn refresh(
        &self,
        client_id: &str,
        client_secret: &str,
        refresh_token: &str,
    ) -> Result<TokenBundle, PlatformError> {
        let resp = self
            .http
            .post(TOKEN_URL)
            .form(&[
                ("client_key", client_id),
                ("client_secret", client_secret),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
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
            refresh_token: token.refresh_token.or_else(|| Some(refresh_token.to_string())),
            expires_at: Utc::now() + ChronoDuration::seconds(token.expires_in),
            scopes: token.scope.map(|s| s.split(',').map(String::from).collect()).unwrap_or_default(),
        })
    }

    async fn fetch_identity(&self, access_token: &str) -> Result<(String, String), PlatformError> {
        #[derive(Deserialize)]
        struct UserInfoResponse {
            data: UserInfoData,
        }
        #[derive(Deserialize)]
        struct UserInfoData {
            user: UserInfo,
        }
        #[derive(Deserialize)]
        struct UserInfo {
            open_id: String,
            display_name: String,
        }

        let resp = self
            .http
            .get("https://open.tiktokapis.com/v2/user/info/?fields=open_id,display_name")
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|source| PlatformError::Network { source })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(map_http_error(status, None, &body));
        }

        let parsed: UserInfoResponse = resp.json().await.map_err(|source| PlatformError::Network { source })?;
        Ok((parsed.data.user.open_id, parsed.data.user.display_name))
    }

    async fn publish(
        &self,
        video: &VideoHandle,
        spec: &PostSpec,
        credentials: &PublishCredentials,
    ) -> Result<PublishResult, PlatformError> {
        self.pre_flight(spec, video)?;

        let init_body = serde_json::json!({
            "post_info": {
                "title": spec.caption,
                "privacy_level": spec.privacy.clone().unwrap_or_else(|| "SELF_ONLY".to_string()),
            },
            "source_info": {
                "source": "PULL_FROM_URL",
                "video_size": video.size_bytes,
            },
        });

        let init_resp = self
            .http
            .post(INIT_URL)
            .bearer_auth(&credentials.oauth2_access_token)
            .json(&init_body)
            .send()
            .await
            .map_err(|source| PlatformError::Network { source })?;

        if !init_resp.status().is_success() {
            let status = init_resp.status().as_u16();
            let body = init_resp.text().await.unwrap_or_default();
            return Err(map_http_error(status, None, &body));
        }
        let init: InitResponse = init_resp.json().await.map_err(|source| PlatformError::Network { source })?;

        let upload_resp = self
            .http
            .put(&init.data.upload_url)
            .header(
                "Content-Range",
                format!("bytes 0-{}/{}", video.size_bytes.saturating_sub(1), video.size_bytes),
            )
            .header("Content-Type", "video/mp4")
            .send()
            .await
            .map_err(|source| PlatformError::Network { source })?;
        if !upload_resp.status().is_success() {
            let status = upload_resp.status().as_u16();
            let body = upload_resp.text().await.unwrap_or_default();
            return Err(map_http_error(status, None, &body));
        }

        let poller = StatusPoller { http: &self.http, access_token: &credentials.oauth2_access_token };
        let clock = SystemClock;
        let (platform_post_id, platform_url) =
            poll_until_ready(&poller, &init.data.publish_id, &clock, futures_sleep::tokio_sleep).await?;

        Ok(PublishResult { platform_post_id, platform_url })
    }
}
