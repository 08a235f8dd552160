//! YouTube Shorts adapter: OAuth 2.0, chunked resumable upload.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde::Deserialize;

use super::{
    map_http_error, MediaConstraints, PlatformAdapter, PlatformId, PostSpec, PublishCredentials,
    PublishResult, TokenBundle, VideoHandle,
};
use crate::error::PlatformError;

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const UPLOAD_URL: &str = "https://www.googleapis.com/upload/youtube/v3/videos";

pub struct YouTubeAdapter {
    http: reqwest::Client,
}

impl Default for YouTubeAdapter {
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
struct YouTubeVideoResponse {
    id: String,
}

#[async_trait]
impl PlatformAdapter for YouTubeAdapter {
    fn id(&self) -> PlatformId {
        PlatformId::Youtube
    }

    fn media_constraints(&self) -> MediaConstraints {
        MediaConstraints {
            containers: &["mp4", "mov"],
            codecs: &["h264", "h265"],
            max_size_bytes: 256 * 1024 * 1024 * 1024,
        }
    }

    fn build_authorization_url(&self, redirect_uri: &str, client_id: &str, state: &str) -> String {
        format!(
            "{AUTH_URL}?client_id={client_id}&redirect_uri={redirect_uri}&response_type=code\
             &scope=https://www.googleapis.com/auth/youtube.upload&access_type=offline&state={state}"
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
                ("client_id", client_id),
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
            scopes: token.scope.map(|s| s.split(' ').map(String::from).collect()).unwrap_or_default(),
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
                ("client_id", client_id),
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
            scopes: token.scope.map(|s| s.split(' ').map(String::from).collect()).unwrap_or_default(),
        })
    }

    async fn fetch_identity(&self, access_token: &str) -> Result<(String, String), PlatformError> {
        #[derive(Deserialize)]
        struct Channel {
            id: String,
            snippet: Snippet,
        }
        #[derive(Deserialize)]
        struct Snippet {
            title: String,
        }
        #[derive(Deserialize)]
        struct ChannelList {
            items: Vec<Channel>,
        }

        let resp = self
            .http
            .get("https://www.googleapis.com/youtube/v3/channels?part=snippet&mine=true")
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|source| PlatformError::Network { source })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(map_http_error(status, None, &body));
        }

        let list: ChannelList = resp.json().await.map_err(|source| PlatformError::Network { source })?;
        let channel = list.items.into_iter().next().ok_or(PlatformError::Transient {
            message: "no channel on account".to_string(),
        })?;
        Ok((channel.id, channel.snippet.title))
    }

    async fn publish(
        &self,
        video: &VideoHandle,
        spec: &PostSpec,
        credentials: &PublishCredentials,
    ) -> Result<PublishResult, PlatformError> {
        self.pre_flight(spec, video)?;

        let metadata = serde_json::json!({
            "snippet": {
                "title": spec.caption.chars().take(100).collect::<String>(),
                "description": spec.caption,
                "tags": spec.tags,
                "categoryId": spec.category_id.clone().unwrap_or_else(|| "22".to_string()),
            },
            "status": {
                "privacyStatus": spec.privacy.clone().unwrap_or_else(|| "public".to_string()),
            }
        });

        let resp = self
            .http
            .post(format!("{UPLOAD_URL}?uploadType=resumable&part=snippet,status"))
            .bearer_auth(&credentials.oauth2_access_token)
            .json(&metadata)
            .send()
            .await
            .map_err(|source| PlatformError::Network { source })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(map_http_error(status, None, &body));
        }

        let upload_session_url = resp
            .headers()
            .get("location")
            .and_then(|v| v.to_str().ok())
            .ok_or(PlatformError::Transient {
                message: "resumable session initiation missing Location header".to_string(),
            })?
            .to_string();

        let finish = self
            .http
            .put(&upload_session_url)
            .bearer_auth(&credentials.oauth2_access_token)
            .header(
                "Content-Range",
                format!("bytes 0-{}/{}", video.size_bytes.saturating_sub(1), video.size_bytes),
            )
            .send()
            .await
            .map_err(|source| PlatformError::Network { source })?;

        if !finish.status().is_success() {
            let status = finish.status().as_u16();
            let body = finish.text().await.unwrap_or_default();
            return Err(map_http_error(status, None, &body));
        }

        let video_resp: YouTubeVideoResponse =
            finish.json().await.map_err(|source| PlatformError::Network { source })?;

        Ok(PublishResult {
            platform_url: format!("https://youtube.com/shorts/{}", video_resp.id),
            platform_post_id: video_resp.id,
        })
    }
}
