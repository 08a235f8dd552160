//! Facebook adapter: Meta Graph API OAuth 2.0 and a direct Page video
//! upload (no container/poll step — simpler than Instagram's Reels flow).

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde::Deserialize;

use super::{
    map_http_error, MediaConstraints, PlatformAdapter, PlatformId, PostSpec, PublishCredentials,
    PublishResult, TokenBundle, VideoHandle,
};
use crate::error::PlatformError;

const GRAPH_BASE: &str = "https://graph.facebook.com/v19.0";
const AUTH_URL: &str = "https://www.facebook.com/v19.0/dialog/oauth";
const TOKEN_URL: &str = "https://graph.facebook.com/v19.0/oauth/access_token";

pub struct FacebookAdapter {
    http: reqwest::Client,
}

impl Default for FacebookAdapter {
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
struct PageVideoResponse {
    id: String,
}

#[derive(Deserialize)]
struct AccountsResponse {
    data: Vec<FacebookPage>,
}

#[derive(Deserialize)]
struct FacebookPage {
    id: String,
    name: Option<String>,
}

#[async_trait]
impl PlatformAdapter for FacebookAdapter {
    fn id(&self) -> PlatformId {
        PlatformId::Facebook
    }

    fn media_constraints(&self) -> MediaConstraints {
        MediaConstraints {
            containers: &["mp4"],
            codecs: &["h264", "h265"],
            max_size_bytes: 10 * 1024 * 1024 * 1024,
        }
    }

    fn build_authorization_url(&self, redirect_uri: &str, client_id: &str, state: &str) -> String {
        format!(
            "{AUTH_URL}?client_id={client_id}&redirect_uri={redirect_uri}&response_type=code\
             &scope=pages_manage_posts,pages_read_engagement&state={state}"
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

    /// Same long-lived-token extension flow as Instagram: Meta's Page
    /// tokens have no distinct refresh token.
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
            .query(&[("access_token", access_token)])
            .send()
            .await
            .map_err(|source| PlatformError::Network { source })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(map_http_error(status, None, &body));
        }

        let parsed: AccountsResponse = resp.json().await.map_err(|source| PlatformError::Network { source })?;
        let page = parsed.data.into_iter().next().ok_or_else(|| PlatformError::ConfigMissing {
            message: "no managed facebook page found for this account".to_string(),
        })?;
        Ok((page.id.clone(), page.name.unwrap_or(page.id)))
    }

    async fn publish(
        &self,
        video: &VideoHandle,
        spec: &PostSpec,
        credentials: &PublishCredentials,
    ) -> Result<PublishResult, PlatformError> {
        self.pre_flight(spec, video)?;

        let resp = self
            .http
            .post(format!("{GRAPH_BASE}/me/videos"))
            .query(&[
                ("file_url", video.storage_key.as_str()),
                ("description", spec.caption.as_str()),
                ("access_token", credentials.oauth2_access_token.as_str()),
            ])
            .send()
            .await
            .map_err(|source| PlatformError::Network { source })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(map_http_error(status, None, &body));
        }

        let video_resp: PageVideoResponse = resp.json().await.map_err(|source| PlatformError::Network { source })?;
        Ok(PublishResult {
            platform_url: format!("https://www.facebook.com/watch/?v={}", video_resp.id),
            platform_post_id: video_resp.id,
        })
    }
}
