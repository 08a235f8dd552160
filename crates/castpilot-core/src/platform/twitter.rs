//! Twitter/X adapter: OAuth 2.0 PKCE for the user context, plus the
//! dual-credential OAuth 1.0a app credential required by the v1.1 media
//! upload endpoint (spec §4.3's "dual-credential platforms").

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde::Deserialize;

use super::oauth1::sign_request;
use super::{
    map_http_error, MediaConstraints, PlatformAdapter, PlatformId, PostSpec, PublishCredentials,
    PublishResult, TokenBundle, VideoHandle,
};
use crate::error::PlatformError;

const AUTH_URL: &str = "https://twitter.com/i/oauth2/authorize";
const TOKEN_URL: &str = "https://api.twitter.com/2/oauth2/token";
const MEDIA_UPLOAD_URL: &str = "https://upload.twitter.com/1.1/media/upload.json";
const TWEET_URL: &str = "https://api.twitter.com/2/tweets";

pub struct TwitterAdapter {
    http: reqwest::Client,
}

impl Default for TwitterAdapter {
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
struct MediaUploadResponse {
    media_id_string: String,
}

#[derive(Deserialize)]
struct TweetResponse {
    data: TweetData,
}

#[derive(Deserialize)]
struct TweetData {
    id: String,
}

#[async_trait]
impl PlatformAdapter for TwitterAdapter {
    fn id(&self) -> PlatformId {
        PlatformId::Twitter
    }

    fn media_constraints(&self) -> MediaConstraints {
        MediaConstraints {
            containers: &["mp4"],
            codecs: &["h264"],
            max_size_bytes: 512 * 1024 * 1024,
        }
    }

    fn requires_dual_credential(&self) -> bool {
        true
    }

    fn build_authorization_url(&self, redirect_uri: &str, client_id: &str, state: &str) -> String {
        format!(
            "{AUTH_URL}?response_type=code&client_id={client_id}&redirect_uri={redirect_uri}\
             &scope=tweet.read%20tweet.write%20users.read%20offline.access&state={state}\
             &code_challenge=challenge&code_challenge_method=plain"
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
            .basic_auth(client_id, Some(client_secret))
            .form(&[
                ("code", code),
                ("grant_type", "authorization_code"),
                ("redirect_uri", redirect_uri),
                ("code_verifier", "challenge"),
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
            .basic_auth(client_id, Some(client_secret))
            .form(&[("refresh_token", refresh_token), ("grant_type", "refresh_token")])
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
        struct MeResponse {
            data: MeData,
        }
        #[derive(Deserialize)]
        struct MeData {
            id: String,
            username: String,
        }

        let resp = self
            .http
            .get("https://api.twitter.com/2/users/me")
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|source| PlatformError::Network { source })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(map_http_error(status, None, &body));
        }

        let parsed: MeResponse = resp.json().await.map_err(|source| PlatformError::Network { source })?;
        Ok((parsed.data.id, parsed.data.username))
    }

    async fn publish(
        &self,
        video: &VideoHandle,
        spec: &PostSpec,
        credentials: &PublishCredentials,
    ) -> Result<PublishResult, PlatformError> {
        self.pre_flight(spec, video)?;

        let oauth1 = credentials.oauth1_credential.as_ref().ok_or_else(|| PlatformError::ConfigMissing {
            message: "twitter media upload requires an oauth1 app credential".to_string(),
        })?;

        let init_query = format!(
            "command=INIT&media_type=video/mp4&total_bytes={}&media_category=amplify_video",
            video.size_bytes
        );
        let init_auth = sign_request(oauth1, "POST", MEDIA_UPLOAD_URL, Some(&init_query));
        let init_resp = self
            .http
            .post(MEDIA_UPLOAD_URL)
            .header("Authorization", init_auth)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(init_query)
            .send()
            .await
            .map_err(|source| PlatformError::Network { source })?;
        if !init_resp.status().is_success() {
            let status = init_resp.status().as_u16();
            let body = init_resp.text().await.unwrap_or_default();
            return Err(map_http_error(status, None, &body));
        }
        let media: MediaUploadResponse = init_resp.json().await.map_err(|source| PlatformError::Network { source })?;

        let finalize_query = format!("command=FINALIZE&media_id={}", media.media_id_string);
        let finalize_auth = sign_request(oauth1, "POST", MEDIA_UPLOAD_URL, Some(&finalize_query));
        let finalize_resp = self
            .http
            .post(MEDIA_UPLOAD_URL)
            .header("Authorization", finalize_auth)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(finalize_query)
            .send()
            .await
            .map_err(|source| PlatformError::Network { source })?;
        if !finalize_resp.status().is_success() {
            let status = finalize_resp.status().as_u16();
            let body = finalize_resp.text().await.unwrap_or_default();
            return Err(map_http_error(status, None, &body));
        }

        let tweet_body = serde_json::json!({
            "text": spec.caption,
            "media": { "media_ids": [media.media_id_string] },
        });
        let tweet_resp = self
            .http
            .post(TWEET_URL)
            .bearer_auth(&credentials.oauth2_access_token)
            .json(&tweet_body)
            .send()
            .await
            .map_err(|source| PlatformError::Network { source })?;
        if !tweet_resp.status().is_success() {
            let status = tweet_resp.status().as_u16();
            let body = tweet_resp.text().await.unwrap_or_default();
            return Err(map_http_error(status, None, &body));
        }
        let tweet: TweetResponse = tweet_resp.json().await.map_err(|source| PlatformError::Network { source })?;

        Ok(PublishResult {
            platform_url: format!("https://twitter.com/i/web/status/{}", tweet.data.id),
            platform_post_id: tweet.data.id,
        })
    }
}
