//! Token Lifecycle Manager (C4, spec §4.4): hands out access tokens that
//! are valid for at least `SAFETY_WINDOW`, refreshing and persisting a
//! new bundle through the secret store when needed. Concurrent callers
//! for the same connection serialize on a per-connection lock so exactly
//! one refresh network call happens (spec §8 scenario 5).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::{PlatformError, TokenError};
use crate::platform::PlatformAdapter;
use crate::secrets::SecretStore;
use crate::storage::{connections, DbPool};

/// Minimum remaining lifetime an access token must have to be handed out
/// without a refresh (spec §4.4).
pub const SAFETY_WINDOW_MS: i64 = 60_000;

pub struct TokenManager {
    pool: DbPool,
    secrets: SecretStore,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TokenManager {
    pub fn new(pool: DbPool, secrets: SecretStore) -> Self {
        Self { pool, secrets, locks: Mutex::new(HashMap::new()) }
    }

    async fn lock_for(&self, connection_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(connection_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn open_utf8(&self, ciphertext: &[u8]) -> Result<String, TokenError> {
        let bytes = self.secrets.open(ciphertext)?;
        String::from_utf8(bytes).map_err(|_| TokenError::Platform(PlatformError::Permanent {
            message: "stored token is not valid utf-8".to_string(),
        }))
    }

    /// Return a valid access token for `connection_id`, refreshing through
    /// `adapter` if the stored token is within `SAFETY_WINDOW_MS` of
    /// expiry. `client_id`/`client_secret` are the platform's app-level
    /// OAuth 2.0 credentials, sourced from `Config`.
    pub async fn get_valid_access_token(
        &self,
        connection_id: &str,
        client_id: &str,
        client_secret: &str,
        adapter: &dyn PlatformAdapter,
    ) -> Result<String, TokenError> {
        let connection = self.load_active(connection_id).await?;
        if !needs_refresh(connection.access_token_expires_at) {
            return self.open_utf8(&connection.access_token_ciphertext);
        }

        let connection_lock = self.lock_for(connection_id).await;
        let _guard = connection_lock.lock().await;

        // Re-read: another caller may have refreshed while we waited for the lock.
        let connection = self.load_active(connection_id).await?;
        if !needs_refresh(connection.access_token_expires_at) {
            return self.open_utf8(&connection.access_token_ciphertext);
        }

        self.refresh_locked(connection_id, client_id, client_secret, adapter).await
    }

    /// Force a refresh because an adapter reported `AUTH_EXPIRED` on a token
    /// this manager itself believed was still within its safety window
    /// (spec §4.4). Still serializes on the per-connection lock; if a
    /// concurrent caller already refreshed past `stale_access_token` while
    /// this caller waited, returns that token instead of refreshing again.
    pub async fn force_refresh_access_token(
        &self,
        connection_id: &str,
        client_id: &str,
        client_secret: &str,
        adapter: &dyn PlatformAdapter,
        stale_access_token: &str,
    ) -> Result<String, TokenError> {
        let connection_lock = self.lock_for(connection_id).await;
        let _guard = connection_lock.lock().await;

        let connection = self.load_active(connection_id).await?;
        let current_token = self.open_utf8(&connection.access_token_ciphertext)?;
        if current_token != stale_access_token {
            return Ok(current_token);
        }

        self.refresh_locked(connection_id, client_id, client_secret, adapter).await
    }

    /// Perform the refresh network call and persist the new bundle. Caller
    /// must already hold `self.lock_for(connection_id)`.
    async fn refresh_locked(
        &self,
        connection_id: &str,
        client_id: &str,
        client_secret: &str,
        adapter: &dyn PlatformAdapter,
    ) -> Result<String, TokenError> {
        let connection = self.load_active(connection_id).await?;
        let Some(refresh_ciphertext) = connection.refresh_token_ciphertext.as_ref() else {
            return Err(TokenError::Platform(PlatformError::RefreshNotSupported));
        };
        let refresh_token = self.open_utf8(refresh_ciphertext)?;

        match adapter.refresh(client_id, client_secret, &refresh_token).await {
            Ok(bundle) => {
                let access_ciphertext = self.secrets.seal(bundle.access_token.as_bytes())?;
                let refresh_ciphertext = match &bundle.refresh_token {
                    Some(token) => Some(self.secrets.seal(token.as_bytes())?),
                    None => None,
                };
                connections::update_tokens(
                    &self.pool,
                    connection_id,
                    &access_ciphertext,
                    refresh_ciphertext.as_deref(),
                    bundle.expires_at,
                )
                .await?;
                Ok(bundle.access_token)
            }
            Err(PlatformError::InvalidGrant { message }) => {
                connections::deactivate(&self.pool, connection_id).await?;
                Err(TokenError::Platform(PlatformError::InvalidGrant { message }))
            }
            Err(other) => Err(TokenError::Platform(other)),
        }
    }

    async fn load_active(
        &self,
        connection_id: &str,
    ) -> Result<crate::storage::models::PlatformConnectionRow, TokenError> {
        let row = connections::get_connection(&self.pool, connection_id).await?;
        match row {
            Some(row) if row.active => Ok(row),
            _ => Err(TokenError::ConnectionInactive { connection_id: connection_id.to_string() }),
        }
    }
}

fn needs_refresh(expires_at: DateTime<Utc>) -> bool {
    (expires_at - Utc::now()).num_milliseconds() < SAFETY_WINDOW_MS
}
