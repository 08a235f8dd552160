//! CRUD operations for `PlatformConnection` rows (spec §3).
//!
//! Encryption is never implicit (spec §9's re-architecture note): callers
//! pass already-sealed ciphertext blobs produced by [`crate::secrets::SecretStore`]
//! at the service layer, and this module never calls `seal`/`open` itself.

use chrono::{DateTime, Utc};

use super::models::PlatformConnectionRow;
use super::DbPool;
use crate::clock::new_id;
use crate::error::StorageError;
use crate::platform::PlatformId;

pub struct NewConnection {
    pub user_id: String,
    pub platform: PlatformId,
    pub platform_account_id: String,
    pub display_name: String,
    pub scopes: Vec<String>,
    pub access_token_ciphertext: Vec<u8>,
    pub refresh_token_ciphertext: Option<Vec<u8>>,
    pub access_token_expires_at: DateTime<Utc>,
}

/// Insert a new active connection, deactivating any prior active
/// connection for the same (user, platform, account id) first so the
/// unique-active-connection invariant (spec §3) never trips.
pub async fn upsert_connection(pool: &DbPool, new: NewConnection) -> Result<PlatformConnectionRow, StorageError> {
    let mut tx = pool.begin().await.map_err(|e| StorageError::Query { source: e })?;

    sqlx::query(
        "UPDATE platform_connections SET active = 0, updated_at = ? \
         WHERE user_id = ? AND platform = ? AND platform_account_id = ? AND active = 1",
    )
    .bind(Utc::now())
    .bind(&new.user_id)
    .bind(new.platform.as_str())
    .bind(&new.platform_account_id)
    .execute(&mut *tx)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    let id = new_id();
    let now = Utc::now();
    let scopes = new.scopes.join(" ");
    sqlx::query(
        "INSERT INTO platform_connections \
         (id, user_id, platform, platform_account_id, display_name, scopes, \
          access_token_ciphertext, refresh_token_ciphertext, access_token_expires_at, \
          active, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)",
    )
    .bind(&id)
    .bind(&new.user_id)
    .bind(new.platform.as_str())
    .bind(&new.platform_account_id)
    .bind(&new.display_name)
    .bind(&scopes)
    .bind(&new.access_token_ciphertext)
    .bind(&new.refresh_token_ciphertext)
    .bind(new.access_token_expires_at)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    tx.commit().await.map_err(|e| StorageError::Query { source: e })?;

    get_connection(pool, &id)
        .await?
        .ok_or_else(|| StorageError::NotFound { what: format!("connection {id}") })
}

pub async fn get_connection(pool: &DbPool, id: &str) -> Result<Option<PlatformConnectionRow>, StorageError> {
    sqlx::query_as::<_, PlatformConnectionRow>("SELECT * FROM platform_connections WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })
}

/// The single active connection for (user, platform), if any
/// (spec §3's uniqueness invariant guarantees at most one row).
pub async fn get_active_connection(
    pool: &DbPool,
    user_id: &str,
    platform: PlatformId,
) -> Result<Option<PlatformConnectionRow>, StorageError> {
    sqlx::query_as::<_, PlatformConnectionRow>(
        "SELECT * FROM platform_connections WHERE user_id = ? AND platform = ? AND active = 1 LIMIT 1",
    )
    .bind(user_id)
    .bind(platform.as_str())
    .fetch_optional(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })
}

pub async fn list_connections(pool: &DbPool, user_id: &str) -> Result<Vec<PlatformConnectionRow>, StorageError> {
    sqlx::query_as::<_, PlatformConnectionRow>(
        "SELECT * FROM platform_connections WHERE user_id = ? AND active = 1 ORDER BY created_at",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })
}

/// Store a refreshed token bundle (C4's refresh result), keeping the row
/// active.
pub async fn update_tokens(
    pool: &DbPool,
    connection_id: &str,
    access_token_ciphertext: &[u8],
    refresh_token_ciphertext: Option<&[u8]>,
    access_token_expires_at: DateTime<Utc>,
) -> Result<(), StorageError> {
    sqlx::query(
        "UPDATE platform_connections SET access_token_ciphertext = ?, refresh_token_ciphertext = \
         COALESCE(?, refresh_token_ciphertext), access_token_expires_at = ?, updated_at = ? WHERE id = ?",
    )
    .bind(access_token_ciphertext)
    .bind(refresh_token_ciphertext)
    .bind(access_token_expires_at)
    .bind(Utc::now())
    .bind(connection_id)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

/// Permanently mark a connection inactive (spec §4.3/§4.4's `AUTH_REVOKED`
/// / `INVALID_GRANT` handling).
pub async fn deactivate(pool: &DbPool, connection_id: &str) -> Result<(), StorageError> {
    sqlx::query("UPDATE platform_connections SET active = 0, updated_at = ? WHERE id = ?")
        .bind(Utc::now())
        .bind(connection_id)
        .execute(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{init_test_db, users::ensure_user};

    fn new_connection(user_id: &str) -> NewConnection {
        NewConnection {
            user_id: user_id.to_string(),
            platform: PlatformId::Youtube,
            platform_account_id: "yt-acct-1".to_string(),
            display_name: "Creator".to_string(),
            scopes: vec!["upload".to_string()],
            access_token_ciphertext: b"ciphertext".to_vec(),
            refresh_token_ciphertext: Some(b"refresh-ciphertext".to_vec()),
            access_token_expires_at: Utc::now() + chrono::Duration::hours(1),
        }
    }

    #[tokio::test]
    async fn upsert_deactivates_prior_active_connection() {
        let pool = init_test_db().await.unwrap();
        ensure_user(&pool, "u1", "h").await.unwrap();

        let first = upsert_connection(&pool, new_connection("u1")).await.unwrap();
        let second = upsert_connection(&pool, new_connection("u1")).await.unwrap();

        assert_ne!(first.id, second.id);
        let reloaded_first = get_connection(&pool, &first.id).await.unwrap().unwrap();
        assert!(!reloaded_first.active);
        assert!(get_active_connection(&pool, "u1", PlatformId::Youtube)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn deactivate_removes_from_active_lookup() {
        let pool = init_test_db().await.unwrap();
        ensure_user(&pool, "u1", "h").await.unwrap();
        let conn = upsert_connection(&pool, new_connection("u1")).await.unwrap();

        deactivate(&pool, &conn.id).await.unwrap();
        assert!(get_active_connection(&pool, "u1", PlatformId::Youtube)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn update_tokens_preserves_refresh_token_when_none_supplied() {
        let pool = init_test_db().await.unwrap();
        ensure_user(&pool, "u1", "h").await.unwrap();
        let conn = upsert_connection(&pool, new_connection("u1")).await.unwrap();

        update_tokens(&pool, &conn.id, b"new-access", None, Utc::now() + chrono::Duration::hours(2))
            .await
            .unwrap();

        let reloaded = get_connection(&pool, &conn.id).await.unwrap().unwrap();
        assert_eq!(reloaded.access_token_ciphertext, b"new-access");
        assert_eq!(reloaded.refresh_token_ciphertext, Some(b"refresh-ciphertext".to_vec()));
    }
}
