//! CRUD operations for `User` rows (spec §3). The core treats users as an
//! opaque identity + credential hash; account CRUD proper lives outside
//! the core (spec §1).

use chrono::Utc;

use super::models::UserRow;
use super::DbPool;
use crate::error::StorageError;

/// Create a user row if it does not already exist (idempotent upsert),
/// returning the row. The core never hashes credentials itself — the
/// excluded HTTP layer supplies an opaque hash it already computed.
pub async fn ensure_user(pool: &DbPool, id: &str, credential_hash: &str) -> Result<UserRow, StorageError> {
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO users (id, credential_hash, created_at) VALUES (?, ?, ?) \
         ON CONFLICT(id) DO NOTHING",
    )
    .bind(id)
    .bind(credential_hash)
    .bind(now)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    get_user(pool, id)
        .await?
        .ok_or_else(|| StorageError::NotFound { what: format!("user {id}") })
}

pub async fn get_user(pool: &DbPool, id: &str) -> Result<Option<UserRow>, StorageError> {
    sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })
}
