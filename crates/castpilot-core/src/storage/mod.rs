//! SQLite persistence layer (C9, spec §3/§4.9).
//!
//! Provides database initialization, connection pooling, and one
//! repository module per entity family, following the teacher's
//! `storage/mod.rs` shape.

pub mod connections;
pub mod models;
pub mod multi_posts;
pub mod outcomes;
pub mod posts;
pub mod recurring_schedules;
pub mod schedules;
pub mod users;
pub mod videos;

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};

use crate::error::StorageError;

/// Type alias for the SQLite connection pool.
pub type DbPool = sqlx::SqlitePool;

/// Initialize the SQLite database: creates the file if missing, enables
/// WAL mode and foreign keys, runs embedded migrations, and returns a
/// pool. A single pool is shared by the scheduler loop and every
/// dispatcher worker in a process; row-level `SKIP LOCKED` claiming
/// (spec §4.6/§4.9) is what lets multiple processes share one database
/// safely.
pub async fn init_db(database_url: &str) -> Result<DbPool, StorageError> {
    let path = database_url
        .strip_prefix("sqlite://")
        .unwrap_or(database_url);
    let expanded = expand_tilde(path);

    if let Some(parent) = std::path::Path::new(&expanded).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                source: sqlx::Error::Configuration(
                    format!("failed to create directory {}: {e}", parent.display()).into(),
                ),
            })?;
        }
    }

    let connect_options = SqliteConnectOptions::from_str(&format!("sqlite:{expanded}"))
        .map_err(|e| StorageError::Connection { source: e })?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .min_connections(1)
        .idle_timeout(Duration::from_secs(300))
        .connect_with(connect_options)
        .await
        .map_err(|e| StorageError::Connection { source: e })?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| StorageError::Migration { source: e })?;

    Ok(pool)
}

/// Initialize an in-memory SQLite database for tests.
#[cfg(any(test, feature = "test-helpers"))]
pub async fn init_test_db() -> Result<DbPool, StorageError> {
    let connect_options = SqliteConnectOptions::from_str("sqlite::memory:")
        .map_err(|e| StorageError::Connection { source: e })?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(connect_options)
        .await
        .map_err(|e| StorageError::Connection { source: e })?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| StorageError::Migration { source: e })?;

    Ok(pool)
}

fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest).to_string_lossy().to_string();
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home.to_string_lossy().to_string();
        }
    }
    path.to_string()
}
