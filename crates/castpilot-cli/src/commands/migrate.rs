//! Implementation of the `castpilot migrate` command.
//!
//! Runs pending SQLite migrations. `castpilot_core::storage::init_db`
//! already runs `sqlx::migrate!` on every pool creation (spec §10.4), so
//! this subcommand is just that call made explicit for operators who want
//! to migrate without starting the scheduler/dispatcher.

use castpilot_core::config::Config;
use castpilot_core::storage;

pub async fn execute(config: &Config) -> anyhow::Result<()> {
    storage::init_db(&config.database_url).await?;
    println!("Database at {} is up to date.", config.database_url);
    Ok(())
}
