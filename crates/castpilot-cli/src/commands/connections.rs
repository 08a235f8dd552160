//! Implementation of the `castpilot connections list|disconnect` commands.

use castpilot_core::config::Config;
use castpilot_core::service;
use castpilot_core::storage::{self, connections};

use super::ConnectionsAction;

pub async fn execute(config: &Config, action: ConnectionsAction) -> anyhow::Result<()> {
    let pool = storage::init_db(&config.database_url).await?;
    match action {
        ConnectionsAction::List { user_id } => {
            let rows = connections::list_connections(&pool, &user_id).await?;
            if rows.is_empty() {
                println!("no connections for user {user_id}");
            }
            for row in rows {
                println!(
                    "{}  {:<10} {}  active={}  account={}",
                    row.id,
                    row.platform,
                    row.display_name.as_deref().unwrap_or("-"),
                    row.active,
                    row.platform_account_id
                );
            }
        }
        ConnectionsAction::Disconnect { user_id, platform } => {
            service::disconnect_platform(&pool, &user_id, &platform).await?;
            println!("disconnected {platform} for user {user_id}");
        }
    }
    Ok(())
}
