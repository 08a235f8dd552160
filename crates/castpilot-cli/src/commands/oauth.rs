//! Implementation of the `castpilot oauth start|complete` commands.

use castpilot_core::config::Config;
use castpilot_core::secrets::SecretStore;
use castpilot_core::service;
use castpilot_core::storage::{self, users};

use super::OauthAction;

pub async fn execute(config: &Config, action: OauthAction) -> anyhow::Result<()> {
    match action {
        OauthAction::Start { platform, user_id } => {
            let start = service::start_platform_oauth(config, &user_id, &platform)?;
            println!("authorization_url: {}", start.authorization_url);
            println!("state: {}", start.state);
        }
        OauthAction::Complete { platform, user_id, code, state } => {
            let pool = storage::init_db(&config.database_url).await?;
            users::ensure_user(&pool, &user_id, "external").await?;
            let secrets = SecretStore::derive(&config.encryption_key, config.encryption_salt.as_bytes());
            let connection =
                service::complete_platform_oauth(&pool, config, &secrets, &user_id, &platform, &code, &state)
                    .await?;
            println!(
                "connected: {} account {} ({})",
                connection.platform,
                connection.platform_account_id,
                connection.display_name.as_deref().unwrap_or("-")
            );
        }
    }
    Ok(())
}
