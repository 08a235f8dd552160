//! Implementation of the `castpilot init` command.
//!
//! Writes a starter `config.toml` with every key of spec §6's
//! configuration surface present (mostly empty, to be filled in), rather
//! than the teacher's interactive wizard — the core's spec has no notion
//! of a guided first-run experience.

use std::fs;
use std::path::PathBuf;

const STARTER_CONFIG: &str = r#"# CastPilot configuration.
# Generated by `castpilot init`. Fill in the blanks before running
# `castpilot serve`.

encryption_key = ""
database_url = "sqlite://~/.castpilot/castpilot.db"
scheduler_tick_ms = 30000
dispatcher_concurrency = 4
publish_deadline_ms = 1800000

[object_store]
endpoint = ""
bucket = ""
access_key = ""
secret_key = ""

[platforms.tiktok]
client_id = ""
client_secret = ""
redirect_uri = ""

[platforms.youtube]
client_id = ""
client_secret = ""
redirect_uri = ""

[platforms.twitter]
client_id = ""
client_secret = ""
redirect_uri = ""

[platforms.instagram]
client_id = ""
client_secret = ""
redirect_uri = ""

[platforms.facebook]
client_id = ""
client_secret = ""
redirect_uri = ""

[twitter_oauth1]
api_key = ""
api_secret = ""
access_token = ""
access_token_secret = ""
"#;

pub fn execute(config_path: &str, force: bool) -> anyhow::Result<()> {
    let path = expand_tilde(config_path);
    if path.exists() && !force {
        anyhow::bail!(
            "Config file already exists at {}. Use --force to overwrite.",
            path.display()
        );
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, STARTER_CONFIG)?;
    println!("Wrote starter configuration to {}", path.display());
    println!("Next: fill in encryption_key and the platforms you plan to connect, then run `castpilot migrate`.");
    Ok(())
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
