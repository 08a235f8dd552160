//! Configuration management for CastPilot.
//!
//! Three-layer loading, matching the teacher's `tuitbot-core::config`:
//! 1. built-in defaults
//! 2. an optional TOML file
//! 3. `CASTPILOT_`-prefixed environment variable overrides
//!
//! CLI flag overrides (e.g. `-c`) are applied by the binary crate before
//! calling [`Config::load`].

mod defaults;

use std::collections::HashMap;
use std::env;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::platform::PlatformId;

/// Top-level configuration for the CastPilot core (spec §6's configuration
/// surface table).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Source material for the C2 symmetric key (`ENCRYPTION_KEY`).
    #[serde(default)]
    pub encryption_key: String,

    /// Stable salt for the PBKDF2 key derivation, persisted alongside
    /// configuration so previously-sealed blobs stay openable across
    /// restarts.
    #[serde(default = "defaults::default_encryption_salt")]
    pub encryption_salt: String,

    /// Relational store endpoint.
    #[serde(default = "defaults::default_database_url")]
    pub database_url: String,

    /// Durable job broker endpoint. The in-process SQLite-backed broker
    /// (C8) ignores this and shares `database_url`; it is retained for
    /// configurations that point at an external broker.
    #[serde(default)]
    pub job_broker_url: Option<String>,

    /// Object store credentials and bucket.
    #[serde(default)]
    pub object_store: ObjectStoreConfig,

    /// Per-platform OAuth 2.0 client configuration.
    #[serde(default)]
    pub platforms: PlatformsConfig,

    /// Twitter's app-level OAuth 1.0a credential, used only for media
    /// upload (dual-credential binding, spec §4.3/§4.4).
    #[serde(default)]
    pub twitter_oauth1: TwitterOauth1Config,

    /// Scheduler loop period in milliseconds (default 30000).
    #[serde(default = "defaults::default_scheduler_tick_ms")]
    pub scheduler_tick_ms: u64,

    /// Dispatcher workers per process (default 4).
    #[serde(default = "defaults::default_dispatcher_concurrency")]
    pub dispatcher_concurrency: usize,

    /// Per-publish-attempt deadline in milliseconds (default 1800000).
    #[serde(default = "defaults::default_publish_deadline_ms")]
    pub publish_deadline_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            encryption_key: String::new(),
            encryption_salt: defaults::default_encryption_salt(),
            database_url: defaults::default_database_url(),
            job_broker_url: None,
            object_store: ObjectStoreConfig::default(),
            platforms: PlatformsConfig::default(),
            twitter_oauth1: TwitterOauth1Config::default(),
            scheduler_tick_ms: defaults::default_scheduler_tick_ms(),
            dispatcher_concurrency: defaults::default_dispatcher_concurrency(),
            publish_deadline_ms: defaults::default_publish_deadline_ms(),
        }
    }
}

/// `OBJECT_STORE_*` credentials and bucket (spec §6).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ObjectStoreConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
}

/// A single platform's OAuth 2.0 client registration
/// (`<PLATFORM>_CLIENT_ID`/`_CLIENT_SECRET`/`_REDIRECT_URI`).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PlatformOAuth2Config {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

impl PlatformOAuth2Config {
    fn is_present(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty() && !self.redirect_uri.is_empty()
    }
}

/// One [`PlatformOAuth2Config`] per platform in spec §3's closed platform
/// set. A platform with no configured client is not a startup error —
/// only connecting to it fails fast with `CONFIG_MISSING` (spec §4.4).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PlatformsConfig {
    #[serde(default)]
    pub tiktok: PlatformOAuth2Config,
    #[serde(default)]
    pub youtube: PlatformOAuth2Config,
    #[serde(default)]
    pub twitter: PlatformOAuth2Config,
    #[serde(default)]
    pub instagram: PlatformOAuth2Config,
    #[serde(default)]
    pub facebook: PlatformOAuth2Config,
}

impl PlatformsConfig {
    pub fn get(&self, platform: PlatformId) -> &PlatformOAuth2Config {
        match platform {
            PlatformId::Tiktok => &self.tiktok,
            PlatformId::Youtube => &self.youtube,
            PlatformId::Twitter => &self.twitter,
            PlatformId::Instagram => &self.instagram,
            PlatformId::Facebook => &self.facebook,
        }
    }

    fn as_pairs(&self) -> [(PlatformId, &PlatformOAuth2Config); 5] {
        [
            (PlatformId::Tiktok, &self.tiktok),
            (PlatformId::Youtube, &self.youtube),
            (PlatformId::Twitter, &self.twitter),
            (PlatformId::Instagram, &self.instagram),
            (PlatformId::Facebook, &self.facebook),
        ]
    }
}

/// `TWITTER_API_KEY`/`_API_SECRET`/`_ACCESS_TOKEN`/`_ACCESS_TOKEN_SECRET`:
/// the app-level OAuth 1.0a credential for media upload (spec §6).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TwitterOauth1Config {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_secret: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub access_token_secret: Option<String>,
}

impl TwitterOauth1Config {
    pub fn is_present(&self) -> bool {
        self.api_key.is_some()
            && self.api_secret.is_some()
            && self.access_token.is_some()
            && self.access_token_secret.is_some()
    }

    pub fn to_credential(&self) -> Option<crate::platform::oauth1::Oauth1Credential> {
        Some(crate::platform::oauth1::Oauth1Credential {
            api_key: self.api_key.clone()?,
            api_secret: self.api_secret.clone()?,
            access_token: self.access_token.clone()?,
            access_token_secret: self.access_token_secret.clone()?,
        })
    }
}

impl Config {
    /// Load configuration from a TOML file with environment variable
    /// overrides.
    ///
    /// Sequence: 1) compiled defaults, 2) `config_path` if it exists (a
    /// missing *explicit* path is an error; a missing default path falls
    /// back to defaults), 3) `CASTPILOT_`-prefixed env var overrides.
    pub fn load(config_path: Option<&str>) -> Result<Config, ConfigError> {
        let (path, explicit) = Self::resolve_config_path(config_path);

        let mut config = match std::fs::read_to_string(&path) {
            Ok(contents) => {
                toml::from_str::<Config>(&contents).map_err(|e| ConfigError::ParseError { source: e })?
            }
            Err(_) if explicit => {
                return Err(ConfigError::FileNotFound { path });
            }
            Err(_) => Config::default(),
        };

        config.apply_env_overrides()?;
        Ok(config)
    }

    fn resolve_config_path(config_path: Option<&str>) -> (String, bool) {
        if let Some(p) = config_path {
            return (expand_tilde(p), true);
        }
        if let Ok(env_path) = env::var("CASTPILOT_CONFIG") {
            return (expand_tilde(&env_path), true);
        }
        (expand_tilde("~/.castpilot/config.toml"), false)
    }

    /// Validate the configuration, collecting every error rather than
    /// failing fast, matching the teacher's `validate()` style.
    ///
    /// Per spec §4.4/§6: a platform with no configured OAuth client is not
    /// itself a validation error here — absence is only detected when a
    /// connection for that platform is actually used (`CONFIG_MISSING`).
    /// This only validates the ambient process-wide configuration.
    pub fn validate(&self) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();

        if self.encryption_key.is_empty() {
            errors.push(ConfigError::MissingField {
                field: "encryption_key".to_string(),
            });
        }

        if self.database_url.is_empty() {
            errors.push(ConfigError::MissingField {
                field: "database_url".to_string(),
            });
        }

        if self.scheduler_tick_ms == 0 {
            errors.push(ConfigError::InvalidValue {
                field: "scheduler_tick_ms".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        if self.dispatcher_concurrency == 0 {
            errors.push(ConfigError::InvalidValue {
                field: "dispatcher_concurrency".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Which platforms currently have a usable OAuth 2.0 client
    /// configuration, for `castpilot test`-style diagnostics.
    pub fn configured_platforms(&self) -> HashMap<PlatformId, bool> {
        self.platforms
            .as_pairs()
            .into_iter()
            .map(|(id, cfg)| (id, cfg.is_present()))
            .collect()
    }

    /// Environment variables use the `CASTPILOT_` prefix with double
    /// underscores separating nested keys (e.g.
    /// `CASTPILOT_OBJECT_STORE__BUCKET`, `CASTPILOT_PLATFORMS__YOUTUBE__CLIENT_ID`).
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(val) = env::var("CASTPILOT_ENCRYPTION_KEY") {
            self.encryption_key = val;
        }
        if let Ok(val) = env::var("CASTPILOT_ENCRYPTION_SALT") {
            self.encryption_salt = val;
        }
        if let Ok(val) = env::var("CASTPILOT_DATABASE_URL") {
            self.database_url = val;
        }
        if let Ok(val) = env::var("CASTPILOT_JOB_BROKER_URL") {
            self.job_broker_url = Some(val);
        }

        if let Ok(val) = env::var("CASTPILOT_OBJECT_STORE__ENDPOINT") {
            self.object_store.endpoint = Some(val);
        }
        if let Ok(val) = env::var("CASTPILOT_OBJECT_STORE__BUCKET") {
            self.object_store.bucket = Some(val);
        }
        if let Ok(val) = env::var("CASTPILOT_OBJECT_STORE__ACCESS_KEY") {
            self.object_store.access_key = Some(val);
        }
        if let Ok(val) = env::var("CASTPILOT_OBJECT_STORE__SECRET_KEY") {
            self.object_store.secret_key = Some(val);
        }

        for (prefix, cfg) in [
            ("TIKTOK", &mut self.platforms.tiktok),
            ("YOUTUBE", &mut self.platforms.youtube),
            ("TWITTER", &mut self.platforms.twitter),
            ("INSTAGRAM", &mut self.platforms.instagram),
            ("FACEBOOK", &mut self.platforms.facebook),
        ] {
            if let Ok(val) = env::var(format!("CASTPILOT_PLATFORMS__{prefix}__CLIENT_ID")) {
                cfg.client_id = val;
            }
            if let Ok(val) = env::var(format!("CASTPILOT_PLATFORMS__{prefix}__CLIENT_SECRET")) {
                cfg.client_secret = val;
            }
            if let Ok(val) = env::var(format!("CASTPILOT_PLATFORMS__{prefix}__REDIRECT_URI")) {
                cfg.redirect_uri = val;
            }
        }

        if let Ok(val) = env::var("CASTPILOT_TWITTER_OAUTH1__API_KEY") {
            self.twitter_oauth1.api_key = Some(val);
        }
        if let Ok(val) = env::var("CASTPILOT_TWITTER_OAUTH1__API_SECRET") {
            self.twitter_oauth1.api_secret = Some(val);
        }
        if let Ok(val) = env::var("CASTPILOT_TWITTER_OAUTH1__ACCESS_TOKEN") {
            self.twitter_oauth1.access_token = Some(val);
        }
        if let Ok(val) = env::var("CASTPILOT_TWITTER_OAUTH1__ACCESS_TOKEN_SECRET") {
            self.twitter_oauth1.access_token_secret = Some(val);
        }

        if let Ok(val) = env::var("CASTPILOT_SCHEDULER_TICK_MS") {
            self.scheduler_tick_ms = parse_env_u64("CASTPILOT_SCHEDULER_TICK_MS", &val)?;
        }
        if let Ok(val) = env::var("CASTPILOT_DISPATCHER_CONCURRENCY") {
            self.dispatcher_concurrency =
                parse_env_u64("CASTPILOT_DISPATCHER_CONCURRENCY", &val)? as usize;
        }
        if let Ok(val) = env::var("CASTPILOT_PUBLISH_DEADLINE_MS") {
            self.publish_deadline_ms = parse_env_u64("CASTPILOT_PUBLISH_DEADLINE_MS", &val)?;
        }

        Ok(())
    }
}

fn parse_env_u64(field: &str, val: &str) -> Result<u64, ConfigError> {
    val.parse().map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        message: format!("'{val}' is not a valid integer"),
    })
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
