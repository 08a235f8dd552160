//! Error types for the CastPilot core library.
//!
//! Every component has its own `thiserror` enum so error sites stay close to
//! the operation that produced them. [`ErrorKind`] is the closed,
//! platform-agnostic classification that crosses component boundaries: it is
//! what gets persisted on a `Post` and what the dispatcher's retry policy
//! switches on. Every component error implements [`HasErrorKind`] so the
//! dispatcher never has to pattern-match on a dozen different enums.

use serde::{Deserialize, Serialize};

/// The full closed set of error kinds a publish attempt can surface.
///
/// Exactly one kind is attached to every terminal or retryable failure.
/// Transient kinds are retried by the dispatcher up to the attempt cap;
/// permanent kinds end the `Post` immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Input rejected locally (bad caption length, unknown platform, schedule too soon).
    Validation,
    /// Token expired; retried once after a forced refresh.
    AuthExpired,
    /// Permanent auth failure; the connection is marked inactive.
    AuthRevoked,
    /// OAuth state token failed validation.
    AuthStateInvalid,
    /// Refresh token rejected by the platform (`invalid_grant`).
    InvalidGrant,
    /// Required credential or configuration absent.
    ConfigMissing,
    /// Repost Governor denial.
    RepostCooldown,
    /// Adapter-declared format or size violation.
    MediaUnsupported,
    /// Platform never reported the upload as ready.
    UploadProcessingTimeout,
    /// Platform rate limit; carries a retry hint upstream.
    RateLimited,
    /// 5xx or network failure; standard backoff applies.
    PlatformTransient,
    /// Platform declared the post itself invalid (policy rejection, etc).
    PlatformPermanent,
    /// Object store failure.
    StorageUnavailable,
    /// Ciphertext failed AEAD authentication.
    CryptoTamper,
    /// Per-attempt deadline expired.
    Timeout,
    /// Bug or unexpected condition.
    Internal,
}

impl ErrorKind {
    /// Whether the dispatcher should retry a failure carrying this kind.
    ///
    /// `AuthExpired` is "retry exactly once, after a forced refresh" in the
    /// dispatcher's flow rather than the standard backoff ladder, but it is
    /// still non-terminal, so it counts as retryable here.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::AuthExpired
                | ErrorKind::RateLimited
                | ErrorKind::PlatformTransient
                | ErrorKind::StorageUnavailable
                | ErrorKind::Timeout
                | ErrorKind::UploadProcessingTimeout
        )
    }
}

/// Implemented by every component error enum so callers can extract the
/// closed-set classification without matching on the concrete type.
pub trait HasErrorKind {
    fn kind(&self) -> ErrorKind;
}

/// Errors from configuration loading, parsing, and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required config field: {field}")]
    MissingField { field: String },

    #[error("invalid value for config field '{field}': {message}")]
    InvalidValue { field: String, message: String },

    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    #[error("failed to parse config file: {source}")]
    ParseError {
        #[source]
        source: toml::de::Error,
    },
}

impl HasErrorKind for ConfigError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::ConfigMissing
    }
}

/// Errors from the encrypted secret store (C2).
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("ciphertext failed authentication")]
    Tamper,

    #[error("ciphertext blob too short to contain a nonce")]
    MalformedBlob,

    #[error("key derivation failed: {message}")]
    KeyDerivation { message: String },
}

impl HasErrorKind for CryptoError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::CryptoTamper
    }
}

/// Errors surfaced by a `PlatformAdapter` implementation.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("caption exceeds platform limit ({len} > {limit})")]
    CaptionTooLong { len: usize, limit: usize },

    #[error("unsupported media: {message}")]
    MediaUnsupported { message: String },

    #[error("required credential missing: {message}")]
    ConfigMissing { message: String },

    #[error("access token expired")]
    AuthExpired,

    #[error("platform revoked the connection: {message}")]
    AuthRevoked { message: String },

    #[error("refresh is not supported by this platform")]
    RefreshNotSupported,

    #[error("refresh token rejected by platform: {message}")]
    InvalidGrant { message: String },

    #[error("rate limited{}", retry_after_ms.map(|ms| format!(", retry after {ms}ms")).unwrap_or_default())]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("upload never finished processing after {waited_ms}ms")]
    UploadProcessingTimeout { waited_ms: u64 },

    #[error("platform returned a transient error: {message}")]
    Transient { message: String },

    #[error("platform rejected the post permanently: {message}")]
    Permanent { message: String },

    #[error("network error: {source}")]
    Network {
        #[source]
        source: reqwest::Error,
    },

    #[error("attempt deadline exceeded")]
    Timeout,
}

impl HasErrorKind for PlatformError {
    fn kind(&self) -> ErrorKind {
        match self {
            PlatformError::CaptionTooLong { .. } => ErrorKind::Validation,
            PlatformError::MediaUnsupported { .. } => ErrorKind::MediaUnsupported,
            PlatformError::ConfigMissing { .. } => ErrorKind::ConfigMissing,
            PlatformError::AuthExpired => ErrorKind::AuthExpired,
            PlatformError::AuthRevoked { .. } => ErrorKind::AuthRevoked,
            PlatformError::RefreshNotSupported => ErrorKind::ConfigMissing,
            PlatformError::InvalidGrant { .. } => ErrorKind::InvalidGrant,
            PlatformError::RateLimited { .. } => ErrorKind::RateLimited,
            PlatformError::UploadProcessingTimeout { .. } => ErrorKind::UploadProcessingTimeout,
            PlatformError::Transient { .. } => ErrorKind::PlatformTransient,
            PlatformError::Permanent { .. } => ErrorKind::PlatformPermanent,
            PlatformError::Network { .. } => ErrorKind::PlatformTransient,
            PlatformError::Timeout => ErrorKind::Timeout,
        }
    }
}

impl PlatformError {
    /// The `retry_after_ms` hint, when this error carries one.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            PlatformError::RateLimited { retry_after_ms } => *retry_after_ms,
            _ => None,
        }
    }
}

/// Errors from the Token Lifecycle Manager (C4).
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("connection {connection_id} is not active")]
    ConnectionInactive { connection_id: String },

    #[error("required app-level credential missing for {platform}")]
    ConfigMissing { platform: String },

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl HasErrorKind for TokenError {
    fn kind(&self) -> ErrorKind {
        match self {
            TokenError::ConnectionInactive { .. } => ErrorKind::AuthRevoked,
            TokenError::ConfigMissing { .. } => ErrorKind::ConfigMissing,
            TokenError::Platform(e) => e.kind(),
            TokenError::Storage(_) => ErrorKind::StorageUnavailable,
            TokenError::Crypto(e) => e.kind(),
        }
    }
}

/// Errors from the Repost Governor (C5).
#[derive(Debug, thiserror::Error)]
pub enum GovernorError {
    #[error("unrecognized platform identifier: {0}")]
    UnknownPlatform(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl HasErrorKind for GovernorError {
    fn kind(&self) -> ErrorKind {
        match self {
            GovernorError::UnknownPlatform(_) => ErrorKind::Validation,
            GovernorError::Storage(_) => ErrorKind::StorageUnavailable,
        }
    }
}

/// Errors from the Job Broker Interface (C8).
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("broker is unreachable: {message}")]
    Unavailable { message: String },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl HasErrorKind for BrokerError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::StorageUnavailable
    }
}

/// Errors from the Scheduling & Dispatch Engine (C6/C7) and their
/// surrounding validation.
#[derive(Debug, thiserror::Error)]
pub enum SchedulingError {
    #[error("scheduled_instant must be at least 5 minutes after creation")]
    ScheduledTooSoon,

    #[error("recurring schedule must name at least one target platform")]
    NoTargetPlatforms,

    #[error("unrecognized platform identifier: {0}")]
    UnknownPlatform(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

impl HasErrorKind for SchedulingError {
    fn kind(&self) -> ErrorKind {
        match self {
            SchedulingError::ScheduledTooSoon => ErrorKind::Validation,
            SchedulingError::NoTargetPlatforms => ErrorKind::Validation,
            SchedulingError::UnknownPlatform(_) => ErrorKind::Validation,
            SchedulingError::Storage(_) => ErrorKind::StorageUnavailable,
            SchedulingError::Broker(_) => ErrorKind::StorageUnavailable,
        }
    }
}

/// Errors from SQLite storage operations (C9).
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database connection error: {source}")]
    Connection {
        #[source]
        source: sqlx::Error,
    },

    #[error("database migration error: {source}")]
    Migration {
        #[source]
        source: sqlx::migrate::MigrateError,
    },

    #[error("database query error: {source}")]
    Query {
        #[source]
        source: sqlx::Error,
    },

    #[error("row not found: {what}")]
    NotFound { what: String },
}

impl HasErrorKind for StorageError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::StorageUnavailable
    }
}

/// Errors from the object store interface (external collaborator, §6).
#[derive(Debug, thiserror::Error)]
pub enum ObjectStoreError {
    #[error("object store unavailable: {message}")]
    Unavailable { message: String },

    #[error("object not found: {key}")]
    NotFound { key: String },
}

impl HasErrorKind for ObjectStoreError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::StorageUnavailable
    }
}

/// Errors from the Dispatcher / Worker Pool (C7) that are not themselves
/// the outcome of a publish attempt (those are `PlatformError`s, handled
/// by the retry policy). These are broker/storage failures around the
/// attempt, or a job payload too malformed to even identify a Post.
#[derive(Debug, thiserror::Error)]
pub enum DispatcherError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Governor(#[from] GovernorError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("job payload was not valid JSON: {message}")]
    MalformedPayload { message: String },
}

impl HasErrorKind for DispatcherError {
    fn kind(&self) -> ErrorKind {
        match self {
            DispatcherError::Storage(e) => e.kind(),
            DispatcherError::Broker(e) => e.kind(),
            DispatcherError::Governor(e) => e.kind(),
            DispatcherError::Token(e) => e.kind(),
            DispatcherError::MalformedPayload { .. } => ErrorKind::Internal,
        }
    }
}

/// The top-level error surfaced by synchronous service-API operations
/// (§6). Background failures never use this type directly; they record
/// onto `Post.last_error_kind` / `Post.last_error_message` instead.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Scheduling(#[from] SchedulingError),
    #[error(transparent)]
    Governor(#[from] GovernorError),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Platform(#[from] PlatformError),
    #[error(transparent)]
    ObjectStore(#[from] ObjectStoreError),

    #[error("oauth state token invalid or expired")]
    AuthStateInvalid,
}

impl HasErrorKind for ServiceError {
    fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Config(e) => e.kind(),
            ServiceError::Storage(e) => e.kind(),
            ServiceError::Scheduling(e) => e.kind(),
            ServiceError::Governor(e) => e.kind(),
            ServiceError::Token(e) => e.kind(),
            ServiceError::Platform(e) => e.kind(),
            ServiceError::ObjectStore(e) => e.kind(),
            ServiceError::AuthStateInvalid => ErrorKind::AuthStateInvalid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_retryable_classification() {
        assert!(ErrorKind::RateLimited.is_retryable());
        assert!(ErrorKind::PlatformTransient.is_retryable());
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(!ErrorKind::AuthRevoked.is_retryable());
        assert!(!ErrorKind::Validation.is_retryable());
        assert!(!ErrorKind::MediaUnsupported.is_retryable());
    }

    #[test]
    fn platform_error_maps_to_expected_kind() {
        assert_eq!(
            PlatformError::CaptionTooLong { len: 300, limit: 280 }.kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            PlatformError::RateLimited { retry_after_ms: Some(1000) }.kind(),
            ErrorKind::RateLimited
        );
        assert_eq!(PlatformError::AuthExpired.kind(), ErrorKind::AuthExpired);
    }

    #[test]
    fn rate_limited_message_includes_hint() {
        let err = PlatformError::RateLimited {
            retry_after_ms: Some(30_000),
        };
        assert_eq!(err.to_string(), "rate limited, retry after 30000ms");

        let err = PlatformError::RateLimited { retry_after_ms: None };
        assert_eq!(err.to_string(), "rate limited");
    }

    #[test]
    fn error_kind_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&ErrorKind::RepostCooldown).unwrap();
        assert_eq!(json, "\"REPOST_COOLDOWN\"");
    }
}
