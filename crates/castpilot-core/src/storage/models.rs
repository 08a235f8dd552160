//! Row types for the persistence model (C9, spec §3).
//!
//! Timestamps are stored as RFC 3339 strings (sqlite has no native
//! datetime type); `chrono` round-trips them losslessly. JSON-valued
//! columns (`platforms_json`, `cadence_json`, `tags`, `variants_json`)
//! are serialized with `serde_json` at the repository boundary rather
//! than the row type, keeping these structs a plain mirror of the table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct UserRow {
    pub id: String,
    pub credential_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoStatus {
    Uploading,
    Ready,
    Failed,
}

impl VideoStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uploading => "uploading",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "ready" => Self::Ready,
            "failed" => Self::Failed,
            _ => Self::Uploading,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct VideoRow {
    pub id: String,
    pub owner_user_id: String,
    pub storage_key: String,
    pub container: Option<String>,
    pub codec: Option<String>,
    pub duration_ms: Option<i64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub size_bytes: Option<i64>,
    pub status: String,
    pub caption_default: Option<String>,
    pub tags_default: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VideoRow {
    pub fn video_status(&self) -> VideoStatus {
        VideoStatus::parse(&self.status)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PlatformConnectionRow {
    pub id: String,
    pub user_id: String,
    pub platform: String,
    pub platform_account_id: String,
    pub display_name: Option<String>,
    pub scopes: String,
    pub access_token_ciphertext: Vec<u8>,
    pub refresh_token_ciphertext: Option<Vec<u8>>,
    pub access_token_expires_at: DateTime<Utc>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MultiPostRow {
    pub id: String,
    pub user_id: String,
    pub video_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PostStatus {
    Pending,
    Processing,
    Posted,
    Failed,
    Canceled,
}

impl PostStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Posted => "POSTED",
            Self::Failed => "FAILED",
            Self::Canceled => "CANCELED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "PENDING" => Some(Self::Pending),
            "PROCESSING" => Some(Self::Processing),
            "POSTED" => Some(Self::Posted),
            "FAILED" => Some(Self::Failed),
            "CANCELED" => Some(Self::Canceled),
            _ => None,
        }
    }

    /// Whether this status is one of the post's exactly-one terminal
    /// states (spec §3/§8).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Posted | Self::Failed | Self::Canceled)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PostRow {
    pub id: String,
    pub multi_post_id: String,
    pub user_id: String,
    pub video_id: String,
    pub platform: String,
    pub caption: String,
    pub tags: String,
    pub status: String,
    pub attempt_count: i64,
    pub last_error_kind: Option<String>,
    pub last_error_message: Option<String>,
    pub platform_post_id: Option<String>,
    pub platform_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PostRow {
    pub fn post_status(&self) -> PostStatus {
        PostStatus::parse(&self.status).unwrap_or(PostStatus::Pending)
    }

    pub fn tag_list(&self) -> Vec<String> {
        serde_json::from_str(&self.tags).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScheduleState {
    Pending,
    Fired,
    Canceled,
}

impl ScheduleState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Fired => "FIRED",
            Self::Canceled => "CANCELED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "PENDING" => Some(Self::Pending),
            "FIRED" => Some(Self::Fired),
            "CANCELED" => Some(Self::Canceled),
            _ => None,
        }
    }
}

/// A per-platform caption/tags pair, one per target platform of a
/// `Schedule`/`RecurringSchedule` (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformTarget {
    pub platform: String,
    pub caption: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ScheduleRow {
    pub id: String,
    pub user_id: String,
    pub video_id: String,
    pub platforms_json: String,
    pub scheduled_instant: DateTime<Utc>,
    pub state: String,
    pub created_at: DateTime<Utc>,
}

impl ScheduleRow {
    pub fn schedule_state(&self) -> ScheduleState {
        ScheduleState::parse(&self.state).unwrap_or(ScheduleState::Pending)
    }

    pub fn targets(&self) -> Vec<PlatformTarget> {
        serde_json::from_str(&self.platforms_json).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecurringState {
    Active,
    Paused,
    Canceled,
}

impl RecurringState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Paused => "PAUSED",
            Self::Canceled => "CANCELED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "ACTIVE" => Some(Self::Active),
            "PAUSED" => Some(Self::Paused),
            "CANCELED" => Some(Self::Canceled),
            _ => None,
        }
    }
}

/// The cadence for a `RecurringSchedule` (spec §3/§4.6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Cadence {
    Daily { hour: u32, minute: u32 },
    Weekly { weekday: chrono::Weekday, hour: u32, minute: u32 },
    Monthly { day_of_month: u32, hour: u32, minute: u32 },
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RecurringScheduleRow {
    pub id: String,
    pub user_id: String,
    pub video_id: String,
    pub platforms_json: String,
    pub cadence_json: String,
    pub variants_json: String,
    pub variant_cursor: i64,
    pub state: String,
    pub next_occurrence: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl RecurringScheduleRow {
    pub fn recurring_state(&self) -> RecurringState {
        RecurringState::parse(&self.state).unwrap_or(RecurringState::Active)
    }

    pub fn targets(&self) -> Vec<PlatformTarget> {
        serde_json::from_str(&self.platforms_json).unwrap_or_default()
    }

    pub fn cadence(&self) -> Cadence {
        serde_json::from_str(&self.cadence_json).expect("cadence_json is always well-formed")
    }

    pub fn variants(&self) -> Vec<String> {
        serde_json::from_str(&self.variants_json).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    Success,
    TransientFail,
    PermanentFail,
}

impl OutcomeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::TransientFail => "TRANSIENT_FAIL",
            Self::PermanentFail => "PERMANENT_FAIL",
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PostOutcomeRow {
    pub id: String,
    pub post_id: String,
    pub attempt_number: i64,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub outcome: String,
    pub error_kind: Option<String>,
    pub platform_response_excerpt: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_status_round_trips_through_as_str_and_parse() {
        for status in [
            PostStatus::Pending,
            PostStatus::Processing,
            PostStatus::Posted,
            PostStatus::Failed,
            PostStatus::Canceled,
        ] {
            assert_eq!(PostStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn only_posted_failed_canceled_are_terminal() {
        assert!(!PostStatus::Pending.is_terminal());
        assert!(!PostStatus::Processing.is_terminal());
        assert!(PostStatus::Posted.is_terminal());
        assert!(PostStatus::Failed.is_terminal());
        assert!(PostStatus::Canceled.is_terminal());
    }

    #[test]
    fn cadence_serializes_with_kind_tag() {
        let daily = Cadence::Daily { hour: 12, minute: 0 };
        let json = serde_json::to_string(&daily).unwrap();
        assert!(json.contains("\"kind\":\"daily\""));
        let back: Cadence = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, Cadence::Daily { hour: 12, minute: 0 }));
    }
}
