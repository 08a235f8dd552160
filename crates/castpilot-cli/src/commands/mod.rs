//! CLI subcommand argument definitions for CastPilot.
//!
//! Each subcommand struct defines its flags and arguments; the matching
//! execution logic lives in the sibling module of the same name,
//! following the teacher's `commands/mod.rs` shape.
pub mod connections;
pub mod init;
pub mod migrate;
pub mod oauth;
pub mod post;
pub mod posts;
pub mod schedule;
pub mod serve;

use clap::{Args, Subcommand};

/// Arguments for the `init` subcommand.
#[derive(Debug, Args)]
pub struct InitArgs {
    /// Overwrite an existing config file
    #[arg(long)]
    pub force: bool,
}

/// Arguments for the `migrate` subcommand.
#[derive(Debug, Args)]
pub struct MigrateArgs;

/// Arguments for the `serve` subcommand.
#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Override `dispatcher_concurrency` from the config file
    #[arg(long)]
    pub workers: Option<usize>,
}

/// Arguments for the `oauth` subcommand.
#[derive(Debug, Args)]
pub struct OauthArgs {
    #[command(subcommand)]
    pub action: OauthAction,
}

#[derive(Debug, Subcommand)]
pub enum OauthAction {
    /// Mint an authorization URL and signed state token for (user, platform)
    Start {
        platform: String,
        user_id: String,
    },
    /// Exchange an authorization code for tokens and persist the connection
    Complete {
        platform: String,
        user_id: String,
        code: String,
        state: String,
    },
}

/// Arguments for the `connections` subcommand.
#[derive(Debug, Args)]
pub struct ConnectionsArgs {
    #[command(subcommand)]
    pub action: ConnectionsAction,
}

#[derive(Debug, Subcommand)]
pub enum ConnectionsAction {
    /// List a user's platform connections
    List { user_id: String },
    /// Deactivate a user's connection to a platform
    Disconnect { user_id: String, platform: String },
}

/// Arguments for the `post` subcommand: an immediate multi-platform post.
#[derive(Debug, Args)]
pub struct PostArgs {
    pub user_id: String,
    pub video_id: String,

    /// Target platform; repeat with `--caption` for each (e.g. `--platform
    /// youtube --caption "hi" --platform tiktok --caption "hi"`)
    #[arg(long = "platform", required = true)]
    pub platforms: Vec<String>,

    /// Caption for the preceding `--platform`, positionally paired
    #[arg(long = "caption", required = true)]
    pub captions: Vec<String>,
}

/// Arguments for the `schedule` subcommand.
#[derive(Debug, Args)]
pub struct ScheduleArgs {
    #[command(subcommand)]
    pub action: ScheduleAction,
}

#[derive(Debug, Subcommand)]
pub enum ScheduleAction {
    /// Create a one-shot Schedule
    Create {
        user_id: String,
        video_id: String,
        /// RFC3339 instant the post should fire at (must be >= now + 5min)
        scheduled_instant: String,
        #[arg(long = "platform", required = true)]
        platforms: Vec<String>,
        #[arg(long = "caption", required = true)]
        captions: Vec<String>,
    },
    /// Create a RecurringSchedule
    CreateRecurring {
        user_id: String,
        video_id: String,
        /// `daily:HH:MM`, `weekly:MON:HH:MM`, or `monthly:DD:HH:MM` (UTC)
        cadence: String,
        #[arg(long = "platform", required = true)]
        platforms: Vec<String>,
        #[arg(long = "caption", required = true)]
        captions: Vec<String>,
        /// Ordered caption variants rotated across firings (optional)
        #[arg(long = "variant")]
        variants: Vec<String>,
    },
    /// Pause an active RecurringSchedule
    Pause { id: String },
    /// Resume a paused RecurringSchedule
    Resume { id: String },
    /// Cancel a pending one-shot Schedule
    Cancel { id: String },
    /// Cancel an active or paused RecurringSchedule
    CancelRecurring { id: String },
}

/// Arguments for the `posts` subcommand.
#[derive(Debug, Args)]
pub struct PostsArgs {
    #[command(subcommand)]
    pub action: PostsAction,
}

#[derive(Debug, Subcommand)]
pub enum PostsAction {
    /// List every Post owned by a user
    List { user_id: String },
    /// Get a single Post by id
    Get { id: String },
}
