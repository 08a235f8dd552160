//! CastPilot CLI — a thin binary wiring a config file, a SQLite pool, and
//! `tracing-subscriber` to the `castpilot-core` service API (spec §6) and
//! its scheduler/dispatcher loops (spec §4.6/§4.7).
mod commands;

use clap::Parser;
use castpilot_core::config::Config;
use tracing_subscriber::EnvFilter;

use commands::{
    ConnectionsArgs, InitArgs, MigrateArgs, OauthArgs, PostArgs, PostsArgs, ScheduleArgs, ServeArgs,
};

/// Multi-platform video post scheduler
#[derive(Parser)]
#[command(name = "castpilot")]
#[command(version)]
#[command(about = "Multi-platform video post scheduler")]
#[command(after_help = "\
Quick start:
  1. castpilot init      — write a starter config.toml
  2. castpilot migrate    — create/update the SQLite schema
  3. castpilot serve      — run the scheduler and dispatcher worker pool")]
struct Cli {
    /// Path to config.toml
    #[arg(short = 'c', long, global = true, default_value = "~/.castpilot/config.toml")]
    config: String,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Write a starter config.toml
    Init(InitArgs),
    /// Run pending SQLite migrations
    Migrate(MigrateArgs),
    /// Run the scheduler loop and dispatcher worker pool until signalled to stop
    Serve(ServeArgs),
    /// Drive the OAuth authorization-code flow for a platform connection
    Oauth(OauthArgs),
    /// List or disconnect platform connections
    Connections(ConnectionsArgs),
    /// Create an immediate multi-platform Post
    Post(PostArgs),
    /// Create, pause, resume, or cancel Schedules and RecurringSchedules
    Schedule(ScheduleArgs),
    /// List or inspect Posts
    Posts(PostsArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("castpilot=debug,castpilot_core=debug,info")
    } else if cli.quiet {
        EnvFilter::new("error")
    } else {
        EnvFilter::new("castpilot=info,castpilot_core=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(cli.verbose)
        .compact()
        .init();

    // `init` manages its own config lifecycle: it writes the file this
    // command's other branches go on to load.
    if let Commands::Init(args) = cli.command {
        return commands::init::execute(&cli.config, args.force);
    }

    let config = Config::load(Some(&cli.config)).map_err(|e| {
        anyhow::anyhow!(
            "Failed to load configuration: {e}\n\
             Hint: run 'castpilot init' to create a default configuration file."
        )
    })?;

    match cli.command {
        Commands::Init(_) => unreachable!(),
        Commands::Migrate(_) => commands::migrate::execute(&config).await,
        Commands::Serve(args) => commands::serve::execute(&config, args).await,
        Commands::Oauth(args) => commands::oauth::execute(&config, args.action).await,
        Commands::Connections(args) => commands::connections::execute(&config, args.action).await,
        Commands::Post(args) => commands::post::execute(&config, args).await,
        Commands::Schedule(args) => commands::schedule::execute(&config, args.action).await,
        Commands::Posts(args) => commands::posts::execute(&config, args.action).await,
    }
}
