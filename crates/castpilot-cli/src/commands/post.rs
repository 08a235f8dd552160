//! Implementation of the `castpilot post` command: an immediate
//! multi-platform post (spec §6 `create_multi_post`).

use castpilot_core::config::Config;
use castpilot_core::storage::models::PlatformTarget;
use castpilot_core::storage::{self, users};
use castpilot_core::service;

use super::PostArgs;

pub async fn execute(config: &Config, args: PostArgs) -> anyhow::Result<()> {
    if args.platforms.len() != args.captions.len() {
        anyhow::bail!("--platform and --caption must be repeated the same number of times, paired in order");
    }
    let targets: Vec<PlatformTarget> = args
        .platforms
        .into_iter()
        .zip(args.captions)
        .map(|(platform, caption)| PlatformTarget { platform, caption, tags: Vec::new() })
        .collect();

    let pool = storage::init_db(&config.database_url).await?;
    users::ensure_user(&pool, &args.user_id, "external").await?;

    let (multi_post, children) = service::create_multi_post(&pool, &args.user_id, &args.video_id, targets).await?;
    println!("multi_post {} created with {} post(s):", multi_post.id, children.len());
    for post in children {
        println!("  {}  {}  {}", post.id, post.platform, post.status);
    }
    Ok(())
}
