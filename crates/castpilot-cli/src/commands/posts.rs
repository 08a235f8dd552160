//! Implementation of the `castpilot posts list|get` commands (spec §6
//! `list_posts` / `get_post`).

use castpilot_core::config::Config;
use castpilot_core::service;
use castpilot_core::storage;

use super::PostsAction;

pub async fn execute(config: &Config, action: PostsAction) -> anyhow::Result<()> {
    let pool = storage::init_db(&config.database_url).await?;
    match action {
        PostsAction::List { user_id } => {
            let posts = service::list_posts(&pool, &user_id).await?;
            if posts.is_empty() {
                println!("no posts for user {user_id}");
            }
            for post in posts {
                println!(
                    "{}  {:<10} {:<10} attempt={}  {}",
                    post.id,
                    post.platform,
                    post.status,
                    post.attempt_count,
                    post.platform_url.as_deref().unwrap_or("-")
                );
            }
        }
        PostsAction::Get { id } => {
            let Some(post) = service::get_post(&pool, &id).await? else {
                anyhow::bail!("no post with id {id}");
            };
            println!("id:             {}", post.id);
            println!("multi_post_id:  {}", post.multi_post_id);
            println!("platform:       {}", post.platform);
            println!("caption:        {}", post.caption);
            println!("status:         {}", post.status);
            println!("attempt_count:  {}", post.attempt_count);
            println!("platform_id:    {}", post.platform_post_id.as_deref().unwrap_or("-"));
            println!("platform_url:   {}", post.platform_url.as_deref().unwrap_or("-"));
            println!("last_error:     {} / {}", post.last_error_kind.as_deref().unwrap_or("-"), post.last_error_message.as_deref().unwrap_or("-"));
        }
    }
    Ok(())
}
