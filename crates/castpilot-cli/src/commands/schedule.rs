//! Implementation of the `castpilot schedule` subcommands (spec §6
//! `create_schedule` / `create_recurring_schedule` / `pause_recurring` /
//! `resume_recurring` / `cancel_schedule`).

use castpilot_core::config::Config;
use castpilot_core::service;
use castpilot_core::storage::models::{Cadence, PlatformTarget};
use castpilot_core::storage::{self, users};

use super::ScheduleAction;

fn zip_targets(platforms: Vec<String>, captions: Vec<String>) -> anyhow::Result<Vec<PlatformTarget>> {
    if platforms.len() != captions.len() {
        anyhow::bail!("--platform and --caption must be repeated the same number of times, paired in order");
    }
    Ok(platforms
        .into_iter()
        .zip(captions)
        .map(|(platform, caption)| PlatformTarget { platform, caption, tags: Vec::new() })
        .collect())
}

/// Parse `daily:HH:MM`, `weekly:MON:HH:MM`, or `monthly:DD:HH:MM`.
fn parse_cadence(raw: &str) -> anyhow::Result<Cadence> {
    let mut parts = raw.splitn(2, ':');
    let kind = parts.next().unwrap_or_default();
    let rest = parts.next().ok_or_else(|| anyhow::anyhow!("cadence '{raw}' missing HH:MM"))?;

    match kind {
        "daily" => {
            let (hour, minute) = parse_hh_mm(rest)?;
            Ok(Cadence::Daily { hour, minute })
        }
        "weekly" => {
            let mut rest_parts = rest.splitn(2, ':');
            let weekday_raw = rest_parts.next().ok_or_else(|| anyhow::anyhow!("cadence '{raw}' missing weekday"))?;
            let hh_mm = rest_parts.next().ok_or_else(|| anyhow::anyhow!("cadence '{raw}' missing HH:MM"))?;
            let weekday = parse_weekday(weekday_raw)?;
            let (hour, minute) = parse_hh_mm(hh_mm)?;
            Ok(Cadence::Weekly { weekday, hour, minute })
        }
        "monthly" => {
            let mut rest_parts = rest.splitn(2, ':');
            let day_raw = rest_parts.next().ok_or_else(|| anyhow::anyhow!("cadence '{raw}' missing day-of-month"))?;
            let hh_mm = rest_parts.next().ok_or_else(|| anyhow::anyhow!("cadence '{raw}' missing HH:MM"))?;
            let day_of_month: u32 = day_raw.parse()?;
            let (hour, minute) = parse_hh_mm(hh_mm)?;
            Ok(Cadence::Monthly { day_of_month, hour, minute })
        }
        other => anyhow::bail!("unknown cadence kind '{other}', expected daily/weekly/monthly"),
    }
}

fn parse_hh_mm(raw: &str) -> anyhow::Result<(u32, u32)> {
    let (h, m) = raw.split_once(':').ok_or_else(|| anyhow::anyhow!("expected HH:MM, got '{raw}'"))?;
    Ok((h.parse()?, m.parse()?))
}

fn parse_weekday(raw: &str) -> anyhow::Result<chrono::Weekday> {
    match raw.to_uppercase().as_str() {
        "MON" => Ok(chrono::Weekday::Mon),
        "TUE" => Ok(chrono::Weekday::Tue),
        "WED" => Ok(chrono::Weekday::Wed),
        "THU" => Ok(chrono::Weekday::Thu),
        "FRI" => Ok(chrono::Weekday::Fri),
        "SAT" => Ok(chrono::Weekday::Sat),
        "SUN" => Ok(chrono::Weekday::Sun),
        other => anyhow::bail!("'{other}' is not a weekday (MON..SUN)"),
    }
}

pub async fn execute(config: &Config, action: ScheduleAction) -> anyhow::Result<()> {
    let pool = storage::init_db(&config.database_url).await?;

    match action {
        ScheduleAction::Create { user_id, video_id, scheduled_instant, platforms, captions } => {
            users::ensure_user(&pool, &user_id, "external").await?;
            let targets = zip_targets(platforms, captions)?;
            let scheduled_instant = chrono::DateTime::parse_from_rfc3339(&scheduled_instant)?.with_timezone(&chrono::Utc);
            let row = service::create_schedule(&pool, &user_id, &video_id, targets, scheduled_instant).await?;
            println!("schedule {} created, fires at {}", row.id, row.scheduled_instant);
        }
        ScheduleAction::CreateRecurring { user_id, video_id, cadence, platforms, captions, variants } => {
            users::ensure_user(&pool, &user_id, "external").await?;
            let targets = zip_targets(platforms, captions)?;
            let cadence = parse_cadence(&cadence)?;
            let row = service::create_recurring_schedule(&pool, &user_id, &video_id, targets, cadence, variants).await?;
            println!("recurring_schedule {} created, next occurrence {}", row.id, row.next_occurrence);
        }
        ScheduleAction::Pause { id } => {
            let ok = service::pause_recurring(&pool, &id).await?;
            println!("{}", if ok { "paused" } else { "no-op (not active)" });
        }
        ScheduleAction::Resume { id } => {
            let ok = service::resume_recurring(&pool, &id).await?;
            println!("{}", if ok { "resumed" } else { "no-op (not paused)" });
        }
        ScheduleAction::Cancel { id } => {
            let ok = service::cancel_schedule(&pool, &id).await?;
            println!("{}", if ok { "canceled" } else { "no-op (already fired or canceled)" });
        }
        ScheduleAction::CancelRecurring { id } => {
            let ok = service::cancel_recurring_schedule(&pool, &id).await?;
            println!("{}", if ok { "canceled" } else { "no-op (already canceled)" });
        }
    }
    Ok(())
}
