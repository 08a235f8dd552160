//! Scheduler / Beat (C6, spec §4.6): a single periodic loop that fires due
//! one-shot Schedules and `ACTIVE` RecurringSchedules, materializing
//! per-platform Posts and enqueuing one PostJob per Post.
//!
//! SQLite has no `FOR UPDATE SKIP LOCKED`; each candidate is claimed and
//! materialized in its own transaction instead, using an atomic
//! `UPDATE ... WHERE state = 'PENDING'` (mirroring `broker::sqlite`'s claim
//! pattern) so a second process racing on the same row sees zero rows
//! affected rather than double-firing. Materialization writes directly to
//! `broker_jobs` inside that same transaction rather than going through
//! `JobBroker::enqueue` (which commits against its own pooled connection
//! and so cannot share this transaction) — this is what gives the
//! outbox-style guarantee of spec §4.6: Posts and their jobs are never
//! observable independently of each other.

use std::time::Duration;

use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::clock::new_id;
use crate::error::{SchedulingError, StorageError};
use crate::governor::select_caption;
use crate::storage::models::{Cadence, PlatformTarget, RecurringScheduleRow, ScheduleRow};
use crate::storage::{recurring_schedules, schedules, DbPool};

/// Broker queue PostJobs are enqueued onto.
pub const POST_JOB_QUEUE: &str = "post_jobs";

/// Runaway guard on recurring catch-up firings per schedule per tick (see
/// `DESIGN.md`'s resolution of spec §9's open question on missed
/// occurrences). Never drops a missed occurrence — it is simply picked up
/// on the next tick.
pub const MAX_CATCHUP_FIRINGS: u32 = 50;

/// The payload stored on each broker job. The dispatcher deserializes
/// this to learn which Post to process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostJobPayload {
    pub post_id: String,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    pub schedules_fired: u32,
    pub recurring_firings: u32,
}

fn storage_err(e: sqlx::Error) -> SchedulingError {
    SchedulingError::Storage(StorageError::Query { source: e })
}

/// Run one scheduler tick: fire every due one-shot Schedule, then every due
/// RecurringSchedule (with bounded catch-up). `tick` is the loop's own
/// period, used to compute the `now() + tick/2` due-horizon from spec
/// §4.6 step 1/3.
pub async fn run_tick(pool: &DbPool, tick: Duration) -> Result<TickSummary, SchedulingError> {
    let now = Utc::now();
    let horizon = now + ChronoDuration::milliseconds((tick.as_millis() / 2) as i64);
    let mut summary = TickSummary::default();

    for due in schedules::list_due(pool, horizon).await? {
        if fire_one_shot_schedule(pool, &due.id).await? {
            summary.schedules_fired += 1;
        }
    }

    for due in recurring_schedules::list_due(pool, horizon).await? {
        summary.recurring_firings += fire_recurring_schedule(pool, &due.id, now).await?;
    }

    Ok(summary)
}

async fn fire_one_shot_schedule(pool: &DbPool, id: &str) -> Result<bool, SchedulingError> {
    let mut tx = pool.begin().await.map_err(storage_err)?;

    let claimed = sqlx::query("UPDATE schedules SET state = 'FIRED' WHERE id = ? AND state = 'PENDING'")
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;
    if claimed.rows_affected() == 0 {
        return Ok(false);
    }

    let row = sqlx::query_as::<_, ScheduleRow>("SELECT * FROM schedules WHERE id = ?")
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .map_err(storage_err)?;

    let _ = materialize_firing(&mut tx, &row.user_id, &row.video_id, &row.targets()).await?;

    tx.commit().await.map_err(storage_err)?;
    Ok(true)
}

/// Fires `id` once if due, then catches up any further occurrences that
/// have also already elapsed (bounded by `MAX_CATCHUP_FIRINGS`), advancing
/// the variant cursor and `next_occurrence` once at the end. Returns the
/// number of firings performed (0 if another process claimed it first or
/// it was no longer due by the time the transaction opened).
async fn fire_recurring_schedule(pool: &DbPool, id: &str, now: DateTime<Utc>) -> Result<u32, SchedulingError> {
    let mut tx = pool.begin().await.map_err(storage_err)?;

    let row = sqlx::query_as::<_, RecurringScheduleRow>(
        "SELECT * FROM recurring_schedules WHERE id = ? AND state = 'ACTIVE'",
    )
    .bind(id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(storage_err)?;

    let Some(row) = row else {
        return Ok(0);
    };
    if row.next_occurrence > now {
        return Ok(0);
    }

    let base_targets = row.targets();
    let cadence = row.cadence();
    let variants = row.variants();
    let mut cursor = row.variant_cursor;
    let mut occurrence = row.next_occurrence;
    let mut firings = 0u32;

    loop {
        let firing_targets: Vec<PlatformTarget> = base_targets
            .iter()
            .map(|target| PlatformTarget {
                platform: target.platform.clone(),
                caption: select_caption(&variants, cursor, &target.caption).to_string(),
                tags: target.tags.clone(),
            })
            .collect();
        let _ = materialize_firing(&mut tx, &row.user_id, &row.video_id, &firing_targets).await?;
        firings += 1;
        cursor += 1;
        occurrence = compute_next_occurrence(cadence, occurrence);

        if occurrence > now || firings >= MAX_CATCHUP_FIRINGS {
            break;
        }
    }

    sqlx::query("UPDATE recurring_schedules SET variant_cursor = ?, next_occurrence = ? WHERE id = ?")
        .bind(cursor)
        .bind(occurrence)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;

    tx.commit().await.map_err(storage_err)?;
    Ok(firings)
}

/// Writes a `MultiPost` + its `Post` rows + one `broker_jobs` row per
/// `Post`, all inside the caller's transaction, so a materialized `Post`
/// never exists without its dispatch job (spec §4.6's outbox-style
/// guarantee). Shared by the scheduler's own firing path and by
/// `service::create_multi_post`'s immediate-post path. Returns the new
/// MultiPost id.
pub(crate) async fn materialize_firing(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    user_id: &str,
    video_id: &str,
    targets: &[PlatformTarget],
) -> Result<String, SchedulingError> {
    if targets.is_empty() {
        return Err(SchedulingError::NoTargetPlatforms);
    }

    let multi_post_id = new_id();
    let now = Utc::now();
    sqlx::query("INSERT INTO multi_posts (id, user_id, video_id, created_at) VALUES (?, ?, ?, ?)")
        .bind(&multi_post_id)
        .bind(user_id)
        .bind(video_id)
        .bind(now)
        .execute(&mut **tx)
        .await
        .map_err(storage_err)?;

    for target in targets {
        let post_id = new_id();
        let tags_json = serde_json::to_string(&target.tags).unwrap_or_else(|_| "[]".to_string());
        sqlx::query(
            "INSERT INTO posts \
             (id, multi_post_id, user_id, video_id, platform, caption, tags, status, \
              attempt_count, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, 'PENDING', 0, ?, ?)",
        )
        .bind(&post_id)
        .bind(&multi_post_id)
        .bind(user_id)
        .bind(video_id)
        .bind(&target.platform)
        .bind(&target.caption)
        .bind(&tags_json)
        .bind(now)
        .bind(now)
        .execute(&mut **tx)
        .await
        .map_err(storage_err)?;

        let payload = serde_json::to_string(&PostJobPayload { post_id: post_id.clone() })
            .expect("PostJobPayload always serializes");
        sqlx::query(
            "INSERT INTO broker_jobs (id, queue, payload, dedup_key, visible_at, created_at) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(queue, dedup_key) WHERE dedup_key IS NOT NULL DO NOTHING",
        )
        .bind(new_id())
        .bind(POST_JOB_QUEUE)
        .bind(&payload)
        .bind(&post_id)
        .bind(now)
        .bind(now)
        .execute(&mut **tx)
        .await
        .map_err(storage_err)?;
    }

    Ok(multi_post_id)
}

/// The next occurrence of `cadence` strictly after `after` (spec §4.6's
/// cadence rules). Used both to seed a freshly created RecurringSchedule's
/// first occurrence and to advance it after each firing.
pub fn compute_next_occurrence(cadence: Cadence, after: DateTime<Utc>) -> DateTime<Utc> {
    match cadence {
        Cadence::Daily { hour, minute } => {
            let mut candidate = aligned_on(after.date_naive(), hour, minute);
            while candidate <= after {
                candidate += ChronoDuration::days(1);
            }
            candidate
        }
        Cadence::Weekly { weekday, hour, minute } => {
            let mut candidate = aligned_on(after.date_naive(), hour, minute);
            while candidate <= after || candidate.weekday() != weekday {
                candidate += ChronoDuration::days(1);
            }
            candidate
        }
        Cadence::Monthly { day_of_month, hour, minute } => {
            let mut year = after.year();
            let mut month = after.month();
            loop {
                let day = day_of_month.min(days_in_month(year, month));
                let candidate = NaiveDate::from_ymd_opt(year, month, day)
                    .expect("day is clamped to the month's length")
                    .and_hms_opt(hour, minute, 0)
                    .expect("hour/minute are validated on creation")
                    .and_utc();
                if candidate > after {
                    break candidate;
                }
                month += 1;
                if month > 12 {
                    month = 1;
                    year += 1;
                }
            }
        }
    }
}

fn aligned_on(date: NaiveDate, hour: u32, minute: u32) -> DateTime<Utc> {
    date.and_hms_opt(hour, minute, 0).expect("hour/minute are validated on creation").and_utc()
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let first = NaiveDate::from_ymd_opt(year, month, 1).expect("month is 1..=12");
    let next_month_first = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .expect("month is 1..=12");
    (next_month_first - first).num_days() as u32
}

/// The scheduler's own periodic loop: sleeps `tick`, runs one tick, repeats
/// until cancelled. Mirrors the teacher's `posting_queue` consumer loop
/// shape (`biased` select between cancellation and the next unit of work).
pub struct SchedulerLoop {
    pool: DbPool,
    tick: Duration,
}

impl SchedulerLoop {
    pub fn new(pool: DbPool, tick: Duration) -> Self {
        Self { pool, tick }
    }

    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(tick_ms = self.tick.as_millis() as u64, "scheduler loop started");

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tracing::info!("scheduler loop received cancellation");
                    break;
                }
                () = tokio::time::sleep(self.tick) => {
                    match run_tick(&self.pool, self.tick).await {
                        Ok(summary) if summary.schedules_fired > 0 || summary.recurring_firings > 0 => {
                            tracing::info!(
                                schedules_fired = summary.schedules_fired,
                                recurring_firings = summary.recurring_firings,
                                "scheduler tick fired posts"
                            );
                        }
                        Ok(_) => {}
                        Err(error) => tracing::error!(%error, "scheduler tick failed"),
                    }
                }
            }
        }

        tracing::info!("scheduler loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{init_test_db, recurring_schedules::NewRecurringSchedule, schedules::NewSchedule, users::ensure_user, videos};
    use chrono::{TimeZone, Weekday};

    async fn seed_video(pool: &DbPool) -> String {
        ensure_user(pool, "u1", "h").await.unwrap();
        videos::create_video(pool, videos::NewVideo { owner_user_id: "u1".to_string(), storage_key: "k".to_string() })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn run_tick_ignores_schedule_not_yet_due() {
        let pool = init_test_db().await.unwrap();
        let video_id = seed_video(&pool).await;
        schedules::create_schedule(
            &pool,
            NewSchedule {
                user_id: "u1".to_string(),
                video_id,
                targets: vec![PlatformTarget { platform: "YOUTUBE".to_string(), caption: "a".to_string(), tags: vec![] }],
                scheduled_instant: Utc::now() + ChronoDuration::hours(6),
            },
        )
        .await
        .unwrap();

        let summary = run_tick(&pool, Duration::from_secs(30)).await.unwrap();
        assert_eq!(summary.schedules_fired, 0);
    }

    #[tokio::test]
    async fn run_tick_fires_due_one_shot_schedule_and_enqueues_job() {
        let pool = init_test_db().await.unwrap();
        let video_id = seed_video(&pool).await;
        let schedule = schedules::create_schedule(
            &pool,
            NewSchedule {
                user_id: "u1".to_string(),
                video_id,
                targets: vec![PlatformTarget { platform: "YOUTUBE".to_string(), caption: "a".to_string(), tags: vec![] }],
                scheduled_instant: Utc::now() - ChronoDuration::seconds(5),
            },
        )
        .await
        .unwrap();

        let summary = run_tick(&pool, Duration::from_secs(30)).await.unwrap();
        assert_eq!(summary.schedules_fired, 1);

        let reloaded = schedules::get_schedule(&pool, &schedule.id).await.unwrap().unwrap();
        assert_eq!(reloaded.schedule_state(), crate::storage::models::ScheduleState::Fired);

        let job_count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM broker_jobs WHERE queue = ?")
            .bind(POST_JOB_QUEUE)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(job_count.0, 1);
    }

    #[tokio::test]
    async fn run_tick_is_idempotent_on_an_already_fired_schedule() {
        let pool = init_test_db().await.unwrap();
        let video_id = seed_video(&pool).await;
        schedules::create_schedule(
            &pool,
            NewSchedule {
                user_id: "u1".to_string(),
                video_id,
                targets: vec![PlatformTarget { platform: "YOUTUBE".to_string(), caption: "a".to_string(), tags: vec![] }],
                scheduled_instant: Utc::now() - ChronoDuration::seconds(5),
            },
        )
        .await
        .unwrap();

        run_tick(&pool, Duration::from_secs(30)).await.unwrap();
        let second = run_tick(&pool, Duration::from_secs(30)).await.unwrap();
        assert_eq!(second.schedules_fired, 0);
    }

    #[tokio::test]
    async fn run_tick_fires_due_recurring_schedule_and_advances_cursor() {
        let pool = init_test_db().await.unwrap();
        let video_id = seed_video(&pool).await;
        let recurring = recurring_schedules::create_recurring_schedule(
            &pool,
            NewRecurringSchedule {
                user_id: "u1".to_string(),
                video_id,
                targets: vec![PlatformTarget { platform: "TIKTOK".to_string(), caption: "base".to_string(), tags: vec![] }],
                cadence: Cadence::Daily { hour: 12, minute: 0 },
                variants: vec!["v0".to_string(), "v1".to_string()],
                first_occurrence: Utc::now() - ChronoDuration::minutes(1),
            },
        )
        .await
        .unwrap();

        let summary = run_tick(&pool, Duration::from_secs(30)).await.unwrap();
        assert_eq!(summary.recurring_firings, 1);

        let reloaded = recurring_schedules::get_recurring_schedule(&pool, &recurring.id).await.unwrap().unwrap();
        assert_eq!(reloaded.variant_cursor, 1);
        assert!(reloaded.next_occurrence > Utc::now());
    }

    #[tokio::test]
    async fn recurring_catch_up_is_bounded_by_max_catchup_firings() {
        let pool = init_test_db().await.unwrap();
        let video_id = seed_video(&pool).await;
        let recurring = recurring_schedules::create_recurring_schedule(
            &pool,
            NewRecurringSchedule {
                user_id: "u1".to_string(),
                video_id,
                targets: vec![PlatformTarget { platform: "TIKTOK".to_string(), caption: "base".to_string(), tags: vec![] }],
                cadence: Cadence::Daily { hour: 0, minute: 0 },
                variants: vec![],
                first_occurrence: Utc::now() - ChronoDuration::days(90),
            },
        )
        .await
        .unwrap();

        let summary = run_tick(&pool, Duration::from_secs(30)).await.unwrap();
        assert_eq!(summary.recurring_firings, MAX_CATCHUP_FIRINGS);

        let reloaded = recurring_schedules::get_recurring_schedule(&pool, &recurring.id).await.unwrap().unwrap();
        assert_eq!(reloaded.variant_cursor, MAX_CATCHUP_FIRINGS as i64);
        // Still overdue: the remaining backlog is picked up on the next tick.
        assert!(reloaded.next_occurrence <= Utc::now());
    }

    #[test]
    fn compute_next_occurrence_daily_rolls_past_midnight() {
        let after = Utc.with_ymd_and_hms(2026, 3, 5, 13, 0, 0).unwrap();
        let next = compute_next_occurrence(Cadence::Daily { hour: 12, minute: 0 }, after);
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 6, 12, 0, 0).unwrap());
    }

    #[test]
    fn compute_next_occurrence_weekly_finds_configured_weekday() {
        // 2026-03-05 is a Thursday.
        let after = Utc.with_ymd_and_hms(2026, 3, 5, 9, 0, 0).unwrap();
        let next = compute_next_occurrence(Cadence::Weekly { weekday: Weekday::Mon, hour: 9, minute: 30 }, after);
        assert_eq!(next.weekday(), Weekday::Mon);
        assert!(next > after);
    }

    #[test]
    fn compute_next_occurrence_monthly_clamps_short_month() {
        let after = Utc.with_ymd_and_hms(2026, 1, 31, 10, 0, 0).unwrap();
        let next = compute_next_occurrence(Cadence::Monthly { day_of_month: 31, hour: 10, minute: 0 }, after);
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 2, 28, 10, 0, 0).unwrap());
    }
}
