//! Daily fixed-local-time jobs and fixed-interval maintenance jobs.
//!
//! Every tick runs in its own task so a failing or panicking tick never stops the loop.

use crate::attendance::{AttendanceService, RateLimiter};
use crate::config::Config;
use crate::database::{self, RetryPolicy, models::GuildSettings, queries};
use crate::utils::time::{combine_date_time, local_date};
use chrono::{DateTime, Days, FixedOffset, NaiveTime, Utc};
use sqlx::SqlitePool;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

const LIMITER_CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);
const STATS_FLUSH_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// The first instant strictly after `now` whose local wall-clock time is `at`.
pub fn next_run_after(now: DateTime<Utc>, at: NaiveTime, offset: FixedOffset) -> DateTime<Utc> {
    let today = local_date(now, offset);
    let candidate = combine_date_time(today, at, offset);
    if candidate > now {
        return candidate;
    }
    let tomorrow = today.checked_add_days(Days::new(1)).unwrap_or(today);
    combine_date_time(tomorrow, at, offset)
}

fn spawn_daily<F, Fut>(name: &'static str, at: NaiveTime, offset: FixedOffset, job: F)
where
    F: Fn(DateTime<Utc>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let next = next_run_after(now, at, offset);
            let wait = (next - now).to_std().unwrap_or_default();
            tracing::debug!("{} scheduled for {}", name, next);
            tokio::time::sleep(wait).await;

            if let Err(e) = tokio::spawn(job(next)).await {
                tracing::error!("{} tick aborted: {}", name, e);
            }
        }
    });
}

fn spawn_interval<F, Fut>(name: &'static str, period: Duration, job: F)
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(e) = tokio::spawn(job()).await {
                tracing::error!("{} tick aborted: {}", name, e);
            }
        }
    });
}

async fn configured_guilds(pool: &SqlitePool) -> Vec<GuildSettings> {
    match queries::list_guild_settings(pool).await {
        Ok(guilds) => guilds,
        Err(e) => {
            tracing::error!("Failed to load guild settings: {}", e);
            Vec::new()
        }
    }
}

/// Forced checkout for every configured guild. One guild's failure does not affect the others.
pub async fn run_force_checkout(service: &AttendanceService, now: DateTime<Utc>) {
    for settings in configured_guilds(service.pool()).await {
        if let Err(e) = service.force_checkout_all(&settings, now).await {
            tracing::error!("Forced checkout failed for guild {}: {}", settings.guild_id, e);
        }
    }
}

/// Daily report followed by the absentee report, for every configured guild.
pub async fn run_daily_reports(service: &AttendanceService, now: DateTime<Utc>) {
    let date = local_date(now, service.offset());
    for settings in configured_guilds(service.pool()).await {
        match service.generate_daily_report(&settings, date).await {
            Ok(report) => {
                if let Err(e) = service.publish_daily_report(&settings, &report, now).await {
                    tracing::error!("Failed to publish daily report for guild {}: {}", settings.guild_id, e);
                }
            }
            Err(e) => tracing::error!("Daily report failed for guild {}: {}", settings.guild_id, e),
        }

        match service.absentee_report(&settings, date).await {
            Ok(Some(report)) => {
                if let Err(e) = service.publish_absentee_report(&settings, &report, now).await {
                    tracing::error!("Failed to publish absentee report for guild {}: {}", settings.guild_id, e);
                }
            }
            Ok(None) => {}
            Err(e) => tracing::error!("Absentee report failed for guild {}: {}", settings.guild_id, e),
        }
    }
}

pub fn start(config: &Config, service: Arc<AttendanceService>, limiter: Arc<RateLimiter>, pool: SqlitePool) {
    let offset = config.timezone_offset;

    {
        let service = Arc::clone(&service);
        spawn_daily("force checkout", config.force_checkout_time, offset, move |now| {
            let service = Arc::clone(&service);
            async move { run_force_checkout(&service, now).await }
        });
    }

    {
        let service = Arc::clone(&service);
        spawn_daily("daily report", config.daily_report_time, offset, move |now| {
            let service = Arc::clone(&service);
            async move { run_daily_reports(&service, now).await }
        });
    }

    spawn_interval("rate limiter cleanup", LIMITER_CLEANUP_INTERVAL, move || {
        let limiter = Arc::clone(&limiter);
        async move {
            let removed = limiter.cleanup();
            tracing::debug!(
                "Rate limiter cleanup removed {} keys, {} still tracked",
                removed,
                limiter.tracked_keys()
            );
        }
    });

    {
        let service = Arc::clone(&service);
        spawn_interval("stats flush", STATS_FLUSH_INTERVAL, move || {
            let service = Arc::clone(&service);
            async move { service.stats().flush_to_log() }
        });
    }

    let policy = RetryPolicy::new(config.db_connect_retries);
    spawn_interval("database health check", HEALTH_CHECK_INTERVAL, move || {
        let pool = pool.clone();
        async move {
            if let Err(e) = database::health_check(&pool, policy).await {
                tracing::error!("Database health check failed: {}", e);
            }
        }
    });

    tracing::info!(
        "Scheduler started (forced checkout {}, daily report {}, UTC{})",
        config.force_checkout_time.format("%H:%M"),
        config.daily_report_time.format("%H:%M"),
        offset
    );
}
