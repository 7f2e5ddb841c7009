//! Aggregation of attendance records into per-user and guild-wide statistics.
//!
//! Everything here is pure: callers load records and member names, these
//! functions only compute and render.

use crate::database::models::AttendanceRecord;
use crate::utils::format::format_hm;
use crate::utils::time::{days_before, format_time};
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use std::borrow::Cow;
use std::collections::HashMap;

/// Maximum characters per rendered block (Discord embed field limit).
pub const PAGE_LIMIT: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserDayStats {
    pub user_id: String,
    pub total_minutes: i64,
    pub sessions: usize,
    pub earliest_check_in: Option<DateTime<Utc>>,
    pub latest_check_out: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaySummary {
    pub date: NaiveDate,
    pub member_count: usize,
    pub total_minutes: i64,
    pub total_sessions: usize,
    pub earliest_check_in: Option<DateTime<Utc>>,
    pub latest_check_out: Option<DateTime<Utc>>,
    /// Sorted by total minutes, longest first.
    pub users: Vec<UserDayStats>,
}

fn user_day_stats(record: &AttendanceRecord) -> UserDayStats {
    let closed: Vec<_> = record.closed_sessions().collect();
    UserDayStats {
        user_id: record.user_id.clone(),
        total_minutes: record.total_minutes(),
        sessions: closed.len(),
        earliest_check_in: closed.iter().map(|session| session.check_in).min(),
        latest_check_out: closed.iter().filter_map(|session| session.check_out).max(),
    }
}

/// Aggregates one guild-day. `None` for a day without records.
///
/// Open sessions contribute nothing; the rollover closes them before reporting.
pub fn summarize_day(date: NaiveDate, records: &[AttendanceRecord]) -> Option<DaySummary> {
    if records.is_empty() {
        return None;
    }

    let mut users: Vec<UserDayStats> = records.iter().map(user_day_stats).collect();
    users.sort_by(|a, b| {
        b.total_minutes
            .cmp(&a.total_minutes)
            .then_with(|| a.user_id.cmp(&b.user_id))
    });

    Some(DaySummary {
        date,
        member_count: users.len(),
        total_minutes: users.iter().map(|user| user.total_minutes).sum(),
        total_sessions: users.iter().map(|user| user.sessions).sum(),
        earliest_check_in: users.iter().filter_map(|user| user.earliest_check_in).min(),
        latest_check_out: users.iter().filter_map(|user| user.latest_check_out).max(),
        users,
    })
}

fn time_or_unknown(timestamp: Option<DateTime<Utc>>, offset: FixedOffset) -> String {
    timestamp
        .map(|ts| format_time(ts, offset))
        .unwrap_or_else(|| "なし".to_string())
}

/// Guild-wide totals shown before the per-user blocks.
pub fn render_day_totals(summary: &DaySummary, offset: FixedOffset) -> String {
    [
        format!("👥 出勤者数: {}人", summary.member_count),
        format!("⏱️ 合計勤務時間: {}", format_hm(summary.total_minutes)),
        format!("🔄 合計セッション数: {}", summary.total_sessions),
        format!("⏰ 最初の出勤: {}", time_or_unknown(summary.earliest_check_in, offset)),
        format!("⏰ 最後の退勤: {}", time_or_unknown(summary.latest_check_out, offset)),
    ]
    .join("\n")
}

/// Per-user lines in ranking order. Users missing from `names` are shown as mentions.
pub fn render_user_lines(
    summary: &DaySummary,
    names: &HashMap<String, String>,
    offset: FixedOffset,
) -> String {
    summary
        .users
        .iter()
        .enumerate()
        .map(|(index, user)| {
            let name = names
                .get(&user.user_id)
                .cloned()
                .unwrap_or_else(|| format!("<@{}>", user.user_id));
            format!(
                "**{}.** {}\n⏰ 勤務時間: {}\n📊 セッション数: {}\n🕐 最初の出勤: {}\n🕐 最後の退勤: {}\n",
                index + 1,
                name,
                format_hm(user.total_minutes),
                user.sessions,
                time_or_unknown(user.earliest_check_in, offset),
                time_or_unknown(user.latest_check_out, offset),
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn truncate_line(line: &str, limit: usize) -> Cow<'_, str> {
    if line.chars().count() <= limit {
        return Cow::Borrowed(line);
    }
    let mut truncated: String = line.chars().take(limit.saturating_sub(1)).collect();
    truncated.push('…');
    Cow::Owned(truncated)
}

/// Splits text into blocks of at most `limit` characters on line boundaries.
///
/// A single line longer than `limit` is truncated with an ellipsis rather than split.
pub fn paginate(text: &str, limit: usize) -> Vec<String> {
    let mut pages = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.lines() {
        let line = truncate_line(line, limit);
        let line_len = line.chars().count();
        let needed = if current.is_empty() {
            line_len
        } else {
            current_len + 1 + line_len
        };

        if needed <= limit {
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(&line);
            current_len = needed;
        } else {
            pages.push(std::mem::take(&mut current));
            current = line.into_owned();
            current_len = line_len;
        }
    }

    if !current.is_empty() {
        pages.push(current);
    }

    pages
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayBreakdown {
    pub date: NaiveDate,
    pub minutes: i64,
    pub sessions: usize,
}

/// Multi-day statistics for one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSummary {
    pub window_days: u32,
    pub total_minutes: i64,
    pub days_attended: usize,
    pub total_sessions: usize,
    /// Floored to whole minutes.
    pub average_daily_minutes: i64,
    /// Floored to whole minutes.
    pub average_session_minutes: i64,
    pub longest_session: i64,
    pub shortest_session: i64,
    /// Today and the six days before it.
    pub last_week_minutes: i64,
    /// Percentage of days in the window with attendance, rounded.
    pub attendance_rate: i64,
    /// Newest first.
    pub recent_days: Vec<DayBreakdown>,
}

/// Summarizes the `window_days` ending today (inclusive). `None` when no session
/// in the window has been closed.
pub fn summarize_user(
    records: &[AttendanceRecord],
    today: NaiveDate,
    window_days: u32,
    recent_limit: usize,
) -> Option<UserSummary> {
    let window_days = window_days.max(1);
    let window_start = days_before(today, u64::from(window_days - 1));
    let week_start = days_before(today, 6);

    let mut in_window: Vec<&AttendanceRecord> = records
        .iter()
        .filter(|record| record.date >= window_start && record.date <= today)
        .collect();
    in_window.sort_by(|a, b| b.date.cmp(&a.date));

    let mut days = Vec::new();
    let mut durations = Vec::new();
    let mut last_week_minutes = 0;

    for record in in_window {
        let day_durations: Vec<i64> = record.closed_sessions().map(|session| session.duration).collect();
        if day_durations.is_empty() {
            continue;
        }

        let minutes: i64 = day_durations.iter().sum();
        if record.date >= week_start {
            last_week_minutes += minutes;
        }
        days.push(DayBreakdown {
            date: record.date,
            minutes,
            sessions: day_durations.len(),
        });
        durations.extend(day_durations);
    }

    if days.is_empty() {
        return None;
    }

    let total_minutes: i64 = durations.iter().sum();
    let days_attended = days.len();
    let total_sessions = durations.len();
    let window = i64::from(window_days);

    Some(UserSummary {
        window_days,
        total_minutes,
        days_attended,
        total_sessions,
        average_daily_minutes: total_minutes / days_attended as i64,
        average_session_minutes: total_minutes / total_sessions as i64,
        longest_session: durations.iter().copied().max().unwrap_or(0),
        shortest_session: durations.iter().copied().min().unwrap_or(0),
        last_week_minutes,
        attendance_rate: (days_attended as i64 * 100 + window / 2) / window,
        recent_days: days.into_iter().take(recent_limit).collect(),
    })
}
