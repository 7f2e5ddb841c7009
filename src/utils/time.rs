use anyhow::Result;
use chrono::{DateTime, Days, FixedOffset, NaiveDate, NaiveTime, Utc};

/// 基準タイムゾーンを UTC からの固定オフセット（時間単位）で作成
pub fn reference_offset(hours: i32) -> Result<FixedOffset> {
    FixedOffset::east_opt(hours * 3600)
        .ok_or_else(|| anyhow::anyhow!("Invalid timezone offset: {} hours", hours))
}

/// 基準タイムゾーンでの日付（勤怠記録の「日」）
pub fn local_date(timestamp: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    timestamp.with_timezone(&offset).date_naive()
}

pub fn combine_date_time(date: NaiveDate, time: NaiveTime, offset: FixedOffset) -> DateTime<Utc> {
    // A fixed offset has no gaps or folds, so the local time maps to exactly one instant.
    (date.and_time(time) - offset).and_utc()
}

/// The instant the local day after `date` begins.
pub fn next_day_start(date: NaiveDate, offset: FixedOffset) -> DateTime<Utc> {
    let next = date.checked_add_days(Days::new(1)).unwrap_or(date);
    combine_date_time(next, NaiveTime::MIN, offset)
}

pub fn days_before(date: NaiveDate, days: u64) -> NaiveDate {
    date.checked_sub_days(Days::new(days)).unwrap_or(NaiveDate::MIN)
}

pub fn parse_time_string(time_str: &str) -> Result<NaiveTime> {
    let time_str = time_str.trim();

    if let Ok(time) = NaiveTime::parse_from_str(time_str, "%H:%M") {
        return Ok(time);
    }

    if let Ok(time) = NaiveTime::parse_from_str(time_str, "%H:%M:%S") {
        return Ok(time);
    }

    Err(anyhow::anyhow!("Invalid time format. Use HH:MM or HH:MM:SS"))
}

pub fn parse_date_string(date_str: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(date_str.trim(), "%Y-%m-%d")
        .map_err(|_| anyhow::anyhow!("Invalid date format. Use YYYY-MM-DD"))
}

/// Persisted session length in whole minutes, rounded half up.
///
/// This is the only rule used for stored durations. Display wording lives in
/// `utils::format::format_session_duration` and never feeds back into storage.
pub fn session_minutes(check_in: DateTime<Utc>, check_out: DateTime<Utc>) -> i64 {
    let seconds = check_out.signed_duration_since(check_in).num_seconds().max(0);
    (seconds + 30) / 60
}

pub fn format_time(datetime: DateTime<Utc>, offset: FixedOffset) -> String {
    datetime.with_timezone(&offset).format("%H:%M").to_string()
}
