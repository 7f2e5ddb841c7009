use chrono::{DateTime, Utc};
use poise::serenity_prelude as serenity;

pub const COLOR_SUCCESS: u32 = 0x00ff00;
pub const COLOR_ERROR: u32 = 0xff0000;
pub const COLOR_WARNING: u32 = 0xffa500;
pub const COLOR_EMPTY: u32 = 0xffff00;
pub const COLOR_INFO: u32 = 0x3498db;
pub const COLOR_REPORT: u32 = 0x9b59b6;

/// `H:MM` for a minute total. Averages are floored to whole minutes before
/// reaching here so totals and averages share one rounding rule.
pub fn format_hm(minutes: i64) -> String {
    let minutes = minutes.max(0);
    format!("{}:{:02}", minutes / 60, minutes % 60)
}

pub fn format_duration_minutes(minutes: i64) -> String {
    let hours = minutes / 60;
    let mins = minutes % 60;

    if hours > 0 {
        format!("{}時間{}分", hours, mins)
    } else {
        format!("{}分", mins)
    }
}

/// 表示用のセッション時間（保存値には使わない）
///
/// 60秒未満は秒単位の表現、それ以上は四捨五入した分で表示する。
pub fn format_session_duration(check_in: DateTime<Utc>, check_out: DateTime<Utc>) -> String {
    let millis = check_out.signed_duration_since(check_in).num_milliseconds().max(0);
    let total_seconds = (millis + 500) / 1000;

    if total_seconds < 60 {
        return if total_seconds < 5 {
            "5秒未満".to_string()
        } else if total_seconds >= 55 {
            "約1分".to_string()
        } else {
            format!("{}秒", total_seconds)
        };
    }

    let minutes = (total_seconds + 30) / 60;
    format_duration_minutes(minutes)
}

pub fn format_error_message(error: &str) -> String {
    format!("❌ **エラー**: {}", error)
}

pub fn format_success_message(message: &str) -> String {
    format!("✅ {}", message)
}

// Embed utility functions
pub fn create_error_embed(title: &str, description: &str) -> serenity::CreateEmbed {
    serenity::CreateEmbed::new()
        .title(title)
        .description(description)
        .color(COLOR_ERROR)
        .timestamp(chrono::Utc::now())
}

pub fn create_info_embed(title: &str, description: &str) -> serenity::CreateEmbed {
    serenity::CreateEmbed::new()
        .title(title)
        .description(description)
        .color(COLOR_INFO)
        .timestamp(chrono::Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn hm_pads_minutes() {
        assert_eq!(format_hm(510), "8:30");
        assert_eq!(format_hm(65), "1:05");
        assert_eq!(format_hm(0), "0:00");
    }

    #[test]
    fn duration_minutes_matches_reference_wording() {
        assert_eq!(format_duration_minutes(45), "45分");
        assert_eq!(format_duration_minutes(118), "1時間58分");
    }

    #[test]
    fn session_duration_uses_seconds_below_a_minute() {
        assert_eq!(format_session_duration(start(), start() + Duration::seconds(3)), "5秒未満");
        assert_eq!(format_session_duration(start(), start() + Duration::seconds(42)), "42秒");
        assert_eq!(format_session_duration(start(), start() + Duration::seconds(57)), "約1分");
    }

    #[test]
    fn session_duration_rounds_minutes_above_a_minute() {
        assert_eq!(format_session_duration(start(), start() + Duration::seconds(89)), "1分");
        assert_eq!(format_session_duration(start(), start() + Duration::seconds(90)), "2分");
        assert_eq!(
            format_session_duration(start(), start() + Duration::minutes(510)),
            "8時間30分"
        );
    }
}
