use crate::attendance::absentee::absentee_notices;
use crate::attendance::ports::Notice;
use crate::attendance::report::{PAGE_LIMIT, UserSummary, paginate, summarize_user};
use crate::attendance::rollover::daily_report_notices;
use crate::bot::commands::{require_settings, say_ephemeral};
use crate::bot::services::notice_embed;
use crate::bot::{Context, Error};
use crate::database::models::AttendanceRecord;
use crate::database::queries;
use crate::utils::format::{COLOR_INFO, COLOR_REPORT, create_error_embed, create_info_embed, format_hm};
use crate::utils::time::{days_before, format_time, local_date};
use chrono::{FixedOffset, Utc};
use poise::serenity_prelude as serenity;

const REPORT_WINDOW_DAYS: u32 = 30;
const RECENT_DAYS_SHOWN: usize = 5;

fn user_report_embed(name: &str, summary: &UserSummary) -> serenity::CreateEmbed {
    let recent = summary
        .recent_days
        .iter()
        .map(|day| format!("{}: {}（{}回）", day.date.format("%m/%d"), format_hm(day.minutes), day.sessions))
        .collect::<Vec<_>>()
        .join("\n");

    serenity::CreateEmbed::new()
        .title(format!("📈 {} の勤務レポート（過去{}日）", name, summary.window_days))
        .color(COLOR_REPORT)
        .field("合計勤務時間", format_hm(summary.total_minutes), true)
        .field("出勤日数", format!("{}日", summary.days_attended), true)
        .field("出勤率", format!("{}%", summary.attendance_rate), true)
        .field("1日平均", format_hm(summary.average_daily_minutes), true)
        .field("セッション平均", format_hm(summary.average_session_minutes), true)
        .field("セッション数", summary.total_sessions.to_string(), true)
        .field("最長セッション", format_hm(summary.longest_session), true)
        .field("最短セッション", format_hm(summary.shortest_session), true)
        .field("直近7日間", format_hm(summary.last_week_minutes), true)
        .field(format!("直近{}日の内訳", RECENT_DAYS_SHOWN), recent, false)
        .timestamp(Utc::now())
}

/// 過去30日間の勤務レポートを表示します
#[poise::command(slash_command, guild_only)]
pub async fn report(
    ctx: Context<'_>,
    #[description = "対象ユーザー（省略時は自分）"] user: Option<serenity::User>,
) -> Result<(), Error> {
    let Some(settings) = require_settings(ctx).await? else {
        return Ok(());
    };

    let target = user.as_ref().unwrap_or_else(|| ctx.author());
    let offset = ctx.data().config.timezone_offset;
    let today = local_date(Utc::now(), offset);
    let start = days_before(today, u64::from(REPORT_WINDOW_DAYS - 1));

    let records = match queries::find_user_records_in_range(
        &ctx.data().pool,
        &target.id.to_string(),
        &settings.guild_id,
        start,
        today,
    )
    .await
    {
        Ok(records) => records,
        Err(e) => {
            tracing::error!("Failed to load records for {}: {}", target.id, e);
            let embed = create_error_embed("エラー", e.user_message());
            ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true)).await?;
            return Ok(());
        }
    };

    let embed = match summarize_user(&records, today, REPORT_WINDOW_DAYS, RECENT_DAYS_SHOWN) {
        Some(summary) => user_report_embed(&target.name, &summary),
        None => create_info_embed(
            "📈 勤務レポート",
            &format!("{} の過去{}日間の勤務記録はありません", target.name, REPORT_WINDOW_DAYS),
        ),
    };
    ctx.send(poise::CreateReply::default().embed(embed)).await?;

    Ok(())
}

fn open_sessions_pages(records: &[AttendanceRecord], offset: FixedOffset) -> Vec<String> {
    let text = records
        .iter()
        .filter_map(|record| {
            record.open_session().map(|session| {
                format!(
                    "<@{}> - {} {} から",
                    record.user_id,
                    record.date,
                    format_time(session.check_in, offset)
                )
            })
        })
        .collect::<Vec<_>>()
        .join("\n");
    paginate(&text, PAGE_LIMIT)
}

/// Sends each notice as its own ephemeral message so no single message exceeds Discord's size limits.
async fn send_notices(ctx: Context<'_>, notices: &[Notice]) -> Result<(), Error> {
    for notice in notices {
        ctx.send(poise::CreateReply::default().embed(notice_embed(notice)).ephemeral(true))
            .await?;
    }
    Ok(())
}

/// 出勤中のメンバーを一覧表示します
#[poise::command(slash_command, guild_only, rename = "open-sessions")]
pub async fn open_sessions(ctx: Context<'_>) -> Result<(), Error> {
    let Some(settings) = require_settings(ctx).await? else {
        return Ok(());
    };

    let records = match queries::find_open_records(&ctx.data().pool, &settings.guild_id).await {
        Ok(records) => records,
        Err(e) => {
            tracing::error!("Failed to load open sessions for guild {}: {}", settings.guild_id, e);
            return say_ephemeral(ctx, e.user_message()).await;
        }
    };

    let now = Utc::now();
    let title = format!("🟢 出勤中のメンバー（{}人）", records.len());
    let mut pages = open_sessions_pages(&records, ctx.data().config.timezone_offset).into_iter();
    let first = pages.next().unwrap_or_else(|| "現在出勤中のメンバーはいません".to_string());

    let mut notices = vec![Notice::new(title, first, COLOR_INFO, now)];
    notices.extend(pages.map(|page| Notice::continuation(page, COLOR_INFO, now)));
    send_notices(ctx, &notices).await
}

/// 本日の日次レポートをプレビューします
#[poise::command(slash_command, guild_only, rename = "daily-report", required_permissions = "MANAGE_GUILD")]
pub async fn daily_report(ctx: Context<'_>) -> Result<(), Error> {
    ctx.defer_ephemeral().await?;
    let Some(settings) = require_settings(ctx).await? else {
        return Ok(());
    };

    let service = &ctx.data().attendance;
    let now = Utc::now();
    let report = match service.generate_daily_report(&settings, local_date(now, service.offset())).await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!("Daily report preview failed for guild {}: {}", settings.guild_id, e);
            return say_ephemeral(ctx, e.user_message()).await;
        }
    };

    send_notices(ctx, &daily_report_notices(&report, now)).await
}

/// 本日の欠席者を表示します
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn absentees(ctx: Context<'_>) -> Result<(), Error> {
    ctx.defer_ephemeral().await?;
    let Some(settings) = require_settings(ctx).await? else {
        return Ok(());
    };

    let service = &ctx.data().attendance;
    let now = Utc::now();
    match service.absentee_report(&settings, local_date(now, service.offset())).await {
        Ok(Some(report)) => {
            send_notices(ctx, &absentee_notices(&report, now)).await?;
        }
        Ok(None) => {
            say_ephemeral(ctx, "出席必須ロールが設定されていません。`/setup` で設定してください。").await?;
        }
        Err(e) => {
            tracing::error!("Absentee report failed for guild {}: {}", settings.guild_id, e);
            say_ephemeral(ctx, e.user_message()).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::time::reference_offset;
    use chrono::{NaiveDate, TimeZone};

    #[test]
    fn open_sessions_list_only_open_records() {
        let offset = reference_offset(9).unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let check_in = offset.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap().to_utc();

        let mut open = AttendanceRecord::new("1", "g1", date);
        open.start_session(check_in).unwrap();
        let mut closed = AttendanceRecord::new("2", "g1", date);
        closed.start_session(check_in).unwrap();
        closed.close_latest_session(check_in + chrono::Duration::hours(1)).unwrap();

        let pages = open_sessions_pages(&[open, closed], offset);
        assert_eq!(pages, vec!["<@1> - 2024-05-01 09:30 から".to_string()]);
    }

    #[test]
    fn long_open_session_lists_are_paged() {
        let offset = reference_offset(9).unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let check_in = offset.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap().to_utc();

        let records: Vec<AttendanceRecord> = (0..200u64)
            .map(|index| {
                let mut record = AttendanceRecord::new(&(100_000_000_000_000_000 + index).to_string(), "g1", date);
                record.start_session(check_in).unwrap();
                record
            })
            .collect();

        let pages = open_sessions_pages(&records, offset);
        assert!(pages.len() > 1);
        assert!(pages.iter().all(|page| page.chars().count() <= PAGE_LIMIT));
        assert_eq!(pages.iter().map(|page| page.lines().count()).sum::<usize>(), 200);
    }
}
