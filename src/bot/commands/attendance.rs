use crate::attendance::service::{CheckInOutcome, CheckOutOutcome};
use crate::bot::commands::{require_settings, say_ephemeral};
use crate::bot::interactions::attendance_buttons::{CHECK_IN_BUTTON, CHECK_OUT_BUTTON};
use crate::bot::{Context, Error};
use crate::error::{AttendanceError, Result as AttendanceResult};
use crate::utils::format::{COLOR_INFO, format_error_message, format_success_message};
use crate::utils::time::format_time;
use chrono::FixedOffset;
use poise::serenity_prelude as serenity;

/// Reply text shared by the slash command and the panel button.
pub(crate) fn check_in_reply(result: &AttendanceResult<CheckInOutcome>, offset: FixedOffset) -> String {
    match result {
        Ok(outcome) => {
            let mut message = format!(
                "出勤しました（{}）\n本日 {} 回目のセッションです",
                format_time(outcome.check_in, offset),
                outcome.session_number
            );
            if let Some(total) = outcome.total_points {
                message.push_str(&format!("\n🎁 +{}ポイント（合計: {}）", outcome.points_awarded, total));
            }
            format_success_message(&message)
        }
        Err(AttendanceError::AlreadyCheckedIn { since }) => format_error_message(&format!(
            "既に出勤中です（出勤時刻: {}）。先に退勤を記録してください。",
            format_time(*since, offset)
        )),
        Err(e) => format_error_message(e.user_message()),
    }
}

pub(crate) fn check_out_reply(result: &AttendanceResult<CheckOutOutcome>, offset: FixedOffset) -> String {
    match result {
        Ok(outcome) => {
            let check_out = outcome.session.check_out.unwrap_or(outcome.session.check_in);
            format_success_message(&format!(
                "退勤しました（{} - {}）\n勤務時間: {}",
                format_time(outcome.session.check_in, offset),
                format_time(check_out, offset),
                outcome.display_duration
            ))
        }
        Err(e) => format_error_message(e.user_message()),
    }
}

/// 出勤を記録します
#[poise::command(slash_command, guild_only)]
pub async fn checkin(ctx: Context<'_>) -> Result<(), Error> {
    ctx.defer_ephemeral().await?;
    let Some(settings) = require_settings(ctx).await? else {
        return Ok(());
    };

    let user_id = ctx.author().id.to_string();
    let service = &ctx.data().attendance;
    let result = service.check_in(&settings, &user_id, chrono::Utc::now()).await;

    say_ephemeral(ctx, check_in_reply(&result, service.offset())).await
}

/// 退勤を記録します
#[poise::command(slash_command, guild_only)]
pub async fn checkout(ctx: Context<'_>) -> Result<(), Error> {
    ctx.defer_ephemeral().await?;
    let Some(settings) = require_settings(ctx).await? else {
        return Ok(());
    };

    let user_id = ctx.author().id.to_string();
    let service = &ctx.data().attendance;
    let result = service.check_out(&settings, &user_id, chrono::Utc::now()).await;

    say_ephemeral(ctx, check_out_reply(&result, service.offset())).await
}

/// 出勤・退勤ボタンのパネルを設置します
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn panel(ctx: Context<'_>) -> Result<(), Error> {
    if require_settings(ctx).await?.is_none() {
        return Ok(());
    }

    let buttons = vec![
        serenity::CreateButton::new(CHECK_IN_BUTTON)
            .label("出勤")
            .emoji('✅')
            .style(serenity::ButtonStyle::Success),
        serenity::CreateButton::new(CHECK_OUT_BUTTON)
            .label("退勤")
            .emoji('⏹')
            .style(serenity::ButtonStyle::Danger),
    ];

    let embed = serenity::CreateEmbed::new()
        .title("🕐 勤怠パネル")
        .description("下のボタンで出勤・退勤を記録できます")
        .color(COLOR_INFO);

    ctx.send(
        poise::CreateReply::default()
            .embed(embed)
            .components(vec![serenity::CreateActionRow::Buttons(buttons)]),
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::Session;
    use crate::utils::time::reference_offset;
    use chrono::{TimeZone, Utc};

    #[test]
    fn check_in_reply_mentions_points_only_when_awarded() {
        let offset = reference_offset(9).unwrap();
        let check_in = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let mut outcome = CheckInOutcome {
            check_in,
            session_number: 2,
            points_awarded: 10,
            total_points: Some(30),
        };

        let reply = check_in_reply(&Ok(outcome.clone()), offset);
        assert!(reply.contains("09:00"));
        assert!(reply.contains("2 回目"));
        assert!(reply.contains("合計: 30"));

        outcome.total_points = None;
        assert!(!check_in_reply(&Ok(outcome), offset).contains("ポイント"));
    }

    #[test]
    fn already_checked_in_reply_shows_open_time() {
        let offset = reference_offset(9).unwrap();
        let since = Utc.with_ymd_and_hms(2024, 5, 1, 1, 15, 0).unwrap();
        let reply = check_in_reply(&Err(AttendanceError::AlreadyCheckedIn { since }), offset);
        assert!(reply.contains("10:15"));
    }

    #[test]
    fn check_out_reply_shows_span_and_duration() {
        let offset = reference_offset(9).unwrap();
        let check_in = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let outcome = CheckOutOutcome {
            session: Session {
                check_in,
                check_out: Some(check_in + chrono::Duration::minutes(510)),
                duration: 510,
            },
            display_duration: "8時間30分".into(),
        };

        let reply = check_out_reply(&Ok(outcome), offset);
        assert!(reply.contains("09:00 - 17:30"));
        assert!(reply.contains("8時間30分"));

        let failed = check_out_reply(&Err(AttendanceError::NoOpenSession), offset);
        assert!(failed.contains(AttendanceError::NoOpenSession.user_message()));
    }
}
