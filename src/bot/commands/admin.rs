use crate::bot::commands::{require_settings, say_ephemeral};
use crate::bot::{Context, Error};
use crate::database::models::{GuildSettings, LeaveRecord, LeaveStatus};
use crate::database::queries;
use crate::utils::format::{format_error_message, format_success_message};
use crate::utils::time::parse_date_string;
use chrono::NaiveDate;
use poise::serenity_prelude as serenity;

/// 勤怠ボットの設定を登録します
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn setup(
    ctx: Context<'_>,
    #[description = "出勤中に付与するロール"] present_role: serenity::Role,
    #[description = "勤怠ログを送信するチャンネル"] log_channel: serenity::GuildChannel,
    #[description = "欠席者チェックの対象ロール"] required_role: Option<serenity::Role>,
) -> Result<(), Error> {
    let Some(guild_id) = ctx.guild_id() else {
        return Ok(());
    };

    let settings = GuildSettings {
        guild_id: guild_id.to_string(),
        present_role_id: present_role.id.to_string(),
        log_channel_id: log_channel.id.to_string(),
        required_role_id: required_role.as_ref().map(|role| role.id.to_string()),
    };

    match queries::upsert_guild_settings(&ctx.data().pool, &settings).await {
        Ok(()) => {
            tracing::info!("Guild {} configured by {}", guild_id, ctx.author().id);
            let mut message = format!(
                "設定を保存しました\n出勤ロール: <@&{}>\nログチャンネル: <#{}>",
                settings.present_role_id, settings.log_channel_id
            );
            if let Some(role_id) = &settings.required_role_id {
                message.push_str(&format!("\n出席必須ロール: <@&{}>", role_id));
            }
            say_ephemeral(ctx, format_success_message(&message)).await
        }
        Err(e) => {
            tracing::error!("Failed to save settings for guild {}: {}", guild_id, e);
            say_ephemeral(ctx, format_error_message(e.user_message())).await
        }
    }
}

fn parse_leave_range(start: &str, end: &str) -> Result<(NaiveDate, NaiveDate), String> {
    let start_date = parse_date_string(start).map_err(|e| e.to_string())?;
    let end_date = parse_date_string(end).map_err(|e| e.to_string())?;
    if end_date < start_date {
        return Err("終了日は開始日以降にしてください".to_string());
    }
    Ok((start_date, end_date))
}

/// 承認済みの休暇を登録します
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn leave(
    ctx: Context<'_>,
    #[description = "対象ユーザー"] user: serenity::User,
    #[description = "開始日 (YYYY-MM-DD)"] start: String,
    #[description = "終了日 (YYYY-MM-DD)"] end: String,
) -> Result<(), Error> {
    let Some(settings) = require_settings(ctx).await? else {
        return Ok(());
    };

    let (start_date, end_date) = match parse_leave_range(&start, &end) {
        Ok(range) => range,
        Err(message) => return say_ephemeral(ctx, format_error_message(&message)).await,
    };

    let leave = LeaveRecord {
        user_id: user.id.to_string(),
        guild_id: settings.guild_id.clone(),
        start_date,
        end_date,
        status: LeaveStatus::Approved,
    };

    match queries::create_leave_record(&ctx.data().pool, &leave).await {
        Ok(()) => {
            tracing::info!("Leave recorded for {} in guild {} ({} - {})", user.id, settings.guild_id, start_date, end_date);
            say_ephemeral(
                ctx,
                format_success_message(&format!("<@{}> の休暇を登録しました（{} - {}）", user.id, start_date, end_date)),
            )
            .await
        }
        Err(e) => {
            tracing::error!("Failed to record leave for {}: {}", user.id, e);
            say_ephemeral(ctx, format_error_message(e.user_message())).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leave_range_must_be_ordered() {
        let (start, end) = parse_leave_range("2024-05-01", "2024-05-03").unwrap();
        assert!(start < end);
        assert!(parse_leave_range("2024-05-03", "2024-05-01").is_err());
        assert!(parse_leave_range("05/01", "2024-05-01").is_err());
    }
}
