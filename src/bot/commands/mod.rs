pub mod admin;
pub mod attendance;
pub mod reports;

use crate::bot::{Context, Error};
use crate::database::models::GuildSettings;
use crate::utils::format::format_error_message;

pub(crate) async fn say_ephemeral(ctx: Context<'_>, content: impl Into<String>) -> Result<(), Error> {
    ctx.send(poise::CreateReply::default().content(content).ephemeral(true))
        .await?;
    Ok(())
}

/// Loads the invoking guild's settings, replying with a setup hint when there are none.
pub(crate) async fn require_settings(ctx: Context<'_>) -> Result<Option<GuildSettings>, Error> {
    let Some(guild_id) = ctx.guild_id() else {
        say_ephemeral(ctx, format_error_message("このコマンドはサーバー内でのみ使用できます")).await?;
        return Ok(None);
    };

    match ctx.data().guild_settings(guild_id).await {
        Ok(Some(settings)) => Ok(Some(settings)),
        Ok(None) => {
            say_ephemeral(
                ctx,
                format_error_message("このサーバーはまだ設定されていません。管理者が `/setup` を実行してください。"),
            )
            .await?;
            Ok(None)
        }
        Err(e) => {
            tracing::error!("Failed to load settings for guild {}: {}", guild_id, e);
            say_ephemeral(ctx, format_error_message(e.user_message())).await?;
            Ok(None)
        }
    }
}
