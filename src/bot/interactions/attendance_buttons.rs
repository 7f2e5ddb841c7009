use crate::bot::commands::attendance::{check_in_reply, check_out_reply};
use crate::bot::{Data, Error};
use crate::utils::format::format_error_message;
use poise::serenity_prelude as serenity;

pub const CHECK_IN_BUTTON: &str = "check_in";
pub const CHECK_OUT_BUTTON: &str = "check_out";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonAction {
    CheckIn,
    CheckOut,
}

impl ButtonAction {
    pub fn from_custom_id(custom_id: &str) -> Option<Self> {
        match custom_id {
            CHECK_IN_BUTTON => Some(Self::CheckIn),
            CHECK_OUT_BUTTON => Some(Self::CheckOut),
            _ => None,
        }
    }
}

async fn respond(
    ctx: &serenity::Context,
    interaction: &serenity::ComponentInteraction,
    content: String,
) -> Result<(), Error> {
    interaction
        .create_response(
            &ctx.http,
            serenity::CreateInteractionResponse::Message(
                serenity::CreateInteractionResponseMessage::new()
                    .content(content)
                    .ephemeral(true),
            ),
        )
        .await?;
    Ok(())
}

/// Fills in the deferred ephemeral response.
async fn edit_deferred(
    ctx: &serenity::Context,
    interaction: &serenity::ComponentInteraction,
    content: String,
) -> Result<(), Error> {
    interaction
        .edit_response(&ctx.http, serenity::EditInteractionResponse::new().content(content))
        .await?;
    Ok(())
}

pub async fn handle_attendance_interaction(
    ctx: &serenity::Context,
    interaction: &serenity::ComponentInteraction,
    data: &Data,
) -> Result<(), Error> {
    let custom_id = interaction.data.custom_id.as_str();
    let Some(action) = ButtonAction::from_custom_id(custom_id) else {
        return respond(ctx, interaction, "未対応のボタンです".to_string()).await;
    };

    let user_id = interaction.user.id.to_string();
    if !data.button_limiter.check(&format!("{}:{}", user_id, custom_id)) {
        return respond(
            ctx,
            interaction,
            format_error_message("操作が多すぎます。しばらく待ってから再度お試しください。"),
        )
        .await;
    }

    let Some(guild_id) = interaction.guild_id else {
        return respond(ctx, interaction, format_error_message("サーバー内でのみ使用できます")).await;
    };

    // Acknowledge before any storage or role work; Discord drops interactions not answered within 3 s.
    interaction.defer_ephemeral(&ctx.http).await?;

    let settings = match data.guild_settings(guild_id).await {
        Ok(Some(settings)) => settings,
        Ok(None) => {
            return edit_deferred(
                ctx,
                interaction,
                format_error_message("このサーバーはまだ設定されていません。管理者が `/setup` を実行してください。"),
            )
            .await;
        }
        Err(e) => {
            tracing::error!("Failed to load settings for guild {}: {}", guild_id, e);
            return edit_deferred(ctx, interaction, format_error_message(e.user_message())).await;
        }
    };

    let service = &data.attendance;
    let now = chrono::Utc::now();
    let content = match action {
        ButtonAction::CheckIn => check_in_reply(&service.check_in(&settings, &user_id, now).await, service.offset()),
        ButtonAction::CheckOut => check_out_reply(&service.check_out(&settings, &user_id, now).await, service.offset()),
    };

    edit_deferred(ctx, interaction, content).await
}
