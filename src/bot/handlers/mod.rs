use crate::bot::interactions::attendance_buttons;
use crate::bot::{Data, Error};
use crate::database::queries;
use poise::serenity_prelude as serenity;

pub async fn event_handler(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    match event {
        serenity::FullEvent::Ready { data_about_bot } => {
            tracing::info!("Bot logged in as {}", data_about_bot.user.name);
        }
        serenity::FullEvent::InteractionCreate { interaction } => {
            if let serenity::Interaction::Component(component_interaction) = interaction {
                if let Err(e) =
                    attendance_buttons::handle_attendance_interaction(ctx, component_interaction, data).await
                {
                    tracing::error!("Error handling component interaction: {:?}", e);
                }
            }
        }
        serenity::FullEvent::GuildDelete { incomplete, .. } => {
            // `unavailable` means an outage, not a removal.
            if !incomplete.unavailable {
                let guild_id = incomplete.id.to_string();
                match queries::purge_guild_data(&data.pool, &guild_id).await {
                    Ok(records) => {
                        tracing::info!("Removed from guild {}; purged {} attendance records", guild_id, records)
                    }
                    Err(e) => tracing::error!("Failed to purge data for guild {}: {}", guild_id, e),
                }
            }
        }
        _ => {}
    }
    Ok(())
}
