//! Serenity-backed implementations of the attendance collaborator ports.

use crate::attendance::ports::{MemberInfo, Notice, Notifier, RoleService};
use crate::error::ServiceError;
use async_trait::async_trait;
use poise::serenity_prelude as serenity;
use std::sync::Arc;

const MEMBER_PAGE_SIZE: u64 = 1000;

fn snowflake(kind: &str, raw: &str) -> Result<u64, ServiceError> {
    match raw.parse::<u64>() {
        Ok(id) if id != 0 => Ok(id),
        _ => Err(ServiceError::NotFound(format!("invalid {} id: {}", kind, raw))),
    }
}

fn is_not_found(error: &serenity::Error) -> bool {
    match error {
        serenity::Error::Http(http_error) => http_error
            .status_code()
            .is_some_and(|status| status.as_u16() == 404),
        _ => false,
    }
}

fn unavailable(error: serenity::Error) -> ServiceError {
    ServiceError::Unavailable(error.to_string())
}

fn member_info(member: &serenity::Member) -> MemberInfo {
    MemberInfo {
        user_id: member.user.id.to_string(),
        display_name: member.display_name().to_string(),
        is_bot: member.user.bot,
    }
}

pub struct DiscordRoles {
    http: Arc<serenity::Http>,
}

impl DiscordRoles {
    pub fn new(http: Arc<serenity::Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl RoleService for DiscordRoles {
    async fn add_role(&self, guild_id: &str, user_id: &str, role_id: &str) -> Result<(), ServiceError> {
        self.http
            .add_member_role(
                serenity::GuildId::new(snowflake("guild", guild_id)?),
                serenity::UserId::new(snowflake("user", user_id)?),
                serenity::RoleId::new(snowflake("role", role_id)?),
                Some("出勤"),
            )
            .await
            .map_err(unavailable)
    }

    async fn remove_role(&self, guild_id: &str, user_id: &str, role_id: &str) -> Result<(), ServiceError> {
        match self
            .http
            .remove_member_role(
                serenity::GuildId::new(snowflake("guild", guild_id)?),
                serenity::UserId::new(snowflake("user", user_id)?),
                serenity::RoleId::new(snowflake("role", role_id)?),
                Some("退勤"),
            )
            .await
        {
            Ok(()) => Ok(()),
            // The member already left; there is no role to remove.
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(unavailable(e)),
        }
    }

    async fn members_with_role(&self, guild_id: &str, role_id: &str) -> Result<Vec<MemberInfo>, ServiceError> {
        let guild = serenity::GuildId::new(snowflake("guild", guild_id)?);
        let role = serenity::RoleId::new(snowflake("role", role_id)?);

        let mut holders = Vec::new();
        let mut after = None;
        loop {
            let page = self
                .http
                .get_guild_members(guild, Some(MEMBER_PAGE_SIZE), after)
                .await
                .map_err(unavailable)?;
            let page_len = page.len() as u64;
            after = page.last().map(|member| member.user.id.get());

            holders.extend(
                page.iter()
                    .filter(|member| member.roles.contains(&role))
                    .map(member_info),
            );

            if page_len < MEMBER_PAGE_SIZE {
                break;
            }
        }

        Ok(holders)
    }

    async fn fetch_member(&self, guild_id: &str, user_id: &str) -> Result<Option<MemberInfo>, ServiceError> {
        match self
            .http
            .get_member(
                serenity::GuildId::new(snowflake("guild", guild_id)?),
                serenity::UserId::new(snowflake("user", user_id)?),
            )
            .await
        {
            Ok(member) => Ok(Some(member_info(&member))),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(unavailable(e)),
        }
    }
}

pub fn notice_embed(notice: &Notice) -> serenity::CreateEmbed {
    let mut embed = serenity::CreateEmbed::new()
        .description(&notice.description)
        .color(notice.color)
        .timestamp(notice.timestamp);
    if let Some(title) = &notice.title {
        embed = embed.title(title);
    }
    for field in &notice.fields {
        embed = embed.field(&field.name, &field.value, field.inline);
    }
    embed
}

pub struct DiscordNotifier {
    http: Arc<serenity::Http>,
}

impl DiscordNotifier {
    pub fn new(http: Arc<serenity::Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn send(&self, channel_id: &str, notice: Notice) -> Result<(), ServiceError> {
        let channel = serenity::ChannelId::new(snowflake("channel", channel_id)?);
        let message = serenity::CreateMessage::new().embed(notice_embed(&notice));

        match channel.send_message(&*self.http, message).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => {
                tracing::debug!("Log channel {} no longer exists; notice dropped", channel_id);
                Ok(())
            }
            Err(e) => Err(unavailable(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snowflake_rejects_zero_and_garbage() {
        assert_eq!(snowflake("user", "1234").unwrap(), 1234);
        assert!(snowflake("user", "0").is_err());
        assert!(snowflake("user", "abc").is_err());
    }
}
