//! Collaborator interfaces the attendance core calls out to.
//!
//! Ids are Discord snowflakes in their decimal string form, matching how they are stored.

use crate::error::ServiceError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    pub user_id: String,
    pub display_name: String,
    pub is_bot: bool,
}

/// Role assignment and membership lookups within a guild.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RoleService: Send + Sync {
    async fn add_role(&self, guild_id: &str, user_id: &str, role_id: &str) -> Result<(), ServiceError>;

    /// Removing a role the member does not hold succeeds.
    async fn remove_role(&self, guild_id: &str, user_id: &str, role_id: &str) -> Result<(), ServiceError>;

    async fn members_with_role(&self, guild_id: &str, role_id: &str) -> Result<Vec<MemberInfo>, ServiceError>;

    /// `None` when the user is no longer a member.
    async fn fetch_member(&self, guild_id: &str, user_id: &str) -> Result<Option<MemberInfo>, ServiceError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoticeField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// A structured log-channel message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub title: Option<String>,
    pub description: String,
    pub fields: Vec<NoticeField>,
    pub color: u32,
    pub timestamp: DateTime<Utc>,
}

impl Notice {
    pub fn new(title: impl Into<String>, description: impl Into<String>, color: u32, timestamp: DateTime<Utc>) -> Self {
        Self {
            title: Some(title.into()),
            description: description.into(),
            fields: Vec::new(),
            color,
            timestamp,
        }
    }

    /// A continuation block without a title.
    pub fn continuation(description: impl Into<String>, color: u32, timestamp: DateTime<Utc>) -> Self {
        Self {
            title: None,
            description: description.into(),
            fields: Vec::new(),
            color,
            timestamp,
        }
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        self.fields.push(NoticeField {
            name: name.into(),
            value: value.into(),
            inline,
        });
        self
    }
}

/// Sends notices to a channel. A missing channel is a silent no-op.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, channel_id: &str, notice: Notice) -> Result<(), ServiceError>;
}
