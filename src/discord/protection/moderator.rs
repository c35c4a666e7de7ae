// Serenity-backed implementation of the core `GuildModerator` port, plus the
// channel-level actions anti-spam needs.

use crate::core::protection::{GuildModerator, ProtectionNotice};
use crate::discord::protection::formatter::format_notice;
use anyhow::Result;
use async_trait::async_trait;
use poise::serenity_prelude as serenity;
use std::sync::Arc;

pub struct SerenityModerator {
    http: Arc<serenity::Http>,
}

impl SerenityModerator {
    pub fn new(ctx: &serenity::Context) -> Self {
        Self {
            http: ctx.http.clone(),
        }
    }

    pub async fn timeout_member(
        &self,
        guild_id: u64,
        user_id: u64,
        duration_ms: u64,
        reason: &str,
    ) -> Result<()> {
        let until = serenity::Timestamp::from_unix_timestamp(
            chrono::Utc::now().timestamp() + (duration_ms / 1000) as i64,
        )?;

        serenity::GuildId::new(guild_id)
            .edit_member(
                &self.http,
                serenity::UserId::new(user_id),
                serenity::EditMember::new()
                    .disable_communication_until_datetime(until)
                    .audit_log_reason(reason),
            )
            .await?;
        Ok(())
    }

    pub async fn delete_messages(&self, channel_id: u64, message_ids: &[u64]) -> Result<()> {
        let channel = serenity::ChannelId::new(channel_id);

        // Bulk delete takes between 2 and 100 ids per call.
        for chunk in message_ids.chunks(100) {
            match chunk {
                [single] => {
                    channel
                        .delete_message(&self.http, serenity::MessageId::new(*single))
                        .await?
                }
                many => {
                    let ids: Vec<serenity::MessageId> =
                        many.iter().map(|id| serenity::MessageId::new(*id)).collect();
                    channel.delete_messages(&self.http, &ids).await?
                }
            }
        }
        Ok(())
    }

    /// Deny SEND_MESSAGES to @everyone in a channel.
    pub async fn lock_channel(&self, guild_id: u64, channel_id: u64) -> Result<()> {
        let everyone = serenity::PermissionOverwrite {
            allow: serenity::Permissions::empty(),
            deny: serenity::Permissions::SEND_MESSAGES,
            kind: serenity::PermissionOverwriteType::Role(serenity::RoleId::new(guild_id)), // @everyone role ID is same as guild ID
        };

        serenity::ChannelId::new(channel_id)
            .create_permission(&self.http, everyone)
            .await?;
        Ok(())
    }

    pub async fn unlock_channel(&self, guild_id: u64, channel_id: u64) -> Result<()> {
        serenity::ChannelId::new(channel_id)
            .delete_permission(
                &self.http,
                serenity::PermissionOverwriteType::Role(serenity::RoleId::new(guild_id)),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl GuildModerator for SerenityModerator {
    async fn remove_role(&self, guild_id: u64, user_id: u64, role_id: u64, reason: &str) -> Result<()> {
        self.http
            .remove_member_role(
                serenity::GuildId::new(guild_id),
                serenity::UserId::new(user_id),
                serenity::RoleId::new(role_id),
                Some(reason),
            )
            .await?;
        Ok(())
    }

    async fn kick(&self, guild_id: u64, user_id: u64, reason: &str) -> Result<()> {
        serenity::GuildId::new(guild_id)
            .kick_with_reason(&self.http, serenity::UserId::new(user_id), reason)
            .await?;
        Ok(())
    }

    async fn ban(&self, guild_id: u64, user_id: u64, delete_message_days: u8, reason: &str) -> Result<()> {
        serenity::GuildId::new(guild_id)
            .ban_with_reason(
                &self.http,
                serenity::UserId::new(user_id),
                delete_message_days,
                reason,
            )
            .await?;
        Ok(())
    }

    async fn text_channel_guild(&self, channel_id: u64) -> Result<Option<u64>> {
        let channel = serenity::ChannelId::new(channel_id)
            .to_channel(self.http.as_ref())
            .await?;

        Ok(channel
            .guild()
            .filter(|c| c.kind == serenity::ChannelType::Text)
            .map(|c| c.guild_id.get()))
    }

    async fn notify(&self, channel_id: u64, notice: &ProtectionNotice) -> Result<()> {
        serenity::ChannelId::new(channel_id)
            .send_message(
                &self.http,
                serenity::CreateMessage::new().embed(format_notice(notice)),
            )
            .await?;
        Ok(())
    }
}
