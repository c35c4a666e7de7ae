// Gateway event handlers for protection.
//
// Each handler works out which ActionKind happened, who did it (usually via
// the audit log), and hands that to the core service. Violations are enforced
// through SerenityModerator.

use crate::core::protection::change_detection::{
    role_diff, timeout_change, ChannelSnapshot, GuildSnapshot, RoleSnapshot, TimeoutChange,
};
use crate::core::protection::enforcement::{enforce_violation, notify, punish};
use crate::core::protection::{
    AbuseDecision, ActionKind, Actor, BotDecision, GuildChange, GuildModerator, IncomingMessage,
    ProtectionNotice, SpamActionType, SpamVerdict,
};
use crate::discord::protection::audit::resolve_executor;
use crate::discord::protection::moderator::SerenityModerator;
use crate::discord::Data;
use ::serenity::model::guild::audit_log::{Action, ChannelAction, MemberAction, RoleAction};
use anyhow::Result;
use poise::serenity_prelude::{self as serenity, Context};
use std::time::Duration;

/// Count `kind` against `actor` and enforce if a limit was crossed.
async fn track(
    ctx: &Context,
    data: &Data,
    actor: &Actor,
    kind: ActionKind,
    target: Option<String>,
    changes: Vec<GuildChange>,
) -> Result<()> {
    let decision = data.protection.record_action(actor, kind).await?;

    if let AbuseDecision::Violation(violation) = decision {
        let moderator = SerenityModerator::new(ctx);
        let report = enforce_violation(&moderator, &violation, target, changes).await;
        tracing::info!(
            guild_id = violation.guild_id,
            actor_id = violation.actor_id,
            kind = %violation.kind,
            punished = report.punished,
            notified = report.notified,
            "Protection enforced"
        );
    }

    Ok(())
}

// ============================================================================
// CHANNELS
// ============================================================================

fn channel_snapshot(channel: &serenity::GuildChannel) -> ChannelSnapshot {
    let mut overwrites: Vec<(u64, u64, u64)> = channel
        .permission_overwrites
        .iter()
        .filter_map(|o| {
            let target = match o.kind {
                serenity::PermissionOverwriteType::Member(id) => id.get(),
                serenity::PermissionOverwriteType::Role(id) => id.get(),
                _ => return None,
            };
            Some((target, o.allow.bits(), o.deny.bits()))
        })
        .collect();
    overwrites.sort_unstable();

    ChannelSnapshot {
        name: channel.name.clone(),
        kind: format!("{:?}", channel.kind),
        topic: channel.topic.clone(),
        overwrites,
    }
}

pub async fn handle_channel_create(
    ctx: &Context,
    data: &Data,
    channel: &serenity::GuildChannel,
) -> Result<()> {
    let action = Action::Channel(ChannelAction::Create);
    let Some(actor) = resolve_executor(ctx, channel.guild_id, action, Some(channel.id.get())).await
    else {
        return Ok(());
    };

    track(ctx, data, &actor, ActionKind::ChannelCreate, Some(channel.name.clone()), vec![]).await
}

pub async fn handle_channel_delete(
    ctx: &Context,
    data: &Data,
    channel: &serenity::GuildChannel,
) -> Result<()> {
    let action = Action::Channel(ChannelAction::Delete);
    let Some(actor) = resolve_executor(ctx, channel.guild_id, action, Some(channel.id.get())).await
    else {
        return Ok(());
    };

    track(ctx, data, &actor, ActionKind::ChannelDelete, Some(channel.name.clone()), vec![]).await
}

pub async fn handle_channel_update(
    ctx: &Context,
    data: &Data,
    old: Option<&serenity::GuildChannel>,
    new: &serenity::GuildChannel,
) -> Result<()> {
    // Without the old state we can't tell what changed; count it anyway.
    if let Some(old) = old {
        if !channel_snapshot(old).differs_from(&channel_snapshot(new)) {
            return Ok(());
        }
    }

    let action = Action::Channel(ChannelAction::Update);
    let Some(actor) = resolve_executor(ctx, new.guild_id, action, Some(new.id.get())).await else {
        return Ok(());
    };

    track(ctx, data, &actor, ActionKind::ChannelUpdate, Some(new.name.clone()), vec![]).await
}

// ============================================================================
// ROLES
// ============================================================================

fn role_snapshot(role: &serenity::Role) -> RoleSnapshot {
    RoleSnapshot {
        name: role.name.clone(),
        color: role.colour.0,
        permissions: role.permissions.bits(),
        position: role.position,
        hoist: role.hoist,
        mentionable: role.mentionable,
    }
}

pub async fn handle_role_create(ctx: &Context, data: &Data, role: &serenity::Role) -> Result<()> {
    let action = Action::Role(RoleAction::Create);
    let Some(actor) = resolve_executor(ctx, role.guild_id, action, Some(role.id.get())).await else {
        return Ok(());
    };

    track(ctx, data, &actor, ActionKind::RoleCreate, Some(role.name.clone()), vec![]).await
}

pub async fn handle_role_delete(
    ctx: &Context,
    data: &Data,
    guild_id: serenity::GuildId,
    role_id: serenity::RoleId,
    role: Option<&serenity::Role>,
) -> Result<()> {
    let action = Action::Role(RoleAction::Delete);
    let Some(actor) = resolve_executor(ctx, guild_id, action, Some(role_id.get())).await else {
        return Ok(());
    };

    let name = role
        .map(|r| r.name.clone())
        .unwrap_or_else(|| role_id.to_string());
    track(ctx, data, &actor, ActionKind::RoleDelete, Some(name), vec![]).await
}

pub async fn handle_role_update(
    ctx: &Context,
    data: &Data,
    old: Option<&serenity::Role>,
    new: &serenity::Role,
) -> Result<()> {
    if let Some(old) = old {
        if !role_snapshot(old).differs_from(&role_snapshot(new)) {
            return Ok(());
        }
    }

    let action = Action::Role(RoleAction::Update);
    let Some(actor) = resolve_executor(ctx, new.guild_id, action, Some(new.id.get())).await else {
        return Ok(());
    };

    track(ctx, data, &actor, ActionKind::RoleUpdate, Some(new.name.clone()), vec![]).await
}

// ============================================================================
// MEMBERS
// ============================================================================

fn role_name(ctx: &Context, guild_id: serenity::GuildId, role_id: u64) -> String {
    ctx.cache
        .guild(guild_id)
        .and_then(|g| {
            g.roles
                .get(&serenity::RoleId::new(role_id))
                .map(|r| r.name.clone())
        })
        .unwrap_or_else(|| format!("<@&{}>", role_id))
}

/// Role grants/removals and timeouts both arrive as member updates.
pub async fn handle_member_update(
    ctx: &Context,
    data: &Data,
    old: Option<&serenity::Member>,
    new: &serenity::Member,
) -> Result<()> {
    let guild_id = new.guild_id;
    let target = new.user.id.get();

    // Role diff needs the previous role list, which only the cache has.
    if let Some(old) = old {
        let old_roles: Vec<u64> = old.roles.iter().map(|r| r.get()).collect();
        let new_roles: Vec<u64> = new.roles.iter().map(|r| r.get()).collect();
        let (added, removed) = role_diff(&old_roles, &new_roles);

        if !added.is_empty() || !removed.is_empty() {
            let action = Action::Member(MemberAction::RoleUpdate);
            if let Some(actor) = resolve_executor(ctx, guild_id, action, Some(target)).await {
                for role_id in added {
                    let name = role_name(ctx, guild_id, role_id);
                    track(ctx, data, &actor, ActionKind::RoleAdd, Some(name), vec![]).await?;
                }
                for role_id in removed {
                    let name = role_name(ctx, guild_id, role_id);
                    track(ctx, data, &actor, ActionKind::RoleRemove, Some(name), vec![]).await?;
                }
            }
        }
    }

    let change = timeout_change(
        old.and_then(|m| m.communication_disabled_until)
            .map(|t| t.unix_timestamp()),
        new.communication_disabled_until.map(|t| t.unix_timestamp()),
        chrono::Utc::now().timestamp(),
    );
    let kind = match change {
        TimeoutChange::Applied => ActionKind::Timeout,
        TimeoutChange::Lifted => ActionKind::Untimeout,
        TimeoutChange::Unchanged => return Ok(()),
    };

    let action = Action::Member(MemberAction::Update);
    let Some(actor) = resolve_executor(ctx, guild_id, action, Some(target)).await else {
        return Ok(());
    };

    track(ctx, data, &actor, kind, Some(format!("<@{}>", target)), vec![]).await
}

/// A member leaving is only interesting if someone kicked them.
pub async fn handle_member_removal(
    ctx: &Context,
    data: &Data,
    guild_id: serenity::GuildId,
    user: &serenity::User,
) -> Result<()> {
    let action = Action::Member(MemberAction::Kick);
    let Some(actor) = resolve_executor(ctx, guild_id, action, Some(user.id.get())).await else {
        return Ok(());
    };

    track(ctx, data, &actor, ActionKind::Kick, Some(format!("<@{}>", user.id)), vec![]).await
}

pub async fn handle_ban_addition(
    ctx: &Context,
    data: &Data,
    guild_id: serenity::GuildId,
    user: &serenity::User,
) -> Result<()> {
    let action = Action::Member(MemberAction::BanAdd);
    let Some(actor) = resolve_executor(ctx, guild_id, action, Some(user.id.get())).await else {
        return Ok(());
    };

    track(ctx, data, &actor, ActionKind::Ban, Some(format!("<@{}>", user.id)), vec![]).await
}

pub async fn handle_ban_removal(
    ctx: &Context,
    data: &Data,
    guild_id: serenity::GuildId,
    user: &serenity::User,
) -> Result<()> {
    let action = Action::Member(MemberAction::BanRemove);
    let Some(actor) = resolve_executor(ctx, guild_id, action, Some(user.id.get())).await else {
        return Ok(());
    };

    track(ctx, data, &actor, ActionKind::Unban, Some(format!("<@{}>", user.id)), vec![]).await
}

// ============================================================================
// SERVER SETTINGS
// ============================================================================

// Guild and PartialGuild carry the same settings fields but share no trait.
macro_rules! guild_snapshot {
    ($g:expr) => {
        GuildSnapshot {
            name: $g.name.clone(),
            icon: $g.icon.as_ref().map(|h| h.to_string()),
            banner: $g.banner.clone(),
            splash: $g.splash.as_ref().map(|h| h.to_string()),
            description: $g.description.clone(),
            default_notifications: format!("{:?}", $g.default_message_notifications),
            explicit_content_filter: format!("{:?}", $g.explicit_content_filter),
            verification_level: format!("{:?}", $g.verification_level),
            afk_channel_id: $g.afk_metadata.as_ref().map(|m| m.afk_channel_id.get()),
            afk_timeout: $g
                .afk_metadata
                .as_ref()
                .map(|m| format!("{:?}", m.afk_timeout)),
            system_channel_id: $g.system_channel_id.map(|id| id.get()),
            rules_channel_id: $g.rules_channel_id.map(|id| id.get()),
            public_updates_channel_id: $g.public_updates_channel_id.map(|id| id.get()),
            preferred_locale: $g.preferred_locale.clone(),
            premium_progress_bar_enabled: $g.premium_progress_bar_enabled,
        }
    };
}

pub async fn handle_guild_update(
    ctx: &Context,
    data: &Data,
    old: Option<&serenity::Guild>,
    new: &serenity::PartialGuild,
) -> Result<()> {
    let changes = match old {
        Some(old) => {
            let changes = guild_snapshot!(old).changes_to(&guild_snapshot!(new));
            if changes.is_empty() {
                return Ok(());
            }
            changes
        }
        None => vec![],
    };

    let Some(actor) =
        resolve_executor(ctx, new.id, Action::GuildUpdate, Some(new.id.get())).await
    else {
        return Ok(());
    };

    track(
        ctx,
        data,
        &actor,
        ActionKind::ServerUpdate,
        Some(new.name.clone()),
        changes,
    )
    .await
}

// ============================================================================
// ANTI-BOT
// ============================================================================

pub async fn handle_member_join(
    ctx: &Context,
    data: &Data,
    member: &serenity::Member,
) -> Result<()> {
    if !member.user.bot {
        return Ok(());
    }

    let guild_id = member.guild_id;
    let bot_id = member.user.id.get();
    let action = Action::Member(MemberAction::BotAdd);
    let Some(executor) = resolve_executor(ctx, guild_id, action, Some(bot_id)).await else {
        return Ok(());
    };

    let BotDecision::Rejected {
        punishment,
        log_channel_id,
        color,
    } = data.protection.check_bot_addition(&executor, bot_id).await?
    else {
        return Ok(());
    };

    tracing::warn!(
        guild_id = guild_id.get(),
        executor_id = executor.user_id,
        bot_id,
        "Non-whitelisted bot added"
    );

    let moderator = SerenityModerator::new(ctx);
    punish(
        &moderator,
        executor.guild_id,
        executor.user_id,
        &executor.role_ids,
        &punishment,
    )
    .await;

    let notice = ProtectionNotice::BotRejected {
        executor_id: executor.user_id,
        executor_tag: executor.tag.clone(),
        bot_id,
        bot_tag: member.user.tag(),
        punishment: punishment.kind,
        color,
    };
    notify(&moderator, guild_id.get(), log_channel_id, &notice).await;

    if let Err(e) = moderator
        .kick(guild_id.get(), bot_id, "Bot not whitelisted")
        .await
    {
        tracing::error!("Failed to kick bot {}: {}", bot_id, e);
    }

    Ok(())
}

// ============================================================================
// ANTI-SPAM
// ============================================================================

pub async fn handle_message(ctx: &Context, data: &Data, msg: &serenity::Message) -> Result<()> {
    if msg.author.bot {
        return Ok(());
    }

    let (Some(guild_id), Some(member)) = (msg.guild_id, msg.member.as_ref()) else {
        return Ok(());
    };

    let author_roles: Vec<u64> = member.roles.iter().map(|r| r.get()).collect();
    let incoming = IncomingMessage {
        guild_id: guild_id.get(),
        channel_id: msg.channel_id.get(),
        message_id: msg.id.get(),
        author_id: msg.author.id.get(),
        author_roles: &author_roles,
        content: &msg.content,
    };

    let SpamVerdict::Spam {
        message_ids,
        duplicate_count,
    } = data.protection.check_message(&incoming).await?
    else {
        return Ok(());
    };

    let settings = data.protection.settings(guild_id.get()).await?;
    let Some(antispam) = settings.antispam.as_ref() else {
        return Ok(());
    };
    let action = &antispam.action;

    tracing::warn!(
        guild_id = guild_id.get(),
        user_id = msg.author.id.get(),
        channel_id = msg.channel_id.get(),
        messages = message_ids.len(),
        duplicate_count,
        "Anti-spam triggered"
    );

    let moderator = SerenityModerator::new(ctx);
    let result = match action.kind {
        SpamActionType::Timeout => {
            let timed_out = moderator
                .timeout_member(
                    guild_id.get(),
                    msg.author.id.get(),
                    action.duration,
                    &action.reason,
                )
                .await;
            match timed_out {
                Ok(()) => moderator
                    .delete_messages(msg.channel_id.get(), &message_ids)
                    .await,
                Err(e) => Err(e),
            }
        }
        SpamActionType::DeleteMessages => {
            moderator
                .delete_messages(msg.channel_id.get(), &message_ids)
                .await
        }
        SpamActionType::DisableChannel => {
            let locked = moderator
                .lock_channel(guild_id.get(), msg.channel_id.get())
                .await;
            if locked.is_ok() {
                schedule_unlock(ctx, guild_id.get(), msg.channel_id.get(), action.duration);
            }
            locked
        }
    };

    if let Err(e) = result {
        tracing::error!("Error taking anti-spam action: {}", e);
    }

    let notice = ProtectionNotice::SpamDetected {
        user_id: msg.author.id.get(),
        user_tag: msg.author.tag(),
        channel_id: msg.channel_id.get(),
        message_count: message_ids.len(),
        duplicate_count,
        time_window_ms: antispam.limits.time_window,
        action: action.kind,
        timeout_ms: (action.kind == SpamActionType::Timeout).then_some(action.duration),
    };
    notify(&moderator, guild_id.get(), settings.log_channel_id, &notice).await;

    Ok(())
}

fn schedule_unlock(ctx: &Context, guild_id: u64, channel_id: u64, after_ms: u64) {
    let moderator = SerenityModerator::new(ctx);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(after_ms)).await;
        match moderator.unlock_channel(guild_id, channel_id).await {
            Ok(()) => tracing::info!(guild_id, channel_id, "Channel unlocked after spam lock"),
            Err(e) => tracing::error!("Failed to unlock channel {}: {}", channel_id, e),
        }
    });
}

