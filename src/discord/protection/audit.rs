// Actor resolution through the guild audit log.
//
// Most gateway events don't say who did the thing, so we ask the audit log for
// the single most recent entry of the matching type. This is racy under heavy
// concurrent admin activity; freshness and target checks keep the worst
// misattributions out.

use crate::core::protection::Actor;
use ::serenity::model::guild::audit_log::Action;
use chrono::Utc;
use poise::serenity_prelude as serenity;

/// Entries older than this are assumed to belong to an earlier action.
const AUDIT_FRESHNESS_SECS: i64 = 15;

/// The fields of an audit log entry that attribution looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditEntry {
    pub executor_id: u64,
    pub target_id: Option<u64>,
    /// Unix seconds.
    pub created_at: i64,
}

/// Decide who `entry` blames, if anyone.
///
/// Rejects a missing entry, one older than 15 s at `now`, one about a
/// different target than `expected_target`, and the bot's own actions.
pub fn select_executor(
    entry: Option<AuditEntry>,
    expected_target: Option<u64>,
    bot_id: u64,
    now: i64,
) -> Option<u64> {
    let Some(entry) = entry else {
        tracing::debug!("No audit log entry found");
        return None;
    };

    let age = now - entry.created_at;
    if age > AUDIT_FRESHNESS_SECS {
        tracing::debug!(age, "Latest audit log entry is stale");
        return None;
    }

    if let (Some(expected), Some(found)) = (expected_target, entry.target_id) {
        if found != expected {
            tracing::debug!(expected, found, "Latest audit log entry targets something else");
            return None;
        }
    }

    // Our own punishments show up in the audit log too.
    if entry.executor_id == bot_id {
        return None;
    }

    Some(entry.executor_id)
}

/// Find the member responsible for the latest `action` in `guild_id`.
///
/// `target` is the id of the channel/role/user/guild the event was about.
/// Returns `None` (and logs why) when no usable entry exists; callers treat
/// that as "nothing to track".
pub async fn resolve_executor(
    ctx: &serenity::Context,
    guild_id: serenity::GuildId,
    action: Action,
    target: Option<u64>,
) -> Option<Actor> {
    let logs = match guild_id
        .audit_logs(&ctx.http, Some(action), None, None, Some(1))
        .await
    {
        Ok(logs) => logs,
        Err(e) => {
            tracing::warn!("Failed to fetch audit logs for guild {}: {}", guild_id, e);
            return None;
        }
    };

    let entry = logs.entries.first().map(|e| AuditEntry {
        executor_id: e.user_id.get(),
        target_id: e.target_id.map(|t| t.get()),
        created_at: e.id.created_at().unix_timestamp(),
    });
    let bot_id = ctx.cache.current_user().id.get();

    let executor_id = select_executor(entry, target, bot_id, Utc::now().timestamp())?;
    resolve_actor(ctx, guild_id, serenity::UserId::new(executor_id)).await
}

pub async fn resolve_actor(
    ctx: &serenity::Context,
    guild_id: serenity::GuildId,
    user_id: serenity::UserId,
) -> Option<Actor> {
    match guild_id.member(ctx, user_id).await {
        Ok(member) => Some(actor_from_member(&member)),
        Err(e) => {
            tracing::warn!(
                "Failed to fetch member {} in guild {}: {}",
                user_id,
                guild_id,
                e
            );
            None
        }
    }
}

pub fn actor_from_member(member: &serenity::Member) -> Actor {
    Actor {
        guild_id: member.guild_id.get(),
        user_id: member.user.id.get(),
        tag: member.user.tag(),
        role_ids: member.roles.iter().map(|r| r.get()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOT: u64 = 1;
    const NOW: i64 = 1_700_000_000;

    fn entry(executor_id: u64, target_id: Option<u64>, age_secs: i64) -> Option<AuditEntry> {
        Some(AuditEntry {
            executor_id,
            target_id,
            created_at: NOW - age_secs,
        })
    }

    #[test]
    fn test_fresh_matching_entry_names_executor() {
        assert_eq!(select_executor(entry(10, Some(50), 2), Some(50), BOT, NOW), Some(10));
        // Target unknown on either side: not checked.
        assert_eq!(select_executor(entry(10, None, 2), Some(50), BOT, NOW), Some(10));
        assert_eq!(select_executor(entry(10, Some(50), 2), None, BOT, NOW), Some(10));
    }

    #[test]
    fn test_no_entry_means_no_actor() {
        assert_eq!(select_executor(None, Some(50), BOT, NOW), None);
    }

    #[test]
    fn test_freshness_boundary() {
        assert_eq!(select_executor(entry(10, Some(50), 15), Some(50), BOT, NOW), Some(10));
        assert_eq!(select_executor(entry(10, Some(50), 16), Some(50), BOT, NOW), None);
    }

    #[test]
    fn test_entry_about_other_target_is_ignored() {
        // A member who left on their own: the latest kick entry is about someone else.
        assert_eq!(select_executor(entry(10, Some(51), 1), Some(50), BOT, NOW), None);
    }

    #[test]
    fn test_own_actions_are_ignored() {
        assert_eq!(select_executor(entry(BOT, Some(50), 0), Some(50), BOT, NOW), None);
    }
}
