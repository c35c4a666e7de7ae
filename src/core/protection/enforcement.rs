// Enforcement - turns a violation into a punishment plus a notification.
//
// Every step is best-effort: failures are logged and swallowed so a broken
// permission or a deleted log channel never bubbles up to the event loop.

use super::protection_models::{
    GuildChange, ProtectionNotice, PunitiveAction, PunitiveActionType, Violation,
};
use anyhow::Result;
use async_trait::async_trait;

/// Discord only accepts whole days (max 7) of message history to delete on ban.
const MAX_BAN_DELETE_DAYS: u8 = 7;

/// The member-management side of the platform, implemented by the Discord layer.
#[async_trait]
pub trait GuildModerator: Send + Sync {
    async fn remove_role(&self, guild_id: u64, user_id: u64, role_id: u64, reason: &str) -> Result<()>;

    async fn kick(&self, guild_id: u64, user_id: u64, reason: &str) -> Result<()>;

    async fn ban(&self, guild_id: u64, user_id: u64, delete_message_days: u8, reason: &str) -> Result<()>;

    /// Guild owning `channel_id`, or `None` when it is not a guild text channel.
    async fn text_channel_guild(&self, channel_id: u64) -> Result<Option<u64>>;

    /// Post a notice to a text channel.
    async fn notify(&self, channel_id: u64, notice: &ProtectionNotice) -> Result<()>;
}

/// What actually happened while enforcing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnforcementReport {
    pub punished: bool,
    pub notified: bool,
}

pub fn ban_delete_days(duration_secs: Option<u64>) -> u8 {
    duration_secs
        .map(|secs| (secs / 86_400).min(MAX_BAN_DELETE_DAYS as u64) as u8)
        .unwrap_or(0)
}

/// Apply `action` to a member who currently holds `held_roles`.
pub async fn punish<M: GuildModerator + ?Sized>(
    moderator: &M,
    guild_id: u64,
    user_id: u64,
    held_roles: &[u64],
    action: &PunitiveAction,
) -> bool {
    let result = match action.kind {
        PunitiveActionType::RemoveRoles => {
            strip_roles(moderator, guild_id, user_id, held_roles, action).await
        }
        PunitiveActionType::Kick => moderator.kick(guild_id, user_id, &action.reason).await,
        PunitiveActionType::Ban => {
            moderator
                .ban(guild_id, user_id, ban_delete_days(action.duration), &action.reason)
                .await
        }
    };

    match result {
        Ok(()) => {
            tracing::info!(guild_id, user_id, action = %action.kind, "Applied protection action");
            true
        }
        Err(e) => {
            tracing::error!("Error taking protection action against {}: {}", user_id, e);
            false
        }
    }
}

/// Remove each held role not in `ignored_roles`. A role that cannot be
/// removed (e.g. above the bot's highest role) does not stop the rest.
async fn strip_roles<M: GuildModerator + ?Sized>(
    moderator: &M,
    guild_id: u64,
    user_id: u64,
    held_roles: &[u64],
    action: &PunitiveAction,
) -> Result<()> {
    let mut failed = 0;
    for role_id in held_roles.iter().filter(|r| !action.ignored_roles.contains(r)) {
        if let Err(e) = moderator
            .remove_role(guild_id, user_id, *role_id, &action.reason)
            .await
        {
            tracing::warn!(guild_id, user_id, role_id, "Could not remove role: {}", e);
            failed += 1;
        }
    }

    if failed > 0 {
        anyhow::bail!("{} role(s) could not be removed", failed);
    }
    Ok(())
}

/// Send `notice` if a log channel is configured and it is a text channel of
/// `guild_id`.
pub async fn notify<M: GuildModerator + ?Sized>(
    moderator: &M,
    guild_id: u64,
    log_channel_id: Option<u64>,
    notice: &ProtectionNotice,
) -> bool {
    let Some(channel_id) = log_channel_id else {
        return false;
    };

    match moderator.text_channel_guild(channel_id).await {
        Ok(Some(owner)) if owner == guild_id => {}
        Ok(_) => {
            tracing::warn!(
                guild_id,
                channel_id,
                "Log channel is not a text channel of this guild, notice dropped"
            );
            return false;
        }
        Err(e) => {
            tracing::error!("Error resolving protection log channel {}: {}", channel_id, e);
            return false;
        }
    }

    match moderator.notify(channel_id, notice).await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!("Error sending protection log to {}: {}", channel_id, e);
            false
        }
    }
}

/// Punish the violating actor, then report it.
pub async fn enforce_violation<M: GuildModerator + ?Sized>(
    moderator: &M,
    violation: &Violation,
    target: Option<String>,
    changes: Vec<GuildChange>,
) -> EnforcementReport {
    let punished = punish(
        moderator,
        violation.guild_id,
        violation.actor_id,
        &violation.actor_roles,
        &violation.punishment,
    )
    .await;

    let notice = ProtectionNotice::LimitExceeded {
        violation: violation.clone(),
        target,
        changes,
    };
    let notified = notify(moderator, violation.guild_id, violation.log_channel_id, &notice).await;

    EnforcementReport { punished, notified }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::protection::protection_models::ActionKind;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum Call {
        RemoveRole(u64, u64, String),
        Kick(u64, String),
        Ban(u64, u8, String),
        Notify(u64),
    }

    /// Records every call; optionally fails punishments. Channel 900 is a
    /// text channel of guild 1 unless `channels` says otherwise.
    #[derive(Default)]
    pub(crate) struct MockModerator {
        pub(crate) calls: Mutex<Vec<Call>>,
        pub(crate) fail_punishments: bool,
        pub(crate) fail_roles: Vec<u64>,
        pub(crate) channels: HashMap<u64, u64>,
    }

    impl MockModerator {
        pub(crate) fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn outcome(&self) -> Result<()> {
            if self.fail_punishments {
                anyhow::bail!("Missing Permissions")
            }
            Ok(())
        }
    }

    #[async_trait]
    impl GuildModerator for MockModerator {
        async fn remove_role(&self, _guild_id: u64, user_id: u64, role_id: u64, reason: &str) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::RemoveRole(user_id, role_id, reason.to_string()));
            if self.fail_roles.contains(&role_id) {
                anyhow::bail!("Missing Permissions")
            }
            self.outcome()
        }

        async fn kick(&self, _guild_id: u64, user_id: u64, reason: &str) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Kick(user_id, reason.to_string()));
            self.outcome()
        }

        async fn ban(&self, _guild_id: u64, user_id: u64, days: u8, reason: &str) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Ban(user_id, days, reason.to_string()));
            self.outcome()
        }

        async fn text_channel_guild(&self, channel_id: u64) -> Result<Option<u64>> {
            if self.channels.is_empty() {
                return Ok((channel_id == 900).then_some(1));
            }
            Ok(self.channels.get(&channel_id).copied())
        }

        async fn notify(&self, channel_id: u64, _notice: &ProtectionNotice) -> Result<()> {
            self.calls.lock().unwrap().push(Call::Notify(channel_id));
            Ok(())
        }
    }

    fn violation(kind: PunitiveActionType, log_channel_id: Option<u64>) -> Violation {
        Violation {
            guild_id: 1,
            actor_id: 10,
            actor_tag: "mallory".to_string(),
            actor_roles: vec![100, 200, 300],
            kind: ActionKind::Kick,
            count: 3,
            limit: 3,
            time_window_ms: 60_000,
            punishment: PunitiveAction {
                kind,
                duration: Some(3 * 86_400),
                reason: "Mass kicking".to_string(),
                ignored_roles: vec![200],
            },
            log_channel_id,
            color: 0xFF0000,
        }
    }

    #[tokio::test]
    async fn test_kick_with_log_channel_sends_one_notice() {
        let moderator = MockModerator::default();
        let report = enforce_violation(
            &moderator,
            &violation(PunitiveActionType::Kick, Some(900)),
            None,
            vec![],
        )
        .await;

        assert_eq!(report, EnforcementReport { punished: true, notified: true });
        assert_eq!(
            moderator.calls(),
            vec![Call::Kick(10, "Mass kicking".to_string()), Call::Notify(900)]
        );
    }

    #[tokio::test]
    async fn test_kick_without_log_channel_still_kicks() {
        let moderator = MockModerator::default();
        let report = enforce_violation(
            &moderator,
            &violation(PunitiveActionType::Kick, None),
            None,
            vec![],
        )
        .await;

        assert_eq!(report, EnforcementReport { punished: true, notified: false });
        assert_eq!(moderator.calls(), vec![Call::Kick(10, "Mass kicking".to_string())]);
    }

    #[tokio::test]
    async fn test_remove_roles_keeps_ignored_roles() {
        let moderator = MockModerator::default();
        enforce_violation(
            &moderator,
            &violation(PunitiveActionType::RemoveRoles, None),
            None,
            vec![],
        )
        .await;

        assert_eq!(
            moderator.calls(),
            vec![
                Call::RemoveRole(10, 100, "Mass kicking".to_string()),
                Call::RemoveRole(10, 300, "Mass kicking".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_unremovable_role_does_not_stop_the_rest() {
        let moderator = MockModerator {
            fail_roles: vec![100],
            ..Default::default()
        };
        let report = enforce_violation(
            &moderator,
            &violation(PunitiveActionType::RemoveRoles, Some(900)),
            None,
            vec![],
        )
        .await;

        assert_eq!(report, EnforcementReport { punished: false, notified: true });
        assert_eq!(
            moderator.calls(),
            vec![
                Call::RemoveRole(10, 100, "Mass kicking".to_string()),
                Call::RemoveRole(10, 300, "Mass kicking".to_string()),
                Call::Notify(900),
            ]
        );
    }

    #[tokio::test]
    async fn test_log_channel_of_another_guild_gets_no_notice() {
        // Channel 900 lives in guild 2; the violation happened in guild 1.
        let moderator = MockModerator {
            channels: HashMap::from([(900, 2)]),
            ..Default::default()
        };
        let report = enforce_violation(
            &moderator,
            &violation(PunitiveActionType::Kick, Some(900)),
            None,
            vec![],
        )
        .await;

        assert_eq!(report, EnforcementReport { punished: true, notified: false });
        assert_eq!(moderator.calls(), vec![Call::Kick(10, "Mass kicking".to_string())]);
    }

    #[tokio::test]
    async fn test_non_text_log_channel_gets_no_notice() {
        let moderator = MockModerator::default();
        let notice = ProtectionNotice::LimitExceeded {
            violation: violation(PunitiveActionType::Kick, Some(901)),
            target: None,
            changes: vec![],
        };

        assert!(!notify(&moderator, 1, Some(901), &notice).await);
        assert!(notify(&moderator, 1, Some(900), &notice).await);
        assert_eq!(moderator.calls(), vec![Call::Notify(900)]);
    }

    #[tokio::test]
    async fn test_failed_punishment_still_notifies() {
        let moderator = MockModerator {
            fail_punishments: true,
            ..Default::default()
        };
        let report = enforce_violation(
            &moderator,
            &violation(PunitiveActionType::Ban, Some(900)),
            Some("#general".to_string()),
            vec![],
        )
        .await;

        assert_eq!(report, EnforcementReport { punished: false, notified: true });
        assert_eq!(
            moderator.calls(),
            vec![Call::Ban(10, 3, "Mass kicking".to_string()), Call::Notify(900)]
        );
    }

    #[test]
    fn test_ban_delete_days() {
        assert_eq!(ban_delete_days(None), 0);
        assert_eq!(ban_delete_days(Some(3_600)), 0);
        assert_eq!(ban_delete_days(Some(2 * 86_400)), 2);
        assert_eq!(ban_delete_days(Some(30 * 86_400)), 7);
    }
}
