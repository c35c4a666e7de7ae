// Protection service - decides whether a sensitive action crosses a limit.
//
// This service handles:
// - Rate-limited actions (channel, role, moderation, server, timeout)
// - Bot additions (anti-bot whitelist)
// - Message floods (anti-spam)
//
// NO Discord dependencies here. The Discord layer resolves who did what and
// applies whatever decision we return.

use super::action_tracker::ActionTracker;
use super::antispam::{SpamTracker, SpamVerdict};
use super::protection_models::{
    AbuseDecision, ActionKind, Actor, ActorBucket, BotDecision, ProtectionModule,
    ProtectionSettings, SkipReason, Violation,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use thiserror::Error;

/// Buckets are kept for this many windows after their last reset.
pub const RETENTION_WINDOWS: i32 = 3;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ProtectionError {
    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Module {0} is not configured")]
    NotConfigured(ProtectionModule),
}

// ============================================================================
// STORAGE TRAIT (PORT)
// ============================================================================

/// Where protection settings come from. Settings are per guild; a guild
/// without its own entry gets the store's default.
#[async_trait]
pub trait ProtectionSettingsStore: Send + Sync {
    /// Current settings snapshot for `guild_id`.
    async fn load(&self, guild_id: u64) -> Result<ProtectionSettings, SettingsError>;

    /// Replace the settings of `guild_id` only and persist them.
    async fn save(&self, guild_id: u64, settings: ProtectionSettings) -> Result<(), SettingsError>;
}

// ============================================================================
// CORE SERVICE
// ============================================================================

pub struct ProtectionService<S: ProtectionSettingsStore> {
    store: S,
    tracker: ActionTracker,
    spam: SpamTracker,
}

impl<S: ProtectionSettingsStore> ProtectionService<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            tracker: ActionTracker::new(),
            spam: SpamTracker::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn settings(&self, guild_id: u64) -> Result<ProtectionSettings, ProtectionError> {
        Ok(self.store.load(guild_id).await?)
    }

    pub async fn record_action(
        &self,
        actor: &Actor,
        kind: ActionKind,
    ) -> Result<AbuseDecision, ProtectionError> {
        self.record_action_at(actor, kind, Utc::now()).await
    }

    /// Count `kind` against `actor` and decide whether a limit was crossed.
    ///
    /// Disabled modules and exempt actors never reach the tracker, so they
    /// never get a bucket.
    pub async fn record_action_at(
        &self,
        actor: &Actor,
        kind: ActionKind,
        now: DateTime<Utc>,
    ) -> Result<AbuseDecision, ProtectionError> {
        let settings = self.store.load(actor.guild_id).await?;

        if !settings.enabled {
            return Ok(AbuseDecision::NotTracked(SkipReason::Disabled));
        }

        let module = match settings.module(kind.module()) {
            Some(m) if m.is_enabled() => m,
            _ => return Ok(AbuseDecision::NotTracked(SkipReason::Disabled)),
        };

        if actor.holds_any(&module.action.ignored_roles) {
            tracing::debug!(
                actor_id = actor.user_id,
                kind = %kind,
                "Actor is exempt from protection"
            );
            return Ok(AbuseDecision::NotTracked(SkipReason::Exempt));
        }

        let limit = module.limits.limit_for(kind);
        let outcome = self.tracker.record(
            actor.guild_id,
            actor.user_id,
            kind,
            module.limits.window(),
            limit,
            now,
        );

        match (outcome.violated, outcome.limit) {
            (true, Some(limit)) => {
                tracing::warn!(
                    guild_id = actor.guild_id,
                    actor_id = actor.user_id,
                    kind = %kind,
                    count = outcome.count,
                    limit,
                    "Protection limit exceeded"
                );
                Ok(AbuseDecision::Violation(Box::new(Violation {
                    guild_id: actor.guild_id,
                    actor_id: actor.user_id,
                    actor_tag: actor.tag.clone(),
                    actor_roles: actor.role_ids.clone(),
                    kind,
                    count: outcome.count,
                    limit,
                    time_window_ms: module.limits.time_window,
                    punishment: module.action.clone(),
                    log_channel_id: settings.log_channel_id,
                    color: module.color,
                })))
            }
            _ => Ok(AbuseDecision::Within {
                count: outcome.count,
                limit: outcome.limit,
            }),
        }
    }

    /// Decide what to do about a bot that `executor` just added.
    pub async fn check_bot_addition(
        &self,
        executor: &Actor,
        bot_id: u64,
    ) -> Result<BotDecision, ProtectionError> {
        let settings = self.store.load(executor.guild_id).await?;

        let antibot = match settings.antibot.as_ref() {
            Some(a) if settings.enabled && a.is_enabled() => a,
            _ => return Ok(BotDecision::Allowed),
        };

        if executor.holds_any(&antibot.action.ignored_roles)
            || antibot.whitelisted_bots.contains(&bot_id)
        {
            return Ok(BotDecision::Allowed);
        }

        Ok(BotDecision::Rejected {
            punishment: antibot.action.clone(),
            log_channel_id: settings.log_channel_id,
            color: antibot.color,
        })
    }

    pub async fn check_message(
        &self,
        message: &IncomingMessage<'_>,
    ) -> Result<SpamVerdict, ProtectionError> {
        self.check_message_at(message, Utc::now()).await
    }

    pub async fn check_message_at(
        &self,
        message: &IncomingMessage<'_>,
        now: DateTime<Utc>,
    ) -> Result<SpamVerdict, ProtectionError> {
        let settings = self.store.load(message.guild_id).await?;

        let antispam = match settings.antispam.as_ref() {
            Some(a) if settings.enabled && a.enabled => a,
            _ => return Ok(SpamVerdict::Clean),
        };

        if antispam.action.ignored_channels.contains(&message.channel_id)
            || message
                .author_roles
                .iter()
                .any(|r| antispam.action.ignored_roles.contains(r))
        {
            return Ok(SpamVerdict::Clean);
        }

        Ok(self.spam.observe(message, &antispam.limits, now))
    }

    /// Current buckets of a user, one per module that has seen them.
    pub fn inspect(&self, guild_id: u64, actor_id: u64) -> Vec<(ProtectionModule, ActorBucket)> {
        ProtectionModule::ALL
            .iter()
            .filter_map(|m| self.tracker.bucket(guild_id, *m, actor_id).map(|b| (*m, b)))
            .collect()
    }

    pub fn reset_actor(&self, guild_id: u64, actor_id: u64) -> usize {
        self.tracker.forget_actor(guild_id, actor_id)
    }

    pub fn tracked_buckets(&self) -> usize {
        self.tracker.len()
    }

    /// Evict idle buckets. Called periodically from a background task.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<usize, ProtectionError> {
        let mut guild_ids = self.tracker.guild_ids();
        guild_ids.extend(self.spam.guild_ids());

        let mut settings = HashMap::with_capacity(guild_ids.len());
        for guild_id in guild_ids {
            settings.insert(guild_id, self.store.load(guild_id).await?);
        }

        // Guilds first seen after the snapshot are left for the next sweep.
        let removed = self.tracker.sweep(now, |guild_id, module| match settings.get(&guild_id) {
            Some(s) => s
                .module(module)
                .map(|m| m.limits.window() * RETENTION_WINDOWS),
            None => Some(Duration::MAX),
        });
        let stale_spam = self.spam.sweep(now, |guild_id| match settings.get(&guild_id) {
            Some(s) => s
                .antispam
                .as_ref()
                .map(|a| Duration::milliseconds(a.limits.time_window as i64) * RETENTION_WINDOWS)
                .unwrap_or_else(Duration::zero),
            None => Duration::MAX,
        });
        Ok(removed + stale_spam)
    }

    pub async fn set_module_enabled(
        &self,
        guild_id: u64,
        module: ProtectionModule,
        enabled: bool,
    ) -> Result<(), ProtectionError> {
        let mut settings = self.store.load(guild_id).await?;
        let module_settings = settings
            .module_mut(module)
            .ok_or(ProtectionError::NotConfigured(module))?;
        module_settings.enabled = Some(enabled);
        Ok(self.store.save(guild_id, settings).await?)
    }

    pub async fn set_log_channel(
        &self,
        guild_id: u64,
        channel_id: Option<u64>,
    ) -> Result<(), ProtectionError> {
        let mut settings = self.store.load(guild_id).await?;
        settings.log_channel_id = channel_id;
        Ok(self.store.save(guild_id, settings).await?)
    }
}

/// A guild message, reduced to what anti-spam needs.
#[derive(Debug, Clone)]
pub struct IncomingMessage<'a> {
    pub guild_id: u64,
    pub channel_id: u64,
    pub message_id: u64,
    pub author_id: u64,
    pub author_roles: &'a [u64],
    pub content: &'a str,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::protection::protection_models::{
        ModuleLimits, ModuleSettings, PunitiveAction, PunitiveActionType,
    };
    use chrono::TimeZone;
    use std::sync::Mutex;

    /// In-memory settings store for testing: one default plus per-guild
    /// entries written by `save`.
    pub(crate) struct MockSettingsStore {
        default: ProtectionSettings,
        guilds: Mutex<HashMap<u64, ProtectionSettings>>,
    }

    impl MockSettingsStore {
        pub(crate) fn new(settings: ProtectionSettings) -> Self {
            Self {
                default: settings,
                guilds: Mutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl ProtectionSettingsStore for MockSettingsStore {
        async fn load(&self, guild_id: u64) -> Result<ProtectionSettings, SettingsError> {
            Ok(self
                .guilds
                .lock()
                .unwrap()
                .get(&guild_id)
                .cloned()
                .unwrap_or_else(|| self.default.clone()))
        }

        async fn save(&self, guild_id: u64, settings: ProtectionSettings) -> Result<(), SettingsError> {
            self.guilds.lock().unwrap().insert(guild_id, settings);
            Ok(())
        }
    }

    pub(crate) fn module_settings(limits: &[(&str, u32)], kind: PunitiveActionType) -> ModuleSettings {
        ModuleSettings {
            enabled: Some(true),
            limits: ModuleLimits {
                time_window: 60_000,
                per_kind: limits
                    .iter()
                    .map(|(k, v)| (k.to_string(), *v))
                    .collect::<HashMap<_, _>>(),
            },
            action: PunitiveAction {
                kind,
                duration: None,
                reason: "Too many actions".to_string(),
                ignored_roles: vec![500],
            },
            color: 0xFF0000,
        }
    }

    fn settings() -> ProtectionSettings {
        ProtectionSettings {
            enabled: true,
            log_channel_id: Some(900),
            channel: Some(module_settings(
                &[("createLimit", 3), ("deleteLimit", 3), ("updateLimit", 5)],
                PunitiveActionType::RemoveRoles,
            )),
            moderation: Some(module_settings(
                &[("kickLimit", 2), ("banLimit", 2), ("unbanLimit", 2)],
                PunitiveActionType::Kick,
            )),
            ..Default::default()
        }
    }

    fn actor(user_id: u64, roles: Vec<u64>) -> Actor {
        actor_in(1, user_id, roles)
    }

    fn actor_in(guild_id: u64, user_id: u64, roles: Vec<u64>) -> Actor {
        Actor {
            guild_id,
            user_id,
            tag: format!("user{}", user_id),
            role_ids: roles,
        }
    }

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000 + ms).unwrap()
    }

    #[tokio::test]
    async fn test_channel_delete_scenario() {
        let service = ProtectionService::new(MockSettingsStore::new(settings()));
        let mallory = actor(10, vec![]);

        let first = service
            .record_action_at(&mallory, ActionKind::ChannelDelete, at(0))
            .await
            .unwrap();
        let second = service
            .record_action_at(&mallory, ActionKind::ChannelDelete, at(10_000))
            .await
            .unwrap();
        let third = service
            .record_action_at(&mallory, ActionKind::ChannelDelete, at(20_000))
            .await
            .unwrap();

        assert_eq!(first, AbuseDecision::Within { count: 1, limit: Some(3) });
        assert_eq!(second, AbuseDecision::Within { count: 2, limit: Some(3) });
        match third {
            AbuseDecision::Violation(v) => {
                assert_eq!(v.count, 3);
                assert_eq!(v.limit, 3);
                assert_eq!(v.kind, ActionKind::ChannelDelete);
                assert_eq!(v.log_channel_id, Some(900));
                assert_eq!(v.time_window_ms, 60_000);
            }
            other => panic!("expected violation, got {:?}", other),
        }

        // Window elapsed: counter restarts at 1.
        let fourth = service
            .record_action_at(&mallory, ActionKind::ChannelDelete, at(70_000))
            .await
            .unwrap();
        assert_eq!(fourth, AbuseDecision::Within { count: 1, limit: Some(3) });
    }

    #[tokio::test]
    async fn test_exempt_actor_never_gets_bucket() {
        let service = ProtectionService::new(MockSettingsStore::new(settings()));
        let admin = actor(11, vec![1, 500]);

        for i in 0..20 {
            let decision = service
                .record_action_at(&admin, ActionKind::ChannelCreate, at(i))
                .await
                .unwrap();
            assert_eq!(decision, AbuseDecision::NotTracked(SkipReason::Exempt));
        }

        assert!(service.inspect(1, 11).is_empty());
    }

    #[tokio::test]
    async fn test_disabled_protection_is_noop() {
        let mut s = settings();
        s.enabled = false;
        let service = ProtectionService::new(MockSettingsStore::new(s));

        let decision = service
            .record_action_at(&actor(10, vec![]), ActionKind::Kick, at(0))
            .await
            .unwrap();

        assert_eq!(decision, AbuseDecision::NotTracked(SkipReason::Disabled));
        assert!(service.inspect(1, 10).is_empty());
    }

    #[tokio::test]
    async fn test_unconfigured_or_disabled_module_is_noop() {
        let mut s = settings();
        s.moderation.as_mut().unwrap().enabled = Some(false);
        let service = ProtectionService::new(MockSettingsStore::new(s));

        let kick = service
            .record_action_at(&actor(10, vec![]), ActionKind::Kick, at(0))
            .await
            .unwrap();
        let role = service
            .record_action_at(&actor(10, vec![]), ActionKind::RoleCreate, at(0))
            .await
            .unwrap();

        assert_eq!(kick, AbuseDecision::NotTracked(SkipReason::Disabled));
        assert_eq!(role, AbuseDecision::NotTracked(SkipReason::Disabled));
    }

    #[tokio::test]
    async fn test_actors_do_not_share_counters() {
        let service = ProtectionService::new(MockSettingsStore::new(settings()));
        let a = actor(20, vec![]);
        let b = actor(21, vec![]);

        service.record_action_at(&a, ActionKind::Ban, at(0)).await.unwrap();
        let a_second = service.record_action_at(&a, ActionKind::Ban, at(1)).await.unwrap();
        let b_first = service.record_action_at(&b, ActionKind::Ban, at(2)).await.unwrap();

        assert!(a_second.is_violation());
        assert_eq!(b_first, AbuseDecision::Within { count: 1, limit: Some(2) });
    }

    #[tokio::test]
    async fn test_toggle_module_persists() {
        let service = ProtectionService::new(MockSettingsStore::new(settings()));

        service
            .set_module_enabled(1, ProtectionModule::Channel, false)
            .await
            .unwrap();
        let reloaded = service.settings(1).await.unwrap();
        assert_eq!(reloaded.channel.unwrap().enabled, Some(false));

        let err = service
            .set_module_enabled(1, ProtectionModule::Server, true)
            .await
            .unwrap_err();
        assert!(matches!(err, ProtectionError::NotConfigured(ProtectionModule::Server)));
    }

    #[tokio::test]
    async fn test_guild_admin_changes_stay_in_their_guild() {
        let service = ProtectionService::new(MockSettingsStore::new(settings()));

        // An admin of guild 2 turns moderation off and points logs at their channel.
        service
            .set_module_enabled(2, ProtectionModule::Moderation, false)
            .await
            .unwrap();
        service.set_log_channel(2, Some(2_000)).await.unwrap();

        let other_guild = service.settings(1).await.unwrap();
        assert_eq!(other_guild.log_channel_id, Some(900));
        assert_eq!(other_guild.moderation.unwrap().enabled, Some(true));

        let mallory = actor_in(1, 10, vec![]);
        service.record_action_at(&mallory, ActionKind::Kick, at(0)).await.unwrap();
        match service
            .record_action_at(&mallory, ActionKind::Kick, at(1))
            .await
            .unwrap()
        {
            AbuseDecision::Violation(v) => assert_eq!(v.log_channel_id, Some(900)),
            other => panic!("expected violation, got {:?}", other),
        }

        let decision = service
            .record_action_at(&actor_in(2, 10, vec![]), ActionKind::Kick, at(2))
            .await
            .unwrap();
        assert_eq!(decision, AbuseDecision::NotTracked(SkipReason::Disabled));
    }

    #[tokio::test]
    async fn test_bot_whitelist() {
        let mut s = settings();
        s.antibot = Some(crate::core::protection::AntibotSettings {
            enabled: None,
            whitelisted_bots: vec![777],
            action: PunitiveAction {
                kind: PunitiveActionType::Ban,
                ..Default::default()
            },
            color: 1,
        });
        let service = ProtectionService::new(MockSettingsStore::new(s));

        let whitelisted = service.check_bot_addition(&actor(10, vec![]), 777).await.unwrap();
        let unknown = service.check_bot_addition(&actor(10, vec![]), 778).await.unwrap();

        assert_eq!(whitelisted, BotDecision::Allowed);
        assert!(matches!(unknown, BotDecision::Rejected { log_channel_id: Some(900), .. }));
    }

    #[tokio::test]
    async fn test_sweep_drops_idle_buckets() {
        let service = ProtectionService::new(MockSettingsStore::new(settings()));
        service
            .record_action_at(&actor(10, vec![]), ActionKind::Kick, at(0))
            .await
            .unwrap();
        service
            .record_action_at(&actor(11, vec![]), ActionKind::Kick, at(170_000))
            .await
            .unwrap();

        let removed = service.sweep(at(200_000)).await.unwrap();

        assert_eq!(removed, 1);
        assert!(service.inspect(1, 10).is_empty());
        assert_eq!(service.inspect(1, 11).len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_reads_each_guilds_settings() {
        let service = ProtectionService::new(MockSettingsStore::new(settings()));
        let mut longer = settings();
        longer.moderation.as_mut().unwrap().limits.time_window = 600_000;
        service.store().save(2, longer).await.unwrap();

        service
            .record_action_at(&actor_in(1, 10, vec![]), ActionKind::Kick, at(0))
            .await
            .unwrap();
        service
            .record_action_at(&actor_in(2, 10, vec![]), ActionKind::Kick, at(0))
            .await
            .unwrap();

        // Three one-minute windows have passed for guild 1, not for guild 2.
        let removed = service.sweep(at(200_000)).await.unwrap();

        assert_eq!(removed, 1);
        assert!(service.inspect(1, 10).is_empty());
        assert_eq!(service.inspect(2, 10).len(), 1);
    }
}
