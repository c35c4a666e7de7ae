// Protection domain models - action kinds, settings and decisions.
//
// These are pure domain types with no Discord dependencies.
// The Discord layer converts gateway payloads into these and back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

// ============================================================================
// MODULES AND ACTION KINDS
// ============================================================================

/// One of the rate-limited protection modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProtectionModule {
    Channel,
    Role,
    Moderation,
    Server,
    Timeout,
}

impl ProtectionModule {
    pub const ALL: [ProtectionModule; 5] = [
        ProtectionModule::Channel,
        ProtectionModule::Role,
        ProtectionModule::Moderation,
        ProtectionModule::Server,
        ProtectionModule::Timeout,
    ];

    /// The action kinds whose counters live in this module's buckets.
    pub fn kinds(&self) -> &'static [ActionKind] {
        match self {
            ProtectionModule::Channel => &[
                ActionKind::ChannelCreate,
                ActionKind::ChannelDelete,
                ActionKind::ChannelUpdate,
            ],
            ProtectionModule::Role => &[
                ActionKind::RoleCreate,
                ActionKind::RoleDelete,
                ActionKind::RoleUpdate,
                ActionKind::RoleAdd,
                ActionKind::RoleRemove,
            ],
            ProtectionModule::Moderation => {
                &[ActionKind::Kick, ActionKind::Ban, ActionKind::Unban]
            }
            ProtectionModule::Server => &[ActionKind::ServerUpdate],
            ProtectionModule::Timeout => &[ActionKind::Timeout, ActionKind::Untimeout],
        }
    }
}

impl std::fmt::Display for ProtectionModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtectionModule::Channel => write!(f, "Channel"),
            ProtectionModule::Role => write!(f, "Role"),
            ProtectionModule::Moderation => write!(f, "Moderation"),
            ProtectionModule::Server => write!(f, "Server"),
            ProtectionModule::Timeout => write!(f, "Timeout"),
        }
    }
}

/// A sensitive guild-management action that is counted against its actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ActionKind {
    ChannelCreate,
    ChannelDelete,
    ChannelUpdate,
    RoleCreate,
    RoleDelete,
    RoleUpdate,
    RoleAdd,
    RoleRemove,
    Kick,
    Ban,
    Unban,
    ServerUpdate,
    Timeout,
    Untimeout,
}

impl ActionKind {
    pub fn module(&self) -> ProtectionModule {
        match self {
            ActionKind::ChannelCreate | ActionKind::ChannelDelete | ActionKind::ChannelUpdate => {
                ProtectionModule::Channel
            }
            ActionKind::RoleCreate
            | ActionKind::RoleDelete
            | ActionKind::RoleUpdate
            | ActionKind::RoleAdd
            | ActionKind::RoleRemove => ProtectionModule::Role,
            ActionKind::Kick | ActionKind::Ban | ActionKind::Unban => ProtectionModule::Moderation,
            ActionKind::ServerUpdate => ProtectionModule::Server,
            ActionKind::Timeout | ActionKind::Untimeout => ProtectionModule::Timeout,
        }
    }

    /// Name of the limit entry inside the module's `limits` object.
    pub fn limit_key(&self) -> &'static str {
        match self {
            ActionKind::ChannelCreate | ActionKind::RoleCreate => "createLimit",
            ActionKind::ChannelDelete | ActionKind::RoleDelete => "deleteLimit",
            ActionKind::ChannelUpdate | ActionKind::RoleUpdate | ActionKind::ServerUpdate => {
                "updateLimit"
            }
            ActionKind::RoleAdd => "addLimit",
            ActionKind::RoleRemove => "removeLimit",
            ActionKind::Kick => "kickLimit",
            ActionKind::Ban => "banLimit",
            ActionKind::Unban => "unbanLimit",
            ActionKind::Timeout => "timeoutLimit",
            ActionKind::Untimeout => "untimeoutLimit",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ActionKind::ChannelCreate => "Channel Create",
            ActionKind::ChannelDelete => "Channel Delete",
            ActionKind::ChannelUpdate => "Channel Update",
            ActionKind::RoleCreate => "Role Create",
            ActionKind::RoleDelete => "Role Delete",
            ActionKind::RoleUpdate => "Role Update",
            ActionKind::RoleAdd => "Role Add",
            ActionKind::RoleRemove => "Role Remove",
            ActionKind::Kick => "Kick",
            ActionKind::Ban => "Ban",
            ActionKind::Unban => "Unban",
            ActionKind::ServerUpdate => "Server Update",
            ActionKind::Timeout => "Timeout",
            ActionKind::Untimeout => "Untimeout",
        };
        write!(f, "{}", label)
    }
}

// ============================================================================
// SETTINGS
// ============================================================================
// Mirrors the `protection` section of settings.json. Field names stay
// camelCase on the wire so existing settings files keep working.

/// What happens to an actor that crosses a limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PunitiveActionType {
    RemoveRoles,
    Kick,
    Ban,
}

impl std::fmt::Display for PunitiveActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PunitiveActionType::RemoveRoles => write!(f, "Remove Roles"),
            PunitiveActionType::Kick => write!(f, "Kick"),
            PunitiveActionType::Ban => write!(f, "Ban"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PunitiveAction {
    #[serde(rename = "type")]
    pub kind: PunitiveActionType,
    /// For bans: how many seconds of the actor's message history to delete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(default = "default_reason")]
    pub reason: String,
    #[serde(default, with = "snowflake_list")]
    pub ignored_roles: Vec<u64>,
}

impl Default for PunitiveAction {
    fn default() -> Self {
        Self {
            kind: PunitiveActionType::RemoveRoles,
            duration: None,
            reason: default_reason(),
            ignored_roles: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleLimits {
    /// Window length in milliseconds.
    #[serde(deserialize_with = "window_ms")]
    pub time_window: u64,
    /// `createLimit`, `deleteLimit`, ... keyed by `ActionKind::limit_key`.
    #[serde(flatten)]
    pub per_kind: HashMap<String, u32>,
}

impl ModuleLimits {
    pub fn limit_for(&self, kind: ActionKind) -> Option<u32> {
        self.per_kind.get(kind.limit_key()).copied()
    }

    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.time_window as i64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleSettings {
    /// A missing flag means enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    pub limits: ModuleLimits,
    #[serde(default)]
    pub action: PunitiveAction,
    #[serde(default = "default_color")]
    pub color: u32,
}

impl ModuleSettings {
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AntibotSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, with = "snowflake_list")]
    pub whitelisted_bots: Vec<u64>,
    #[serde(default)]
    pub action: PunitiveAction,
    #[serde(default = "default_color")]
    pub color: u32,
}

impl AntibotSettings {
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SpamActionType {
    Timeout,
    DeleteMessages,
    DisableChannel,
}

impl std::fmt::Display for SpamActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpamActionType::Timeout => write!(f, "Timeout"),
            SpamActionType::DeleteMessages => write!(f, "Delete Messages"),
            SpamActionType::DisableChannel => write!(f, "Disable Channel"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AntispamLimits {
    #[serde(deserialize_with = "window_ms")]
    pub time_window: u64,
    pub message_limit: u32,
    pub duplicate_limit: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AntispamAction {
    #[serde(rename = "type")]
    pub kind: SpamActionType,
    /// Timeout length or channel lock length, in milliseconds.
    #[serde(default)]
    pub duration: u64,
    #[serde(default = "default_reason")]
    pub reason: String,
    #[serde(default, with = "snowflake_list")]
    pub ignored_roles: Vec<u64>,
    #[serde(default, with = "snowflake_list")]
    pub ignored_channels: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AntispamSettings {
    /// Unlike the rate-limited modules, anti-spam is opt-in.
    #[serde(default)]
    pub enabled: bool,
    pub limits: AntispamLimits,
    pub action: AntispamAction,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtectionSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, with = "snowflake_opt", skip_serializing_if = "Option::is_none")]
    pub log_channel_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<ModuleSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<ModuleSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moderation: Option<ModuleSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<ModuleSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<ModuleSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub antibot: Option<AntibotSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub antispam: Option<AntispamSettings>,
}

impl ProtectionSettings {
    pub fn module(&self, module: ProtectionModule) -> Option<&ModuleSettings> {
        match module {
            ProtectionModule::Channel => self.channel.as_ref(),
            ProtectionModule::Role => self.role.as_ref(),
            ProtectionModule::Moderation => self.moderation.as_ref(),
            ProtectionModule::Server => self.server.as_ref(),
            ProtectionModule::Timeout => self.timeout.as_ref(),
        }
    }

    pub fn module_mut(&mut self, module: ProtectionModule) -> Option<&mut ModuleSettings> {
        match module {
            ProtectionModule::Channel => self.channel.as_mut(),
            ProtectionModule::Role => self.role.as_mut(),
            ProtectionModule::Moderation => self.moderation.as_mut(),
            ProtectionModule::Server => self.server.as_mut(),
            ProtectionModule::Timeout => self.timeout.as_mut(),
        }
    }
}

/// Top-level settings file.
///
/// `protection` is the default for every guild; `guilds` holds complete
/// per-guild replacements, written by the slash commands of that guild.
/// Other sections are preserved untouched when the file is written back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsFile {
    #[serde(default)]
    pub protection: ProtectionSettings,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub guilds: BTreeMap<u64, ProtectionSettings>,
    #[serde(flatten)]
    pub other: serde_json::Map<String, serde_json::Value>,
}

impl SettingsFile {
    /// Effective settings for one guild.
    pub fn for_guild(&self, guild_id: u64) -> &ProtectionSettings {
        self.guilds.get(&guild_id).unwrap_or(&self.protection)
    }
}

fn default_reason() -> String {
    "Protection limit exceeded".to_string()
}

fn default_color() -> u32 {
    0xFF0000
}

/// Longest accepted window: one year.
pub const MAX_TIME_WINDOW_MS: u64 = 365 * 24 * 60 * 60 * 1000;

fn window_ms<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let ms = u64::deserialize(deserializer)?;
    if ms > MAX_TIME_WINDOW_MS {
        return Err(serde::de::Error::custom(format!(
            "timeWindow {ms} exceeds the maximum of {MAX_TIME_WINDOW_MS} ms"
        )));
    }
    Ok(ms)
}

// Discord snowflakes arrive as strings in hand-written settings files, but we
// accept plain numbers as well.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawSnowflake {
    Text(String),
    Number(u64),
}

impl RawSnowflake {
    fn parse<E: serde::de::Error>(self) -> Result<u64, E> {
        let id = match self {
            RawSnowflake::Number(n) => n,
            RawSnowflake::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| E::custom(format!("invalid snowflake: {s}")))?,
        };
        // Zero is never a valid Discord id.
        if id == 0 {
            return Err(E::custom("invalid snowflake: 0"));
        }
        Ok(id)
    }
}

mod snowflake_list {
    use super::RawSnowflake;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ids: &[u64], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(ids.iter().map(|id| id.to_string()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u64>, D::Error> {
        Vec::<RawSnowflake>::deserialize(deserializer)?
            .into_iter()
            .map(RawSnowflake::parse)
            .collect()
    }
}

mod snowflake_opt {
    use super::RawSnowflake;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(id: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
        match id {
            Some(id) => serializer.serialize_some(&id.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<u64>, D::Error> {
        match Option::<RawSnowflake>::deserialize(deserializer)? {
            Some(raw) => raw.parse().map(Some),
            None => Ok(None),
        }
    }
}

// ============================================================================
// RUNTIME TYPES
// ============================================================================

/// The member held responsible for an action, already resolved by the
/// Discord layer.
#[derive(Debug, Clone)]
pub struct Actor {
    pub guild_id: u64,
    pub user_id: u64,
    pub tag: String,
    pub role_ids: Vec<u64>,
}

impl Actor {
    pub fn holds_any(&self, roles: &[u64]) -> bool {
        self.role_ids.iter().any(|r| roles.contains(r))
    }
}

/// Per-actor, per-module counters plus window start.
#[derive(Debug, Clone, PartialEq)]
pub struct ActorBucket {
    pub counters: BTreeMap<ActionKind, u32>,
    pub last_reset: DateTime<Utc>,
}

impl ActorBucket {
    pub fn new(module: ProtectionModule, now: DateTime<Utc>) -> Self {
        Self {
            counters: module.kinds().iter().map(|k| (*k, 0)).collect(),
            last_reset: now,
        }
    }

    pub fn count(&self, kind: ActionKind) -> u32 {
        self.counters.get(&kind).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Protection globally off, module off, or module not configured.
    Disabled,
    /// The actor holds one of the module's ignored roles.
    Exempt,
}

/// Everything the enforcement step needs to punish and report an actor.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub guild_id: u64,
    pub actor_id: u64,
    pub actor_tag: String,
    pub actor_roles: Vec<u64>,
    pub kind: ActionKind,
    pub count: u32,
    pub limit: u32,
    pub time_window_ms: u64,
    pub punishment: PunitiveAction,
    pub log_channel_id: Option<u64>,
    pub color: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AbuseDecision {
    NotTracked(SkipReason),
    Within { count: u32, limit: Option<u32> },
    Violation(Box<Violation>),
}

impl AbuseDecision {
    pub fn is_violation(&self) -> bool {
        matches!(self, AbuseDecision::Violation(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BotDecision {
    Allowed,
    Rejected {
        punishment: PunitiveAction,
        log_channel_id: Option<u64>,
        color: u32,
    },
}

/// A guild setting that changed in a server update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuildChange {
    Name,
    Icon,
    Banner,
    Splash,
    Description,
    DefaultNotifications,
    ExplicitContentFilter,
    VerificationLevel,
    AfkChannel,
    AfkTimeout,
    SystemChannel,
    RulesChannel,
    PublicUpdatesChannel,
    PreferredLocale,
    PremiumProgressBar,
}

impl std::fmt::Display for GuildChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            GuildChange::Name => "Name",
            GuildChange::Icon => "Icon",
            GuildChange::Banner => "Banner",
            GuildChange::Splash => "Invite Splash",
            GuildChange::Description => "Description",
            GuildChange::DefaultNotifications => "Default Notifications",
            GuildChange::ExplicitContentFilter => "Explicit Content Filter",
            GuildChange::VerificationLevel => "Verification Level",
            GuildChange::AfkChannel => "AFK Channel",
            GuildChange::AfkTimeout => "AFK Timeout",
            GuildChange::SystemChannel => "System Channel",
            GuildChange::RulesChannel => "Rules Channel",
            GuildChange::PublicUpdatesChannel => "Public Updates Channel",
            GuildChange::PreferredLocale => "Preferred Locale",
            GuildChange::PremiumProgressBar => "Boost Progress Bar",
        };
        write!(f, "{}", label)
    }
}

/// Domain description of a protection notification. The Discord layer turns
/// this into an embed.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtectionNotice {
    LimitExceeded {
        violation: Violation,
        /// Name of the channel/role or mention of the member that was acted on.
        target: Option<String>,
        changes: Vec<GuildChange>,
    },
    BotRejected {
        executor_id: u64,
        executor_tag: String,
        bot_id: u64,
        bot_tag: String,
        punishment: PunitiveActionType,
        color: u32,
    },
    SpamDetected {
        user_id: u64,
        user_tag: String,
        channel_id: u64,
        message_count: usize,
        duplicate_count: u32,
        time_window_ms: u64,
        action: SpamActionType,
        timeout_ms: Option<u64>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_full_settings_file() {
        let raw = r#"{
            "protection": {
                "enabled": true,
                "logChannelId": "1100000000000000001",
                "channel": {
                    "enabled": true,
                    "limits": { "timeWindow": 60000, "createLimit": 3, "deleteLimit": 3, "updateLimit": 5 },
                    "action": { "type": "ban", "duration": 86400, "reason": "Nuke attempt", "ignoredRoles": ["42", 43] },
                    "color": 255
                },
                "moderation": {
                    "limits": { "timeWindow": 30000, "kickLimit": 2 },
                    "action": { "type": "kick" }
                }
            },
            "logs": { "enabled": false }
        }"#;

        let file: SettingsFile = serde_json::from_str(raw).unwrap();
        let protection = &file.protection;

        assert!(protection.enabled);
        assert_eq!(protection.log_channel_id, Some(1100000000000000001));

        let channel = protection.module(ProtectionModule::Channel).unwrap();
        assert_eq!(channel.limits.limit_for(ActionKind::ChannelDelete), Some(3));
        assert_eq!(channel.limits.limit_for(ActionKind::ChannelUpdate), Some(5));
        assert_eq!(channel.action.kind, PunitiveActionType::Ban);
        assert_eq!(channel.action.duration, Some(86400));
        assert_eq!(channel.action.ignored_roles, vec![42, 43]);
        assert_eq!(channel.color, 255);

        let moderation = protection.module(ProtectionModule::Moderation).unwrap();
        assert!(moderation.is_enabled());
        assert_eq!(moderation.limits.limit_for(ActionKind::Ban), None);
        assert_eq!(moderation.action.reason, "Protection limit exceeded");

        assert!(protection.module(ProtectionModule::Role).is_none());
        assert!(file.other.contains_key("logs"));
    }

    #[test]
    fn test_rejects_malformed_snowflake() {
        let raw = r#"{ "enabled": true, "logChannelId": "not-a-number" }"#;
        assert!(serde_json::from_str::<ProtectionSettings>(raw).is_err());

        let zero = r#"{ "enabled": true, "logChannelId": 0 }"#;
        assert!(serde_json::from_str::<ProtectionSettings>(zero).is_err());
    }

    #[test]
    fn test_rejects_oversized_time_window() {
        let huge = format!(
            r#"{{ "timeWindow": {}, "kickLimit": 2 }}"#,
            u64::MAX - 5
        );
        assert!(serde_json::from_str::<ModuleLimits>(&huge).is_err());

        let spam = r#"{ "timeWindow": 99999999999999999, "messageLimit": 5, "duplicateLimit": 3 }"#;
        assert!(serde_json::from_str::<AntispamLimits>(spam).is_err());

        let year = format!(r#"{{ "timeWindow": {} }}"#, MAX_TIME_WINDOW_MS);
        let limits: ModuleLimits = serde_json::from_str(&year).unwrap();
        assert!(limits.window() > chrono::Duration::zero());
    }

    #[test]
    fn test_guild_entry_replaces_default_section() {
        let raw = r#"{
            "protection": { "enabled": true },
            "guilds": { "2": { "enabled": false, "logChannelId": "20" } }
        }"#;
        let file: SettingsFile = serde_json::from_str(raw).unwrap();

        assert!(file.for_guild(1).enabled);
        assert!(!file.for_guild(2).enabled);
        assert_eq!(file.for_guild(2).log_channel_id, Some(20));
        assert!(!file.other.contains_key("guilds"));
    }

    #[test]
    fn test_every_kind_belongs_to_its_module() {
        for module in ProtectionModule::ALL {
            for kind in module.kinds() {
                assert_eq!(kind.module(), module);
            }
        }
    }

    #[test]
    fn test_new_bucket_has_zeroed_module_counters() {
        let bucket = ActorBucket::new(ProtectionModule::Role, Utc::now());
        assert_eq!(bucket.counters.len(), 5);
        assert!(bucket.counters.values().all(|c| *c == 0));
    }
}
