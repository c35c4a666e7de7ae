// Update events fire for changes we don't care about (e.g. a channel's last
// message id). These snapshots hold only the fields that count as a real
// change, so the Discord layer can ask "did anything relevant change?".

use super::protection_models::GuildChange;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSnapshot {
    pub name: String,
    pub kind: String,
    pub topic: Option<String>,
    /// (target id, allow bits, deny bits), sorted by target id.
    pub overwrites: Vec<(u64, u64, u64)>,
}

impl ChannelSnapshot {
    pub fn differs_from(&self, other: &ChannelSnapshot) -> bool {
        self != other
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleSnapshot {
    pub name: String,
    pub color: u32,
    pub permissions: u64,
    pub position: u16,
    pub hoist: bool,
    pub mentionable: bool,
}

impl RoleSnapshot {
    pub fn differs_from(&self, other: &RoleSnapshot) -> bool {
        self != other
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuildSnapshot {
    pub name: String,
    pub icon: Option<String>,
    pub banner: Option<String>,
    pub splash: Option<String>,
    pub description: Option<String>,
    pub default_notifications: String,
    pub explicit_content_filter: String,
    pub verification_level: String,
    pub afk_channel_id: Option<u64>,
    pub afk_timeout: Option<String>,
    pub system_channel_id: Option<u64>,
    pub rules_channel_id: Option<u64>,
    pub public_updates_channel_id: Option<u64>,
    pub preferred_locale: String,
    pub premium_progress_bar_enabled: bool,
}

impl GuildSnapshot {
    /// Every tracked setting that differs between `self` (old) and `new`.
    pub fn changes_to(&self, new: &GuildSnapshot) -> Vec<GuildChange> {
        let mut changes = Vec::new();
        let mut check = |changed: bool, change: GuildChange| {
            if changed {
                changes.push(change);
            }
        };

        check(self.name != new.name, GuildChange::Name);
        check(self.icon != new.icon, GuildChange::Icon);
        check(self.banner != new.banner, GuildChange::Banner);
        check(self.splash != new.splash, GuildChange::Splash);
        check(self.description != new.description, GuildChange::Description);
        check(
            self.default_notifications != new.default_notifications,
            GuildChange::DefaultNotifications,
        );
        check(
            self.explicit_content_filter != new.explicit_content_filter,
            GuildChange::ExplicitContentFilter,
        );
        check(
            self.verification_level != new.verification_level,
            GuildChange::VerificationLevel,
        );
        check(self.afk_channel_id != new.afk_channel_id, GuildChange::AfkChannel);
        check(self.afk_timeout != new.afk_timeout, GuildChange::AfkTimeout);
        check(
            self.system_channel_id != new.system_channel_id,
            GuildChange::SystemChannel,
        );
        check(self.rules_channel_id != new.rules_channel_id, GuildChange::RulesChannel);
        check(
            self.public_updates_channel_id != new.public_updates_channel_id,
            GuildChange::PublicUpdatesChannel,
        );
        check(
            self.preferred_locale != new.preferred_locale,
            GuildChange::PreferredLocale,
        );
        check(
            self.premium_progress_bar_enabled != new.premium_progress_bar_enabled,
            GuildChange::PremiumProgressBar,
        );

        changes
    }
}

/// Roles present in `new` but not in `old`, and roles present in `old` but
/// not in `new`.
pub fn role_diff(old: &[u64], new: &[u64]) -> (Vec<u64>, Vec<u64>) {
    let added = new.iter().filter(|r| !old.contains(r)).copied().collect();
    let removed = old.iter().filter(|r| !new.contains(r)).copied().collect();
    (added, removed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutChange {
    Applied,
    Lifted,
    Unchanged,
}

/// Compare `communication_disabled_until` (unix seconds) before and after a
/// member update. A timeout in the past is the same as no timeout.
pub fn timeout_change(old: Option<i64>, new: Option<i64>, now: i64) -> TimeoutChange {
    let was_active = old.is_some_and(|t| t > now);
    let is_active = new.is_some_and(|t| t > now);

    match (was_active, is_active) {
        (false, true) => TimeoutChange::Applied,
        (true, true) if old != new => TimeoutChange::Applied,
        (true, false) => TimeoutChange::Lifted,
        _ => TimeoutChange::Unchanged,
    }
}
