// Bot presence. Shows at a glance whether protection is armed.

use poise::serenity_prelude as serenity;

pub fn show_protection_state(ctx: &serenity::Context, enabled: bool) {
    let (activity, status) = if enabled {
        (
            serenity::ActivityData::watching("over the server"),
            serenity::OnlineStatus::Online,
        )
    } else {
        (
            serenity::ActivityData::custom("Protection disabled"),
            serenity::OnlineStatus::Idle,
        )
    };
    ctx.set_presence(Some(activity), status);
}

/// Called once the gateway reports ready.
pub fn on_ready(ctx: &serenity::Context, protection_enabled: bool) {
    show_protection_state(ctx, protection_enabled);
}
