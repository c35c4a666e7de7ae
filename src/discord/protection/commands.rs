use crate::core::protection::{ProtectionModule, ProtectionSettings};
use crate::discord::{Context, Error};
use poise::serenity_prelude as serenity;

#[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
pub enum ModuleChoice {
    Channel,
    Role,
    Moderation,
    Server,
    Timeout,
}

impl From<ModuleChoice> for ProtectionModule {
    fn from(choice: ModuleChoice) -> Self {
        match choice {
            ModuleChoice::Channel => ProtectionModule::Channel,
            ModuleChoice::Role => ProtectionModule::Role,
            ModuleChoice::Moderation => ProtectionModule::Moderation,
            ModuleChoice::Server => ProtectionModule::Server,
            ModuleChoice::Timeout => ProtectionModule::Timeout,
        }
    }
}

/// Manage anti-abuse protection.
#[poise::command(
    slash_command,
    guild_only,
    required_permissions = "ADMINISTRATOR",
    subcommands("status", "enable", "disable", "set_log_channel", "inspect", "reset")
)]
pub async fn protection(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

fn module_status(settings: &ProtectionSettings, module: ProtectionModule) -> String {
    match settings.module(module) {
        None => "Not configured".to_string(),
        Some(m) if !m.is_enabled() => "Disabled".to_string(),
        Some(m) => {
            let mut limits: Vec<String> = module
                .kinds()
                .iter()
                .filter_map(|k| m.limits.limit_for(*k).map(|l| format!("{} {}", k, l)))
                .collect();
            if limits.is_empty() {
                limits.push("no limits".to_string());
            }
            format!(
                "Enabled · {} per {}s · {}",
                limits.join(", "),
                m.limits.time_window / 1000,
                m.action.kind
            )
        }
    }
}

/// Show the current protection configuration.
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn status(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be in a guild")?.get();
    let settings = ctx.data().protection.settings(guild_id).await?;

    let mut embed = serenity::CreateEmbed::default()
        .title("Protection Configuration")
        .color(serenity::Color::BLURPLE)
        .field(
            "Status",
            if settings.enabled { "Enabled" } else { "Disabled" },
            false,
        )
        .field(
            "Log Channel",
            settings
                .log_channel_id
                .map(|id| format!("<#{}>", id))
                .unwrap_or_else(|| "Not set".to_string()),
            false,
        );

    for module in ProtectionModule::ALL {
        embed = embed.field(module.to_string(), module_status(&settings, module), false);
    }

    let antibot = match settings.antibot.as_ref() {
        Some(a) if a.is_enabled() => format!(
            "Enabled · {} whitelisted · {}",
            a.whitelisted_bots.len(),
            a.action.kind
        ),
        Some(_) => "Disabled".to_string(),
        None => "Not configured".to_string(),
    };
    let antispam = match settings.antispam.as_ref() {
        Some(a) if a.enabled => format!(
            "Enabled · {} messages / {} duplicates per {}s · {}",
            a.limits.message_limit,
            a.limits.duplicate_limit,
            a.limits.time_window / 1000,
            a.action.kind
        ),
        Some(_) => "Disabled".to_string(),
        None => "Not configured".to_string(),
    };

    embed = embed
        .field("Anti-Bot", antibot, false)
        .field("Anti-Spam", antispam, false)
        .footer(serenity::CreateEmbedFooter::new(format!(
            "Guild ID: {}",
            guild_id
        )))
        .timestamp(serenity::Timestamp::now());

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Enable a protection module.
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn enable(
    ctx: Context<'_>,
    #[description = "Module to enable"] module: ModuleChoice,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be in a guild")?.get();
    let module = ProtectionModule::from(module);
    ctx.data()
        .protection
        .set_module_enabled(guild_id, module, true)
        .await?;
    ctx.say(format!("✅ {} protection enabled.", module)).await?;
    Ok(())
}

/// Disable a protection module.
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn disable(
    ctx: Context<'_>,
    #[description = "Module to disable"] module: ModuleChoice,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be in a guild")?.get();
    let module = ProtectionModule::from(module);
    ctx.data()
        .protection
        .set_module_enabled(guild_id, module, false)
        .await?;
    ctx.say(format!("🛑 {} protection disabled.", module)).await?;
    Ok(())
}

/// Why `channel` cannot receive notices for `guild_id`, if it can't.
fn log_channel_problem(channel: &serenity::GuildChannel, guild_id: u64) -> Option<&'static str> {
    if channel.guild_id.get() != guild_id {
        Some("That channel belongs to another server.")
    } else if channel.kind != serenity::ChannelType::Text {
        Some("Protection notices can only go to a text channel.")
    } else {
        None
    }
}

/// Select the text channel protection notices go to.
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn set_log_channel(
    ctx: Context<'_>,
    #[description = "Channel to log to"]
    #[channel_types("Text")]
    channel: serenity::GuildChannel,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be in a guild")?.get();
    if let Some(problem) = log_channel_problem(&channel, guild_id) {
        ctx.say(format!("❌ {}", problem)).await?;
        return Ok(());
    }

    let channel_id = channel.id.get();
    ctx.data()
        .protection
        .set_log_channel(guild_id, Some(channel_id))
        .await?;
    ctx.say(format!("✅ Protection log channel set to <#{}>.", channel_id))
        .await?;
    Ok(())
}

/// Show a member's current action counters.
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn inspect(
    ctx: Context<'_>,
    #[description = "Member to inspect"] user: serenity::User,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be in a guild")?.get();
    let buckets = ctx.data().protection.inspect(guild_id, user.id.get());

    if buckets.is_empty() {
        ctx.say(format!("{} has no tracked actions.", user.tag()))
            .await?;
        return Ok(());
    }

    let mut embed = serenity::CreateEmbed::default()
        .title(format!("Tracked actions for {}", user.tag()))
        .color(serenity::Color::BLURPLE);

    for (module, bucket) in buckets {
        let counters = bucket
            .counters
            .iter()
            .map(|(kind, count)| format!("{}: {}", kind, count))
            .collect::<Vec<_>>()
            .join("\n");
        embed = embed.field(
            module.to_string(),
            format!(
                "{}\nWindow started <t:{}:R>",
                counters,
                bucket.last_reset.timestamp()
            ),
            true,
        );
    }

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Clear a member's action counters.
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn reset(
    ctx: Context<'_>,
    #[description = "Member to reset"] user: serenity::User,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be in a guild")?.get();
    let removed = ctx.data().protection.reset_actor(guild_id, user.id.get());

    tracing::info!(
        guild_id,
        user_id = user.id.get(),
        removed,
        invoked_by = ctx.author().id.get(),
        "Protection counters reset"
    );
    ctx.say(format!(
        "🔄 Cleared {} counter bucket(s) for {}.",
        removed,
        user.tag()
    ))
    .await?;
    Ok(())
}
