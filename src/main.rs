// This is the entry point of the protection bot.
//
// **Architecture Overview:**
// - `core/` = Protection logic (platform-agnostic)
// - `infra/` = Implementations of core traits (settings file)
// - `discord/` = Discord-specific adapters (commands, events, moderation calls)
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Set up the Discord framework
// 4. Route gateway events to the protection handlers
// 5. Start the settings watcher and the bucket sweeper

#[path = "core/core_layer.rs"]
mod core;
#[path = "discord/discord_layer.rs"]
mod discord;
#[path = "infra/infra_layer.rs"]
mod infra;

use crate::core::protection::ProtectionService;
use crate::discord::commands::presence;
use crate::discord::protection::events as protection_events;
use crate::discord::{Data, Error};
use crate::infra::protection::JsonSettingsStore;
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_SETTINGS_PATH: &str = "settings.json";
const DEFAULT_SETTINGS_POLL_SECS: u64 = 1;
const DEFAULT_BUCKET_SWEEP_SECS: u64 = 600;

fn env_secs(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

/// Event handler for non-command Discord events.
///
/// Handler errors are logged and swallowed: one failed lookup must not stop
/// the bot from watching the next event.
async fn event_handler(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    let result = match event {
        serenity::FullEvent::ChannelCreate { channel } => {
            protection_events::handle_channel_create(ctx, data, channel).await
        }
        serenity::FullEvent::ChannelDelete { channel, .. } => {
            protection_events::handle_channel_delete(ctx, data, channel).await
        }
        serenity::FullEvent::ChannelUpdate { old, new } => {
            protection_events::handle_channel_update(ctx, data, old.as_ref(), new).await
        }
        serenity::FullEvent::GuildRoleCreate { new } => {
            protection_events::handle_role_create(ctx, data, new).await
        }
        serenity::FullEvent::GuildRoleDelete {
            guild_id,
            removed_role_id,
            removed_role_data_if_available,
        } => {
            protection_events::handle_role_delete(
                ctx,
                data,
                *guild_id,
                *removed_role_id,
                removed_role_data_if_available.as_ref(),
            )
            .await
        }
        serenity::FullEvent::GuildRoleUpdate {
            old_data_if_available,
            new,
        } => {
            protection_events::handle_role_update(ctx, data, old_data_if_available.as_ref(), new)
                .await
        }
        serenity::FullEvent::GuildMemberUpdate {
            old_if_available,
            new: Some(new),
            ..
        } => {
            protection_events::handle_member_update(ctx, data, old_if_available.as_ref(), new)
                .await
        }
        serenity::FullEvent::GuildMemberRemoval { guild_id, user, .. } => {
            protection_events::handle_member_removal(ctx, data, *guild_id, user).await
        }
        serenity::FullEvent::GuildBanAddition {
            guild_id,
            banned_user,
        } => protection_events::handle_ban_addition(ctx, data, *guild_id, banned_user).await,
        serenity::FullEvent::GuildBanRemoval {
            guild_id,
            unbanned_user,
        } => protection_events::handle_ban_removal(ctx, data, *guild_id, unbanned_user).await,
        serenity::FullEvent::GuildUpdate {
            old_data_if_available,
            new_data,
        } => {
            protection_events::handle_guild_update(
                ctx,
                data,
                old_data_if_available.as_ref(),
                new_data,
            )
            .await
        }
        serenity::FullEvent::GuildMemberAddition { new_member } => {
            protection_events::handle_member_join(ctx, data, new_member).await
        }
        serenity::FullEvent::Message { new_message } => {
            protection_events::handle_message(ctx, data, new_message).await
        }
        _ => Ok(()),
    };

    if let Err(e) = result {
        tracing::error!("Error handling {} event: {:#}", event.snake_case_name(), e);
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    // Initialize logging so we can see what's happening
    tracing_subscriber::fmt::init();

    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    let token = std::env::var("DISCORD_TOKEN").expect(
        "Missing DISCORD_TOKEN environment variable! Create a .env file with your bot token.",
    );
    let settings_path =
        std::env::var("SETTINGS_PATH").unwrap_or_else(|_| DEFAULT_SETTINGS_PATH.to_string());
    let poll_secs = env_secs("SETTINGS_POLL_SECS", DEFAULT_SETTINGS_POLL_SECS);
    let sweep_secs = env_secs("BUCKET_SWEEP_SECS", DEFAULT_BUCKET_SWEEP_SECS);

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================

    let settings_store =
        JsonSettingsStore::open(&settings_path).expect("Failed to load protection settings");
    let protection_service = Arc::new(ProtectionService::new(settings_store));

    let data = Data {
        protection: Arc::clone(&protection_service),
    };

    // ========================================================================
    // DISCORD FRAMEWORK SETUP
    // ========================================================================

    // Audit log reads need VIEW_AUDIT_LOG on the bot's role; that is a
    // permission, not an intent.
    let intents = serenity::GatewayIntents::GUILDS
        | serenity::GatewayIntents::GUILD_MEMBERS
        | serenity::GatewayIntents::GUILD_MODERATION
        | serenity::GatewayIntents::GUILD_MESSAGES
        | serenity::GatewayIntents::MESSAGE_CONTENT;

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![discord::protection::commands::protection()],
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler(ctx, event, framework, data))
            },
            ..Default::default()
        })
        .setup(move |ctx, ready, framework| {
            Box::pin(async move {
                tracing::info!("Connected as {}", ready.user.name);

                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                tracing::info!("Commands registered");

                let enabled = data.protection.store().default_settings().await.enabled;
                presence::on_ready(ctx, enabled);

                // Settings watcher: picks up hand edits to the settings file.
                let protection = Arc::clone(&data.protection);
                let presence_ctx = ctx.clone();
                tokio::spawn(async move {
                    let mut last_enabled = enabled;
                    loop {
                        tokio::time::sleep(Duration::from_secs(poll_secs)).await;

                        match protection.store().reload_if_changed().await {
                            Ok(true) => {
                                tracing::info!(
                                    "Reloaded protection settings from {}",
                                    protection.store().path().display()
                                );
                                let enabled = protection.store().default_settings().await.enabled;
                                if enabled != last_enabled {
                                    last_enabled = enabled;
                                    presence::show_protection_state(&presence_ctx, enabled);
                                }
                            }
                            Ok(false) => {}
                            Err(e) => tracing::warn!(
                                "Ignoring unreadable settings file, keeping previous settings: {}",
                                e
                            ),
                        }
                    }
                });

                // Bucket sweeper: drops counters for actors that went quiet.
                let protection = Arc::clone(&data.protection);
                tokio::spawn(async move {
                    loop {
                        tokio::time::sleep(Duration::from_secs(sweep_secs)).await;

                        match protection.sweep(chrono::Utc::now()).await {
                            Ok(0) => {}
                            Ok(removed) => tracing::debug!(
                                removed,
                                remaining = protection.tracked_buckets(),
                                "Swept idle protection buckets"
                            ),
                            Err(e) => tracing::warn!("Bucket sweep failed: {}", e),
                        }
                    }
                });

                Ok(data)
            })
        })
        .build();

    let mut client = serenity::ClientBuilder::new(token, intents)
        .framework(framework)
        .await
        .expect("Error creating client");

    client.start().await.expect("Error running bot");
}
