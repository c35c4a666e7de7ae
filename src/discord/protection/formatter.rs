use crate::core::protection::{ActionKind, ProtectionNotice, ProtectionModule};
use poise::serenity_prelude::{self as serenity, CreateEmbed, CreateEmbedFooter};

fn window_label(ms: u64) -> String {
    if ms % 60_000 == 0 {
        format!("{} minute(s)", ms / 60_000)
    } else {
        format!("{} second(s)", ms / 1000)
    }
}

fn target_label(kind: ActionKind) -> &'static str {
    match kind.module() {
        ProtectionModule::Channel => "Channel",
        ProtectionModule::Role => "Role",
        ProtectionModule::Moderation | ProtectionModule::Timeout => "Target",
        ProtectionModule::Server => "Changes",
    }
}

pub fn format_notice(notice: &ProtectionNotice) -> CreateEmbed {
    match notice {
        ProtectionNotice::LimitExceeded {
            violation,
            target,
            changes,
        } => {
            let module = violation.kind.module();
            let detail = if !changes.is_empty() {
                changes
                    .iter()
                    .map(|c| c.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            } else {
                target.clone().unwrap_or_else(|| "Unknown".to_string())
            };

            CreateEmbed::default()
                .title(format!("{} Protection", module))
                .description(format!(
                    "<@{}> exceeded the {} limit and has been punished.",
                    violation.actor_id, violation.kind
                ))
                .color(serenity::Color::new(violation.color))
                .field(
                    "👤 Member",
                    format!("{} (`{}`)", violation.actor_tag, violation.actor_id),
                    true,
                )
                .field(format!("📝 {}", target_label(violation.kind)), detail, true)
                .field("⚡ Action Type", violation.kind.to_string(), true)
                .field("🛡️ Action", violation.punishment.kind.to_string(), true)
                .field("⏰ Time Window", window_label(violation.time_window_ms), true)
                .field(
                    "📊 Limit",
                    format!("{}/{}", violation.count, violation.limit),
                    true,
                )
                .footer(CreateEmbedFooter::new(format!(
                    "Member ID: {}",
                    violation.actor_id
                )))
                .timestamp(serenity::Timestamp::now())
        }

        ProtectionNotice::BotRejected {
            executor_id,
            executor_tag,
            bot_id,
            bot_tag,
            punishment,
            color,
        } => CreateEmbed::default()
            .title("Anti-Bot Protection")
            .description("A bot that is not whitelisted was added and removed.")
            .color(serenity::Color::new(*color))
            .field(
                "👤 Member",
                format!("{} (`{}`)", executor_tag, executor_id),
                true,
            )
            .field("🤖 Bot", format!("{} (`{}`)", bot_tag, bot_id), true)
            .field("🛡️ Action", punishment.to_string(), true)
            .footer(CreateEmbedFooter::new(format!(
                "Member ID: {} | Bot ID: {}",
                executor_id, bot_id
            )))
            .timestamp(serenity::Timestamp::now()),

        ProtectionNotice::SpamDetected {
            user_id,
            user_tag,
            channel_id,
            message_count,
            duplicate_count,
            time_window_ms,
            action,
            timeout_ms,
        } => {
            let mut embed = CreateEmbed::default()
                .title("Anti-Spam Protection")
                .description(format!("Spam detected from <@{}>.", user_id))
                .color(serenity::Color::from_rgb(255, 165, 0)) // Orange
                .field("👤 Member", format!("{} (`{}`)", user_tag, user_id), true)
                .field("📝 Channel", format!("<#{}>", channel_id), true)
                .field("🛡️ Action", action.to_string(), true)
                .field("📊 Messages", message_count.to_string(), true)
                .field("🔄 Duplicates", duplicate_count.to_string(), true)
                .field("⏰ Time Window", window_label(*time_window_ms), true);

            if let Some(ms) = timeout_ms {
                embed = embed.field("⏳ Timeout Duration", window_label(*ms), true);
            }

            embed
                .footer(CreateEmbedFooter::new(format!("Member ID: {}", user_id)))
                .timestamp(serenity::Timestamp::now())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_label() {
        assert_eq!(window_label(60_000), "1 minute(s)");
        assert_eq!(window_label(300_000), "5 minute(s)");
        assert_eq!(window_label(10_000), "10 second(s)");
    }

    #[test]
    fn test_target_label_by_module() {
        assert_eq!(target_label(ActionKind::ChannelDelete), "Channel");
        assert_eq!(target_label(ActionKind::RoleAdd), "Role");
        assert_eq!(target_label(ActionKind::Ban), "Target");
        assert_eq!(target_label(ActionKind::ServerUpdate), "Changes");
    }
}
