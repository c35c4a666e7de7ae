// Discord layer - commands and event handlers.

#[path = "commands/command_catalog.rs"]
pub mod commands;

#[path = "protection/mod.rs"]
pub mod protection;

use crate::core::protection::ProtectionService;
use crate::infra::protection::JsonSettingsStore;
use std::sync::Arc;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;

/// Shared state handed to every command and event.
pub struct Data {
    pub protection: Arc<ProtectionService<JsonSettingsStore>>,
}
