// Discord adapters for the protection system: actor resolution, gateway event
// handlers, the moderator port implementation and embed formatting.

pub mod audit;
pub mod commands;
pub mod events;
pub mod formatter;
pub mod moderator;
