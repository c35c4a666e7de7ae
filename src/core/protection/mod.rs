// Core protection module - contains the anti-abuse business logic.
// Following the same pattern as the other core modules: models, a service
// generic over its store, and ports the outer layers implement.

pub mod action_tracker;
pub mod antispam;
pub mod change_detection;
pub mod enforcement;
pub mod protection_models;
pub mod protection_service;

pub use antispam::SpamVerdict;
pub use enforcement::GuildModerator;
pub use protection_models::*;
pub use protection_service::*;
