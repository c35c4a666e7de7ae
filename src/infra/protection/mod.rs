// Implementations for the protection system.

pub mod json_settings_store;

pub use json_settings_store::JsonSettingsStore;
