use crate::core::protection::{
    ProtectionSettings, ProtectionSettingsStore, SettingsError, SettingsFile,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Settings backed by a hand-edited `settings.json`.
///
/// The `protection` section is the default for every guild. Slash commands
/// write a full copy for their own guild under `guilds.<id>`, so one guild's
/// admin never changes another guild's settings.
///
/// The parsed file is cached in memory; `reload_if_changed` re-reads it when
/// the text on disk differs from what we last saw, so edits apply without a
/// restart.
pub struct JsonSettingsStore {
    path: PathBuf,
    cache: RwLock<CachedFile>,
}

struct CachedFile {
    raw: String,
    parsed: SettingsFile,
}

impl JsonSettingsStore {
    /// Load the file at `path`. A missing file means "protection off" and is
    /// created on the first save.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();
        let cached = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let parsed = serde_json::from_str(&raw)?;
            CachedFile { raw, parsed }
        } else {
            tracing::warn!(
                "Settings file {} not found, protection is disabled until it exists",
                path.display()
            );
            CachedFile {
                raw: String::new(),
                parsed: SettingsFile::default(),
            }
        };

        Ok(Self {
            path,
            cache: RwLock::new(cached),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The `protection` section, used by guilds without an entry of their own.
    pub async fn default_settings(&self) -> ProtectionSettings {
        self.cache.read().await.parsed.protection.clone()
    }

    /// Re-read the file if its content changed. Returns `true` when new
    /// settings were applied. A file that fails to parse keeps the previous
    /// settings in place.
    pub async fn reload_if_changed(&self) -> Result<bool, SettingsError> {
        if !self.path.exists() {
            return Ok(false);
        }

        let raw = tokio::fs::read_to_string(&self.path).await?;
        if raw == self.cache.read().await.raw {
            return Ok(false);
        }

        let parsed: SettingsFile = serde_json::from_str(&raw)?;
        *self.cache.write().await = CachedFile { raw, parsed };
        Ok(true)
    }
}

#[async_trait]
impl ProtectionSettingsStore for JsonSettingsStore {
    async fn load(&self, guild_id: u64) -> Result<ProtectionSettings, SettingsError> {
        Ok(self.cache.read().await.parsed.for_guild(guild_id).clone())
    }

    async fn save(&self, guild_id: u64, settings: ProtectionSettings) -> Result<(), SettingsError> {
        let mut cache = self.cache.write().await;
        let mut file = cache.parsed.clone();
        file.guilds.insert(guild_id, settings);

        let raw = serde_json::to_string_pretty(&file)?;
        tokio::fs::write(&self.path, &raw).await?;

        // Remember what we wrote so the watcher doesn't treat it as an edit.
        *cache = CachedFile { raw, parsed: file };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protection::ProtectionModule;
    use std::io::Write;

    const SETTINGS: &str = r#"{
        "defaultLanguage": "en",
        "protection": {
            "enabled": true,
            "logChannelId": "555",
            "server": {
                "limits": { "timeWindow": 60000, "updateLimit": 2 },
                "action": { "type": "kick", "reason": "Server nuke", "ignoredRoles": [] }
            }
        }
    }"#;

    fn write_settings(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn test_loads_protection_section() {
        let file = write_settings(SETTINGS);
        let store = JsonSettingsStore::open(file.path()).unwrap();

        let settings = store.load(1).await.unwrap();
        assert!(settings.enabled);
        assert_eq!(settings.log_channel_id, Some(555));
        assert!(settings.module(ProtectionModule::Server).is_some());
    }

    #[tokio::test]
    async fn test_missing_file_means_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSettingsStore::open(dir.path().join("settings.json")).unwrap();

        assert!(!store.load(1).await.unwrap().enabled);
        assert!(!store.reload_if_changed().await.unwrap());
    }

    #[tokio::test]
    async fn test_save_preserves_other_sections() {
        let file = write_settings(SETTINGS);
        let store = JsonSettingsStore::open(file.path()).unwrap();

        let mut settings = store.load(1).await.unwrap();
        settings.log_channel_id = Some(777);
        store.save(1, settings).await.unwrap();

        let raw = std::fs::read_to_string(file.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["defaultLanguage"], "en");
        assert_eq!(value["protection"]["logChannelId"], "555");
        assert_eq!(value["guilds"]["1"]["logChannelId"], "777");

        // Our own write is not reported as an external change.
        assert!(!store.reload_if_changed().await.unwrap());
    }

    #[tokio::test]
    async fn test_reload_picks_up_edits_and_survives_bad_json() {
        let file = write_settings(SETTINGS);
        let store = JsonSettingsStore::open(file.path()).unwrap();

        std::fs::write(file.path(), r#"{ "protection": { "enabled": false } }"#).unwrap();
        assert!(store.reload_if_changed().await.unwrap());
        assert!(!store.load(1).await.unwrap().enabled);

        std::fs::write(file.path(), "{ not json").unwrap();
        assert!(store.reload_if_changed().await.is_err());
        assert!(!store.load(1).await.unwrap().enabled);
    }

    #[tokio::test]
    async fn test_guild_save_leaves_other_guilds_on_default() {
        let file = write_settings(SETTINGS);
        let store = JsonSettingsStore::open(file.path()).unwrap();

        let mut settings = store.load(1).await.unwrap();
        settings.enabled = false;
        settings.log_channel_id = Some(42);
        store.save(1, settings).await.unwrap();

        let own = store.load(1).await.unwrap();
        let other = store.load(2).await.unwrap();
        assert!(!own.enabled);
        assert_eq!(own.log_channel_id, Some(42));
        assert!(other.enabled);
        assert_eq!(other.log_channel_id, Some(555));
        assert!(store.default_settings().await.enabled);

        // The per-guild entry survives a reopen.
        let reopened = JsonSettingsStore::open(file.path()).unwrap();
        assert_eq!(reopened.load(1).await.unwrap().log_channel_id, Some(42));
        assert_eq!(reopened.load(2).await.unwrap().log_channel_id, Some(555));
    }
}
