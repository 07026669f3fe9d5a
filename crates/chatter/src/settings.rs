//! The single in-memory settings record and its change notifications.

use tokio::sync::watch;

use crate::{
    config::{BotConfiguration, BotConfigurationPatch, ConfigFile},
    error::SettingsError,
};

/// Holds the one active [`BotConfiguration`]. Only valid configurations ever get in.
pub struct SettingsStore {
    current: watch::Sender<Option<BotConfiguration>>,
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsStore {
    pub fn new() -> Self {
        let (current, _) = watch::channel(None);
        Self { current }
    }

    pub fn get_current_config(&self) -> Option<BotConfiguration> {
        self.current.borrow().clone()
    }

    /// Replace the whole record.
    pub fn save_config(&self, config: BotConfiguration) {
        tracing::debug!("Saving configuration: {config:?}");
        self.current.send_replace(Some(config));
    }

    /// Merge `patch` into the existing record.
    ///
    /// Every successful update notifies subscribers, even when nothing changed, so saving the
    /// same settings again doubles as an explicit "try connecting again".
    pub fn update_config(
        &self,
        patch: &BotConfigurationPatch,
    ) -> Result<BotConfiguration, SettingsError> {
        let mut outcome = Err(SettingsError::NoConfiguration);
        self.current.send_if_modified(|current| {
            let Some(existing) = current.as_mut() else {
                return false;
            };
            match patch.apply(existing) {
                Ok(next) => {
                    *existing = next.clone();
                    outcome = Ok(next);
                    true
                }
                Err(error) => {
                    outcome = Err(error.into());
                    false
                }
            }
        });
        outcome
    }

    /// Save `patch` as a fresh record if there is none yet, otherwise merge it in.
    pub fn upsert_config(
        &self,
        patch: BotConfigurationPatch,
    ) -> Result<BotConfiguration, SettingsError> {
        if self.current.borrow().is_some() {
            return self.update_config(&patch);
        }
        let config = patch.into_configuration()?;
        self.save_config(config.clone());
        Ok(config)
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<BotConfiguration>> {
        self.current.subscribe()
    }
}

/// Where settings come from besides the store itself.
#[derive(Clone)]
pub struct ConfigFileSource {
    pub path: std::path::PathBuf,
    /// Takes precedence over any `bot_credential` in the file.
    pub credential: Option<String>,
}

impl ConfigFileSource {
    fn patch_from(&self, file: ConfigFile) -> BotConfigurationPatch {
        let mut patch = file.bot;
        if let Some(credential) = &self.credential {
            patch.bot_credential = Some(credential.clone());
        }
        patch
    }

    /// Read the file into `store`, failing on anything invalid.
    pub fn load_into(&self, store: &SettingsStore) -> Result<BotConfiguration, eyre::Report> {
        let patch = self.patch_from(ConfigFile::load(&self.path)?);
        Ok(store.upsert_config(patch)?)
    }

    /// Re-read the file every `every` and merge any changes into `store`.
    ///
    /// Bad edits are logged and skipped, the previous configuration stays active.
    pub async fn watch(self, store: std::sync::Arc<SettingsStore>, every: std::time::Duration) {
        let mut last_seen = tokio::fs::read_to_string(&self.path).await.ok();
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let contents = match tokio::fs::read_to_string(&self.path).await {
                Ok(contents) => contents,
                Err(error) => {
                    tracing::warn!("Couldn't read {}: {error}", self.path.display());
                    continue;
                }
            };
            if last_seen.as_deref() == Some(contents.as_str()) {
                continue;
            }
            last_seen = Some(contents.clone());

            let patch = match ConfigFile::parse(&contents) {
                Ok(file) => self.patch_from(file),
                Err(error) => {
                    tracing::warn!("Ignoring config file change: {error:?}");
                    continue;
                }
            };
            match store.upsert_config(patch) {
                Ok(config) => tracing::info!("Config file changed, applied: {config:?}"),
                Err(error) => tracing::warn!("Ignoring config file change: {error}"),
            }
        }
    }
}
