use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::info;

use super::models::RuntimeSettings;

pub const PORTAL_EMAIL_ENV: &str = "PORTAL_EMAIL";
pub const PORTAL_PASSWORD_ENV: &str = "PORTAL_PASSWORD";

const APP_DIR: &str = "CvHarvester";
const SETTINGS_FILE: &str = "harvester-settings.json";

pub struct SettingsStore {
    file_path: PathBuf,
}

impl SettingsStore {
    pub fn new() -> Self {
        Self::with_path(app_data_root().join(SETTINGS_FILE))
    }

    pub fn with_path(file_path: PathBuf) -> Self {
        Self { file_path }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    pub async fn load(&self) -> anyhow::Result<RuntimeSettings> {
        let content = match tokio::fs::read_to_string(&self.file_path).await {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Ok(RuntimeSettings::default())
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to read settings file {}", self.file_path.display())
                })
            }
        };

        serde_json::from_str(&content)
            .with_context(|| format!("invalid JSON in settings file {}", self.file_path.display()))
    }

    pub async fn load_with_env(&self) -> anyhow::Result<RuntimeSettings> {
        let mut settings = self.load().await?;
        apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
        Ok(settings)
    }

    pub async fn save(&self, settings: &RuntimeSettings) -> anyhow::Result<()> {
        if let Some(parent) = self.file_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(settings)?;
        tokio::fs::write(&self.file_path, json)
            .await
            .with_context(|| format!("failed to write settings file {}", self.file_path.display()))
    }

    // Returns false when a file is already there and `overwrite` is off.
    pub async fn write_defaults(&self, overwrite: bool) -> anyhow::Result<bool> {
        if !overwrite && tokio::fs::metadata(&self.file_path).await.is_ok() {
            info!(path = %self.file_path.display(), "settings file already present");
            return Ok(false);
        }

        self.save(&RuntimeSettings::default()).await?;
        info!(path = %self.file_path.display(), "wrote default settings");
        Ok(true)
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_env_overrides(settings: &mut RuntimeSettings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(email) = lookup(PORTAL_EMAIL_ENV).filter(|v| !v.trim().is_empty()) {
        settings.portal_email = email;
    }
    if let Some(password) = lookup(PORTAL_PASSWORD_ENV).filter(|v| !v.is_empty()) {
        settings.portal_password = password;
    }
}

pub fn app_data_root() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}
