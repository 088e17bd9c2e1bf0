//! TOML configuration file
//!
//! Read from `<config dir>/xr-broadcaster/config.toml`, or from the path in
//! `XR_BROADCASTER_CONFIG`. Missing sections and keys fall back to defaults.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::sink::mqtt::MqttSettings;
use crate::sink::panel::PanelSettings;
use crate::xr::actions::{BindingSettings, ProfileKind};
use crate::xr::driver::DriverSettings;
use crate::xr::openxr_runtime::RuntimeSettings;
use crate::xr::runtime::ReferenceSpaceKind;

const CONFIG_DIR: &str = "xr-broadcaster";
const CONFIG_FILE: &str = "config.toml";
pub const CONFIG_ENV: &str = "XR_BROADCASTER_CONFIG";

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    pub application_name: String,
    pub reference_space: ReferenceSpaceKind,
    /// Interaction profiles suggested in order
    pub profiles: Vec<ProfileKind>,
    pub action_set_name: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let binding = BindingSettings::default();
        Self {
            application_name: RuntimeSettings::default().application_name,
            reference_space: binding.reference_space,
            profiles: vec![ProfileKind::OculusTouch, ProfileKind::KhrSimple],
            action_set_name: binding.action_set_name,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub runtime: RuntimeConfig,
    pub driver: DriverSettings,
    pub panel: PanelSettings,
    pub mqtt: MqttSettings,
}

impl Config {
    /// Resolves the config file location, honoring the environment override
    pub fn path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Ok(PathBuf::from(path));
        }
        let mut path =
            dirs::config_dir().ok_or_else(|| eyre!("Cannot determine the user config directory"))?;
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        Ok(path)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| eyre!("Failed to parse config file: {}", e))
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
        let config = Self::from_toml(&content)?;
        debug!("Loaded configuration: {:?}", config);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| eyre!("Failed to serialize config: {}", e))?;
        tokio::fs::write(path, content)
            .await
            .map_err(|e| eyre!("Failed to write config file {}: {}", path.display(), e))
    }

    /// Writes the default configuration if no file exists yet, then loads it
    pub async fn ensure_default(path: &Path) -> Result<Self> {
        let exists = tokio::fs::try_exists(path)
            .await
            .map_err(|e| eyre!("Failed to check if config file exists: {}", e))?;
        if !exists {
            info!("Creating default configuration at {}", path.display());
            Self::default().save(path).await?;
        }
        Self::load(path).await
    }

    pub fn binding_settings(&self) -> BindingSettings {
        BindingSettings {
            action_set_name: self.runtime.action_set_name.clone(),
            profiles: self.runtime.profiles.clone(),
            reference_space: self.runtime.reference_space,
            ..BindingSettings::default()
        }
    }

    pub fn runtime_settings(&self) -> RuntimeSettings {
        RuntimeSettings {
            application_name: self.runtime.application_name.clone(),
            ..RuntimeSettings::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [runtime]
            reference_space = "local"
            profiles = ["khr_simple"]

            [driver]
            tick_interval_ms = 20
            max_frames = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.runtime.reference_space, ReferenceSpaceKind::Local);
        assert_eq!(config.runtime.profiles, vec![ProfileKind::KhrSimple]);
        assert_eq!(config.driver.tick_interval_ms, 20);
        assert_eq!(config.driver.max_frames, Some(500));
        assert_eq!(config.driver.idle_heartbeat_ticks, 60);
        assert!(!config.mqtt.enabled);
        assert!(config.panel.enabled);
    }

    #[test]
    fn binding_settings_follow_runtime_section() {
        let mut config = Config::default();
        config.runtime.action_set_name = "hands".to_string();

        let binding = config.binding_settings();

        assert_eq!(binding.action_set_name, "hands");
        assert_eq!(binding.priority, 0);
        assert_eq!(binding.profiles.len(), 2);
    }

    #[test]
    fn unknown_profile_is_rejected() {
        let err = Config::from_toml("[runtime]\nprofiles = [\"vive\"]").unwrap_err();
        assert!(err.to_string().contains("parse"));
    }

    #[tokio::test]
    async fn default_file_is_created_once() {
        let dir = std::env::temp_dir().join(format!("xr-broadcaster-test-{}", std::process::id()));
        let path = dir.join(CONFIG_FILE);
        let _ = tokio::fs::remove_dir_all(&dir).await;

        let created = Config::ensure_default(&path).await.unwrap();
        assert_eq!(created, Config::default());

        tokio::fs::write(&path, "[driver]\ntick_interval_ms = 5\n")
            .await
            .unwrap();
        let reloaded = Config::ensure_default(&path).await.unwrap();
        assert_eq!(reloaded.driver.tick_interval_ms, 5);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
