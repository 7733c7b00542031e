//! Configuration management for eduequi-speech.
//!
//! Loads config from YAML files in standard locations. Every section is
//! optional and falls back to defaults.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Synthesis endpoint, `POST {text, lang}` → audio bytes.
    pub endpoint: String,
    pub connect_timeout_ms: u64,
    pub timeout_ms: u64,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:5000/tts".into(),
            connect_timeout_ms: 2000,
            timeout_ms: 15000,
        }
    }
}

impl TtsConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NarrationConfig {
    /// Language used when a caller does not send one.
    pub default_language: String,
    /// User settings file. Empty means the default location.
    pub settings_path: String,
    /// How often the default speed is re-read from the settings file.
    pub speed_refresh_ms: u64,
}

impl Default for NarrationConfig {
    fn default() -> Self {
        Self {
            default_language: "en-US".into(),
            settings_path: String::new(),
            speed_refresh_ms: 1000,
        }
    }
}

impl NarrationConfig {
    pub fn settings_file(&self) -> PathBuf {
        if self.settings_path.is_empty() {
            crate::settings::default_settings_path()
        } else {
            PathBuf::from(&self.settings_path)
        }
    }

    pub fn speed_refresh(&self) -> Duration {
        Duration::from_millis(self.speed_refresh_ms.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8790,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tts: TtsConfig,
    pub narration: NarrationConfig,
    pub api: ApiConfig,
}

impl Config {
    /// Load configuration from YAML file.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./config.yaml
    /// 2. ~/.config/eduequi/config.yaml
    /// 3. /etc/eduequi/config.yaml
    pub fn load(path: Option<&Path>) -> Self {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("config.yaml")),
                dirs::home_dir().map(|h| h.join(".config/eduequi/config.yaml")),
                Some(PathBuf::from("/etc/eduequi/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(config_path) = resolved else {
            info!("No config file found, using defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", config_path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", config_path.display());
                Self::default()
            }
        }
    }

    fn parse(contents: &str) -> Result<Self, serde_yml::Error> {
        serde_yml::from_str(contents)
    }
}
