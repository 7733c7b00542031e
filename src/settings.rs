//! Persisted user settings shared with the web client.
//!
//! Stored as one flat JSON object under the `eduequi-settings` key, which on
//! the desktop is `eduequi-settings.json` in the user config directory.
//! Stored values are merged over defaults, so older or partial files load.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub const STORAGE_KEY: &str = "eduequi-settings";

pub const MIN_FONT_SIZE: u32 = 14;
pub const MAX_FONT_SIZE: u32 = 32;
pub const MIN_TTS_SPEED: f32 = 0.5;
pub const MAX_TTS_SPEED: f32 = 2.0;
pub const DEFAULT_TTS_SPEED: f32 = 1.0;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to access settings file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to encode settings: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Tamil,
    English,
    Bilingual,
}

impl std::str::FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tamil" | "ta" => Ok(Self::Tamil),
            "english" | "en" => Ok(Self::English),
            "bilingual" => Ok(Self::Bilingual),
            other => Err(format!("unknown language: {other}")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UserProfile {
    pub name: String,
    pub email: String,
    pub preferred_name: String,
}

/// Partial profile update; `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub preferred_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub font_size: u32,
    pub high_contrast: bool,
    pub language: Language,
    pub tts_speed: f32,
    pub profile: UserProfile,
    /// Keys written by other clients, kept as-is on save.
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            font_size: 20,
            high_contrast: false,
            language: Language::Bilingual,
            tts_speed: DEFAULT_TTS_SPEED,
            profile: UserProfile::default(),
            extra: Map::new(),
        }
    }
}

impl Settings {
    /// Load settings, falling back to defaults when the file is missing or
    /// unreadable. Each stored key is merged over the defaults on its own,
    /// so one malformed value does not discard the rest.
    pub fn load(path: &Path) -> Self {
        let contents = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No settings at {}, using defaults", path.display());
                return Self::default();
            }
            Err(e) => {
                warn!("Failed to read settings {}: {e}", path.display());
                return Self::default();
            }
        };

        match serde_json::from_str(&contents) {
            Ok(Value::Object(stored)) => Self::merged(stored),
            Ok(other) => {
                warn!("Settings {} is not a JSON object: {other}", path.display());
                Self::default()
            }
            Err(e) => {
                warn!("Failed to parse settings {}: {e}", path.display());
                Self::default()
            }
        }
    }

    fn merged(mut stored: Map<String, Value>) -> Self {
        let mut settings = Self::default();
        merge_field(&mut stored, "fontSize", &mut settings.font_size);
        merge_field(&mut stored, "highContrast", &mut settings.high_contrast);
        merge_field(&mut stored, "language", &mut settings.language);
        merge_field(&mut stored, "ttsSpeed", &mut settings.tts_speed);
        merge_field(&mut stored, "profile", &mut settings.profile);
        settings.extra = stored;
        settings
    }

    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|source| SettingsError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Overwrite `slot` with the stored value under `key` if it has the right
/// shape. The key is consumed either way.
fn merge_field<T: DeserializeOwned>(stored: &mut Map<String, Value>, key: &str, slot: &mut T) {
    let Some(raw) = stored.remove(key) else {
        return;
    };
    match serde_json::from_value(raw) {
        Ok(value) => *slot = value,
        Err(e) => warn!("Ignoring stored {key}: {e}"),
    }
}

/// Default location of the settings file.
pub fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("eduequi")
        .join(format!("{STORAGE_KEY}.json"))
}

pub fn clamp_tts_speed(speed: f32) -> f32 {
    if speed.is_nan() {
        return DEFAULT_TTS_SPEED;
    }
    speed.clamp(MIN_TTS_SPEED, MAX_TTS_SPEED)
}

/// Stored `ttsSpeed`, read without touching anything else in the file.
///
/// Missing file, parse failure, a missing or non-numeric field, and zero
/// all yield 1.0. The value is not clamped here.
pub fn stored_tts_speed(path: &Path) -> f32 {
    let Ok(contents) = fs::read_to_string(path) else {
        return DEFAULT_TTS_SPEED;
    };
    let value: serde_json::Value = match serde_json::from_str(&contents) {
        Ok(v) => v,
        Err(e) => {
            warn!("Failed to load TTS speed from settings: {e}");
            return DEFAULT_TTS_SPEED;
        }
    };
    match value.get("ttsSpeed").and_then(serde_json::Value::as_f64) {
        Some(speed) if speed != 0.0 && speed.is_finite() => speed as f32,
        _ => DEFAULT_TTS_SPEED,
    }
}

/// Last known `ttsSpeed`, so callers on the async path never touch the disk.
///
/// Cloning shares the cached value. [`CachedSpeed::spawn_refresh`] re-reads
/// the file on a blocking thread at a fixed interval.
#[derive(Clone)]
pub struct CachedSpeed {
    path: PathBuf,
    bits: Arc<AtomicU32>,
}

impl CachedSpeed {
    /// Read the file once up front.
    pub fn load(path: PathBuf) -> Self {
        let speed = stored_tts_speed(&path);
        Self {
            path,
            bits: Arc::new(AtomicU32::new(speed.to_bits())),
        }
    }

    pub fn current(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    /// Re-read the file and return the new value. Blocks on file I/O.
    pub fn refresh(&self) -> f32 {
        let speed = stored_tts_speed(&self.path);
        let previous = f32::from_bits(self.bits.swap(speed.to_bits(), Ordering::Relaxed));
        if previous != speed {
            debug!("Default TTS speed now {speed:.2}x");
        }
        speed
    }

    /// Keep the cached value in sync with the file until the task is aborted.
    pub fn spawn_refresh(self, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let cache = self.clone();
                if let Err(e) = tokio::task::spawn_blocking(move || cache.refresh()).await {
                    warn!("Settings refresh task failed: {e}");
                }
            }
        })
    }
}

/// Read-modify-write access to the settings file. Every update is saved
/// immediately.
pub struct SettingsStore {
    path: PathBuf,
    settings: Settings,
}

impl SettingsStore {
    pub fn open(path: PathBuf) -> Self {
        let settings = Settings::load(&path);
        Self { path, settings }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn update_font_size(&mut self, size: u32) -> Result<(), SettingsError> {
        self.settings.font_size = size.clamp(MIN_FONT_SIZE, MAX_FONT_SIZE);
        self.persist()
    }

    pub fn update_high_contrast(&mut self, enabled: bool) -> Result<(), SettingsError> {
        self.settings.high_contrast = enabled;
        self.persist()
    }

    pub fn update_language(&mut self, language: Language) -> Result<(), SettingsError> {
        self.settings.language = language;
        self.persist()
    }

    pub fn update_tts_speed(&mut self, speed: f32) -> Result<(), SettingsError> {
        self.settings.tts_speed = clamp_tts_speed(speed);
        self.persist()
    }

    pub fn update_profile(&mut self, update: ProfileUpdate) -> Result<(), SettingsError> {
        let profile = &mut self.settings.profile;
        if let Some(name) = update.name {
            profile.name = name;
        }
        if let Some(email) = update.email {
            profile.email = email;
        }
        if let Some(preferred) = update.preferred_name {
            profile.preferred_name = preferred;
        }
        self.persist()
    }

    /// Restore defaults and remove the stored file.
    pub fn reset(&mut self) -> Result<(), SettingsError> {
        self.settings = Settings::default();
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(SettingsError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn persist(&self) -> Result<(), SettingsError> {
        self.settings.save(&self.path)?;
        debug!("Saved settings to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn settings_file(dir: &TempDir) -> PathBuf {
        dir.path().join(format!("{STORAGE_KEY}.json"))
    }

    #[test]
    fn partial_file_merges_over_defaults() {
        let dir = TempDir::new().unwrap();
        let path = settings_file(&dir);
        fs::write(&path, r#"{"ttsSpeed": 1.5, "language": "tamil"}"#).unwrap();

        let settings = Settings::load(&path);
        assert_eq!(settings.tts_speed, 1.5);
        assert_eq!(settings.language, Language::Tamil);
        assert_eq!(settings.font_size, 20);
        assert!(!settings.high_contrast);
    }

    #[test]
    fn corrupt_file_loads_defaults() {
        let dir = TempDir::new().unwrap();
        let path = settings_file(&dir);
        fs::write(&path, "{not json").unwrap();
        assert_eq!(Settings::load(&path), Settings::default());
    }

    #[test]
    fn stored_speed_fallbacks() {
        let dir = TempDir::new().unwrap();
        let path = settings_file(&dir);
        assert_eq!(stored_tts_speed(&path), 1.0);

        fs::write(&path, r#"{"ttsSpeed": 1.75}"#).unwrap();
        assert_eq!(stored_tts_speed(&path), 1.75);

        fs::write(&path, r#"{"ttsSpeed": 0}"#).unwrap();
        assert_eq!(stored_tts_speed(&path), 1.0);

        fs::write(&path, r#"{"ttsSpeed": "fast"}"#).unwrap();
        assert_eq!(stored_tts_speed(&path), 1.0);

        fs::write(&path, "garbage").unwrap();
        assert_eq!(stored_tts_speed(&path), 1.0);
    }

    #[test]
    fn store_clamps_and_persists() {
        let dir = TempDir::new().unwrap();
        let path = settings_file(&dir);
        let mut store = SettingsStore::open(path.clone());

        store.update_tts_speed(5.0).unwrap();
        store.update_font_size(8).unwrap();
        store.update_high_contrast(true).unwrap();
        store
            .update_profile(ProfileUpdate {
                preferred_name: Some("Kavi".into()),
                ..Default::default()
            })
            .unwrap();

        let reloaded = Settings::load(&path);
        assert_eq!(reloaded.tts_speed, MAX_TTS_SPEED);
        assert_eq!(reloaded.font_size, MIN_FONT_SIZE);
        assert!(reloaded.high_contrast);
        assert_eq!(reloaded.profile.preferred_name, "Kavi");
        assert_eq!(stored_tts_speed(&path), 2.0);

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"ttsSpeed\""));
        assert!(raw.contains("\"preferredName\""));
    }

    #[test]
    fn reset_removes_file() {
        let dir = TempDir::new().unwrap();
        let path = settings_file(&dir);
        let mut store = SettingsStore::open(path.clone());
        store.update_language(Language::English).unwrap();
        assert!(path.exists());

        store.reset().unwrap();
        assert!(!path.exists());
        assert_eq!(store.settings(), &Settings::default());
        // second reset on a missing file is fine
        store.reset().unwrap();
    }

    #[test]
    fn malformed_field_keeps_the_rest() {
        let dir = TempDir::new().unwrap();
        let path = settings_file(&dir);
        fs::write(
            &path,
            r#"{"fontSize": 20.5, "ttsSpeed": 1.5, "highContrast": true, "profile": null, "theme": "sepia"}"#,
        )
        .unwrap();

        let settings = Settings::load(&path);
        assert_eq!(settings.tts_speed, 1.5);
        assert!(settings.high_contrast);
        assert_eq!(settings.font_size, 20);
        assert_eq!(settings.profile, UserProfile::default());

        // an unrelated update must not wipe the stored speed
        let mut store = SettingsStore::open(path.clone());
        store.update_language(Language::Tamil).unwrap();
        assert_eq!(stored_tts_speed(&path), 1.5);

        let reloaded = Settings::load(&path);
        assert_eq!(reloaded.tts_speed, 1.5);
        assert!(reloaded.high_contrast);
        assert_eq!(reloaded.language, Language::Tamil);

        let raw: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["theme"], "sepia");
        assert_eq!(raw["fontSize"], 20);
    }

    #[test]
    fn non_object_file_loads_defaults() {
        let dir = TempDir::new().unwrap();
        let path = settings_file(&dir);
        fs::write(&path, "[1.5]").unwrap();
        assert_eq!(Settings::load(&path), Settings::default());
    }

    #[test]
    fn cached_speed_follows_refresh() {
        let dir = TempDir::new().unwrap();
        let path = settings_file(&dir);
        fs::write(&path, r#"{"ttsSpeed": 1.5}"#).unwrap();

        let cache = CachedSpeed::load(path.clone());
        assert_eq!(cache.current(), 1.5);

        fs::write(&path, r#"{"ttsSpeed": 0.75}"#).unwrap();
        assert_eq!(cache.current(), 1.5);
        assert_eq!(cache.refresh(), 0.75);
        assert_eq!(cache.clone().current(), 0.75);

        fs::remove_file(&path).unwrap();
        cache.refresh();
        assert_eq!(cache.current(), DEFAULT_TTS_SPEED);
    }

    #[tokio::test]
    async fn background_refresh_picks_up_changes() {
        let dir = TempDir::new().unwrap();
        let path = settings_file(&dir);
        let cache = CachedSpeed::load(path.clone());
        assert_eq!(cache.current(), DEFAULT_TTS_SPEED);

        let task = cache.clone().spawn_refresh(Duration::from_millis(10));
        fs::write(&path, r#"{"ttsSpeed": 1.25}"#).unwrap();

        for _ in 0..200 {
            if cache.current() == 1.25 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        task.abort();
        assert_eq!(cache.current(), 1.25);
    }

    #[test]
    fn language_parses_short_codes() {
        assert_eq!("ta".parse::<Language>().unwrap(), Language::Tamil);
        assert_eq!("English".parse::<Language>().unwrap(), Language::English);
        assert!("french".parse::<Language>().is_err());
    }
}
