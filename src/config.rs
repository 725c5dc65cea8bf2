// SPDX-License-Identifier: GPL-3.0-only
//! Persisted settings
//!
//! The core only needs a load/save capability; [`JsonFileStore`] is the one
//! the background process uses, [`MemoryStore`] keeps tests off the disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::monitor::{DisplayId, ProbeOptions, ScreenBrightness};
use crate::preset::PresetCollection;

pub const CONFIG_VERSION: u64 = 1;
pub const APP_DIR: &str = "monitor-brightness";
const SETTINGS_FILE: &str = "settings.json";

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub version: u64,
    /// Saved brightness presets, in display order
    pub presets: PresetCollection,
    /// Last brightness the user settled on, per display
    pub last_brightness: BTreeMap<DisplayId, ScreenBrightness>,
    /// Quiescence window before hardware is written
    pub debounce_ms: u64,
    /// Brightness change per hotkey press
    pub step: i32,
    /// Brightness reads attempted per monitor during a scan
    pub probe_attempts: u32,
    /// Re-apply `last_brightness` when the service starts
    pub restore_on_start: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            presets: PresetCollection::default(),
            last_brightness: BTreeMap::new(),
            debounce_ms: 50,
            step: 5,
            probe_attempts: 5,
            restore_on_start: false,
        }
    }
}

impl Settings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn probe_options(&self) -> ProbeOptions {
        ProbeOptions {
            attempts: self.probe_attempts.max(1),
            ..ProbeOptions::default()
        }
    }

    pub fn remember_brightness(&mut self, device_id: &str, value: ScreenBrightness) {
        self.last_brightness.insert(device_id.to_string(), value);
    }

    pub fn last_brightness(&self, device_id: &str) -> Option<ScreenBrightness> {
        self.last_brightness.get(device_id).copied()
    }

    /// Fix up anything a hand edit could have broken
    fn normalize(mut self) -> Self {
        self.presets.dedup_names();
        if self.step == 0 {
            self.step = Settings::default().step;
        }
        self
    }
}

/// Load/save capability for [`Settings`]
pub trait SettingsStore: Send {
    /// Stored settings, or defaults if there are none or they are unreadable
    fn load(&self) -> Settings;

    fn save(&self, settings: &Settings) -> Result<()>;
}

/// Pretty-printed JSON file under the user's config directory
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `$XDG_CONFIG_HOME/monitor-brightness/settings.json`
    pub fn default_location() -> Result<Self> {
        let dir = dirs::config_dir()
            .ok_or_else(|| Error::Settings("no config directory".into()))?
            .join(APP_DIR);
        Ok(Self::new(dir.join(SETTINGS_FILE)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Settings> {
        let json = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

impl SettingsStore for JsonFileStore {
    fn load(&self) -> Settings {
        if !self.path.exists() {
            info!("No settings at {}, using defaults", self.path.display());
            return Settings::default();
        }
        match self.read() {
            Ok(settings) => settings.normalize(),
            Err(e) => {
                warn!("Failed to load settings from {}: {}", self.path.display(), e);
                Settings::default()
            }
        }
    }

    fn save(&self, settings: &Settings) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(settings)?;
        // Write-then-rename so a crash never leaves a truncated file behind
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!("Saved settings to {}", self.path.display());
        Ok(())
    }
}

/// In-memory store; clones share the same settings
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    settings: Arc<Mutex<Settings>>,
    saves: Arc<Mutex<usize>>,
}

impl MemoryStore {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: Arc::new(Mutex::new(settings)),
            saves: Arc::default(),
        }
    }

    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SettingsStore for MemoryStore {
    fn load(&self) -> Settings {
        self.settings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn save(&self, settings: &Settings) -> Result<()> {
        *self.settings.lock().unwrap_or_else(|e| e.into_inner()) = settings.clone();
        *self.saves.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preset::PresetDefinition;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("settings.json"));

        let settings = store.load();

        assert_eq!(settings, Settings::default());
        assert_eq!(settings.presets.names(), vec!["Day", "Night", "Custom"]);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested").join("settings.json"));
        let mut settings = Settings::default();
        settings.remember_brightness("ddc-ABC123", 42);
        settings
            .presets
            .save(PresetDefinition::new("Reading", [("ddc-ABC123", 60), ("*", 45)]))
            .unwrap();

        store.save(&settings).unwrap();
        let loaded = store.load();

        assert_eq!(loaded, settings);
        assert_eq!(loaded.last_brightness("ddc-ABC123"), Some(42));
        assert!(!dir.path().join("nested").join("settings.json.tmp").exists());
    }

    #[test]
    fn test_persisted_shape() {
        let mut settings = Settings::default();
        settings.remember_brightness("DP-1", 70);

        let json: serde_json::Value = serde_json::to_value(&settings).unwrap();

        assert_eq!(json["presets"][0]["name"], "Day");
        assert_eq!(json["presets"][0]["levels"]["*"], 100);
        assert_eq!(json["lastBrightness"]["DP-1"], 70);
        assert_eq!(json["debounceMs"], 50);
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert_eq!(JsonFileStore::new(path).load(), Settings::default());
    }

    #[test]
    fn test_partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{ "presets": [{ "name": "Dim", "levels": { "*": 10 } }, { "name": "DIM", "levels": {} }], "step": 0 }"#,
        )
        .unwrap();

        let settings = JsonFileStore::new(path).load();

        assert_eq!(settings.presets.names(), vec!["Dim"]);
        assert_eq!(settings.step, 5);
        assert_eq!(settings.debounce_ms, 50);
    }

    #[test]
    fn test_memory_store_counts_saves() {
        let store = MemoryStore::default();
        let mut settings = store.load();
        settings.step = 10;

        store.save(&settings).unwrap();

        assert_eq!(store.save_count(), 1);
        assert_eq!(store.load().step, 10);
    }
}
