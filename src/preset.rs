// SPDX-License-Identifier: GPL-3.0-only
//! Brightness presets
//!
//! A preset maps device ids, or the `"*"` wildcard, to a target brightness.
//! Names are unique within a collection, compared case-insensitively.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::monitor::{DisplayId, MonitorRecord};

/// Key matching every display without a specific entry
pub const WILDCARD: &str = "*";
pub const MAX_PRESETS: usize = 10;

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresetDefinition {
    pub name: String,
    /// Map of device id (or `"*"`) -> brightness
    pub levels: BTreeMap<String, i32>,
}

impl PresetDefinition {
    pub fn new<K: Into<String>>(name: &str, levels: impl IntoIterator<Item = (K, i32)>) -> Self {
        Self {
            name: name.to_string(),
            levels: levels.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Same level for every display
    pub fn uniform(name: &str, value: i32) -> Self {
        Self::new(name, [(WILDCARD, value)])
    }

    pub fn day() -> Self {
        Self::uniform("Day", 100)
    }

    pub fn night() -> Self {
        Self::uniform("Night", 30)
    }

    pub fn custom() -> Self {
        Self::uniform("Custom", 50)
    }

    /// Snapshot the current brightness of every controllable display
    pub fn capture(name: &str, records: &[MonitorRecord]) -> Self {
        Self::new(
            name,
            records
                .iter()
                .filter(|r| r.is_controllable())
                .map(|r| (r.device_id().to_string(), r.current_brightness() as i32)),
        )
    }

    /// Most specific level for a device: exact id first, then the wildcard
    pub fn level_for(&self, device_id: &str) -> Option<i32> {
        self.levels
            .get(device_id)
            .or_else(|| self.levels.get(WILDCARD))
            .copied()
    }

    pub fn matches_name(&self, name: &str) -> bool {
        self.name.to_lowercase() == name.to_lowercase()
    }
}

/// Map every controllable record to its preset target.
///
/// Records with neither a specific nor a wildcard entry are skipped.
pub fn resolve(preset: &PresetDefinition, records: &[MonitorRecord]) -> BTreeMap<DisplayId, i32> {
    records
        .iter()
        .filter(|r| r.is_controllable())
        .filter_map(|r| {
            let level = preset.level_for(r.device_id());
            if level.is_none() {
                debug!(display_id = %r.device_id(), "No level in preset '{}', skipping", preset.name);
            }
            level.map(|level| (r.device_id().to_string(), level))
        })
        .collect()
}

/// Ordered preset list with case-insensitive unique names
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PresetCollection(Vec<PresetDefinition>);

impl Default for PresetCollection {
    fn default() -> Self {
        Self(vec![
            PresetDefinition::day(),
            PresetDefinition::night(),
            PresetDefinition::custom(),
        ])
    }
}

impl PresetCollection {
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Find a preset by name
    pub fn get(&self, name: &str) -> Option<&PresetDefinition> {
        self.0.iter().find(|p| p.matches_name(name))
    }

    /// Add a preset or replace the levels of the one sharing its name.
    ///
    /// An existing preset keeps its position and original spelling.
    pub fn save(&mut self, preset: PresetDefinition) -> Result<()> {
        if preset.name.trim().is_empty() {
            return Err(Error::Settings("preset name must not be empty".into()));
        }
        if let Some(existing) = self.0.iter_mut().find(|p| p.matches_name(&preset.name)) {
            existing.levels = preset.levels;
            return Ok(());
        }
        if self.0.len() >= MAX_PRESETS {
            return Err(Error::Settings(format!(
                "cannot store more than {} presets",
                MAX_PRESETS
            )));
        }
        self.0.push(preset);
        Ok(())
    }

    /// Delete a preset by name
    pub fn delete(&mut self, name: &str) -> bool {
        let len_before = self.0.len();
        self.0.retain(|p| !p.matches_name(name));
        self.0.len() != len_before
    }

    pub fn names(&self) -> Vec<&str> {
        self.0.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PresetDefinition> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Drop later duplicates that differ only in case, e.g. after a hand edit
    pub(crate) fn dedup_names(&mut self) {
        let mut seen: Vec<String> = Vec::new();
        self.0.retain(|p| {
            let key = p.name.to_lowercase();
            if seen.contains(&key) {
                warn!("Ignoring duplicate preset '{}'", p.name);
                false
            } else {
                seen.push(key);
                true
            }
        });
    }
}
