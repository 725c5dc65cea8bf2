// SPDX-License-Identifier: GPL-3.0-only
//! Brightness reconciliation
//!
//! A DDC/CI write takes on the order of a hundred milliseconds, far longer
//! than a hotkey repeat or a slider drag step. The reconciler applies every
//! intent to the registry's in-memory state right away (so observers update
//! instantly) and defers the hardware write until intents stop arriving for
//! one debounce window. A burst of N intents therefore costs at most one
//! write per touched display.

mod debounce;

use std::collections::{BTreeMap, HashSet};
use std::time::{Duration, Instant};

pub use debounce::{DebounceState, Debouncer};

use crate::error::Result;
use crate::monitor::{DisplayId, MonitorRegistry};
use crate::preset::{PresetDefinition, resolve};

/// Default quiescence window before hardware is written
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(50);

/// Which displays an intent applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSet {
    AllControllable,
    One(DisplayId),
}

impl TargetSet {
    fn matches(&self, device_id: &str) -> bool {
        match self {
            TargetSet::AllControllable => true,
            TargetSet::One(id) => id == device_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentValue {
    Absolute(i32),
    Delta(i32),
}

/// Transient request to change brightness, consumed immediately
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrightnessIntent {
    pub targets: TargetSet,
    pub value: IntentValue,
}

impl BrightnessIntent {
    pub fn adjust_all(delta: i32) -> Self {
        Self {
            targets: TargetSet::AllControllable,
            value: IntentValue::Delta(delta),
        }
    }

    pub fn set_all(value: i32) -> Self {
        Self {
            targets: TargetSet::AllControllable,
            value: IntentValue::Absolute(value),
        }
    }

    pub fn set_one(device_id: impl Into<DisplayId>, value: i32) -> Self {
        Self {
            targets: TargetSet::One(device_id.into()),
            value: IntentValue::Absolute(value),
        }
    }
}

#[derive(Debug)]
pub struct Reconciler {
    debounce: Debouncer,
    /// Displays whose in-memory value hasn't reached hardware yet
    dirty: HashSet<DisplayId>,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}

impl Reconciler {
    pub fn new(window: Duration) -> Self {
        Self {
            debounce: Debouncer::new(window),
            dirty: HashSet::new(),
        }
    }

    pub fn state(&self) -> DebounceState {
        self.debounce.state()
    }

    /// When the pending hardware write is due, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.debounce.deadline()
    }

    /// Stage an intent in memory and (re)arm the debounce window.
    ///
    /// Returns the number of displays updated.
    pub fn apply(&mut self, registry: &mut MonitorRegistry, intent: &BrightnessIntent, now: Instant) -> usize {
        let targets: Vec<(DisplayId, i64)> = registry
            .get_all()
            .iter()
            .filter(|r| r.is_controllable() && intent.targets.matches(r.device_id()))
            .map(|r| {
                let value = match intent.value {
                    IntentValue::Absolute(v) => v as i64,
                    IntentValue::Delta(d) => r.current_brightness() as i64 + d as i64,
                };
                (r.device_id().to_string(), value)
            })
            .collect();

        self.stage(registry, targets, now)
    }

    /// Relative change on every controllable display
    pub fn adjust(&mut self, registry: &mut MonitorRegistry, delta: i32, now: Instant) -> usize {
        self.apply(registry, &BrightnessIntent::adjust_all(delta), now)
    }

    /// Absolute value on every controllable display
    pub fn set_absolute(&mut self, registry: &mut MonitorRegistry, value: i32, now: Instant) -> usize {
        self.apply(registry, &BrightnessIntent::set_all(value), now)
    }

    /// Stage per-display targets, e.g. the output of preset resolution
    pub fn apply_targets(
        &mut self,
        registry: &mut MonitorRegistry,
        targets: &BTreeMap<DisplayId, i32>,
        now: Instant,
    ) -> usize {
        let targets: Vec<(DisplayId, i64)> = targets
            .iter()
            .map(|(id, value)| (id.clone(), *value as i64))
            .collect();
        self.stage(registry, targets, now)
    }

    /// Refresh the registry lazily, resolve `preset` against it and stage the result
    pub fn apply_preset(
        &mut self,
        registry: &mut MonitorRegistry,
        preset: &PresetDefinition,
        now: Instant,
    ) -> Result<usize> {
        self.refresh(registry, false)?;
        let targets = resolve(preset, registry.get_all());
        debug!("Applying preset '{}' to {} display(s)", preset.name, targets.len());
        Ok(self.apply_targets(registry, &targets, now))
    }

    /// Refresh the registry, first flushing pending writes if a re-scan will
    /// tear down the channels they target.
    pub fn refresh(&mut self, registry: &mut MonitorRegistry, force: bool) -> Result<bool> {
        if force || !registry.is_initialized() {
            self.flush(registry);
        }
        registry.refresh(force)
    }

    /// Write pending values if the debounce window has elapsed.
    ///
    /// Returns the number of successful hardware writes.
    pub fn poll(&mut self, registry: &mut MonitorRegistry, now: Instant) -> usize {
        if self.debounce.fire_if_due(now) {
            self.write_dirty(registry)
        } else {
            0
        }
    }

    /// Write pending values now, regardless of the window
    pub fn flush(&mut self, registry: &mut MonitorRegistry) -> usize {
        self.debounce.cancel();
        self.write_dirty(registry)
    }

    fn stage(&mut self, registry: &mut MonitorRegistry, targets: Vec<(DisplayId, i64)>, now: Instant) -> usize {
        let mut updated = 0;
        for (id, value) in targets {
            if let Some(stored) = registry.stage_brightness(&id, value, true) {
                debug!(display_id = %id, brightness = stored, "Staged brightness");
                self.dirty.insert(id);
                updated += 1;
            }
        }
        if updated > 0 {
            self.debounce.arm(now);
        }
        updated
    }

    fn write_dirty(&mut self, registry: &mut MonitorRegistry) -> usize {
        if self.dirty.is_empty() {
            return 0;
        }

        // Registry order keeps the bus traffic deterministic
        let ids: Vec<DisplayId> = registry
            .get_all()
            .iter()
            .filter(|r| self.dirty.contains(r.device_id()))
            .map(|r| r.device_id().to_string())
            .collect();
        self.dirty.clear();

        let mut written = 0;
        for id in ids {
            let start = Instant::now();
            if registry.sync_hardware(&id) {
                debug!("Synced {} to hardware in {:?}", id, start.elapsed());
                written += 1;
            }
        }
        written
    }
}
