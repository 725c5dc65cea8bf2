// SPDX-License-Identifier: GPL-3.0-only
//! Monitor registry
//!
//! Owns the current snapshot of monitor records together with the channel
//! arena backing them, and fans brightness changes out to subscribers.
//!
//! # Ownership
//!
//! The registry is the only holder of control channels. A refresh closes
//! every channel of the previous generation before the display source is
//! queried again, so a stale handle can't be reused after a topology change.
//! All mutation goes through `&mut self`; readers never observe a partially
//! rebuilt list.

use super::arena::ChannelArena;
use super::enumeration::{ProbeOptions, enumerate};
use super::record::{MonitorRecord, MonitorSnapshot};
use super::{DisplayId, ScreenBrightness};
use crate::error::{Error, Result};
use crate::protocols::DisplaySource;

/// Emitted after every successful brightness mutation made with `notify`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrightnessChanged {
    pub device_id: DisplayId,
    pub value: ScreenBrightness,
}

pub type SubscriptionId = u64;

/// Returns `false` once the subscriber is gone and should be dropped
type Handler = Box<dyn FnMut(&BrightnessChanged) -> bool + Send>;

pub struct MonitorRegistry {
    source: Box<dyn DisplaySource>,
    arena: ChannelArena,
    records: Vec<MonitorRecord>,
    initialized: bool,
    probe: ProbeOptions,
    subscribers: Vec<(SubscriptionId, Handler)>,
    next_subscription: SubscriptionId,
}

impl MonitorRegistry {
    pub fn new(source: Box<dyn DisplaySource>, probe: ProbeOptions) -> Self {
        Self {
            source,
            arena: ChannelArena::new(),
            records: Vec::new(),
            initialized: false,
            probe,
            subscribers: Vec::new(),
            next_subscription: 1,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Re-scan hardware unless already initialized and `force` is false.
    ///
    /// Returns whether a scan happened. On a discovery failure the registry
    /// is left empty and uninitialized so the next call tries again.
    pub fn refresh(&mut self, force: bool) -> Result<bool> {
        if self.initialized && !force {
            return Ok(false);
        }

        self.records.clear();
        let closed = self.arena.close_all();
        if closed > 0 {
            debug!("Closed {} channel(s) before re-enumeration", closed);
        }

        match enumerate(self.source.as_mut(), &mut self.arena, &self.probe) {
            Ok(records) => {
                self.records = records;
                self.initialized = true;
                Ok(true)
            }
            Err(e) => {
                error!("Display discovery failed, no displays available: {}", e);
                self.initialized = false;
                Err(e)
            }
        }
    }

    /// Force the next `refresh(false)` to re-scan
    pub fn invalidate(&mut self) {
        self.initialized = false;
    }

    pub fn get_all(&self) -> &[MonitorRecord] {
        &self.records
    }

    pub fn get(&self, device_id: &str) -> Option<&MonitorRecord> {
        self.records.iter().find(|r| r.device_id == device_id)
    }

    pub fn snapshot(&self) -> Vec<MonitorSnapshot> {
        self.records.iter().map(MonitorRecord::snapshot).collect()
    }

    /// Clamp `value`, write it to hardware and on success store it.
    ///
    /// Nothing is mutated when the record is missing, not controllable or
    /// the write fails.
    pub fn set_brightness(&mut self, device_id: &str, value: i64, notify: bool) -> bool {
        match self.write_hardware(device_id, value) {
            Ok(clamped) => {
                self.store(device_id, clamped, notify);
                true
            }
            Err(e) => {
                warn!(display_id = %device_id, "Failed to set brightness: {}", e);
                false
            }
        }
    }

    /// Update only the in-memory value, leaving hardware untouched.
    ///
    /// Returns the clamped value that was stored, or `None` if the record is
    /// missing or not controllable.
    pub fn stage_brightness(
        &mut self,
        device_id: &str,
        value: i64,
        notify: bool,
    ) -> Option<ScreenBrightness> {
        let record = self.get(device_id).filter(|r| r.is_controllable())?;
        let clamped = record.clamp(value);
        self.store(device_id, clamped, notify);
        Some(clamped)
    }

    /// Push the in-memory value of `device_id` to hardware without notifying
    pub fn sync_hardware(&mut self, device_id: &str) -> bool {
        let Some(current) = self.get(device_id).map(|r| r.current_brightness) else {
            return false;
        };
        self.set_brightness(device_id, current as i64, false)
    }

    /// Query hardware for the current value of one display.
    ///
    /// A failed read marks the record unsupported.
    pub fn read_brightness(&mut self, device_id: &str, notify: bool) -> Result<ScreenBrightness> {
        let position = self.position(device_id)?;
        let record = &self.records[position];
        if !record.is_controllable() {
            return Err(Error::ChannelClosed(device_id.to_string()));
        }
        let channel_id = record.channel.ok_or_else(|| Error::ChannelClosed(device_id.to_string()))?;

        let read = match self.arena.get_mut(channel_id) {
            Some(channel) => channel.read_brightness().map_err(|source| Error::ControlChannel {
                id: device_id.to_string(),
                source,
            }),
            None => Err(Error::ChannelClosed(device_id.to_string())),
        };

        match read {
            Ok(range) => {
                let record = &mut self.records[position];
                let previous = record.current_brightness;
                record.apply_range(range);
                let value = record.current_brightness;
                if notify && value != previous {
                    self.emit(BrightnessChanged {
                        device_id: device_id.to_string(),
                        value,
                    });
                }
                Ok(value)
            }
            Err(e) => {
                self.records[position].mark_unsupported(e.to_string());
                Err(e)
            }
        }
    }

    /// Register a brightness-changed handler
    pub fn subscribe<F>(&mut self, mut handler: F) -> SubscriptionId
    where
        F: FnMut(&BrightnessChanged) + Send + 'static,
    {
        self.subscribe_while(move |event| {
            handler(event);
            true
        })
    }

    /// Register a handler that stays subscribed until it returns `false`,
    /// e.g. when the receiving end of its channel has been dropped.
    pub fn subscribe_while<F>(&mut self, handler: F) -> SubscriptionId
    where
        F: FnMut(&BrightnessChanged) -> bool + Send + 'static,
    {
        let id = self.next_subscription;
        self.next_subscription += 1;
        self.subscribers.push((id, Box::new(handler)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sub, _)| *sub != id);
        self.subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Release every channel and forget all records (process shutdown)
    pub fn close(&mut self) {
        self.records.clear();
        let closed = self.arena.close_all();
        self.initialized = false;
        info!("Registry closed, released {} channel(s)", closed);
    }

    fn position(&self, device_id: &str) -> Result<usize> {
        self.records
            .iter()
            .position(|r| r.device_id == device_id)
            .ok_or_else(|| Error::DisplayNotFound(device_id.to_string()))
    }

    fn write_hardware(&mut self, device_id: &str, value: i64) -> Result<ScreenBrightness> {
        let position = self.position(device_id)?;
        let record = &self.records[position];
        if !record.is_controllable() {
            return Err(Error::ChannelClosed(device_id.to_string()));
        }
        let clamped = record.clamp(value);
        let channel_id = record.channel.ok_or_else(|| Error::ChannelClosed(device_id.to_string()))?;

        let channel = self
            .arena
            .get_mut(channel_id)
            .ok_or_else(|| Error::ChannelClosed(device_id.to_string()))?;
        channel
            .write_brightness(clamped)
            .map_err(|source| Error::ControlChannel {
                id: device_id.to_string(),
                source,
            })?;

        debug!(display_id = %device_id, brightness = clamped, "Wrote brightness to hardware");
        Ok(clamped)
    }

    fn store(&mut self, device_id: &str, value: ScreenBrightness, notify: bool) {
        let Some(record) = self.records.iter_mut().find(|r| r.device_id == device_id) else {
            return;
        };
        record.current_brightness = value;
        if notify {
            self.emit(BrightnessChanged {
                device_id: device_id.to_string(),
                value,
            });
        }
    }

    fn emit(&mut self, event: BrightnessChanged) {
        self.subscribers.retain_mut(|(id, handler)| {
            let alive = handler(&event);
            if !alive {
                debug!("Dropping closed subscriber {}", id);
            }
            alive
        });
    }
}

impl std::fmt::Debug for MonitorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorRegistry")
            .field("records", &self.records)
            .field("initialized", &self.initialized)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::protocols::simulated::{SimulatedArea, SimulatedHardware, SimulatedMonitor};

    fn two_monitors() -> SimulatedHardware {
        SimulatedHardware::new(vec![
            SimulatedArea::new("DP-1", vec![SimulatedMonitor::new("Left", "MonitorA", 40)]),
            SimulatedArea::new("DP-2", vec![SimulatedMonitor::new("Right", "MonitorB", 60)]),
        ])
    }

    fn registry(hw: &SimulatedHardware) -> MonitorRegistry {
        let mut registry = MonitorRegistry::new(Box::new(hw.source()), ProbeOptions::immediate());
        registry.refresh(false).unwrap();
        registry
    }

    fn recorder(registry: &mut MonitorRegistry) -> Arc<Mutex<Vec<BrightnessChanged>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        registry.subscribe(move |event| sink.lock().unwrap().push(event.clone()));
        seen
    }

    #[test]
    fn test_refresh_without_force_scans_once() {
        let hw = two_monitors();
        let mut registry = MonitorRegistry::new(Box::new(hw.source()), ProbeOptions::immediate());

        assert!(registry.refresh(false).unwrap());
        assert!(!registry.refresh(false).unwrap());
        assert_eq!(hw.log().enumerations, 1);

        assert!(registry.refresh(true).unwrap());
        assert_eq!(hw.log().enumerations, 2);
    }

    #[test]
    fn test_invalidate_forces_next_refresh() {
        let hw = two_monitors();
        let mut registry = registry(&hw);

        registry.invalidate();
        assert!(registry.refresh(false).unwrap());
        assert_eq!(hw.log().enumerations, 2);
    }

    #[test]
    fn test_refresh_closes_previous_channels() {
        let hw = two_monitors();
        let mut registry = registry(&hw);

        hw.set_areas(vec![SimulatedArea::new(
            "DP-1",
            vec![SimulatedMonitor::new("Left", "MonitorA", 40)],
        )]);
        registry.refresh(true).unwrap();

        let log = hw.log();
        assert_eq!(log.opened, 3);
        assert_eq!(log.closed, 2);
        assert_eq!(log.double_closes, 0);
        assert_eq!(registry.get_all().len(), 1);
    }

    #[test]
    fn test_discovery_failure_leaves_registry_empty() {
        let hw = two_monitors();
        let mut registry = registry(&hw);

        hw.set_fail_discovery(true);
        assert!(registry.refresh(true).is_err());
        assert!(registry.get_all().is_empty());
        assert!(!registry.is_initialized());

        hw.set_fail_discovery(false);
        assert!(registry.refresh(false).unwrap());
        assert_eq!(registry.get_all().len(), 2);
    }

    #[test]
    fn test_set_brightness_clamps_to_max() {
        let hw = two_monitors();
        let mut registry = registry(&hw);

        assert!(registry.set_brightness("MonitorA", 500, true));
        assert_eq!(registry.get("MonitorA").unwrap().current_brightness(), 100);
        assert_eq!(hw.brightness("DP-1", 0), Some(100));

        assert!(registry.set_brightness("MonitorA", -5, true));
        assert_eq!(registry.get("MonitorA").unwrap().current_brightness(), 0);
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let hw = two_monitors();
        let mut registry = registry(&hw);

        for value in [0, 1, 37, 99, 100] {
            assert!(registry.set_brightness("MonitorB", value, false));
            assert_eq!(registry.read_brightness("MonitorB", false).unwrap(), value as u16);
        }
    }

    #[test]
    fn test_failed_write_does_not_mutate() {
        let hw = two_monitors();
        let mut registry = registry(&hw);
        let seen = recorder(&mut registry);

        hw.set_responsive("DP-1", 0, false);
        assert!(!registry.set_brightness("MonitorA", 80, true));

        let record = registry.get("MonitorA").unwrap();
        assert_eq!(record.current_brightness(), 40);
        assert!(record.supports_control());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_failed_read_marks_unsupported() {
        let hw = two_monitors();
        let mut registry = registry(&hw);

        hw.set_responsive("DP-2", 0, false);
        assert!(registry.read_brightness("MonitorB", true).is_err());

        let record = registry.get("MonitorB").unwrap();
        assert!(!record.supports_control());
        assert!(record.last_error().is_some());
        assert!(!registry.set_brightness("MonitorB", 10, true));
    }

    #[test]
    fn test_unsupported_record_is_a_no_op() {
        let hw = SimulatedHardware::new(vec![SimulatedArea::new("HDMI-A-1", vec![])]);
        let mut registry = registry(&hw);

        assert!(!registry.set_brightness("HDMI-A-1", 50, true));
        assert_eq!(registry.stage_brightness("HDMI-A-1", 50, true), None);
        assert!(hw.log().writes.is_empty());
    }

    #[test]
    fn test_unknown_display_is_rejected() {
        let hw = two_monitors();
        let mut registry = registry(&hw);

        assert!(!registry.set_brightness("nope", 50, true));
        assert!(matches!(
            registry.read_brightness("nope", false),
            Err(Error::DisplayNotFound(_))
        ));
    }

    #[test]
    fn test_notifications_follow_mutation_order() {
        let hw = two_monitors();
        let mut registry = registry(&hw);
        let seen = recorder(&mut registry);

        registry.set_brightness("MonitorA", 10, true);
        registry.stage_brightness("MonitorA", 20, true);
        // Hardware sync in between must stay silent
        registry.sync_hardware("MonitorA");
        registry.set_brightness("MonitorB", 30, true);
        registry.set_brightness("MonitorA", 40, false);
        registry.stage_brightness("MonitorA", 50, true);

        let values: Vec<_> = seen
            .lock()
            .unwrap()
            .iter()
            .map(|e| (e.device_id.clone(), e.value))
            .collect();
        assert_eq!(
            values,
            vec![
                ("MonitorA".to_string(), 10),
                ("MonitorA".to_string(), 20),
                ("MonitorB".to_string(), 30),
                ("MonitorA".to_string(), 50),
            ]
        );
    }

    #[test]
    fn test_every_subscriber_sees_every_event() {
        let hw = two_monitors();
        let mut registry = registry(&hw);
        let first = recorder(&mut registry);
        let second = recorder(&mut registry);

        registry.set_brightness("MonitorA", 15, true);
        registry.set_brightness("MonitorB", 25, true);

        assert_eq!(first.lock().unwrap().len(), 2);
        assert_eq!(*first.lock().unwrap(), *second.lock().unwrap());
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let hw = two_monitors();
        let mut registry = registry(&hw);
        let seen = Arc::new(Mutex::new(0));
        let sink = seen.clone();
        let id = registry.subscribe(move |_| *sink.lock().unwrap() += 1);

        registry.set_brightness("MonitorA", 15, true);
        assert!(registry.unsubscribe(id));
        assert!(!registry.unsubscribe(id));
        registry.set_brightness("MonitorA", 25, true);

        assert_eq!(*seen.lock().unwrap(), 1);
        assert_eq!(registry.subscriber_count(), 0);
    }

    #[test]
    fn test_closed_subscriber_is_dropped_on_next_event() {
        let hw = two_monitors();
        let mut registry = registry(&hw);
        let delivered = Arc::new(Mutex::new(0));
        let sink = delivered.clone();
        registry.subscribe_while(move |_| {
            let mut count = sink.lock().unwrap();
            *count += 1;
            *count < 2
        });
        let kept = recorder(&mut registry);

        registry.set_brightness("MonitorA", 15, true);
        registry.set_brightness("MonitorA", 20, true);
        assert_eq!(registry.subscriber_count(), 1);
        registry.set_brightness("MonitorA", 25, true);

        assert_eq!(*delivered.lock().unwrap(), 2);
        assert_eq!(kept.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_close_releases_channels() {
        let hw = two_monitors();
        let mut registry = registry(&hw);

        registry.close();

        assert!(registry.get_all().is_empty());
        assert_eq!(hw.log().closed, 2);
        drop(registry);
        assert_eq!(hw.log().double_closes, 0);
    }
}
