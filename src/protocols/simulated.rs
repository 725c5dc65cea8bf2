// SPDX-License-Identifier: GPL-3.0-only
//! In-memory display source
//!
//! Behaves like real hardware from the registry's point of view and records
//! every call, so enumeration and write counts can be asserted without a
//! monitor attached.

use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Result, anyhow, bail};

use super::{BrightnessRange, ControlChannel, DisplayArea, DisplaySource};

/// One simulated physical monitor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedMonitor {
    pub description: Option<String>,
    pub serial: Option<String>,
    pub range: BrightnessRange,
    /// When false, every read and write times out
    pub responsive: bool,
}

impl SimulatedMonitor {
    pub fn new(description: &str, serial: &str, current: u16) -> Self {
        Self {
            description: Some(description.to_string()),
            serial: Some(serial.to_string()),
            range: BrightnessRange::new(0, current, 100),
            responsive: true,
        }
    }

    pub fn unresponsive(description: &str) -> Self {
        Self {
            description: Some(description.to_string()),
            serial: None,
            range: BrightnessRange::new(0, 0, 100),
            responsive: false,
        }
    }
}

/// One simulated display area with zero or more monitors behind it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedArea {
    pub id: String,
    pub monitors: Vec<SimulatedMonitor>,
}

impl SimulatedArea {
    pub fn new(id: &str, monitors: Vec<SimulatedMonitor>) -> Self {
        Self {
            id: id.to_string(),
            monitors,
        }
    }
}

/// Every hardware call made against the simulated source
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CallLog {
    pub enumerations: usize,
    pub reads: usize,
    /// (area id, monitor index, value) in call order
    pub writes: Vec<(String, usize, u16)>,
    pub opened: usize,
    pub closed: usize,
    pub double_closes: usize,
}

#[derive(Debug, Default)]
struct Shared {
    areas: Vec<SimulatedArea>,
    fail_discovery: bool,
    log: CallLog,
}

/// Cloneable handle to inspect and rewire a [`SimulatedSource`] from tests
#[derive(Debug, Clone, Default)]
pub struct SimulatedHardware {
    shared: Arc<Mutex<Shared>>,
}

impl SimulatedHardware {
    pub fn new(areas: Vec<SimulatedArea>) -> Self {
        let hw = Self::default();
        hw.lock().areas = areas;
        hw
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        // A panicking test thread must not hide the log from the others
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Source handed to the registry
    pub fn source(&self) -> SimulatedSource {
        SimulatedSource { hw: self.clone() }
    }

    /// Replace the topology, as if monitors were plugged or unplugged
    pub fn set_areas(&self, areas: Vec<SimulatedArea>) {
        self.lock().areas = areas;
    }

    pub fn set_fail_discovery(&self, fail: bool) {
        self.lock().fail_discovery = fail;
    }

    pub fn set_responsive(&self, area: &str, index: usize, responsive: bool) {
        let mut shared = self.lock();
        if let Some(monitor) = self.monitor_mut(&mut shared, area, index) {
            monitor.responsive = responsive;
        }
    }

    /// Brightness currently held by the simulated monitor
    pub fn brightness(&self, area: &str, index: usize) -> Option<u16> {
        let mut shared = self.lock();
        self.monitor_mut(&mut shared, area, index)
            .map(|m| m.range.current)
    }

    pub fn log(&self) -> CallLog {
        self.lock().log.clone()
    }

    pub fn write_count(&self) -> usize {
        self.lock().log.writes.len()
    }

    fn monitor_mut<'a>(
        &self,
        shared: &'a mut Shared,
        area: &str,
        index: usize,
    ) -> Option<&'a mut SimulatedMonitor> {
        shared
            .areas
            .iter_mut()
            .find(|a| a.id == area)
            .and_then(|a| a.monitors.get_mut(index))
    }
}

/// Display source over [`SimulatedHardware`]
#[derive(Debug)]
pub struct SimulatedSource {
    hw: SimulatedHardware,
}

impl DisplaySource for SimulatedSource {
    fn display_areas(&mut self) -> Result<Vec<DisplayArea>> {
        let mut shared = self.hw.lock();
        shared.log.enumerations += 1;
        if shared.fail_discovery {
            bail!("simulated display topology query failed");
        }
        Ok(shared
            .areas
            .iter()
            .map(|a| DisplayArea::new(a.id.clone(), Some(a.id.clone())))
            .collect())
    }

    fn open_channels(&mut self, area: &DisplayArea) -> Vec<Box<dyn ControlChannel>> {
        let mut shared = self.hw.lock();
        let count = shared
            .areas
            .iter()
            .find(|a| a.id == area.id)
            .map(|a| a.monitors.len())
            .unwrap_or(0);
        shared.log.opened += count;

        (0..count)
            .map(|index| {
                Box::new(SimulatedChannel {
                    hw: self.hw.clone(),
                    area: area.id.clone(),
                    index,
                    closed: false,
                }) as Box<dyn ControlChannel>
            })
            .collect()
    }
}

/// Channel to one [`SimulatedMonitor`]
#[derive(Debug)]
pub struct SimulatedChannel {
    hw: SimulatedHardware,
    area: String,
    index: usize,
    closed: bool,
}

impl SimulatedChannel {
    fn with_monitor<T>(&self, f: impl FnOnce(&mut SimulatedMonitor) -> Result<T>) -> Result<T> {
        if self.closed {
            bail!("channel {}#{} is closed", self.area, self.index);
        }
        let mut shared = self.hw.lock();
        let monitor = self
            .hw
            .monitor_mut(&mut shared, &self.area, self.index)
            .ok_or_else(|| anyhow!("monitor {}#{} unplugged", self.area, self.index))?;
        if !monitor.responsive {
            bail!("DDC/CI read timed out");
        }
        f(monitor)
    }
}

impl ControlChannel for SimulatedChannel {
    fn description(&self) -> Option<String> {
        let mut shared = self.hw.lock();
        self.hw
            .monitor_mut(&mut shared, &self.area, self.index)
            .and_then(|m| m.description.clone())
    }

    fn stable_id(&self) -> Option<String> {
        let mut shared = self.hw.lock();
        self.hw
            .monitor_mut(&mut shared, &self.area, self.index)
            .and_then(|m| m.serial.clone())
    }

    fn read_brightness(&mut self) -> Result<BrightnessRange> {
        self.hw.lock().log.reads += 1;
        self.with_monitor(|m| Ok(m.range))
    }

    fn write_brightness(&mut self, value: u16) -> Result<()> {
        self.with_monitor(|m| {
            m.range.current = value;
            Ok(())
        })?;
        self.hw
            .lock()
            .log
            .writes
            .push((self.area.clone(), self.index, value));
        Ok(())
    }

    fn close(&mut self) {
        let mut shared = self.hw.lock();
        if self.closed {
            shared.log.double_closes += 1;
        } else {
            self.closed = true;
            shared.log.closed += 1;
        }
    }
}
