// SPDX-License-Identifier: GPL-3.0-only
//! DDC/CI (Display Data Channel Command Interface) protocol implementation
//!
//! DDC/CI is a standard protocol for controlling monitors over I2C bus.
//! It's supported by most modern external monitors via the video cable.
//!
//! Display areas are the connected DRM connectors reported by udev. Each
//! connector points at the I2C bus carrying its DDC lines, which is how a
//! `ddc-hi` display gets attached to the connector it sits behind. Displays
//! that can't be attached to any connector become areas of their own.

use std::os::unix::fs::MetadataExt;
use std::path::Path;

use anyhow::{Result, anyhow};
use ddc_hi::{Ddc, Display};

use super::{BrightnessRange, ControlChannel, DisplayArea, DisplaySource};

/// VCP (Virtual Control Panel) code for brightness
const BRIGHTNESS_CODE: u8 = 0x10;

/// DDC/CI channel to one physical monitor
pub struct DdcCiChannel {
    display: Option<Display>,
}

impl DdcCiChannel {
    pub fn new(display: Display) -> Self {
        Self {
            display: Some(display),
        }
    }

    fn display(&mut self) -> Result<&mut Display> {
        self.display
            .as_mut()
            .ok_or_else(|| anyhow!("DDC/CI channel already closed"))
    }
}

impl ControlChannel for DdcCiChannel {
    fn description(&self) -> Option<String> {
        self.display
            .as_ref()
            .and_then(|d| d.info.model_name.clone())
            .filter(|name| !name.trim().is_empty())
    }

    fn stable_id(&self) -> Option<String> {
        // EDID serial keeps settings attached to the monitor across reboots
        self.display
            .as_ref()
            .and_then(|d| d.info.serial_number.clone())
            .map(|serial| serial.trim().to_string())
            .filter(|serial| !serial.is_empty())
            .map(|serial| format!("ddc-{}", serial))
    }

    fn read_brightness(&mut self) -> Result<BrightnessRange> {
        let value = self.display()?.handle.get_vcp_feature(BRIGHTNESS_CODE)?;
        Ok(BrightnessRange::new(0, value.value(), value.maximum()))
    }

    fn write_brightness(&mut self, value: u16) -> Result<()> {
        self.display()?
            .handle
            .set_vcp_feature(BRIGHTNESS_CODE, value)?;
        Ok(())
    }

    fn close(&mut self) {
        // Dropping the display closes the I2C device
        if let Some(closed) = self.display.take() {
            debug!("Closing DDC/CI channel {}", closed.info.id);
        }
    }
}

impl std::fmt::Debug for DdcCiChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.display {
            Some(display) => write!(
                f,
                "DdcCiChannel(id: {}, name: {:?})",
                display.info.id, display.info.model_name
            ),
            None => write!(f, "DdcCiChannel(closed)"),
        }
    }
}

/// Display source backed by udev DRM connectors and `ddc-hi`
#[derive(Default)]
pub struct DdcCiSource {
    /// Displays found by the current scan that no area has claimed yet
    unclaimed: Vec<Display>,
}

impl DdcCiSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DisplaySource for DdcCiSource {
    fn display_areas(&mut self) -> Result<Vec<DisplayArea>> {
        // Anything left over from a previous scan is stale
        self.unclaimed = Display::enumerate();
        info!("Found {} DDC/CI display(s) total", self.unclaimed.len());

        let mut areas = match connected_connectors() {
            Ok(areas) => areas,
            Err(e) => {
                warn!("Failed to enumerate DRM connectors: {}", e);
                if self.unclaimed.is_empty() {
                    return Err(e);
                }
                Vec::new()
            }
        };

        // Monitors whose bus isn't linked from any connector (docks, MST hubs)
        let claimed: Vec<String> = areas.iter().filter_map(|a| a.channel_key.clone()).collect();
        for unclaimed in &self.unclaimed {
            if !claimed.contains(&unclaimed.info.id) {
                debug!(
                    "DDC/CI display {} not attached to a connector, listing it on its own",
                    unclaimed.info.id
                );
                areas.push(DisplayArea::new(
                    format!("i2c-{}", unclaimed.info.id),
                    Some(unclaimed.info.id.clone()),
                ));
            }
        }

        Ok(areas)
    }

    fn open_channels(&mut self, area: &DisplayArea) -> Vec<Box<dyn ControlChannel>> {
        let Some(key) = area.channel_key.as_deref() else {
            return Vec::new();
        };

        let (mine, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.unclaimed)
            .into_iter()
            .partition(|d| d.info.id == key);
        self.unclaimed = rest;

        mine.into_iter()
            .map(|display| Box::new(DdcCiChannel::new(display)) as Box<dyn ControlChannel>)
            .collect()
    }
}

/// Connected DRM connectors, sorted by name
fn connected_connectors() -> Result<Vec<DisplayArea>> {
    let mut enumerator = udev::Enumerator::new()?;
    enumerator.match_subsystem("drm")?;

    let mut areas = Vec::new();
    for device in enumerator.scan_devices()? {
        let sysname = device.sysname().to_string_lossy().to_string();
        let Some(connector) = connector_name(&sysname) else {
            continue;
        };
        let connected = device
            .attribute_value("status")
            .is_some_and(|s| s.to_string_lossy().trim() == "connected");
        if !connected {
            continue;
        }

        let channel_key = ddc_bus(device.syspath()).and_then(|bus| bus_device_id(&bus));
        if channel_key.is_none() {
            debug!("Connector {} exposes no DDC bus", connector);
        }
        areas.push(DisplayArea::new(connector, channel_key));
    }

    areas.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(areas)
}

/// Connector part of a DRM sysname.
///
/// Connectors look like "card1-DP-2"; plain "card1" and render nodes don't.
fn connector_name(sysname: &str) -> Option<&str> {
    let (card, connector) = sysname.split_once('-')?;
    (card.starts_with("card") && !connector.is_empty()).then_some(connector)
}

/// Name of the I2C bus ("i2c-N") wired to a connector's DDC lines
fn ddc_bus(syspath: &Path) -> Option<String> {
    if let Ok(target) = std::fs::read_link(syspath.join("ddc")) {
        return target.file_name().map(|n| n.to_string_lossy().to_string());
    }

    // DisplayPort connectors often expose the AUX bus as a child directory instead
    std::fs::read_dir(syspath)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .find(|name| name.starts_with("i2c-"))
}

/// `ddc-hi` identifies I2C displays by the device number of their /dev node
fn bus_device_id(bus: &str) -> Option<String> {
    device_number(Path::new("/dev"), bus)
}

fn device_number(dev_dir: &Path, node: &str) -> Option<String> {
    std::fs::metadata(dev_dir.join(node))
        .ok()
        .map(|meta| meta.rdev().to_string())
}
