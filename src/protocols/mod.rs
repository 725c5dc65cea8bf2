// SPDX-License-Identifier: GPL-3.0-only
//! Display brightness control protocols
//!
//! A [`DisplaySource`] discovers the topology-level display areas and opens
//! the [`ControlChannel`]s behind each of them. The registry owns every
//! channel it receives and releases it exactly once.

pub mod ddc_ci;
pub mod simulated;

use anyhow::Result;

/// Brightness range as reported by a control channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrightnessRange {
    pub min: u16,
    pub current: u16,
    pub max: u16,
}

impl BrightnessRange {
    pub fn new(min: u16, current: u16, max: u16) -> Self {
        Self { min, current, max }
    }
}

/// Logical display surface, distinct from the monitor's control channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayArea {
    /// Stable identifier of the surface (e.g. a DRM connector name)
    pub id: String,
    /// Backend specific key used to claim the channels behind this area
    pub channel_key: Option<String>,
}

impl DisplayArea {
    pub fn new(id: impl Into<String>, channel_key: Option<String>) -> Self {
        Self {
            id: id.into(),
            channel_key,
        }
    }
}

/// Common trait for one hardware control channel
pub trait ControlChannel: std::fmt::Debug + Send {
    /// Human-readable description reported by the monitor, if any
    fn description(&self) -> Option<String>;

    /// Identifier that survives reboots and re-plugging, if the monitor reports one
    fn stable_id(&self) -> Option<String> {
        None
    }

    /// Query (min, current, max) brightness
    fn read_brightness(&mut self) -> Result<BrightnessRange>;

    /// Write a brightness value already clamped by the caller
    fn write_brightness(&mut self, value: u16) -> Result<()>;

    /// Release the underlying handle. Called at most once by the arena.
    fn close(&mut self) {}
}

/// Discovers display areas and opens their control channels
pub trait DisplaySource: Send {
    /// Enumerate active display areas in OS order
    fn display_areas(&mut self) -> Result<Vec<DisplayArea>>;

    /// Open every control channel behind `area`.
    ///
    /// An empty result means "no hardware control available" for the area.
    fn open_channels(&mut self, area: &DisplayArea) -> Vec<Box<dyn ControlChannel>>;
}
