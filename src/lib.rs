// SPDX-License-Identifier: GPL-3.0-only
//! Brightness control core for externally attached monitors
//!
//! Discovers displays and their DDC/CI control channels, keeps the current
//! brightness of each in a registry, and coalesces rapid brightness intents
//! (hotkey repeats, slider drags, presets) into one hardware write per
//! display once input goes quiet.

#[macro_use]
extern crate tracing;

pub mod config;
pub mod error;
#[cfg(feature = "hotplug")]
pub mod hotplug;
pub mod monitor;
pub mod preset;
pub mod protocols;
pub mod reconcile;
pub mod service;

pub use error::{Error, Result};
