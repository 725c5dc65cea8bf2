// SPDX-License-Identifier: GPL-3.0-only
//! Monitor discovery and the registry owning every monitor record

mod arena;
mod enumeration;
mod record;
mod registry;

pub use arena::{ChannelArena, ChannelId};
pub use enumeration::{ProbeOptions, enumerate};
pub use record::{MonitorRecord, MonitorSnapshot};
pub use registry::{BrightnessChanged, MonitorRegistry, SubscriptionId};

pub type DisplayId = String;
pub type ScreenBrightness = u16;
