// SPDX-License-Identifier: GPL-3.0-only

use serde::Serialize;

use super::arena::ChannelId;
use super::{DisplayId, ScreenBrightness};
use crate::protocols::BrightnessRange;

pub const DEFAULT_MIN_BRIGHTNESS: ScreenBrightness = 0;
pub const DEFAULT_MAX_BRIGHTNESS: ScreenBrightness = 100;

/// One physical display as seen by the last registry refresh
///
/// `min_brightness <= current_brightness <= max_brightness` holds after
/// every mutation.
#[derive(Debug, Clone)]
pub struct MonitorRecord {
    pub(crate) device_id: DisplayId,
    pub(crate) display_label: String,
    pub(crate) channel: Option<ChannelId>,
    pub(crate) min_brightness: ScreenBrightness,
    pub(crate) max_brightness: ScreenBrightness,
    pub(crate) current_brightness: ScreenBrightness,
    pub(crate) supports_control: bool,
    pub(crate) last_error: Option<String>,
}

impl MonitorRecord {
    pub(crate) fn new(device_id: DisplayId, display_label: String, channel: Option<ChannelId>) -> Self {
        Self {
            device_id,
            display_label,
            channel,
            min_brightness: DEFAULT_MIN_BRIGHTNESS,
            max_brightness: DEFAULT_MAX_BRIGHTNESS,
            current_brightness: DEFAULT_MIN_BRIGHTNESS,
            supports_control: false,
            last_error: None,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn display_label(&self) -> &str {
        &self.display_label
    }

    pub fn min_brightness(&self) -> ScreenBrightness {
        self.min_brightness
    }

    pub fn max_brightness(&self) -> ScreenBrightness {
        self.max_brightness
    }

    pub fn current_brightness(&self) -> ScreenBrightness {
        self.current_brightness
    }

    pub fn supports_control(&self) -> bool {
        self.supports_control
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Whether brightness operations reach hardware for this record
    pub fn is_controllable(&self) -> bool {
        self.supports_control && self.channel.is_some()
    }

    /// Clamp any requested value into this record's range
    pub fn clamp(&self, value: i64) -> ScreenBrightness {
        value.clamp(self.min_brightness as i64, self.max_brightness as i64) as ScreenBrightness
    }

    /// Adopt a range read from hardware and mark the record controllable
    pub(crate) fn apply_range(&mut self, range: BrightnessRange) {
        let (mut min, mut max) = (range.min, range.max);
        if max == 0 && min == 0 {
            // Monitor didn't report a maximum
            max = DEFAULT_MAX_BRIGHTNESS;
        }
        if min > max {
            std::mem::swap(&mut min, &mut max);
        }
        self.min_brightness = min;
        self.max_brightness = max;
        self.current_brightness = range.current.clamp(min, max);
        self.supports_control = true;
        self.last_error = None;
    }

    pub(crate) fn mark_unsupported(&mut self, error: impl Into<String>) {
        self.supports_control = false;
        self.last_error = Some(error.into());
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        MonitorSnapshot {
            device_id: self.device_id.clone(),
            display_label: self.display_label.clone(),
            min_brightness: self.min_brightness,
            max_brightness: self.max_brightness,
            current_brightness: self.current_brightness,
            supports_control: self.is_controllable(),
            last_error: self.last_error.clone(),
        }
    }
}

/// Owned copy of a record without its channel, safe to hand across threads
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSnapshot {
    pub device_id: DisplayId,
    pub display_label: String,
    pub min_brightness: ScreenBrightness,
    pub max_brightness: ScreenBrightness,
    pub current_brightness: ScreenBrightness,
    pub supports_control: bool,
    pub last_error: Option<String>,
}
