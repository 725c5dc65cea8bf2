// SPDX-License-Identifier: GPL-3.0-only
//! Full display scan
//!
//! Every call builds a brand new list of records. The caller is expected to
//! have released the previous generation of channels first.

use std::collections::HashSet;
use std::time::Duration;

use super::arena::ChannelArena;
use super::record::MonitorRecord;
use crate::error::{Error, Result};
use crate::protocols::{BrightnessRange, ControlChannel, DisplaySource};

pub const NO_CONTROL_CHANNEL: &str = "no DDC-compatible control channel";

/// Retry policy for the initial brightness read of each channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOptions {
    /// Number of reads before the channel is declared unsupported
    pub attempts: u32,
    /// Base delay; attempt `n` waits `base_delay * (n + 1)` before retrying
    pub base_delay: Duration,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            attempts: 5,
            base_delay: Duration::from_millis(50),
        }
    }
}

impl ProbeOptions {
    /// No retries and no sleeping
    pub fn immediate() -> Self {
        Self {
            attempts: 1,
            base_delay: Duration::ZERO,
        }
    }
}

/// Enumerate all display areas and their channels into fresh records.
///
/// Opened channels are moved into `arena`. Per-channel failures end up in
/// the record's `last_error`; only a failed topology query is an error.
pub fn enumerate(
    source: &mut dyn DisplaySource,
    arena: &mut ChannelArena,
    probe: &ProbeOptions,
) -> Result<Vec<MonitorRecord>> {
    let areas = source.display_areas().map_err(Error::Discovery)?;
    info!("=== START ENUMERATE ({} display area(s)) ===", areas.len());

    let mut records = Vec::new();
    let mut seen_ids = HashSet::new();
    // Running counter across the whole scan, not per area
    let mut index = 1;

    for area in &areas {
        let channels = source.open_channels(area);

        if channels.is_empty() {
            warn!(display_area = %area.id, "No DDC/CI control channel behind display area");
            let mut record = MonitorRecord::new(
                unique_id(&mut seen_ids, area.id.clone()),
                format!("Display {}", index),
                None,
            );
            record.mark_unsupported(NO_CONTROL_CHANNEL);
            records.push(record);
            index += 1;
            continue;
        }

        let multiple = channels.len() > 1;
        for (position, mut channel) in channels.into_iter().enumerate() {
            let label = channel
                .description()
                .filter(|d| !d.trim().is_empty())
                .unwrap_or_else(|| format!("Display {}", index));

            let device_id = channel.stable_id().unwrap_or_else(|| {
                if multiple {
                    format!("{}/{}", area.id, position)
                } else {
                    area.id.clone()
                }
            });
            let device_id = unique_id(&mut seen_ids, device_id);

            let probed = probe_brightness(channel.as_mut(), probe);
            let mut record = MonitorRecord::new(device_id, label, Some(arena.insert(channel)));

            match probed {
                Ok(range) => {
                    if range.current == 0 {
                        warn!(
                            display_id = %record.device_id,
                            display_name = %record.display_label,
                            "Monitor reports 0% brightness - this may indicate DDC/CI communication issues"
                        );
                    }
                    record.apply_range(range);
                    info!(
                        "Successfully initialized display: {} ({})",
                        record.display_label, record.device_id
                    );
                }
                Err(e) => {
                    error!(
                        display_id = %record.device_id,
                        display_name = %record.display_label,
                        error = ?e,
                        "Failed to read brightness - monitor may not support DDC/CI"
                    );
                    record.mark_unsupported(format!("Failed to read brightness via DDC/CI: {}", e));
                }
            }

            records.push(record);
            index += 1;
        }
    }

    info!("=== END ENUMERATE: Found {} monitors ===", records.len());
    Ok(records)
}

/// Read brightness with retries, waking the monitor up on first contact.
///
/// Some monitors only establish DDC/CI communication after a write, so a
/// successful read is echoed back before being trusted.
fn probe_brightness(
    channel: &mut dyn ControlChannel,
    probe: &ProbeOptions,
) -> anyhow::Result<BrightnessRange> {
    let attempts = probe.attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        match channel.read_brightness() {
            Ok(range) => {
                if attempt > 1 {
                    info!("DDC/CI display succeeded on attempt {}", attempt);
                }
                if let Err(e) = channel.write_brightness(range.current) {
                    debug!("DDC/CI wake-up write failed: {}", e);
                }
                return Ok(range);
            }
            Err(e) => {
                debug!("DDC/CI attempt {} failed: {}", attempt, e);
                last_error = Some(e);
                if attempt < attempts && !probe.base_delay.is_zero() {
                    std::thread::sleep(probe.base_delay * (attempt + 1));
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("no brightness read attempted")))
}

fn unique_id(seen: &mut HashSet<String>, id: String) -> String {
    if seen.insert(id.clone()) {
        return id;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}#{}", id, n);
        if seen.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::simulated::{SimulatedArea, SimulatedHardware, SimulatedMonitor};

    fn scan(hw: &SimulatedHardware, arena: &mut ChannelArena) -> Result<Vec<MonitorRecord>> {
        enumerate(&mut hw.source(), arena, &ProbeOptions::immediate())
    }

    #[test]
    fn test_area_without_channels_is_unsupported() {
        let hw = SimulatedHardware::new(vec![SimulatedArea::new("HDMI-A-1", vec![])]);
        let mut arena = ChannelArena::new();

        let records = scan(&hw, &mut arena).unwrap();

        assert_eq!(records.len(), 1);
        assert!(!records[0].supports_control());
        assert!(!records[0].is_controllable());
        assert_eq!(records[0].last_error(), Some(NO_CONTROL_CHANNEL));
        assert_eq!(records[0].display_label(), "Display 1");
    }

    #[test]
    fn test_labels_use_running_counter_across_areas() {
        let mut unnamed = SimulatedMonitor::new("", "S2", 30);
        unnamed.description = None;
        let mut blank = SimulatedMonitor::new("   ", "S3", 30);
        blank.serial = None;
        let hw = SimulatedHardware::new(vec![
            SimulatedArea::new("DP-1", vec![SimulatedMonitor::new("Dell U2720Q", "S1", 50)]),
            SimulatedArea::new("DP-2", vec![]),
            SimulatedArea::new("DP-3", vec![unnamed, blank]),
        ]);
        let mut arena = ChannelArena::new();

        let records = scan(&hw, &mut arena).unwrap();

        let labels: Vec<_> = records.iter().map(|r| r.display_label()).collect();
        assert_eq!(labels, vec!["Dell U2720Q", "Display 2", "Display 3", "Display 4"]);
        assert_eq!(records[3].device_id(), "DP-3/1");
    }

    #[test]
    fn test_unresponsive_channel_recovers_locally() {
        let hw = SimulatedHardware::new(vec![
            SimulatedArea::new("DP-1", vec![SimulatedMonitor::unresponsive("Broken")]),
            SimulatedArea::new("DP-2", vec![SimulatedMonitor::new("Good", "G", 70)]),
        ]);
        let mut arena = ChannelArena::new();

        let records = scan(&hw, &mut arena).unwrap();

        assert_eq!(records.len(), 2);
        assert!(!records[0].supports_control());
        assert!(records[0].last_error().unwrap().contains("timed out"));
        assert!(records[1].is_controllable());
        assert_eq!(records[1].current_brightness(), 70);
        // Both channels are owned by the arena, even the failing one
        assert_eq!(arena.open_count(), 2);
    }

    #[test]
    fn test_retries_until_attempts_exhausted() {
        let hw = SimulatedHardware::new(vec![SimulatedArea::new(
            "DP-1",
            vec![SimulatedMonitor::unresponsive("Broken")],
        )]);
        let mut arena = ChannelArena::new();
        let probe = ProbeOptions {
            attempts: 3,
            base_delay: Duration::ZERO,
        };

        enumerate(&mut hw.source(), &mut arena, &probe).unwrap();

        assert_eq!(hw.log().reads, 3);
    }

    #[test]
    fn test_wake_up_writes_back_current_value() {
        let hw = SimulatedHardware::new(vec![SimulatedArea::new(
            "DP-1",
            vec![SimulatedMonitor::new("Good", "G", 65)],
        )]);
        let mut arena = ChannelArena::new();

        scan(&hw, &mut arena).unwrap();

        assert_eq!(hw.log().writes, vec![("DP-1".to_string(), 0, 65)]);
    }

    #[test]
    fn test_duplicate_serials_get_distinct_ids() {
        let hw = SimulatedHardware::new(vec![
            SimulatedArea::new("DP-1", vec![SimulatedMonitor::new("Twin", "SAME", 50)]),
            SimulatedArea::new("DP-2", vec![SimulatedMonitor::new("Twin", "SAME", 50)]),
        ]);
        let mut arena = ChannelArena::new();

        let records = scan(&hw, &mut arena).unwrap();

        assert_eq!(records[0].device_id(), "SAME");
        assert_eq!(records[1].device_id(), "SAME#2");
    }

    #[test]
    fn test_discovery_failure_is_an_error() {
        let hw = SimulatedHardware::new(vec![]);
        hw.set_fail_discovery(true);
        let mut arena = ChannelArena::new();

        let result = scan(&hw, &mut arena);

        assert!(matches!(result, Err(Error::Discovery(_))));
    }
}
