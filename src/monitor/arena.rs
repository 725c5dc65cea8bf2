// SPDX-License-Identifier: GPL-3.0-only
//! Scoped ownership of hardware control channels
//!
//! Records never hold a channel directly, only a [`ChannelId`]. Ids carry
//! the arena generation they were issued in, so an id that outlived a
//! refresh resolves to nothing instead of a released handle.

use crate::protocols::ControlChannel;

/// Index of a channel inside a [`ChannelArena`] generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId {
    index: usize,
    generation: u64,
}

/// Sole owner of every open control channel
#[derive(Debug, Default)]
pub struct ChannelArena {
    generation: u64,
    slots: Vec<Option<Box<dyn ControlChannel>>>,
}

impl ChannelArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of an opened channel
    pub fn insert(&mut self, channel: Box<dyn ControlChannel>) -> ChannelId {
        self.slots.push(Some(channel));
        ChannelId {
            index: self.slots.len() - 1,
            generation: self.generation,
        }
    }

    /// Channel behind `id`, or `None` once it was closed or superseded
    pub fn get_mut(&mut self, id: ChannelId) -> Option<&mut Box<dyn ControlChannel>> {
        if id.generation != self.generation {
            return None;
        }
        self.slots.get_mut(id.index).and_then(Option::as_mut)
    }

    /// Close one channel. Returns false if it was already closed.
    pub fn close(&mut self, id: ChannelId) -> bool {
        if id.generation != self.generation {
            return false;
        }
        match self.slots.get_mut(id.index).and_then(Option::take) {
            Some(mut channel) => {
                channel.close();
                true
            }
            None => false,
        }
    }

    /// Close every open channel and invalidate all ids issued so far
    pub fn close_all(&mut self) -> usize {
        let mut closed = 0;
        for mut channel in self.slots.drain(..).flatten() {
            channel.close();
            closed += 1;
        }
        self.generation += 1;
        closed
    }

    /// Number of channels still open
    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

impl Drop for ChannelArena {
    fn drop(&mut self) {
        let closed = self.close_all();
        if closed > 0 {
            debug!("Released {} control channel(s)", closed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::DisplaySource;
    use crate::protocols::simulated::{SimulatedArea, SimulatedHardware, SimulatedMonitor};

    fn open_two(hw: &SimulatedHardware, arena: &mut ChannelArena) -> (ChannelId, ChannelId) {
        let mut source = hw.source();
        let area = source.display_areas().unwrap().remove(0);
        let mut channels = source.open_channels(&area);
        let b = channels.pop().unwrap();
        let a = channels.pop().unwrap();
        (arena.insert(a), arena.insert(b))
    }

    fn hardware() -> SimulatedHardware {
        SimulatedHardware::new(vec![SimulatedArea::new(
            "DP-1",
            vec![
                SimulatedMonitor::new("Left", "A", 40),
                SimulatedMonitor::new("Right", "B", 60),
            ],
        )])
    }

    #[test]
    fn test_close_is_idempotent() {
        let hw = hardware();
        let mut arena = ChannelArena::new();
        let (a, _) = open_two(&hw, &mut arena);

        assert!(arena.close(a));
        assert!(!arena.close(a));
        assert!(arena.get_mut(a).is_none());
        assert_eq!(arena.open_count(), 1);
        assert_eq!(hw.log().closed, 1);
        assert_eq!(hw.log().double_closes, 0);
    }

    #[test]
    fn test_close_all_invalidates_old_ids() {
        let hw = hardware();
        let mut arena = ChannelArena::new();
        let (a, b) = open_two(&hw, &mut arena);

        assert_eq!(arena.close_all(), 2);
        assert!(arena.get_mut(a).is_none());
        assert!(!arena.close(b));

        // A fresh channel may reuse index 0 but never matches the stale id
        let (c, _) = open_two(&hw, &mut arena);
        assert_ne!(a, c);
        assert!(arena.get_mut(a).is_none());
        assert!(arena.get_mut(c).is_some());
    }

    #[test]
    fn test_drop_releases_every_channel_once() {
        let hw = hardware();
        {
            let mut arena = ChannelArena::new();
            let (a, _) = open_two(&hw, &mut arena);
            arena.close(a);
        }
        let log = hw.log();
        assert_eq!(log.closed, 2);
        assert_eq!(log.double_closes, 0);
    }
}
