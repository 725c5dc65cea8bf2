// SPDX-License-Identifier: GPL-3.0-only
//! Deadline-based debounce timer
//!
//! The timer never sleeps on its own. The owner feeds it the current time and
//! asks whether the window has elapsed, which keeps it usable from any event
//! loop and testable with synthetic instants.

use std::time::{Duration, Instant};

/// Reconciliation cycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceState {
    Idle,
    Pending,
}

#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Start the window, or restart it if already pending
    pub fn arm(&mut self, now: Instant) {
        self.deadline = Some(now + self.window);
    }

    /// Drop the pending deadline. Returns whether one was pending.
    pub fn cancel(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn state(&self) -> DebounceState {
        if self.deadline.is_some() {
            DebounceState::Pending
        } else {
            DebounceState::Idle
        }
    }

    /// Transition `Pending -> Idle` if the deadline has passed.
    ///
    /// Returns true exactly once per elapsed window.
    pub fn fire_if_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(50);

    #[test]
    fn test_fires_once_after_window() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(WINDOW);
        debouncer.arm(start);

        assert_eq!(debouncer.state(), DebounceState::Pending);
        assert_eq!(debouncer.deadline(), Some(start + debouncer.window()));
        assert!(!debouncer.fire_if_due(start + Duration::from_millis(49)));
        assert!(debouncer.fire_if_due(start + WINDOW));
        assert!(!debouncer.fire_if_due(start + WINDOW * 3));
        assert_eq!(debouncer.state(), DebounceState::Idle);
    }

    #[test]
    fn test_rearm_resets_instead_of_stacking() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(WINDOW);
        debouncer.arm(start);
        debouncer.arm(start + Duration::from_millis(30));

        assert!(!debouncer.fire_if_due(start + Duration::from_millis(60)));
        assert!(debouncer.fire_if_due(start + Duration::from_millis(80)));
    }

    #[test]
    fn test_cancel_discards_pending_fire() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(WINDOW);
        debouncer.arm(start);

        assert!(debouncer.cancel());
        assert!(!debouncer.cancel());
        assert!(!debouncer.fire_if_due(start + WINDOW));
    }

    #[test]
    fn test_idle_timer_never_fires() {
        let mut debouncer = Debouncer::new(WINDOW);
        assert!(!debouncer.fire_if_due(Instant::now() + WINDOW));
        assert_eq!(debouncer.deadline(), None);
    }
}
