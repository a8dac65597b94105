//! One-shot timers requested by the manager.
//!
//! Nothing is ever cancelled. Each timer carries the generation it was armed
//! under, and the manager ignores it once a later transition moved on.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timer {
    /// Connect attempt with the given generation
    ConnectTimeout(u64),
    DiscoveryTimeout(u64),
    /// Grace period after link-up before service discovery
    BondingGrace(u64),
    /// Auto-stop of the scan session with the given generation
    ScanPeriod(u64),
}

#[derive(Debug, Default)]
pub struct TimerSchedule {
    armed: Vec<(Duration, Timer)>,
}

impl TimerSchedule {
    pub fn arm(&mut self, delay: Duration, timer: Timer) {
        self.armed.push((delay, timer));
    }

    /// Hand the requested timers to whoever runs the clock
    pub fn drain(&mut self) -> Vec<(Duration, Timer)> {
        std::mem::take(&mut self.armed)
    }
}
