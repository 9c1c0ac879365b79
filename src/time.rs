//! Time sources.
//!
//! The control loop needs two clocks:
//!
//! - a **monotonic** clock for phase arithmetic (`dt`, time since cycle
//!   start), immune to wall-clock steps;
//! - a **wall** clock for timestamps that cross process boundaries
//!   (`SensorSnapshot::timestamp`, `ControlSetting::timestamp`).

use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Monotonic clock anchored at construction.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    start: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Seconds since construction.
    pub fn now_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

/// Wall-clock seconds since the Unix epoch.  Returns 0.0 if the system clock
/// is set before 1970.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
