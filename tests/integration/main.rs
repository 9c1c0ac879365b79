//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises one layer of the control
//! core against the simulated plant or a recording mock.  Everything runs on
//! the host with no real hardware.

mod controller_tests;
mod coordinator_tests;
mod mock_hw;
mod supervisor_tests;

use std::thread;
use std::time::Duration;

/// Poll `cond` for up to five seconds.
pub fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..1000 {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}
