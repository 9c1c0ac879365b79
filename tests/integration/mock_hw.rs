//! Mock hardware for integration tests.
//!
//! Wraps the simulated balloon and records every valve command so tests can
//! assert on the full actuator history, even after the hardware has moved
//! into a controller thread.

use std::sync::Arc;

use parking_lot::Mutex;
use ventcore::hal::{ActuatorPort, BalloonSimulator, HalReadings, SensorPort};

// ── Actuator call record ──────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValveCall {
    pub setpoint_in: f64,
    pub setpoint_ex: f64,
}

pub type CallLog = Arc<Mutex<Vec<ValveCall>>>;

// ── RecordingHardware ─────────────────────────────────────────

pub struct RecordingHardware {
    plant: BalloonSimulator,
    calls: CallLog,
    /// Replace every n-th pressure reading with NaN.
    nan_every: Option<u64>,
    /// Panic on this read, standing in for a driver fault.
    panic_at: Option<u64>,
    reads: u64,
}

#[allow(dead_code)]
impl RecordingHardware {
    pub fn seeded(seed: u64) -> Self {
        Self {
            plant: BalloonSimulator::seeded(seed),
            calls: CallLog::default(),
            nan_every: None,
            panic_at: None,
            reads: 0,
        }
    }

    /// Corrupt every `n`-th pressure reading.
    pub fn with_nan_every(mut self, n: u64) -> Self {
        self.nan_every = Some(n);
        self
    }

    /// Panic inside `read_sensors` on the `n`-th read.
    pub fn panicking_at(mut self, n: u64) -> Self {
        self.panic_at = Some(n);
        self
    }

    /// Shared handle on the call log.
    pub fn calls(&self) -> CallLog {
        Arc::clone(&self.calls)
    }

    pub fn reads(&self) -> u64 {
        self.reads
    }
}

impl SensorPort for RecordingHardware {
    fn read_sensors(&mut self, dt: f64) -> HalReadings {
        self.reads += 1;
        if self.panic_at == Some(self.reads) {
            panic!("sensor bus fault on read {}", self.reads);
        }
        let mut readings = self.plant.read_sensors(dt);
        if self.nan_every.is_some_and(|n| self.reads % n == 0) {
            readings.pressure = f64::NAN;
        }
        readings
    }
}

impl ActuatorPort for RecordingHardware {
    fn set_valves(&mut self, setpoint_in: f64, setpoint_ex: f64) {
        self.calls.lock().push(ValveCall {
            setpoint_in,
            setpoint_ex,
        });
        self.plant.set_valves(setpoint_in, setpoint_ex);
    }
}
