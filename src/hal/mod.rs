//! Port traits — the boundary between the control core and the hardware.
//!
//! ```text
//!   HAL / simulator ──▶ SensorPort ──▶ ControlEngine ──▶ ActuatorPort ──▶ valves
//! ```
//!
//! The control engine treats every reading as potentially noisy or out of
//! range and every write as best effort.  Register access, ADC conversion
//! and valve calibration live behind these traits and are not part of the
//! core.

pub mod sim;

pub use sim::BalloonSimulator;

/// One sample of every hardware channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HalReadings {
    /// Airway pressure (cmH2O).
    pub pressure: f64,
    /// Inspiratory flow (L/s).
    pub flow_in: f64,
    /// Expiratory flow (L/s).
    pub flow_out: f64,
    /// Oxygen concentration (%).
    pub oxygen: f64,
    /// Gas temperature (°C), if the hardware has a probe.
    pub temperature: Option<f64>,
    /// Relative humidity (%), if the hardware has a probe.
    pub humidity: Option<f64>,
}

/// Read-side port: the control loop calls this once per iteration.
pub trait SensorPort {
    /// Sample all channels.  `dt` is the time since the previous call;
    /// simulated plants advance their physics by it.
    fn read_sensors(&mut self, dt: f64) -> HalReadings;
}

/// Write-side port: the control loop commands the valves through this.
pub trait ActuatorPort {
    /// Set the inspiratory and expiratory valve setpoints.
    fn set_valves(&mut self, setpoint_in: f64, setpoint_ex: f64);
}
