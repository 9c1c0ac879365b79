//! Simulated patient plant.
//!
//! A balloon inflated through a fixed inspiratory flow and vented through a
//! proportional expiratory valve.  Pressure follows the two-balloon
//! equation:
//!
//! ```text
//!   P = P0 + PC / (r0² · r) · (1 − (r0 / r)⁶)
//! ```
//!
//! where `r` is the radius of a sphere holding the current volume and `r0`
//! the radius at minimum volume.  Temperature, FiO2 and humidity drift as
//! Ornstein–Uhlenbeck processes.

use std::f64::consts::PI;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{ActuatorPort, HalReadings, SensorPort};

/// Balloon volume at rest (L).
const MIN_VOLUME: f64 = 1.5;
/// Pressure proportionality constant (cmH2O).
const PRESSURE_CONSTANT: f64 = 20.0;
/// Pressure at rest.
const BASE_PRESSURE: f64 = 0.0;
/// Leak relaxation toward rest volume (s).
const LEAK_RC: f64 = 5.0;
/// Expansion lag when `delay` is enabled (s).
const EXPANSION_RC: f64 = 0.1;
/// Expiratory valve response lag (s).
const VALVE_RC: f64 = 0.05;
/// Valve signal at which the expiratory valve is fully open.
const VALVE_FULL_OPEN: f64 = 160.0;
/// Expiratory flow with the valve fully open (L/s).
const VALVE_MAX_FLOW: f64 = 1.72;

fn radius(volume: f64) -> f64 {
    (3.0 * volume / (4.0 * PI)).cbrt()
}

/// Static flow–signal curve of the proportional expiratory valve.
pub fn valve_response(signal: f64) -> f64 {
    if signal > VALVE_FULL_OPEN {
        VALVE_MAX_FLOW
    } else if signal < 0.0 {
        0.0
    } else {
        (0.03 * (signal - 130.0)).tanh() + 1.0
    }
}

/// One N(0, 1) draw (Box–Muller).
fn standard_normal(rng: &mut impl Rng) -> f64 {
    // ln(0) is -inf, so keep u1 off zero.
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.r#gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

/// Simulated hardware implementing both ports.
pub struct BalloonSimulator {
    leak: bool,
    delay: bool,
    volume: f64,
    r_real: f64,
    pressure: f64,
    flow_in: f64,
    flow_out: f64,
    valve_signal: f64,
    temperature: f64,
    humidity: f64,
    fio2: f64,
    rng: StdRng,
}

impl BalloonSimulator {
    /// Leaky balloon without expansion lag, seeded from entropy.
    pub fn new() -> Self {
        Self::with_rng(true, false, StdRng::from_entropy())
    }

    /// Deterministic plant for tests.
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(true, false, StdRng::seed_from_u64(seed))
    }

    pub fn with_rng(leak: bool, delay: bool, rng: StdRng) -> Self {
        Self {
            leak,
            delay,
            volume: MIN_VOLUME,
            r_real: radius(MIN_VOLUME),
            pressure: BASE_PRESSURE,
            flow_in: 0.0,
            flow_out: 0.0,
            valve_signal: 0.0,
            temperature: 37.0,
            humidity: 90.0,
            fio2: 60.0,
            rng,
        }
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    /// Advance the plant by `dt` seconds.
    fn step(&mut self, dt: f64) {
        // Valve lag first, so the flow seen this step reflects the last command.
        let s = dt / (VALVE_RC + dt);
        self.flow_out += s * (valve_response(self.valve_signal) - self.flow_out);

        self.volume += (self.flow_in - self.flow_out) * dt;
        if self.leak {
            let s = dt / (LEAK_RC + dt);
            self.volume += s * (MIN_VOLUME - self.volume);
        }
        // A balloon cannot hold negative volume.
        self.volume = self.volume.max(1e-3);

        let r_target = radius(self.volume);
        let r0 = radius(MIN_VOLUME);
        if self.delay {
            let s = dt / (EXPANSION_RC + dt);
            self.r_real += s * (r_target - self.r_real);
        } else {
            self.r_real = r_target;
        }
        self.pressure = BASE_PRESSURE
            + (PRESSURE_CONSTANT / (r0 * r0 * self.r_real)) * (1.0 - (r0 / self.r_real).powi(6));

        self.temperature = self.ou_update(self.temperature, dt, 37.0, 0.3, 1.0);
        self.fio2 = self.ou_update(self.fio2, dt, 60.0, 5.0, 1.0);
        self.humidity = self.ou_update(self.humidity, dt, 90.0, 5.0, 1.0).min(100.0);
    }

    /// One Ornstein–Uhlenbeck step with mean `mu`, amplitude `sigma` and time
    /// scale `tau`.
    fn ou_update(&mut self, x: f64, dt: f64, mu: f64, sigma: f64, tau: f64) -> f64 {
        let innovation = standard_normal(&mut self.rng);
        let sigma_bis = sigma * (2.0 / tau).sqrt();
        x + dt * (-(x - mu) / tau) + sigma_bis * dt.sqrt() * innovation
    }
}

impl Default for BalloonSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorPort for BalloonSimulator {
    fn read_sensors(&mut self, dt: f64) -> HalReadings {
        if dt.is_finite() && dt > 0.0 {
            self.step(dt);
        }
        HalReadings {
            pressure: self.pressure,
            flow_in: self.flow_in,
            flow_out: self.flow_out,
            oxygen: self.fio2,
            temperature: Some(self.temperature),
            humidity: Some(self.humidity),
        }
    }
}

impl ActuatorPort for BalloonSimulator {
    fn set_valves(&mut self, setpoint_in: f64, setpoint_ex: f64) {
        self.flow_in = if setpoint_in.is_finite() { setpoint_in.max(0.0) } else { 0.0 };
        self.valve_signal = if setpoint_ex.is_finite() { setpoint_ex } else { 0.0 };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rest_pressure_is_zero() {
        let mut sim = BalloonSimulator::seeded(1);
        let r = sim.read_sensors(0.01);
        assert!(r.pressure.abs() < 1e-9);
    }

    #[test]
    fn inflow_with_closed_valve_raises_pressure() {
        let mut sim = BalloonSimulator::seeded(1);
        sim.set_valves(0.6, -1.0);
        let mut last = sim.read_sensors(0.01).pressure;
        for _ in 0..50 {
            let p = sim.read_sensors(0.01).pressure;
            assert!(p >= last);
            last = p;
        }
        assert!(last > 5.0, "pressure only reached {last}");
    }

    #[test]
    fn open_valve_deflates() {
        let mut sim = BalloonSimulator::seeded(2);
        sim.set_valves(0.6, -1.0);
        for _ in 0..100 {
            sim.read_sensors(0.01);
        }
        let inflated = sim.volume();
        sim.set_valves(0.0, 1000.0);
        for _ in 0..100 {
            sim.read_sensors(0.01);
        }
        assert!(sim.volume() < inflated);
    }

    #[test]
    fn valve_curve_limits() {
        assert_eq!(valve_response(-5.0), 0.0);
        assert_eq!(valve_response(500.0), VALVE_MAX_FLOW);
        assert!((valve_response(130.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn environment_channels_stay_finite() {
        let mut sim = BalloonSimulator::seeded(3);
        for _ in 0..1000 {
            let r = sim.read_sensors(0.01);
            assert!(r.oxygen.is_finite());
            assert!(r.humidity.unwrap() <= 100.0);
        }
    }

    #[test]
    fn innovation_is_standard_normal() {
        let mut rng = StdRng::seed_from_u64(11);
        let n = 20_000;
        let draws: Vec<f64> = (0..n).map(|_| standard_normal(&mut rng)).collect();
        let mean = draws.iter().sum::<f64>() / f64::from(n);
        let var = draws.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / f64::from(n - 1);
        assert!(mean.abs() < 0.05, "mean {mean}");
        assert!((var - 1.0).abs() < 0.1, "variance {var}");
        // A uniform draw scaled to unit variance never leaves ±√3.
        assert!(draws.iter().any(|x| x.abs() > 3f64.sqrt()));
        let tails = draws.iter().filter(|x| x.abs() > 1.96).count();
        assert!((700..1300).contains(&tails), "{tails} draws beyond 1.96");
    }

    #[test]
    fn non_finite_setpoints_are_ignored() {
        let mut sim = BalloonSimulator::seeded(4);
        sim.set_valves(f64::NAN, f64::INFINITY);
        let r = sim.read_sensors(0.01);
        assert!(r.pressure.is_finite());
        assert_eq!(r.flow_in, 0.0);
    }
}
