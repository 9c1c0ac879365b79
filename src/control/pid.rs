//! PID error tracking for the breath-cycle controller
//!
//! The tracker keeps the three error terms; the control law that turns them
//! into a valve signal lives with the gains in [`ErrorTracker::signal`].

use crate::config::ControlGains;

/// First-order low-pass filter `y += s·(x − y)` with `s = dt / (dt + RC)`.
#[derive(Debug, Clone, Copy)]
pub struct LowPassFilter {
    time_constant: f64,
    value: f64,
}

impl LowPassFilter {
    pub fn new(time_constant: f64) -> Self {
        Self {
            time_constant,
            value: 0.0,
        }
    }

    /// Feed one sample taken `dt` seconds after the previous one.
    pub fn update(&mut self, sample: f64, dt: f64) -> f64 {
        let s = dt / (dt + self.time_constant);
        self.value += s * (sample - self.value);
        self.value
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn reset(&mut self) {
        self.value = 0.0;
    }
}

/// Proportional, integral and derivative error terms.
///
/// - `P` is the latest error `target − measured`.
/// - `I` is the error low-pass filtered with the integral time constant,
///   not an unbounded sum, so it cannot wind up.
/// - `D` is `error − previous P`: a one-step difference of the error, not
///   a rate divided by `dt`.
#[derive(Debug, Clone, Copy)]
pub struct ErrorTracker {
    p: f64,
    integral: LowPassFilter,
    d: f64,
}

impl ErrorTracker {
    pub fn new(integral_time_constant: f64) -> Self {
        Self {
            p: 0.0,
            integral: LowPassFilter::new(integral_time_constant),
            d: 0.0,
        }
    }

    /// Record a new error sample.
    ///
    /// Callers must pass finite `target` and `measured`; a non-finite sample
    /// is dropped here so the terms never turn into NaN.
    pub fn update(&mut self, target: f64, measured: f64, dt: f64) {
        let error = target - measured;
        if !error.is_finite() || !(dt > 0.0) {
            return;
        }
        self.integral.update(error, dt);
        self.d = error - self.p;
        self.p = error;
    }

    /// Valve signal from the current terms: `base − kp·P − ki·I − kd·D`.
    pub fn signal(&self, gains: &ControlGains) -> f64 {
        gains.base - gains.kp * self.p - gains.ki * self.integral.value() - gains.kd * self.d
    }

    pub fn p(&self) -> f64 {
        self.p
    }

    pub fn i(&self) -> f64 {
        self.integral.value()
    }

    pub fn d(&self) -> f64 {
        self.d
    }
}
