//! System configuration parameters
//!
//! All tunable parameters for the control core and its coordinators.
//! Values can be overridden from a JSON file passed to the binary.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Gains of the pressure control law.
///
/// `signal = base − kp·P − ki·I − kd·D`, where a larger signal opens the
/// expiratory valve further.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlGains {
    /// Valve signal at zero error (also the fully-open signal).
    pub base: f64,
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl Default for ControlGains {
    fn default() -> Self {
        Self {
            base: 160.0,
            kp: 40.0,
            ki: 0.0,
            kd: 0.0,
        }
    }
}

/// Targets the controller boots with, before any `set_control`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetDefaults {
    /// Peak inspiratory pressure (cmH2O).
    pub pip: f64,
    /// Time to reach PIP from cycle start (s).
    pub pip_time: f64,
    /// Positive end-expiratory pressure (cmH2O).
    pub peep: f64,
    /// Time to fall from the PIP plateau to PEEP (s).
    pub peep_time: f64,
    pub breaths_per_minute: f64,
    /// Inspiratory phase duration (s).
    pub inspiration_time_sec: f64,
}

impl Default for TargetDefaults {
    fn default() -> Self {
        Self {
            pip: 22.0,
            pip_time: 0.8,
            peep: 5.0,
            peep_time: 0.5,
            breaths_per_minute: 15.0,
            inspiration_time_sec: 1.3,
        }
    }
}

/// Control-loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Sleep between control-loop iterations (milliseconds).
    pub loop_update_time_ms: u64,
    /// Publish/apply the snapshot every this many iterations.
    pub sync_every_loops: u32,
    /// Capacity of the waveform archive and the logged-alarm history.
    pub ringbuffer_size: usize,
    /// Constant inspiratory flow written to `setpoint_in` (L/s).
    pub inspiratory_flow: f64,
    pub gains: ControlGains,
    /// Time constant of the integral low-pass (s).
    pub integral_time_constant: f64,
    /// Time constant of the dP/dt smoothing filter (s).
    pub dpdt_filter_time: f64,
    pub targets: TargetDefaults,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            loop_update_time_ms: 10,
            sync_every_loops: 10,
            ringbuffer_size: 100,
            inspiratory_flow: 0.6,
            gains: ControlGains::default(),
            integral_time_constant: 0.5,
            dpdt_filter_time: 0.02,
            targets: TargetDefaults::default(),
        }
    }
}

/// Coordinator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Cadence of the sync / send loops (milliseconds).
    pub sync_interval_ms: u64,
    /// Heartbeat age after which the supervisor reports the worker as stale.
    pub heartbeat_interval_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            sync_interval_ms: 10,
            heartbeat_interval_ms: 1000,
        }
    }
}

/// Core system configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub controller: ControllerConfig,
    pub coordinator: CoordinatorConfig,
}

impl SystemConfig {
    /// Load a JSON configuration file.  Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject parameter combinations the control loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        let c = &self.controller;
        if c.loop_update_time_ms == 0 {
            return Err(Error::Config("loop_update_time_ms must be > 0".into()));
        }
        if c.sync_every_loops == 0 {
            return Err(Error::Config("sync_every_loops must be > 0".into()));
        }
        if c.ringbuffer_size == 0 {
            return Err(Error::Config("ringbuffer_size must be > 0".into()));
        }
        if !(c.integral_time_constant > 0.0 && c.dpdt_filter_time > 0.0) {
            return Err(Error::Config("filter time constants must be > 0".into()));
        }
        if !c.inspiratory_flow.is_finite() || c.inspiratory_flow < 0.0 {
            return Err(Error::Config("inspiratory_flow must be finite and >= 0".into()));
        }

        let t = &c.targets;
        if !(t.pip_time > 0.0
            && t.peep_time > 0.0
            && t.breaths_per_minute > 0.0
            && t.inspiration_time_sec > 0.0)
        {
            return Err(Error::Config("timing targets must be > 0".into()));
        }
        if t.pip_time >= t.inspiration_time_sec {
            return Err(Error::Config(
                "pip_time must be shorter than inspiration_time_sec".into(),
            ));
        }
        if t.inspiration_time_sec >= 60.0 / t.breaths_per_minute {
            return Err(Error::Config(
                "inspiration_time_sec must be shorter than the breath cycle".into(),
            ));
        }

        if self.coordinator.sync_interval_ms == 0 {
            return Err(Error::Config("sync_interval_ms must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_sane() {
        let c = SystemConfig::default();
        assert!(c.validate().is_ok());
        assert_eq!(c.controller.loop_update_time_ms, 10);
        assert_eq!(c.controller.sync_every_loops, 10);
        assert_eq!(c.controller.ringbuffer_size, 100);
        assert_eq!(c.coordinator.sync_interval_ms, 10);
    }

    #[test]
    fn serde_roundtrip() {
        let c = SystemConfig::default();
        let json = serde_json::to_string(&c).unwrap();
        let c2: SystemConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(c.controller.ringbuffer_size, c2.controller.ringbuffer_size);
        assert_eq!(c.controller.gains, c2.controller.gains);
        assert_eq!(c.controller.targets, c2.controller.targets);
    }

    #[test]
    fn partial_json_takes_defaults() {
        let c: SystemConfig =
            serde_json::from_str(r#"{"controller":{"ringbuffer_size":5}}"#).unwrap();
        assert_eq!(c.controller.ringbuffer_size, 5);
        assert_eq!(c.controller.loop_update_time_ms, 10);
        assert_eq!(c.coordinator.heartbeat_interval_ms, 1000);
    }

    #[test]
    fn zero_ringbuffer_rejected() {
        let mut c = SystemConfig::default();
        c.controller.ringbuffer_size = 0;
        assert!(matches!(c.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn inspiration_longer_than_cycle_rejected() {
        let mut c = SystemConfig::default();
        c.controller.targets.breaths_per_minute = 40.0; // 1.5 s cycle
        c.controller.targets.inspiration_time_sec = 1.6;
        assert!(c.validate().is_err());
    }

    #[test]
    fn from_json_file_reads_and_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vent.json");
        std::fs::write(&path, r#"{"coordinator":{"sync_interval_ms":20}}"#).unwrap();
        let c = SystemConfig::from_json_file(&path).unwrap();
        assert_eq!(c.coordinator.sync_interval_ms, 20);

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            SystemConfig::from_json_file(&path),
            Err(Error::Config(_))
        ));
    }
}
