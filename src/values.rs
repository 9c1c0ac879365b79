//! Control settings and the published sensor snapshot.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::time::unix_now;

// ---------------------------------------------------------------------------
// Control setting names
// ---------------------------------------------------------------------------

/// Every target the controller can be asked to track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ControlSettingName {
    Pip,
    PipTime,
    Peep,
    PeepTime,
    BreathsPerMinute,
    InspirationTimeSec,
}

impl ControlSettingName {
    /// All names, in a fixed order.  Coordinators reconcile in this order.
    pub const ALL: [Self; 6] = [
        Self::Pip,
        Self::PipTime,
        Self::Peep,
        Self::PeepTime,
        Self::BreathsPerMinute,
        Self::InspirationTimeSec,
    ];

    /// Canonical upper-case tag.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pip => "PIP",
            Self::PipTime => "PIP_TIME",
            Self::Peep => "PEEP",
            Self::PeepTime => "PEEP_TIME",
            Self::BreathsPerMinute => "BREATHS_PER_MINUTE",
            Self::InspirationTimeSec => "INSPIRATION_TIME_SEC",
        }
    }

    /// Names whose value is a duration or a rate and must be strictly positive.
    const fn is_timing(self) -> bool {
        matches!(
            self,
            Self::PipTime | Self::PeepTime | Self::BreathsPerMinute | Self::InspirationTimeSec
        )
    }
}

impl fmt::Display for ControlSettingName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlSettingName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|n| n.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::InvalidSetting(format!("unknown setting name {s:?}")))
    }
}

// ---------------------------------------------------------------------------
// ControlSetting
// ---------------------------------------------------------------------------

/// A target value together with the alarm band around it.
///
/// Immutable once constructed: a change is a new `ControlSetting`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlSetting {
    name: ControlSettingName,
    value: f64,
    min_value: f64,
    max_value: f64,
    timestamp: f64,
}

impl ControlSetting {
    /// New setting stamped with the current wall-clock time.
    pub fn new(name: ControlSettingName, value: f64, min_value: f64, max_value: f64) -> Self {
        Self::with_timestamp(name, value, min_value, max_value, unix_now())
    }

    pub fn with_timestamp(
        name: ControlSettingName,
        value: f64,
        min_value: f64,
        max_value: f64,
        timestamp: f64,
    ) -> Self {
        Self {
            name,
            value,
            min_value,
            max_value,
            timestamp,
        }
    }

    pub fn name(&self) -> ControlSettingName {
        self.name
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn min_value(&self) -> f64 {
        self.min_value
    }

    pub fn max_value(&self) -> f64 {
        self.max_value
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    /// Check the setting can be applied to a running loop.
    ///
    /// Rejects non-finite numbers and non-positive durations or rates (a zero
    /// breath rate would make the cycle infinite). An inverted band is
    /// accepted as-is; every reading then falls outside it and alarms.
    pub fn validate(&self) -> Result<()> {
        if !(self.value.is_finite() && self.min_value.is_finite() && self.max_value.is_finite()) {
            return Err(Error::InvalidSetting(format!(
                "{}: non-finite value or band",
                self.name
            )));
        }
        if self.name.is_timing() && self.value <= 0.0 {
            return Err(Error::InvalidSetting(format!(
                "{}: must be > 0, got {}",
                self.name, self.value
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sensor snapshot
// ---------------------------------------------------------------------------

/// A point-in-time copy of everything the controller measures.
///
/// The per-cycle measurements (`pip`, `peep`, `vte`, ...) stay `None` until the
/// first breath cycle has been analysed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorSnapshot {
    pub pip: Option<f64>,
    pub peep: Option<f64>,
    pub fio2: Option<f64>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    /// Latest airway pressure sample (cmH2O).
    pub pressure: Option<f64>,
    /// Tidal volume of the last cycle (L).
    pub vte: Option<f64>,
    pub breaths_per_minute: Option<f64>,
    pub inspiration_time_sec: Option<f64>,
    /// Wall-clock publication time.
    pub timestamp: f64,
    /// Control-loop iterations since the controller was constructed.
    pub loop_counter: u64,
    /// Completed breath cycles.
    pub breath_count: u64,
}
