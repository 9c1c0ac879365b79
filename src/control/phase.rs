//! Breath phases and the timings derived from the targets.
//!
//! ```text
//!  pressure
//!    PIP ┤      ┌───────────┐
//!        │     ╱             ╲
//!        │    ╱               ╲
//!   PEEP ┤───╱                 └──────────────
//!        └──┬──────┬──────────┬────┬──────────┬──▶ t
//!           0   PIP_TIME   I_PHASE  +PEEP_TIME  CYCLE
//!            RISE    PLATEAU   FALL   PEEP PLATEAU
//! ```

use core::fmt;

use crate::config::TargetDefaults;

/// Where in the breath cycle the loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BreathPhase {
    /// Track the pressure slope toward `(PIP − PEEP) / PIP_TIME`.
    RiseToPip,
    /// Hold PIP.
    PipPlateau,
    /// Vent as fast as possible down to PEEP.
    FallToPeep,
    /// Hold PEEP.
    PeepPlateau,
    /// The cycle is over; the next iteration starts a new one.
    CycleEnd,
}

impl BreathPhase {
    pub const fn name(self) -> &'static str {
        match self {
            Self::RiseToPip => "RISE_TO_PIP",
            Self::PipPlateau => "PIP_PLATEAU",
            Self::FallToPeep => "FALL_TO_PEEP",
            Self::PeepPlateau => "PEEP_PLATEAU",
            Self::CycleEnd => "CYCLE_END",
        }
    }
}

impl fmt::Display for BreathPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Live targets plus the durations derived from them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleTimings {
    pub pip: f64,
    pub pip_time: f64,
    pub peep: f64,
    pub peep_time: f64,
    pub breaths_per_minute: f64,
    pub i_phase: f64,
    /// `60 / BPM`
    pub cycle_duration: f64,
    /// `CYCLE_DURATION − I_PHASE`
    pub e_phase: f64,
    /// `I_PHASE − PIP_TIME`
    pub t_plateau: f64,
    /// `E_PHASE − PEEP_TIME`
    pub t_peep: f64,
}

impl CycleTimings {
    pub fn new(targets: &TargetDefaults) -> Self {
        let mut t = Self {
            pip: targets.pip,
            pip_time: targets.pip_time,
            peep: targets.peep,
            peep_time: targets.peep_time,
            breaths_per_minute: targets.breaths_per_minute,
            i_phase: targets.inspiration_time_sec,
            cycle_duration: 0.0,
            e_phase: 0.0,
            t_plateau: 0.0,
            t_peep: 0.0,
        };
        t.recompute();
        t
    }

    /// Re-derive the dependent durations after a target changed.
    pub fn recompute(&mut self) {
        self.cycle_duration = 60.0 / self.breaths_per_minute;
        self.e_phase = self.cycle_duration - self.i_phase;
        self.t_plateau = self.i_phase - self.pip_time;
        self.t_peep = self.e_phase - self.peep_time;
    }

    /// Phase for a time `phase_time` seconds into the cycle.
    pub fn phase_at(&self, phase_time: f64) -> BreathPhase {
        if phase_time < self.pip_time {
            BreathPhase::RiseToPip
        } else if phase_time < self.i_phase {
            BreathPhase::PipPlateau
        } else if phase_time < self.i_phase + self.peep_time {
            BreathPhase::FallToPeep
        } else if phase_time < self.cycle_duration {
            BreathPhase::PeepPlateau
        } else {
            BreathPhase::CycleEnd
        }
    }

    /// Slope the rise phase tracks (cmH2O/s).
    pub fn target_slope(&self) -> f64 {
        (self.pip - self.peep) / self.pip_time
    }
}
