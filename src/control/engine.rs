//! Breath-cycle control engine — one iteration of the control loop.
//!
//! [`ControlEngine`] owns every piece of live control state: targets and
//! alarm bands, PID terms, the in-progress waveform, measurements and the
//! alarm registry.  It never touches a clock or a lock; the caller injects
//! `now` and the hardware, which makes the whole state machine testable by
//! stepping simulated time.
//!
//! ```text
//!  SensorPort ──▶ ┌──────────────────────────────┐ ──▶ ActuatorPort
//!                 │         ControlEngine         │
//!                 │ guard · phase · PID · analyse │
//!                 └──────────────┬───────────────┘
//!                                │ publication() / apply_setting()
//!                                ▼
//!                         SnapshotChannel
//! ```

use std::collections::BTreeMap;

use log::{debug, warn};

use crate::alarm::{AlarmRegistry, AlarmReport};
use crate::config::{ControllerConfig, TargetDefaults};
use crate::error::{SensorChannel, SensorFault};
use crate::hal::{ActuatorPort, HalReadings, SensorPort};
use crate::time::unix_now;
use crate::values::{ControlSetting, ControlSettingName, SensorSnapshot};

use super::phase::{BreathPhase, CycleTimings};
use super::pid::{ErrorTracker, LowPassFilter};
use super::waveform::{CycleMeasurements, Waveform, WaveformSample, analyze};

/// Bounds on the step between two iterations (s).  A stalled thread must not
/// produce a huge integration step; a zero or negative step is replaced by
/// the minimum.
const MIN_DT: f64 = 1e-4;
const MAX_DT: f64 = 0.5;

/// Plausible ranges per channel; readings outside are clamped.
const PRESSURE_RANGE: (f64, f64) = (-50.0, 150.0);
const FLOW_RANGE: (f64, f64) = (0.0, 10.0);
const PERCENT_RANGE: (f64, f64) = (0.0, 100.0);
const TEMPERATURE_RANGE: (f64, f64) = (0.0, 60.0);

/// Alarm band the controller puts around a target value for `name`.
pub fn default_band(name: ControlSettingName, value: f64) -> (f64, f64) {
    use ControlSettingName as N;
    match name {
        N::Pip => (value - 0.2, value + 0.2),
        N::PipTime | N::PeepTime => (value - 0.5, value + 0.5),
        N::Peep | N::BreathsPerMinute | N::InspirationTimeSec => (value * 0.9, value * 1.1),
    }
}

/// Initial targets with the alarm bands the controller starts from.
pub fn initial_settings(targets: &TargetDefaults) -> BTreeMap<ControlSettingName, ControlSetting> {
    use ControlSettingName as N;
    let now = unix_now();
    [
        (N::Pip, targets.pip),
        (N::PipTime, targets.pip_time),
        (N::Peep, targets.peep),
        (N::PeepTime, targets.peep_time),
        (N::BreathsPerMinute, targets.breaths_per_minute),
        (N::InspirationTimeSec, targets.inspiration_time_sec),
    ]
    .into_iter()
    .map(|(name, value)| {
        let (min, max) = default_band(name, value);
        (name, ControlSetting::with_timestamp(name, value, min, max, now))
    })
    .collect()
}

/// Check one reading.  A non-finite sample is replaced by `last_good`, an
/// implausible one is clamped into `range`.
fn guard(
    channel: SensorChannel,
    raw: f64,
    last_good: f64,
    (lo, hi): (f64, f64),
) -> (f64, Option<SensorFault>) {
    if !raw.is_finite() {
        (last_good, Some(SensorFault::NonFinite(channel)))
    } else if raw < lo || raw > hi {
        (raw.clamp(lo, hi), Some(SensorFault::OutOfRange(channel, raw)))
    } else {
        (raw, None)
    }
}

/// Everything the loop pushes into the snapshot at a sync point.
#[derive(Debug, Clone)]
pub struct Publication {
    pub sensors: SensorSnapshot,
    pub settings: BTreeMap<ControlSettingName, ControlSetting>,
    pub alarms: AlarmReport,
    /// Cycles completed since the previous publication, oldest first.
    pub waveforms: Vec<Waveform>,
}

// ───────────────────────────────────────────────────────────────
// ControlEngine
// ───────────────────────────────────────────────────────────────

pub struct ControlEngine {
    config: ControllerConfig,
    settings: BTreeMap<ControlSettingName, ControlSetting>,
    timings: CycleTimings,

    errors: ErrorTracker,
    dpdt: LowPassFilter,
    control_signal: f64,

    /// Last accepted sample of every channel.
    readings: HalReadings,
    volume: f64,
    phase: BreathPhase,
    cycle_start: Option<f64>,
    last_tick: Option<f64>,

    waveform: Option<Waveform>,
    completed: Vec<Waveform>,
    measurements: CycleMeasurements,
    alarms: AlarmRegistry,

    loop_counter: u64,
    breath_count: u64,
    sensor_faults: u64,
}

impl ControlEngine {
    pub fn new(config: ControllerConfig) -> Self {
        let settings = initial_settings(&config.targets);
        let timings = CycleTimings::new(&config.targets);
        Self {
            errors: ErrorTracker::new(config.integral_time_constant),
            dpdt: LowPassFilter::new(config.dpdt_filter_time),
            alarms: AlarmRegistry::new(config.ringbuffer_size),
            config,
            settings,
            timings,
            control_signal: 0.0,
            readings: HalReadings {
                pressure: 0.0,
                flow_in: 0.0,
                flow_out: 0.0,
                oxygen: 0.0,
                temperature: None,
                humidity: None,
            },
            volume: 0.0,
            phase: BreathPhase::RiseToPip,
            cycle_start: None,
            last_tick: None,
            waveform: None,
            completed: Vec::new(),
            measurements: CycleMeasurements::default(),
            loop_counter: 0,
            breath_count: 0,
            sensor_faults: 0,
        }
    }

    // ── Per-iteration orchestration ───────────────────────────

    /// Run one iteration at monotonic time `now` (s): read → guard →
    /// state machine → actuators.
    ///
    /// The `hw` parameter satisfies both ports, so a single handle serves
    /// the read and the write of one iteration.
    pub fn tick(&mut self, hw: &mut (impl SensorPort + ActuatorPort), now: f64) {
        self.loop_counter += 1;
        let dt = self.step_dt(now);

        let raw = hw.read_sensors(dt);
        self.absorb(raw);

        self.update_cycle(now, dt);

        hw.set_valves(self.config.inspiratory_flow, self.control_signal);
    }

    fn step_dt(&mut self, now: f64) -> f64 {
        let nominal = self.config.loop_update_time_ms as f64 / 1000.0;
        let dt = match self.last_tick {
            Some(last) => now - last,
            None => nominal,
        };
        self.last_tick = Some(now);
        if dt.is_finite() { dt.clamp(MIN_DT, MAX_DT) } else { MIN_DT }
    }

    /// Accept one set of readings into live state, holding or clamping bad
    /// samples.
    fn absorb(&mut self, raw: HalReadings) {
        let last = self.readings;
        let mut faults = Vec::new();
        let mut check = |ch, raw, last_good, range| {
            let (v, fault) = guard(ch, raw, last_good, range);
            faults.extend(fault);
            v
        };

        let pressure = check(SensorChannel::Pressure, raw.pressure, last.pressure, PRESSURE_RANGE);
        let flow_in = check(SensorChannel::FlowIn, raw.flow_in, last.flow_in, FLOW_RANGE);
        let flow_out = check(SensorChannel::FlowOut, raw.flow_out, last.flow_out, FLOW_RANGE);
        let oxygen = check(SensorChannel::Oxygen, raw.oxygen, last.oxygen, PERCENT_RANGE);
        let temperature = raw.temperature.map(|t| {
            check(
                SensorChannel::Temperature,
                t,
                last.temperature.unwrap_or(TEMPERATURE_RANGE.0),
                TEMPERATURE_RANGE,
            )
        });
        let humidity = raw.humidity.map(|h| {
            check(
                SensorChannel::Humidity,
                h,
                last.humidity.unwrap_or(PERCENT_RANGE.0),
                PERCENT_RANGE,
            )
        });

        for fault in &faults {
            warn!("Sensor fault: {fault}");
        }
        self.sensor_faults += faults.len() as u64;

        self.readings = HalReadings {
            pressure,
            flow_in,
            flow_out,
            oxygen,
            temperature,
            humidity,
        };
    }

    // ── Breath-cycle state machine ────────────────────────────

    fn update_cycle(&mut self, now: f64, dt: f64) {
        let cycle_start = *self.cycle_start.get_or_insert(now);
        let phase_time = now - cycle_start;
        let pressure = self.readings.pressure;

        self.volume += dt * (self.readings.flow_in - self.readings.flow_out);

        let phase = self.timings.phase_at(phase_time);
        if phase != self.phase {
            debug!("Breath phase {} → {} at {:.3}s", self.phase, phase, phase_time);
            self.phase = phase;
        }

        match phase {
            BreathPhase::RiseToPip => {
                self.update_dpdt(pressure, dt);
                self.errors
                    .update(self.timings.target_slope(), self.dpdt.value(), dt);
                self.apply_control_law();
            }
            BreathPhase::PipPlateau => {
                self.errors.update(self.timings.pip, pressure, dt);
                self.apply_control_law();
            }
            BreathPhase::FallToPeep => {
                self.control_signal = if pressure < self.timings.peep {
                    0.0
                } else {
                    self.config.gains.base
                };
            }
            BreathPhase::PeepPlateau => {
                self.errors.update(self.timings.peep, pressure, dt);
                self.apply_control_law();
            }
            BreathPhase::CycleEnd => {
                self.cycle_start = Some(now);
                self.volume = 0.0;
                self.dpdt.reset();
                self.phase = BreathPhase::RiseToPip;
            }
        }

        if phase == BreathPhase::CycleEnd || self.waveform.is_none() {
            let fresh = Waveform::starting_at(pressure, self.volume);
            // The very first iteration has no completed cycle to hand over.
            if let Some(done) = self.waveform.replace(fresh) {
                self.finish_cycle(done);
            }
        } else if let Some(waveform) = self.waveform.as_mut() {
            waveform.push(WaveformSample {
                phase_time,
                pressure,
                volume: self.volume,
            });
        }
    }

    /// Smoothed dP/dt from the last waveform sample.
    fn update_dpdt(&mut self, pressure: f64, dt: f64) {
        let sample = self
            .waveform
            .as_ref()
            .and_then(Waveform::last)
            .map_or(0.0, |last| (pressure - last.pressure) / dt);
        if sample.is_finite() {
            self.dpdt.update(sample, dt);
        }
    }

    fn apply_control_law(&mut self) {
        let gains = &self.config.gains;
        self.control_signal = self.errors.signal(gains).clamp(0.0, gains.base);
    }

    /// Analyse a completed cycle, check alarms, and queue it for the archive.
    fn finish_cycle(&mut self, done: Waveform) {
        analyze(&done, &mut self.measurements);
        self.update_alarms();
        self.breath_count += 1;
        debug!(
            "Breath {} done: PIP {:?} PEEP {:?} BPM {:?}",
            self.breath_count,
            self.measurements.pip,
            self.measurements.peep,
            self.measurements.breaths_per_minute
        );
        self.completed.push(done);
        // Bound the handover queue if nobody publishes for a while.
        if self.completed.len() > self.config.ringbuffer_size {
            self.completed.remove(0);
        }
    }

    fn update_alarms(&mut self) {
        let now = unix_now();
        let m = self.measurements;
        let checks = [
            (ControlSettingName::Pip, m.pip),
            (ControlSettingName::PipTime, m.pip_time),
            (ControlSettingName::Peep, m.peep),
            (ControlSettingName::BreathsPerMinute, m.breaths_per_minute),
            (ControlSettingName::InspirationTimeSec, m.inspiration_time_sec),
        ];
        for (name, measured) in checks {
            let (Some(value), Some(setting)) = (measured, self.settings.get(&name)) else {
                continue;
            };
            self.alarms
                .test_threshold(name, setting.min_value(), setting.max_value(), value, now);
        }
    }

    // ── Sync-point interface ──────────────────────────────────

    /// Make a staged setting live and re-derive the cycle timings.
    ///
    /// Runs inside the snapshot lock, so it does no I/O.
    pub fn apply_setting(&mut self, setting: ControlSetting) {
        let value = setting.value();
        match setting.name() {
            ControlSettingName::Pip => self.timings.pip = value,
            ControlSettingName::PipTime => self.timings.pip_time = value,
            ControlSettingName::Peep => self.timings.peep = value,
            ControlSettingName::PeepTime => self.timings.peep_time = value,
            ControlSettingName::BreathsPerMinute => self.timings.breaths_per_minute = value,
            ControlSettingName::InspirationTimeSec => self.timings.i_phase = value,
        }
        self.timings.recompute();
        self.settings.insert(setting.name(), setting);
    }

    /// Copy of live state for the snapshot; hands over completed waveforms.
    pub fn publication(&mut self) -> Publication {
        Publication {
            sensors: self.sensor_snapshot(),
            settings: self.settings.clone(),
            alarms: self.alarms.report(),
            waveforms: std::mem::take(&mut self.completed),
        }
    }

    pub fn sensor_snapshot(&self) -> SensorSnapshot {
        let m = &self.measurements;
        SensorSnapshot {
            pip: m.pip,
            peep: m.peep,
            fio2: self.last_tick.map(|_| self.readings.oxygen),
            temperature: self.readings.temperature,
            humidity: self.readings.humidity,
            pressure: self.last_tick.map(|_| self.readings.pressure),
            vte: m.vte,
            breaths_per_minute: m.breaths_per_minute,
            inspiration_time_sec: m.inspiration_time_sec,
            timestamp: unix_now(),
            loop_counter: self.loop_counter,
            breath_count: self.breath_count,
        }
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn setting(&self, name: ControlSettingName) -> Option<&ControlSetting> {
        self.settings.get(&name)
    }

    pub fn settings(&self) -> &BTreeMap<ControlSettingName, ControlSetting> {
        &self.settings
    }

    pub fn timings(&self) -> &CycleTimings {
        &self.timings
    }

    pub fn alarms(&self) -> &AlarmRegistry {
        &self.alarms
    }

    pub fn measurements(&self) -> &CycleMeasurements {
        &self.measurements
    }

    pub fn phase(&self) -> BreathPhase {
        self.phase
    }

    pub fn control_signal(&self) -> f64 {
        self.control_signal
    }

    /// Integrated volume of the current cycle (L).
    pub fn volume(&self) -> f64 {
        self.volume
    }

    pub fn loop_counter(&self) -> u64 {
        self.loop_counter
    }

    pub fn breath_count(&self) -> u64 {
        self.breath_count
    }

    /// Bad samples absorbed since construction.
    pub fn sensor_faults(&self) -> u64 {
        self.sensor_faults
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }
}
