//! Per-cycle pressure/volume waveforms, the bounded archive of completed
//! cycles, and the analysis that turns one cycle into measurements.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// One sample of the in-progress cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WaveformSample {
    /// Seconds since the cycle started.
    pub phase_time: f64,
    pub pressure: f64,
    pub volume: f64,
}

/// Samples of one breath cycle, in time order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Waveform {
    samples: Vec<WaveformSample>,
}

impl Waveform {
    /// Start a cycle with its first sample at phase 0.
    pub fn starting_at(pressure: f64, volume: f64) -> Self {
        Self {
            samples: vec![WaveformSample {
                phase_time: 0.0,
                pressure,
                volume,
            }],
        }
    }

    pub fn push(&mut self, sample: WaveformSample) {
        self.samples.push(sample);
    }

    pub fn samples(&self) -> &[WaveformSample] {
        &self.samples
    }

    pub fn last(&self) -> Option<&WaveformSample> {
        self.samples.last()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl FromIterator<WaveformSample> for Waveform {
    fn from_iter<I: IntoIterator<Item = WaveformSample>>(iter: I) -> Self {
        Self {
            samples: iter.into_iter().collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Archive
// ---------------------------------------------------------------------------

/// Fixed-capacity ring of completed waveforms, oldest first.
#[derive(Debug, Clone)]
pub struct WaveformArchive {
    ring: VecDeque<Waveform>,
    capacity: usize,
}

impl WaveformArchive {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a completed cycle, evicting the oldest one when full.
    pub fn push(&mut self, waveform: Waveform) {
        if self.ring.len() == self.capacity {
            self.ring.pop_front();
        }
        self.ring.push_back(waveform);
    }

    /// Take every archived waveform, oldest first.
    ///
    /// The most recent one stays behind so the archive is never left empty
    /// once a cycle has completed.
    pub fn drain(&mut self) -> Vec<Waveform> {
        let drained: Vec<Waveform> = self.ring.drain(..).collect();
        if let Some(latest) = drained.last() {
            self.ring.push_back(latest.clone());
        }
        drained
    }

    pub fn latest(&self) -> Option<&Waveform> {
        self.ring.back()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &Waveform> {
        self.ring.iter()
    }
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

/// Values measured from the last completed cycle.  `None` until a cycle
/// has produced them.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CycleMeasurements {
    pub vte: Option<f64>,
    pub peep: Option<f64>,
    pub pip: Option<f64>,
    pub pip_time: Option<f64>,
    pub inspiration_time_sec: Option<f64>,
    pub breaths_per_minute: Option<f64>,
}

/// Percentile `q` (0–100) with linear interpolation between closest ranks.
///
/// `values` must be non-empty and free of NaN.
fn percentile(values: &mut [f64], q: f64) -> f64 {
    values.sort_by(f64::total_cmp);
    let rank = q / 100.0 * (values.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    values[lo] + (values[hi] - values[lo]) * frac
}

/// Update `m` from one completed cycle.
///
/// PEEP and PIP are the 20th/80th percentiles of the pressure samples
/// below/above the cycle mean; a measurement whose subset comes out empty
/// keeps its previous value.
pub fn analyze(waveform: &Waveform, m: &mut CycleMeasurements) {
    let samples = waveform.samples();
    let Some(last) = samples.last() else {
        return;
    };

    let (vmin, vmax) = samples
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), s| {
            (lo.min(s.volume), hi.max(s.volume))
        });
    m.vte = Some(vmax - vmin);

    let mean = samples.iter().map(|s| s.pressure).sum::<f64>() / samples.len() as f64;

    let mut below: Vec<f64> = samples
        .iter()
        .map(|s| s.pressure)
        .filter(|&p| p < mean)
        .collect();
    if !below.is_empty() {
        m.peep = Some(percentile(&mut below, 20.0));
    }

    let mut above: Vec<f64> = samples
        .iter()
        .map(|s| s.pressure)
        .filter(|&p| p > mean)
        .collect();
    if !above.is_empty() {
        let pip = percentile(&mut above, 80.0);
        m.pip = Some(pip);

        let mut over = samples.iter().filter(|s| s.pressure > pip);
        if let Some(first) = over.next() {
            m.pip_time = Some(first.phase_time);
            m.inspiration_time_sec = Some(over.last().unwrap_or(first).phase_time);
        }
    }

    if last.phase_time > 0.0 {
        m.breaths_per_minute = Some(60.0 / last.phase_time);
    }
}
