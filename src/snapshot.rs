//! Double-buffered snapshot between the control loop and every other thread.
//!
//! ```text
//!   control loop (sole writer of live state)
//!        │  every K iterations: synchronize(|pending| publication)
//!        ▼
//!   ┌──────────────── Mutex<Snapshot> ─────────────────┐
//!   │ sensors · settings · pending · alarms · archive   │
//!   └───────────────────────────────────────────────────┘
//!        ▲                                  ▲
//!        │ copy out                         │ stage_control
//!   get_sensors / get_control / get_alarms  set_control
//! ```
//!
//! ## Lock discipline
//!
//! One mutex guards the whole snapshot.  Every critical section is a copy
//! in or a copy out; no blocking call is made while it is held, and no
//! other lock is taken inside it.  A setting change is staged here and
//! marked pending; the loop applies it to live state at its next sync point,
//! inside the same critical section that publishes the new sensor values,
//! so readers never see a half-applied change.

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::Mutex;

use crate::alarm::AlarmReport;
use crate::control::engine::Publication;
use crate::control::waveform::{Waveform, WaveformArchive};
use crate::error::{Error, Result};
use crate::values::{ControlSetting, ControlSettingName, SensorSnapshot};

#[derive(Debug)]
struct Snapshot {
    sensors: SensorSnapshot,
    settings: BTreeMap<ControlSettingName, ControlSetting>,
    /// Names staged by `set_control` and not yet applied by the loop.
    pending: BTreeSet<ControlSettingName>,
    alarms: AlarmReport,
    waveforms: WaveformArchive,
}

/// The only cross-thread view of controller state.
#[derive(Debug)]
pub struct SnapshotChannel {
    inner: Mutex<Snapshot>,
}

impl SnapshotChannel {
    /// Seed the snapshot from the controller's initial state.
    pub fn new(archive_capacity: usize, initial: Publication) -> Self {
        let mut waveforms = WaveformArchive::new(archive_capacity);
        for w in initial.waveforms {
            waveforms.push(w);
        }
        Self {
            inner: Mutex::new(Snapshot {
                sensors: initial.sensors,
                settings: initial.settings,
                pending: BTreeSet::new(),
                alarms: initial.alarms,
                waveforms,
            }),
        }
    }

    // ── Readers ───────────────────────────────────────────────

    pub fn sensors(&self) -> SensorSnapshot {
        self.inner.lock().sensors.clone()
    }

    /// Last published (or staged) value of a setting.
    pub fn control(&self, name: ControlSettingName) -> Result<ControlSetting> {
        self.inner
            .lock()
            .settings
            .get(&name)
            .copied()
            .ok_or_else(|| Error::InvalidSetting(format!("{name} is not controllable")))
    }

    pub fn alarms(&self) -> AlarmReport {
        self.inner.lock().alarms.clone()
    }

    /// Names staged but not yet applied by the loop.
    pub fn pending(&self) -> Vec<ControlSettingName> {
        self.inner.lock().pending.iter().copied().collect()
    }

    // ── Writers ───────────────────────────────────────────────

    /// Stage a setting for the loop to apply at its next sync point.
    ///
    /// The snapshot reports the staged value straight away; live state only
    /// changes at the sync point.
    pub fn stage_control(&self, setting: ControlSetting) -> Result<()> {
        setting.validate()?;
        let mut snap = self.inner.lock();
        if !snap.settings.contains_key(&setting.name()) {
            return Err(Error::InvalidSetting(format!(
                "{} is not controllable",
                setting.name()
            )));
        }
        snap.settings.insert(setting.name(), setting);
        snap.pending.insert(setting.name());
        Ok(())
    }

    /// Hand every pending setting to `apply`, then publish what it returns,
    /// all under one lock acquisition.
    ///
    /// Returns the settings handed over so the caller can report them once
    /// the lock is released.
    pub fn synchronize(
        &self,
        apply: impl FnOnce(Vec<ControlSetting>) -> Publication,
    ) -> Vec<ControlSetting> {
        let mut snap = self.inner.lock();
        let pending = std::mem::take(&mut snap.pending);
        let staged: Vec<ControlSetting> = pending
            .iter()
            .filter_map(|name| snap.settings.get(name).copied())
            .collect();

        let publication = apply(staged.clone());

        snap.sensors = publication.sensors;
        snap.settings = publication.settings;
        snap.alarms = publication.alarms;
        for w in publication.waveforms {
            snap.waveforms.push(w);
        }
        staged
    }

    /// Take the archived waveforms, oldest first, keeping the latest one.
    pub fn drain_waveforms(&self) -> Vec<Waveform> {
        self.inner.lock().waveforms.drain()
    }
}
