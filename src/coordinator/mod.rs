//! Coordinators — one facade over a controller wherever it runs.
//!
//! ```text
//!                    ┌──────────────────────────┐
//!   UI / CLI ──────▶ │   Coordinator (trait)     │
//!                    │  CoordinatorCache         │
//!                    └────────┬─────────┬───────┘
//!                  Local      │         │      Remote
//!        sync thread ─▶ ControlModule   IPC channel ─▶ worker process
//! ```
//!
//! Every controllable setting is in one of three states from the caller's
//! point of view:
//!
//! - **unknown**: never observed from the controller;
//! - **confirmed**: the value the controller last reported;
//! - **tentative**: a `set_control` that has not yet been reported back.
//!
//! `set_control` only stages a tentative value.  Whether it took effect is
//! observed by polling `get_control`.

pub mod local;
pub mod remote;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::alarm::{Alarm, AlarmReport};
use crate::error::Result;
use crate::values::{ControlSetting, ControlSettingName, SensorSnapshot};

pub use local::LocalCoordinator;
pub use remote::RemoteCoordinator;

#[derive(Debug, Default)]
struct CacheState {
    sensors: Option<SensorSnapshot>,
    confirmed: BTreeMap<ControlSettingName, ControlSetting>,
    tentative: BTreeMap<ControlSettingName, ControlSetting>,
    alarms: AlarmReport,
    last_message_timestamp: Option<f64>,
    /// Why the link to the controller failed, if it did.
    link_error: Option<String>,
}

/// State shared between a coordinator's caller-facing methods and its
/// background threads.  Each method takes the lock once; nothing else is
/// locked while it is held.
#[derive(Debug, Default)]
pub struct CoordinatorCache {
    inner: Mutex<CacheState>,
    running: AtomicBool,
}

impl CoordinatorCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sensors(&self) -> Option<SensorSnapshot> {
        self.inner.lock().sensors.clone()
    }

    pub fn record_sensors(&self, snapshot: SensorSnapshot) {
        let mut state = self.inner.lock();
        state.last_message_timestamp = Some(snapshot.timestamp);
        state.sensors = Some(snapshot);
    }

    pub fn alarms(&self) -> AlarmReport {
        self.inner.lock().alarms.clone()
    }

    pub fn record_alarms(&self, report: AlarmReport) {
        self.inner.lock().alarms = report;
    }

    pub fn confirmed(&self, name: ControlSettingName) -> Option<ControlSetting> {
        self.inner.lock().confirmed.get(&name).copied()
    }

    /// Record the value the controller reports for a setting.
    pub fn confirm(&self, setting: ControlSetting) {
        self.inner.lock().confirmed.insert(setting.name(), setting);
    }

    /// Stage a tentative value after validating it.
    pub fn stage(&self, setting: ControlSetting) -> Result<()> {
        setting.validate()?;
        self.inner.lock().tentative.insert(setting.name(), setting);
        Ok(())
    }

    /// The tentative value of `name`, if it disagrees with the confirmed one.
    ///
    /// A setting that was never confirmed does not count as disagreeing; it
    /// has to be probed first.
    pub fn pending_change(&self, name: ControlSettingName) -> Option<ControlSetting> {
        let state = self.inner.lock();
        let tentative = state.tentative.get(&name)?;
        let confirmed = state.confirmed.get(&name)?;
        (tentative != confirmed).then_some(*tentative)
    }

    /// Forget a tentative value the controller refused.
    pub fn discard_tentative(&self, name: ControlSettingName) {
        self.inner.lock().tentative.remove(&name);
    }

    pub fn last_message_timestamp(&self) -> Option<f64> {
        self.inner.lock().last_message_timestamp
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    /// Running, and the link (if any) has not failed.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire) && self.inner.lock().link_error.is_none()
    }

    /// Mark the link as dead.  The first cause is kept.
    pub fn fail(&self, cause: impl Into<String>) {
        self.inner.lock().link_error.get_or_insert_with(|| cause.into());
        self.running.store(false, Ordering::Release);
    }

    pub fn link_error(&self) -> Option<String> {
        self.inner.lock().link_error.clone()
    }
}

/// Uniform controller facade for the UI and CLI.
pub trait Coordinator: Send + Sync {
    /// Cache the caller-facing methods read from.
    fn cache(&self) -> &CoordinatorCache;

    fn start(&self) -> Result<()>;
    fn stop(&self) -> Result<()>;

    fn is_running(&self) -> bool {
        self.cache().is_running()
    }

    /// Latest sensor snapshot, `None` until one has arrived.
    fn get_sensors(&self) -> Option<SensorSnapshot> {
        self.cache().sensors()
    }

    /// Confirmed value of a setting, `None` while it is unknown.
    fn get_control(&self, name: ControlSettingName) -> Option<ControlSetting> {
        self.cache().confirmed(name)
    }

    /// Stage a tentative value.  Returns once staged; the controller picks it
    /// up asynchronously.
    fn set_control(&self, setting: ControlSetting) -> Result<()> {
        self.cache().stage(setting)
    }

    fn get_active_alarms(&self) -> BTreeMap<ControlSettingName, Alarm> {
        self.cache().alarms().active
    }

    fn get_logged_alarms(&self) -> Vec<Alarm> {
        self.cache().alarms().logged
    }

    /// Logged alarms followed by active ones.
    fn get_alarms(&self) -> Vec<Alarm> {
        self.cache().alarms().all()
    }

    fn alarm_report(&self) -> AlarmReport {
        self.cache().alarms()
    }

    /// Wall-clock timestamp of the newest sensor snapshot received.
    fn last_message_timestamp(&self) -> Option<f64> {
        self.cache().last_message_timestamp()
    }
}
