//! Threshold alarm registry.
//!
//! The registry is evaluated once per completed breath cycle and tracks
//! measured values against their configured `[min, max]` bands.
//!
//! ## Alarm lifecycle
//!
//! 1. A measured value leaves its band.
//! 2. If no alarm for that name is active, the registry creates one
//!    (severity RED, `start_time = now`) and files it as active.
//! 3. Repeated breaches while active change nothing: at most one active
//!    alarm exists per name.
//! 4. When the value is back in band, the active alarm is closed
//!    (`end_time = now`) and moved into the bounded logged history.
//!    Oldest entries are evicted once the history is full.

use std::collections::{BTreeMap, VecDeque};

use log::{error, info};
use serde::{Deserialize, Serialize};

use crate::values::ControlSettingName;

/// How urgently an alarm needs attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlarmSeverity {
    Red,
    Orange,
    Yellow,
}

/// One threshold breach, from detection until recovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alarm {
    id: u64,
    name: ControlSettingName,
    severity: AlarmSeverity,
    active: bool,
    start_time: f64,
    end_time: Option<f64>,
    value: f64,
    message: Option<String>,
}

impl Alarm {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The monitored variable that breached its band.
    pub fn name(&self) -> ControlSettingName {
        self.name
    }

    pub fn severity(&self) -> AlarmSeverity {
        self.severity
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    pub fn end_time(&self) -> Option<f64> {
        self.end_time
    }

    /// The measured value that raised the alarm.
    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Close the alarm.  No-op if it is already inactive.
    fn deactivate(&mut self, now: f64) {
        if self.active {
            self.active = false;
            self.end_time = Some(now);
        }
    }
}

/// Active + logged alarms, as carried across the snapshot and the message
/// channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlarmReport {
    pub active: BTreeMap<ControlSettingName, Alarm>,
    /// Closed alarms, oldest first.
    pub logged: Vec<Alarm>,
}

impl AlarmReport {
    /// Logged alarms followed by active ones.
    pub fn all(&self) -> Vec<Alarm> {
        self.logged
            .iter()
            .cloned()
            .chain(self.active.values().cloned())
            .collect()
    }
}

/// Owns every alarm and the counter that numbers them.
#[derive(Debug)]
pub struct AlarmRegistry {
    active: BTreeMap<ControlSettingName, Alarm>,
    logged: VecDeque<Alarm>,
    capacity: usize,
    next_id: u64,
}

impl AlarmRegistry {
    /// `capacity` bounds the logged history.
    pub fn new(capacity: usize) -> Self {
        Self {
            active: BTreeMap::new(),
            logged: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            next_id: 0,
        }
    }

    /// Raise, keep, or clear the alarm for `name` depending on whether
    /// `value` lies in `[min, max]`.
    pub fn test_threshold(
        &mut self,
        name: ControlSettingName,
        min: f64,
        max: f64,
        value: f64,
        now: f64,
    ) {
        // NaN compares false both ways and counts as out of band.
        let in_band = value >= min && value <= max;
        if in_band {
            if let Some(mut alarm) = self.active.remove(&name) {
                alarm.deactivate(now);
                info!("ALARM CLEARED: {name} (id {}) at {value:.2}", alarm.id);
                self.log(alarm);
            }
        } else if !self.active.contains_key(&name) {
            let alarm = self.raise(name, value, now);
            error!(
                "ALARM RAISED: {name} = {value:.2} outside [{min:.2}, {max:.2}] (id {})",
                alarm.id
            );
            self.active.insert(name, alarm);
        }
    }

    /// Build a new active alarm with the next id.
    fn raise(&mut self, name: ControlSettingName, value: f64, now: f64) -> Alarm {
        let id = self.next_id;
        self.next_id += 1;
        Alarm {
            id,
            name,
            severity: AlarmSeverity::Red,
            active: true,
            start_time: now,
            end_time: None,
            value,
            message: None,
        }
    }

    fn log(&mut self, alarm: Alarm) {
        if self.logged.len() == self.capacity {
            self.logged.pop_front();
        }
        self.logged.push_back(alarm);
    }

    pub fn active_alarms(&self) -> &BTreeMap<ControlSettingName, Alarm> {
        &self.active
    }

    /// Closed alarms in the order they were closed.
    pub fn logged_alarms(&self) -> impl Iterator<Item = &Alarm> {
        self.logged.iter()
    }

    /// Logged alarms followed by active ones.
    pub fn all_alarms(&self) -> Vec<Alarm> {
        self.logged
            .iter()
            .cloned()
            .chain(self.active.values().cloned())
            .collect()
    }

    /// Copy of the current state for publication.
    pub fn report(&self) -> AlarmReport {
        AlarmReport {
            active: self.active.clone(),
            logged: self.logged.iter().cloned().collect(),
        }
    }
}
