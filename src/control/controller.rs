//! Threaded breath-cycle controller.
//!
//! [`Controller`] runs a [`ControlEngine`] on a dedicated OS thread that
//! sleeps `loop_update_time_ms` between iterations and synchronises with the
//! [`SnapshotChannel`] every `sync_every_loops` iterations.  Everything the
//! rest of the system sees goes through the snapshot; the engine itself is
//! owned by the loop thread while it runs.
//!
//! ```text
//!   start() ──spawn──▶ [ loop: sleep → tick → every K: synchronize ]
//!   stop()  ──flag───▶   observed within one loop period, no join
//!   start() again ───▶ joins the finished thread, reclaims engine + hw
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{error, info, warn};
use parking_lot::Mutex;

use crate::alarm::Alarm;
use crate::config::ControllerConfig;
use crate::error::Result;
use crate::hal::{ActuatorPort, BalloonSimulator, SensorPort};
use crate::snapshot::SnapshotChannel;
use crate::time::MonotonicClock;
use crate::values::{ControlSetting, ControlSettingName, SensorSnapshot};

use super::engine::ControlEngine;
use super::waveform::Waveform;

/// The controller API the coordinators consume.
pub trait ControlModule: Send + Sync {
    /// Spawn the control loop.  No-op with a warning if it is already running.
    fn start(&self);
    /// Ask the loop to exit.  Returns immediately; the loop may still run
    /// for up to one period afterwards.
    fn stop(&self);
    fn is_running(&self) -> bool;
    fn get_sensors(&self) -> SensorSnapshot;
    fn get_control(&self, name: ControlSettingName) -> Result<ControlSetting>;
    /// Stage a setting; live state picks it up at the next sync point.
    fn set_control(&self, setting: ControlSetting) -> Result<()>;
    /// Logged alarms followed by active ones.
    fn get_alarms(&self) -> Vec<Alarm>;
    fn get_active_alarms(&self) -> BTreeMap<ControlSettingName, Alarm>;
    fn get_logged_alarms(&self) -> Vec<Alarm>;
    /// Drain the waveform archive, oldest first.  The most recent waveform
    /// stays archived.
    fn get_past_waveforms(&self) -> Vec<Waveform>;
}

enum LoopState<H> {
    /// Not running; engine and hardware are parked here.
    Idle(ControlEngine, H),
    Running(JoinHandle<(ControlEngine, H)>),
    /// The loop thread panicked and took the engine with it.
    Lost,
}

/// What the loop thread shares with the handle.
#[derive(Clone)]
struct LoopShared {
    snapshot: Arc<SnapshotChannel>,
    running: Arc<AtomicBool>,
    heartbeat: Arc<AtomicU64>,
    clock: MonotonicClock,
    period: Duration,
    sync_every: u32,
}

pub struct Controller<H> {
    shared: LoopShared,
    state: Mutex<LoopState<H>>,
}

impl Controller<BalloonSimulator> {
    /// Controller driving the simulated balloon.
    pub fn simulated(config: ControllerConfig) -> Self {
        Self::new(config, BalloonSimulator::new())
    }
}

impl<H> Controller<H>
where
    H: SensorPort + ActuatorPort + Send + 'static,
{
    pub fn new(config: ControllerConfig, hw: H) -> Self {
        let mut engine = ControlEngine::new(config.clone());
        let snapshot = SnapshotChannel::new(config.ringbuffer_size, engine.publication());
        Self {
            shared: LoopShared {
                snapshot: Arc::new(snapshot),
                running: Arc::new(AtomicBool::new(false)),
                heartbeat: Arc::new(AtomicU64::new(0)),
                clock: MonotonicClock::new(),
                period: Duration::from_millis(config.loop_update_time_ms),
                sync_every: config.sync_every_loops.max(1),
            },
            state: Mutex::new(LoopState::Idle(engine, hw)),
        }
    }

    /// Live loop counter, read without touching the snapshot lock.
    pub fn heartbeat(&self) -> u64 {
        self.shared.heartbeat.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> &Arc<SnapshotChannel> {
        &self.shared.snapshot
    }

    fn spawn(&self) {
        let mut state = self.state.lock();
        let (engine, hw) = match std::mem::replace(&mut *state, LoopState::Lost) {
            LoopState::Running(handle) if !handle.is_finished() => {
                warn!("Control loop already running");
                *state = LoopState::Running(handle);
                return;
            }
            LoopState::Running(handle) => match handle.join() {
                Ok(parts) => parts,
                Err(_) => {
                    error!("Control loop thread panicked; controller cannot restart");
                    return;
                }
            },
            LoopState::Idle(engine, hw) => (engine, hw),
            LoopState::Lost => {
                error!("Control loop was lost; controller cannot restart");
                return;
            }
        };

        self.shared.running.store(true, Ordering::Release);
        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name("control-loop".into())
            .spawn(move || control_loop(engine, hw, &shared));
        match spawned {
            Ok(handle) => *state = LoopState::Running(handle),
            Err(e) => {
                // The closure owning engine and hw is gone with the failed spawn.
                self.shared.running.store(false, Ordering::Release);
                error!("Failed to spawn control loop: {e}");
            }
        }
    }
}

/// Clears the running flag when the loop thread ends, including by panic.
struct ClearOnExit<'a>(&'a AtomicBool);

impl Drop for ClearOnExit<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn control_loop<H: SensorPort + ActuatorPort>(
    mut engine: ControlEngine,
    mut hw: H,
    shared: &LoopShared,
) -> (ControlEngine, H) {
    info!(
        "Control loop started at iteration {} ({:?} period, sync every {})",
        engine.loop_counter(),
        shared.period,
        shared.sync_every
    );
    let _running = ClearOnExit(&*shared.running);
    let sync = |engine: &mut ControlEngine| {
        let applied = shared.snapshot.synchronize(|staged| {
            for setting in staged {
                engine.apply_setting(setting);
            }
            engine.publication()
        });
        for setting in applied {
            info!("Setting applied: {} = {}", setting.name(), setting.value());
        }
    };

    let mut until_sync = shared.sync_every;
    while shared.running.load(Ordering::Acquire) {
        thread::sleep(shared.period);
        engine.tick(&mut hw, shared.clock.now_secs());
        shared
            .heartbeat
            .store(engine.loop_counter(), Ordering::Release);

        until_sync -= 1;
        if until_sync == 0 {
            sync(&mut engine);
            until_sync = shared.sync_every;
        }
    }
    // Final publish so readers see where the loop stopped.
    sync(&mut engine);
    info!(
        "Control loop stopped at iteration {} after {} breaths",
        engine.loop_counter(),
        engine.breath_count()
    );
    (engine, hw)
}

impl<H> ControlModule for Controller<H>
where
    H: SensorPort + ActuatorPort + Send + 'static,
{
    fn start(&self) {
        self.spawn();
    }

    fn stop(&self) {
        if self.shared.running.swap(false, Ordering::AcqRel) {
            info!("Control loop stop requested");
        } else {
            warn!("Control loop is not running");
        }
    }

    fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    fn get_sensors(&self) -> SensorSnapshot {
        self.shared.snapshot.sensors()
    }

    fn get_control(&self, name: ControlSettingName) -> Result<ControlSetting> {
        self.shared.snapshot.control(name)
    }

    fn set_control(&self, setting: ControlSetting) -> Result<()> {
        self.shared.snapshot.stage_control(setting)
    }

    fn get_alarms(&self) -> Vec<Alarm> {
        self.shared.snapshot.alarms().all()
    }

    fn get_active_alarms(&self) -> BTreeMap<ControlSettingName, Alarm> {
        self.shared.snapshot.alarms().active
    }

    fn get_logged_alarms(&self) -> Vec<Alarm> {
        self.shared.snapshot.alarms().logged
    }

    fn get_past_waveforms(&self) -> Vec<Waveform> {
        self.shared.snapshot.drain_waveforms()
    }
}

impl<H> Drop for Controller<H> {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> ControllerConfig {
        ControllerConfig {
            loop_update_time_ms: 1,
            sync_every_loops: 2,
            ..ControllerConfig::default()
        }
    }

    #[test]
    fn heartbeat_advances_while_running() {
        let c = Controller::new(fast_config(), BalloonSimulator::seeded(1));
        assert_eq!(c.heartbeat(), 0);
        c.start();
        thread::sleep(Duration::from_millis(50));
        assert!(c.is_running());
        let first = c.heartbeat();
        assert!(first > 0);
        thread::sleep(Duration::from_millis(20));
        assert!(c.heartbeat() > first);
        c.stop();
        assert!(!c.is_running());
    }

    #[test]
    fn second_start_is_a_no_op() {
        let c = Controller::new(fast_config(), BalloonSimulator::seeded(2));
        c.start();
        c.start();
        assert!(c.is_running());
        c.stop();
    }

    #[test]
    fn restart_continues_loop_counter() {
        let c = Controller::new(fast_config(), BalloonSimulator::seeded(3));
        c.start();
        thread::sleep(Duration::from_millis(30));
        c.stop();
        thread::sleep(Duration::from_millis(30));
        let before = c.get_sensors().loop_counter;
        assert!(before > 0);

        c.start();
        thread::sleep(Duration::from_millis(30));
        c.stop();
        thread::sleep(Duration::from_millis(30));
        assert!(c.get_sensors().loop_counter > before);
    }

    #[test]
    fn ten_restarts_each_advance_the_loop_counter() {
        let c = Controller::new(fast_config(), BalloonSimulator::seeded(4));
        for round in 0..10 {
            thread::sleep(Duration::from_millis(100));
            c.start();
            assert!(c.is_running(), "round {round}");
            let at_start = c.get_sensors().loop_counter;
            thread::sleep(Duration::from_millis(300));
            c.stop();
            thread::sleep(Duration::from_millis(20));
            let at_stop = c.get_sensors().loop_counter;
            assert!(at_stop > at_start, "round {round}: {at_start} -> {at_stop}");
        }
    }

    #[test]
    fn set_control_on_stopped_controller_reads_back() {
        let c = Controller::simulated(fast_config());
        let peep = ControlSetting::new(ControlSettingName::Peep, 6.0, 5.0, 7.0);
        c.set_control(peep).unwrap();
        assert_eq!(c.get_control(ControlSettingName::Peep).unwrap(), peep);
    }
}
