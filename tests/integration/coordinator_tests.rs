//! Coordinators end to end: local over a threaded controller, and remote
//! over an in-memory channel to a worker hosting one.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ventcore::config::{ControllerConfig, CoordinatorConfig, TargetDefaults};
use ventcore::control::Controller;
use ventcore::coordinator::{Coordinator, LocalCoordinator, RemoteCoordinator};
use ventcore::error::Result;
use ventcore::ipc::memory_pair;
use ventcore::values::{ControlSetting, ControlSettingName};
use ventcore::worker;

use super::mock_hw::RecordingHardware;
use super::wait_for;

fn controller_config() -> ControllerConfig {
    ControllerConfig {
        loop_update_time_ms: 1,
        sync_every_loops: 5,
        targets: TargetDefaults {
            pip_time: 0.2,
            peep_time: 0.1,
            breaths_per_minute: 60.0,
            inspiration_time_sec: 0.5,
            ..TargetDefaults::default()
        },
        ..ControllerConfig::default()
    }
}

fn coordinator_config() -> CoordinatorConfig {
    CoordinatorConfig {
        sync_interval_ms: 5,
        ..CoordinatorConfig::default()
    }
}

fn local(seed: u64) -> LocalCoordinator<Controller<RecordingHardware>> {
    let controller = Controller::new(controller_config(), RecordingHardware::seeded(seed));
    LocalCoordinator::new(controller, &coordinator_config()).unwrap()
}

/// A remote coordinator wired to a worker thread serving a local one.
fn remote_with_worker(seed: u64) -> (RemoteCoordinator, JoinHandle<Result<()>>) {
    let (near, far) = memory_pair();
    let hosted = Arc::new(local(seed));
    let worker = thread::spawn(move || {
        worker::serve(hosted, far.sink, far.source, Duration::from_millis(5))
    });
    let remote = RemoteCoordinator::new(near.sink, near.source, &coordinator_config()).unwrap();
    (remote, worker)
}

fn all_known(coord: &dyn Coordinator) -> bool {
    ControlSettingName::ALL
        .iter()
        .all(|&name| coord.get_control(name).is_some())
}

// ── Local ─────────────────────────────────────────────────────

#[test]
fn local_coordinator_reconciles_a_tentative_setting() {
    let coord = local(1);
    assert!(!coord.is_running());
    assert!(coord.get_sensors().is_none());

    coord.start().unwrap();
    assert!(wait_for(|| all_known(&coord)));
    assert!(coord.is_running());

    let pip = ControlSetting::new(ControlSettingName::Pip, 18.0, 17.8, 18.2);
    coord.set_control(pip).unwrap();
    assert!(wait_for(|| coord.get_control(ControlSettingName::Pip) == Some(pip)));
    assert!(wait_for(|| coord.get_sensors().is_some_and(|s| s.loop_counter > 0)));
    assert!(coord.last_message_timestamp().is_some());

    coord.stop().unwrap();
    assert!(!coord.is_running());
}

#[test]
fn local_coordinator_rejects_invalid_setting() {
    let coord = local(2);
    let bad = ControlSetting::new(ControlSettingName::Peep, f64::NAN, 4.0, 6.0);
    assert!(coord.set_control(bad).is_err());
    let stopped = ControlSetting::new(ControlSettingName::BreathsPerMinute, 0.0, 0.0, 1.0);
    assert!(coord.set_control(stopped).is_err());
}

#[test]
fn inverted_band_round_trips_for_every_setting() {
    let coord = local(5);
    coord.start().unwrap();
    assert!(wait_for(|| all_known(&coord)));

    for name in ControlSettingName::ALL {
        let value = coord.get_control(name).unwrap().value();
        let inverted = ControlSetting::new(name, value, value + 1.0, value - 1.0);
        coord.set_control(inverted).unwrap();
        assert!(wait_for(|| coord.get_control(name) == Some(inverted)));
    }

    // Nothing can sit inside an inverted PIP band, so its alarm latches.
    assert!(wait_for(|| coord
        .get_active_alarms()
        .contains_key(&ControlSettingName::Pip)));
    coord.stop().unwrap();
}

// ── Remote ↔ worker ───────────────────────────────────────────

#[test]
fn remote_sees_worker_state_and_pushes_settings() {
    let (remote, worker) = remote_with_worker(3);
    remote.start().unwrap();

    assert!(wait_for(|| all_known(&remote)));
    assert!(wait_for(|| remote.get_sensors().is_some_and(|s| s.loop_counter > 0)));

    let peep = ControlSetting::new(ControlSettingName::Peep, 7.0, 6.3, 7.7);
    remote.set_control(peep).unwrap();
    assert!(wait_for(|| remote.get_control(ControlSettingName::Peep) == Some(peep)));

    // A full breath on the worker brings its measurements over.
    assert!(wait_for(|| remote.get_sensors().is_some_and(|s| s.breath_count >= 1)));
    let sensors = remote.get_sensors().unwrap();
    assert!(sensors.pip.is_some() && sensors.breaths_per_minute.is_some());

    remote.stop().unwrap();
    assert!(!remote.is_running());
    assert!(remote.link_error().is_none());

    drop(remote);
    worker.join().unwrap().unwrap();
}

#[test]
fn worker_exits_cleanly_when_the_remote_goes_away() {
    let (remote, worker) = remote_with_worker(4);
    remote.start().unwrap();
    assert!(wait_for(|| remote.get_sensors().is_some()));
    drop(remote);
    worker.join().unwrap().unwrap();
}
