//! Controller pipeline: engine → ports → snapshot, on the simulated plant.

use std::thread;
use std::time::Duration;

use ventcore::config::{ControllerConfig, TargetDefaults};
use ventcore::control::engine::ControlEngine;
use ventcore::control::{ControlModule, Controller};
use ventcore::values::{ControlSetting, ControlSettingName};

use super::mock_hw::RecordingHardware;
use super::wait_for;

const STEP: f64 = 0.01;

fn run(engine: &mut ControlEngine, hw: &mut RecordingHardware, from: f64, secs: f64) -> f64 {
    let ticks = (secs / STEP).round() as u64;
    for i in 0..ticks {
        engine.tick(hw, from + i as f64 * STEP);
    }
    from + ticks as f64 * STEP
}

/// One-second breath cycle so threaded tests finish quickly.
fn fast_breathing() -> ControllerConfig {
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

// ── Deterministic engine on recording hardware ───────────────

#[test]
fn every_iteration_commands_both_valves() {
    let mut engine = ControlEngine::new(ControllerConfig::default());
    let mut hw = RecordingHardware::seeded(11);
    let calls = hw.calls();

    run(&mut engine, &mut hw, 0.0, 12.5);

    let calls = calls.lock();
    assert_eq!(calls.len() as u64, engine.loop_counter());
    assert_eq!(hw.reads(), engine.loop_counter());
    assert!(calls.iter().all(|c| c.setpoint_in == 0.6));
    assert!(calls.iter().all(|c| (0.0..=160.0).contains(&c.setpoint_ex)));
    // 4 s cycles: ended at 4, 8 and 12 s.
    assert_eq!(engine.breath_count(), 3);
    assert_eq!(engine.publication().waveforms.len(), 3);
}

#[test]
fn corrupted_pressure_never_reaches_the_snapshot() {
    let mut engine = ControlEngine::new(ControllerConfig::default());
    let mut hw = RecordingHardware::seeded(5).with_nan_every(7);
    let calls = hw.calls();

    let ticks: u32 = 900;
    for i in 0..ticks {
        engine.tick(&mut hw, f64::from(i) * STEP);
        let s = engine.sensor_snapshot();
        assert!(s.pressure.is_some_and(f64::is_finite), "tick {i}");
    }

    assert!(engine.sensor_faults() >= u64::from(ticks) / 7);
    assert!(calls.lock().iter().all(|c| c.setpoint_ex.is_finite()));
    let m = engine.measurements();
    for v in [m.pip, m.peep, m.vte, m.breaths_per_minute].into_iter().flatten() {
        assert!(v.is_finite());
    }
}

#[test]
fn out_of_band_pip_raises_then_clears() {
    let mut engine = ControlEngine::new(ControllerConfig::default());
    let mut hw = RecordingHardware::seeded(3);

    // A band the simulated plant cannot reach.
    engine.apply_setting(ControlSetting::new(ControlSettingName::Pip, 22.0, 60.0, 70.0));
    let t = run(&mut engine, &mut hw, 0.0, 8.5);
    let active = engine.alarms().active_alarms();
    assert!(active.contains_key(&ControlSettingName::Pip));
    assert!(
        engine
            .alarms()
            .logged_alarms()
            .all(|a| a.name() != ControlSettingName::Pip)
    );

    engine.apply_setting(ControlSetting::new(ControlSettingName::Pip, 22.0, 0.0, 100.0));
    run(&mut engine, &mut hw, t, 4.0);
    assert!(!engine.alarms().active_alarms().contains_key(&ControlSettingName::Pip));
    let logged: Vec<_> = engine
        .alarms()
        .logged_alarms()
        .filter(|a| a.name() == ControlSettingName::Pip)
        .cloned()
        .collect();
    assert_eq!(logged.len(), 1);
    assert!(!logged[0].is_active());
    assert!(logged[0].end_time().is_some());
}

// ── Threaded controller ───────────────────────────────────────

#[test]
fn staged_setting_is_applied_at_a_sync_point() {
    let hw = RecordingHardware::seeded(21);
    let calls = hw.calls();
    let controller = Controller::new(fast_breathing(), hw);

    controller.start();
    let peep = ControlSetting::new(ControlSettingName::Peep, 6.0, 5.4, 6.6);
    controller.set_control(peep).unwrap();
    assert_eq!(controller.get_control(ControlSettingName::Peep).unwrap(), peep);

    assert!(wait_for(|| controller.snapshot().pending().is_empty()));
    assert!(wait_for(|| controller.get_sensors().loop_counter > 0));
    assert!(!calls.lock().is_empty());
    controller.stop();
}

#[test]
fn completed_breaths_reach_the_waveform_archive() {
    let controller = Controller::new(fast_breathing(), RecordingHardware::seeded(8));
    controller.start();
    assert!(wait_for(|| controller.get_sensors().breath_count >= 1));
    controller.stop();
    thread::sleep(Duration::from_millis(20));

    let past = controller.get_past_waveforms();
    assert!(!past.is_empty());
    assert!(past.iter().all(|w| !w.is_empty()));
    // The most recent waveform stays archived after a drain.
    assert_eq!(controller.get_past_waveforms().len(), 1);
}

#[test]
fn invalid_setting_is_rejected_synchronously() {
    let controller = Controller::new(fast_breathing(), RecordingHardware::seeded(1));
    let bad = ControlSetting::new(ControlSettingName::BreathsPerMinute, 0.0, 0.0, 1.0);
    assert!(controller.set_control(bad).is_err());
    let live = controller
        .get_control(ControlSettingName::BreathsPerMinute)
        .unwrap();
    assert_eq!(live.value(), 60.0);
}

#[test]
fn loop_panic_clears_running_and_blocks_restart() {
    let hw = RecordingHardware::seeded(9).panicking_at(50);
    let controller = Controller::new(fast_breathing(), hw);
    controller.start();
    assert!(wait_for(|| !controller.is_running()));
    let frozen = controller.heartbeat();
    assert!(frozen >= 40);

    // The engine went down with the thread; a restart is refused.
    controller.start();
    assert!(!controller.is_running());
    thread::sleep(Duration::from_millis(20));
    assert_eq!(controller.heartbeat(), frozen);
}

#[test]
fn counters_only_move_forward_while_running() {
    let controller = Controller::new(fast_breathing(), RecordingHardware::seeded(12));
    controller.start();

    let mut samples = Vec::new();
    for _ in 0..60 {
        thread::sleep(Duration::from_millis(50));
        let s = controller.get_sensors();
        samples.push((s.loop_counter, s.breath_count));
    }
    controller.stop();

    for pair in samples.windows(2) {
        let ((loops_a, breaths_a), (loops_b, breaths_b)) = (pair[0], pair[1]);
        assert!(loops_b > loops_a, "loop counter {loops_a} -> {loops_b}");
        assert!(breaths_b >= breaths_a, "breath count {breaths_a} -> {breaths_b}");
    }
    // Three seconds of one-second breaths.
    assert!(samples.last().is_some_and(|&(_, breaths)| breaths >= 2));
}
