//! Process-level tests against the real `ventcore worker` binary.

use std::time::Duration;

use ventcore::config::CoordinatorConfig;
use ventcore::coordinator::Coordinator;
use ventcore::supervisor::{ProcessSupervisor, WorkerCommand};
use ventcore::values::ControlSettingName;

use super::wait_for;

fn worker_command() -> WorkerCommand {
    WorkerCommand::new(env!("CARGO_BIN_EXE_ventcore")).arg("worker")
}

#[test]
fn spawned_worker_reports_through_the_remote_coordinator() {
    let mut supervisor =
        ProcessSupervisor::spawn(&worker_command(), &CoordinatorConfig::default()).unwrap();
    assert!(supervisor.worker_id() > 0);

    let coord = supervisor.coordinator().clone();
    coord.start().unwrap();
    assert!(wait_for(|| coord.get_sensors().is_some_and(|s| s.loop_counter > 0)));
    assert!(wait_for(|| coord.get_control(ControlSettingName::Pip).is_some()));
    assert!(wait_for(|| supervisor.heartbeat_age() < Duration::from_millis(500)));
    assert!(coord.is_running());

    coord.stop().unwrap();
    supervisor.shutdown().unwrap();
}

#[test]
fn worker_that_fails_to_start_surfaces_as_a_link_error() {
    let command = worker_command().with_config("/nonexistent/ventcore.json");
    let mut supervisor =
        ProcessSupervisor::spawn(&command, &CoordinatorConfig::default()).unwrap();
    let coord = supervisor.coordinator().clone();

    assert!(wait_for(|| coord.link_error().is_some()));
    assert!(!coord.is_running());
    let status = supervisor.shutdown().unwrap();
    assert!(!status.success());
}
