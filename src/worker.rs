//! Worker side of the message channel.
//!
//! The worker hosts a controller behind a [`LocalCoordinator`] and talks to
//! the supervisor's remote coordinator:
//!
//! - the receive loop (calling thread) dispatches `START`, `STOP`,
//!   `GET_CONTROL` and `SET_CONTROL`; any other command is fatal;
//! - the push loop sends `GET_SENSORS` and `GET_ALARMS` every sync interval.
//!
//! End of input on the channel is a clean shutdown.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};
use parking_lot::Mutex;

use crate::config::SystemConfig;
use crate::coordinator::{Coordinator, LocalCoordinator};
use crate::error::{Error, ProtocolError, Result};
use crate::ipc::{IpcArgs, IpcCommand, IpcMessage, MessageSink, MessageSource, StreamSink, StreamSource};

/// Serve `coordinator` over a channel until the peer disconnects.
pub fn serve<C, K, S>(coordinator: Arc<C>, sink: K, mut source: S, push_interval: Duration) -> Result<()>
where
    C: Coordinator + ?Sized + 'static,
    K: MessageSink + 'static,
    S: MessageSource,
{
    let sink = Arc::new(Mutex::new(sink));
    let done = Arc::new(AtomicBool::new(false));

    let pusher = {
        let coordinator = Arc::clone(&coordinator);
        let sink = Arc::clone(&sink);
        let done = Arc::clone(&done);
        thread::Builder::new()
            .name("worker-push".into())
            .spawn(move || push_loop(&*coordinator, &sink, &done, push_interval))?
    };

    let outcome = loop {
        let msg = match source.recv() {
            Ok(msg) => msg,
            Err(Error::Protocol(ProtocolError::Disconnected)) => {
                info!("Worker: supervisor closed the channel");
                break Ok(());
            }
            Err(e) => break Err(e),
        };
        if let Err(e) = dispatch(&*coordinator, &sink, msg) {
            break Err(e);
        }
    };

    done.store(true, Ordering::Release);
    if let Err(e) = coordinator.stop() {
        warn!("Worker: stopping coordinator failed: {e}");
    }
    let _ = pusher.join();
    if let Err(e) = &outcome {
        error!("Worker: {e}");
    }
    outcome
}

fn dispatch<C, K>(coordinator: &C, sink: &Mutex<K>, msg: IpcMessage) -> Result<()>
where
    C: Coordinator + ?Sized,
    K: MessageSink,
{
    debug!("Worker received {}", msg.command);
    match (msg.command, msg.args) {
        (IpcCommand::Start, _) => coordinator.start(),
        (IpcCommand::Stop, _) => coordinator.stop(),
        (IpcCommand::GetControl, IpcArgs::SettingName(name)) => {
            let reply = IpcMessage::control(coordinator.get_control(name));
            sink.lock().send(&reply)
        }
        (IpcCommand::SetControl, IpcArgs::Setting(setting)) => {
            // A refused value is the caller's problem, not the channel's.
            if let Err(e) = coordinator.set_control(setting) {
                warn!("Worker: rejected {}: {e}", setting.name());
            }
            Ok(())
        }
        (command, _) => Err(ProtocolError::UnexpectedCommand {
            command,
            role: "worker",
        }
        .into()),
    }
}

fn push_loop<C, K>(coordinator: &C, sink: &Mutex<K>, done: &AtomicBool, interval: Duration)
where
    C: Coordinator + ?Sized,
    K: MessageSink,
{
    while !done.load(Ordering::Acquire) {
        let mut batch = Vec::with_capacity(2);
        if let Some(sensors) = coordinator.get_sensors() {
            batch.push(IpcMessage::sensors(sensors));
        }
        batch.push(IpcMessage::alarms(coordinator.alarm_report()));

        let mut sink = sink.lock();
        for msg in &batch {
            if let Err(e) = sink.send(msg) {
                if !done.load(Ordering::Acquire) {
                    warn!("Worker: push failed: {e}");
                }
                return;
            }
        }
        drop(sink);
        thread::sleep(interval);
    }
}

/// Host a simulated controller on stdin/stdout.
pub fn run_stdio(config: &SystemConfig) -> Result<()> {
    info!("Worker {} starting", std::process::id());
    let coordinator = Arc::new(LocalCoordinator::simulated(config)?);
    serve(
        coordinator,
        StreamSink::new(io::stdout()),
        StreamSource::new(io::stdin()),
        Duration::from_millis(config.coordinator.sync_interval_ms),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::CoordinatorCache;
    use crate::ipc::memory_pair;
    use crate::values::{ControlSetting, ControlSettingName};

    /// Coordinator that only records what it was told.
    #[derive(Default)]
    struct Recording {
        cache: CoordinatorCache,
    }

    impl Coordinator for Recording {
        fn cache(&self) -> &CoordinatorCache {
            &self.cache
        }
        fn start(&self) -> Result<()> {
            self.cache.set_running(true);
            Ok(())
        }
        fn stop(&self) -> Result<()> {
            self.cache.set_running(false);
            Ok(())
        }
    }

    #[test]
    fn dispatches_commands_and_exits_on_disconnect() {
        let (worker_end, mut remote_end) = memory_pair();
        let coord = Arc::new(Recording::default());
        let served = {
            let coord = Arc::clone(&coord);
            thread::spawn(move || {
                serve(coord, worker_end.sink, worker_end.source, Duration::from_millis(1))
            })
        };

        remote_end.sink.send(&IpcMessage::start()).unwrap();
        let setting = ControlSetting::new(ControlSettingName::Pip, 20.0, 18.0, 22.0);
        remote_end.sink.send(&IpcMessage::set_control(setting)).unwrap();
        remote_end
            .sink
            .send(&IpcMessage::get_control(ControlSettingName::Pip))
            .unwrap();

        // Unknown to the recording coordinator: answered with no payload.
        let reply = loop {
            let msg = remote_end.source.recv().unwrap();
            if msg.command == IpcCommand::GetControl {
                break msg;
            }
        };
        assert_eq!(reply, IpcMessage::control(None));
        assert!(coord.is_running());

        drop(remote_end);
        served.join().unwrap().unwrap();
        assert!(!coord.is_running());
    }

    #[test]
    fn pushes_alarm_reports() {
        let (worker_end, mut remote_end) = memory_pair();
        let coord = Arc::new(Recording::default());
        let served = thread::spawn(move || {
            serve(coord, worker_end.sink, worker_end.source, Duration::from_millis(1))
        });
        let first = remote_end.source.recv().unwrap();
        assert_eq!(first.command, IpcCommand::GetAlarms);
        drop(remote_end);
        served.join().unwrap().unwrap();
    }

    #[test]
    fn sensor_push_is_rejected_by_the_worker() {
        let (worker_end, mut remote_end) = memory_pair();
        let coord = Arc::new(Recording::default());
        let served = thread::spawn(move || {
            serve(coord, worker_end.sink, worker_end.source, Duration::from_millis(1))
        });
        remote_end
            .sink
            .send(&IpcMessage::sensors(Default::default()))
            .unwrap();
        let err = served.join().unwrap().unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::UnexpectedCommand {
                command: IpcCommand::GetSensors,
                ..
            })
        ));
    }
}
