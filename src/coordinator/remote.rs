//! Coordinator for a controller in another process.
//!
//! Two threads share the cache:
//!
//! - the **receive loop** drains every inbound message into the cache
//!   (`GET_SENSORS`, `GET_CONTROL` replies, `GET_ALARMS`).  Any other
//!   command ends the loop with a logged [`ProtocolError`] and marks the
//!   coordinator as not running.  Its `recv` has no timeout: a worker that
//!   goes silent without closing the channel stalls it indefinitely, and the
//!   supervisor's heartbeat age is the only signal of that.
//! - the **send loop**, while running, probes unknown settings with
//!   `GET_CONTROL` and sends `SET_CONTROL` + `GET_CONTROL` for each tentative
//!   value that disagrees with the confirmed one.  It never waits for a
//!   reply; the next pass re-sends whatever is still out of step.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};
use parking_lot::Mutex;

use crate::config::CoordinatorConfig;
use crate::error::{Error, ProtocolError, Result};
use crate::ipc::{IpcArgs, IpcCommand, IpcMessage, MessageSink, MessageSource};
use crate::values::ControlSettingName;

use super::{Coordinator, CoordinatorCache};

type SharedSink = Arc<Mutex<Box<dyn MessageSink>>>;

pub struct RemoteCoordinator {
    cache: Arc<CoordinatorCache>,
    sink: SharedSink,
    shutdown: Arc<AtomicBool>,
    send_thread: Option<JoinHandle<()>>,
}

impl RemoteCoordinator {
    pub fn new(
        sink: impl MessageSink + 'static,
        source: impl MessageSource + 'static,
        config: &CoordinatorConfig,
    ) -> Result<Self> {
        let cache = Arc::new(CoordinatorCache::new());
        let sink: Box<dyn MessageSink> = Box::new(sink);
        let sink: SharedSink = Arc::new(Mutex::new(sink));
        let shutdown = Arc::new(AtomicBool::new(false));
        let interval = Duration::from_millis(config.sync_interval_ms);

        {
            let cache = Arc::clone(&cache);
            let shutdown = Arc::clone(&shutdown);
            // Detached: it may be parked in `recv` when the coordinator drops.
            thread::Builder::new()
                .name("remote-recv".into())
                .spawn(move || receive_loop(source, &cache, &shutdown))?;
        }

        let send_thread = {
            let cache = Arc::clone(&cache);
            let sink = Arc::clone(&sink);
            let shutdown = Arc::clone(&shutdown);
            thread::Builder::new()
                .name("remote-send".into())
                .spawn(move || send_loop(&sink, &cache, &shutdown, interval))?
        };

        Ok(Self {
            cache,
            sink,
            shutdown,
            send_thread: Some(send_thread),
        })
    }

    /// Why the channel to the worker failed, if it did.
    pub fn link_error(&self) -> Option<String> {
        self.cache.link_error()
    }

    fn send(&self, msg: &IpcMessage) -> Result<()> {
        let result = self.sink.lock().send(msg);
        if let Err(e) = &result {
            error!("Remote coordinator: sending {} failed: {e}", msg.command);
            self.cache.fail(e.to_string());
        }
        result
    }
}

/// Apply one inbound message to the cache.
fn handle_inbound(cache: &CoordinatorCache, msg: IpcMessage) -> Result<()> {
    match (msg.command, msg.args) {
        (IpcCommand::GetSensors, IpcArgs::Sensors(snapshot)) => cache.record_sensors(snapshot),
        (IpcCommand::GetControl, IpcArgs::Setting(setting)) => cache.confirm(setting),
        // The worker has not observed the value yet; the next probe retries.
        (IpcCommand::GetControl, IpcArgs::None) => {}
        (IpcCommand::GetAlarms, IpcArgs::Alarms(report)) => cache.record_alarms(report),
        (command, _) => {
            return Err(ProtocolError::UnexpectedCommand {
                command,
                role: "remote coordinator",
            }
            .into());
        }
    }
    Ok(())
}

fn receive_loop(mut source: impl MessageSource, cache: &CoordinatorCache, shutdown: &AtomicBool) {
    loop {
        let outcome = source
            .recv()
            .and_then(|msg| handle_inbound(cache, msg));
        match outcome {
            Ok(()) => {}
            Err(Error::Protocol(ProtocolError::Disconnected)) => {
                if !shutdown.load(Ordering::Acquire) {
                    warn!("Remote coordinator: worker channel closed");
                    cache.fail(ProtocolError::Disconnected.to_string());
                }
                break;
            }
            Err(e) => {
                error!("Remote coordinator: {e}");
                cache.fail(e.to_string());
                break;
            }
        }
        if shutdown.load(Ordering::Acquire) {
            break;
        }
    }
    debug!("Remote receive loop exited");
}

fn send_loop(sink: &SharedSink, cache: &CoordinatorCache, shutdown: &AtomicBool, interval: Duration) {
    while !shutdown.load(Ordering::Acquire) {
        if cache.is_running() {
            if let Err(e) = send_pass(sink, cache) {
                error!("Remote coordinator: send loop ended: {e}");
                cache.fail(e.to_string());
                break;
            }
        }
        thread::sleep(interval);
    }
    debug!("Remote send loop exited");
}

/// One reconciliation pass over every controllable setting.
fn send_pass(sink: &SharedSink, cache: &CoordinatorCache) -> Result<()> {
    for name in ControlSettingName::ALL {
        if cache.confirmed(name).is_none() {
            sink.lock().send(&IpcMessage::get_control(name))?;
        }
        if let Some(tentative) = cache.pending_change(name) {
            let mut sink = sink.lock();
            sink.send(&IpcMessage::set_control(tentative))?;
            sink.send(&IpcMessage::get_control(name))?;
        }
    }
    Ok(())
}

impl Coordinator for RemoteCoordinator {
    fn cache(&self) -> &CoordinatorCache {
        &self.cache
    }

    fn start(&self) -> Result<()> {
        self.send(&IpcMessage::start())?;
        self.cache.set_running(true);
        info!("Remote coordinator started");
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.cache.set_running(false);
        self.send(&IpcMessage::stop())?;
        info!("Remote coordinator stopped");
        Ok(())
    }
}

impl Drop for RemoteCoordinator {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.send_thread.take() {
            let _ = handle.join();
        }
    }
}
