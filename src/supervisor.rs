//! Worker process supervision.
//!
//! ```text
//!   supervisor process                          worker process
//!  ┌─────────────────────┐  stdin (framed)   ┌──────────────────────┐
//!  │ RemoteCoordinator   │ ────────────────▶ │ worker::serve        │
//!  │                     │ ◀──────────────── │  LocalCoordinator    │
//!  │ heartbeat monitor   │  stdout (framed)  │   Controller thread  │
//!  └─────────────────────┘                   └──────────────────────┘
//!                               stderr: worker logs, inherited
//! ```
//!
//! The monitor only observes: it tracks how long ago the worker's published
//! `loop_counter` last advanced and warns once it is older than
//! `heartbeat_interval_ms`.  A hung worker is reported, never restarted.

use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::config::CoordinatorConfig;
use crate::coordinator::{Coordinator, RemoteCoordinator};
use crate::error::{Error, Result};
use crate::ipc::{StreamSink, StreamSource};

/// How to launch the worker.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// `<this executable> worker`.
    pub fn current_exe() -> Result<Self> {
        let program = std::env::current_exe()
            .map_err(|e| Error::Worker(format!("cannot locate own executable: {e}")))?;
        Ok(Self::new(program).arg("worker"))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Pass a configuration file through to the worker.
    pub fn with_config(self, path: impl Into<PathBuf>) -> Self {
        let path: PathBuf = path.into();
        self.arg("--config").arg(path.to_string_lossy().into_owned())
    }
}

/// Last observed `loop_counter` and when it last changed.
#[derive(Debug)]
struct Heartbeat {
    loop_counter: u64,
    changed_at: Instant,
}

pub struct ProcessSupervisor {
    child: Child,
    coordinator: Arc<RemoteCoordinator>,
    heartbeat: Arc<Mutex<Heartbeat>>,
    shutdown: Arc<AtomicBool>,
    monitor: Option<JoinHandle<()>>,
}

impl ProcessSupervisor {
    /// Spawn the worker and connect a remote coordinator to its pipes.
    pub fn spawn(command: &WorkerCommand, config: &CoordinatorConfig) -> Result<Self> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| Error::Worker(format!("{}: {e}", command.program.display())))?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::Worker("worker pipes unavailable".into()));
        };
        info!("Spawned worker pid {}", child.id());

        let coordinator = Arc::new(RemoteCoordinator::new(
            StreamSink::new(stdin),
            StreamSource::new(stdout),
            config,
        )?);
        let heartbeat = Arc::new(Mutex::new(Heartbeat {
            loop_counter: 0,
            changed_at: Instant::now(),
        }));
        let shutdown = Arc::new(AtomicBool::new(false));

        let monitor = {
            let coordinator = Arc::clone(&coordinator);
            let heartbeat = Arc::clone(&heartbeat);
            let shutdown = Arc::clone(&shutdown);
            let stale_after = Duration::from_millis(config.heartbeat_interval_ms);
            thread::Builder::new()
                .name("worker-monitor".into())
                .spawn(move || monitor_loop(&*coordinator, &heartbeat, &shutdown, stale_after))?
        };

        Ok(Self {
            child,
            coordinator,
            heartbeat,
            shutdown,
            monitor: Some(monitor),
        })
    }

    pub fn coordinator(&self) -> &Arc<RemoteCoordinator> {
        &self.coordinator
    }

    pub fn worker_id(&self) -> u32 {
        self.child.id()
    }

    /// Time since the worker's loop counter last advanced.
    pub fn heartbeat_age(&self) -> Duration {
        self.heartbeat.lock().changed_at.elapsed()
    }

    /// Stop the worker and reap it.
    pub fn shutdown(&mut self) -> Result<ExitStatus> {
        self.shutdown.store(true, Ordering::Release);
        if self.coordinator.is_running() {
            if let Err(e) = self.coordinator.stop() {
                debug!("Worker did not take STOP: {e}");
            }
        }
        if let Some(handle) = self.monitor.take() {
            let _ = handle.join();
        }
        if self.child.try_wait()?.is_none() {
            // Already exited on its own is fine; kill only a live worker.
            if let Err(e) = self.child.kill() {
                debug!("Killing worker: {e}");
            }
        }
        let status = self.child.wait()?;
        info!("Worker exited: {status}");
        Ok(status)
    }
}

fn monitor_loop(
    coordinator: &RemoteCoordinator,
    heartbeat: &Mutex<Heartbeat>,
    shutdown: &AtomicBool,
    stale_after: Duration,
) {
    let mut reported = false;
    let poll = (stale_after / 4).max(Duration::from_millis(10));
    while !shutdown.load(Ordering::Acquire) {
        let counter = coordinator.get_sensors().map(|s| s.loop_counter);
        let age = {
            let mut hb = heartbeat.lock();
            if let Some(counter) = counter {
                if counter != hb.loop_counter {
                    hb.loop_counter = counter;
                    hb.changed_at = Instant::now();
                }
            }
            hb.changed_at.elapsed()
        };

        if coordinator.is_running() && age > stale_after {
            if !reported {
                warn!("Worker heartbeat stale for {} ms", age.as_millis());
                reported = true;
            }
        } else {
            reported = false;
        }
        thread::sleep(poll);
    }
    debug!("Worker monitor exited");
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        if self.monitor.is_some() {
            let _ = self.shutdown();
        }
    }
}
