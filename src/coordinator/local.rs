//! Coordinator for a controller in the same process.
//!
//! A sync thread runs every `sync_interval_ms` while the coordinator is
//! running: it copies sensors and alarms out of the controller and pushes
//! each disagreeing tentative setting with `set_control` followed by a fresh
//! `get_control`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};

use crate::alarm::AlarmReport;
use crate::config::{CoordinatorConfig, SystemConfig};
use crate::control::{ControlModule, Controller};
use crate::error::Result;
use crate::hal::BalloonSimulator;
use crate::values::ControlSettingName;

use super::{Coordinator, CoordinatorCache};

pub struct LocalCoordinator<C: ControlModule + 'static> {
    controller: Arc<C>,
    cache: Arc<CoordinatorCache>,
    shutdown: Arc<AtomicBool>,
    sync_thread: Option<JoinHandle<()>>,
}

impl LocalCoordinator<Controller<BalloonSimulator>> {
    /// Local coordinator over a controller driving the simulated balloon.
    pub fn simulated(config: &SystemConfig) -> Result<Self> {
        Self::new(
            Controller::simulated(config.controller.clone()),
            &config.coordinator,
        )
    }
}

impl<C: ControlModule + 'static> LocalCoordinator<C> {
    pub fn new(controller: C, config: &CoordinatorConfig) -> Result<Self> {
        let controller = Arc::new(controller);
        let cache = Arc::new(CoordinatorCache::new());
        let shutdown = Arc::new(AtomicBool::new(false));
        let interval = Duration::from_millis(config.sync_interval_ms);

        let sync_thread = {
            let controller = Arc::clone(&controller);
            let cache = Arc::clone(&cache);
            let shutdown = Arc::clone(&shutdown);
            thread::Builder::new()
                .name("coordinator-sync".into())
                .spawn(move || {
                    while !shutdown.load(Ordering::Acquire) {
                        if cache.is_running() {
                            sync_once(&*controller, &cache);
                        }
                        thread::sleep(interval);
                    }
                    debug!("Coordinator sync thread exited");
                })?
        };

        Ok(Self {
            controller,
            cache,
            shutdown,
            sync_thread: Some(sync_thread),
        })
    }

    pub fn controller(&self) -> &C {
        &self.controller
    }
}

/// One pass of the sync loop.
pub fn sync_once<C: ControlModule + ?Sized>(controller: &C, cache: &CoordinatorCache) {
    cache.record_sensors(controller.get_sensors());
    cache.record_alarms(AlarmReport {
        active: controller.get_active_alarms(),
        logged: controller.get_logged_alarms(),
    });

    for name in ControlSettingName::ALL {
        if cache.confirmed(name).is_none() {
            match controller.get_control(name) {
                Ok(setting) => cache.confirm(setting),
                Err(e) => {
                    warn!("Cannot read {name} from controller: {e}");
                    continue;
                }
            }
        }
        if let Some(tentative) = cache.pending_change(name) {
            if let Err(e) = controller.set_control(tentative) {
                warn!("Controller refused {name}: {e}");
                cache.discard_tentative(name);
            }
            match controller.get_control(name) {
                Ok(setting) => cache.confirm(setting),
                Err(e) => warn!("Cannot read {name} from controller: {e}"),
            }
        }
    }
}

impl<C: ControlModule + 'static> Coordinator for LocalCoordinator<C> {
    fn cache(&self) -> &CoordinatorCache {
        &self.cache
    }

    fn start(&self) -> Result<()> {
        self.controller.start();
        self.cache.set_running(true);
        info!("Local coordinator started");
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.cache.set_running(false);
        self.controller.stop();
        info!("Local coordinator stopped");
        Ok(())
    }

    /// Both the coordinator and the control loop must be running.
    fn is_running(&self) -> bool {
        self.cache.is_running() && self.controller.is_running()
    }
}

impl<C: ControlModule + 'static> Drop for LocalCoordinator<C> {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        self.controller.stop();
        if let Some(handle) = self.sync_thread.take() {
            let _ = handle.join();
        }
    }
}
