//! ventcore — command-line entry point.
//!
//! ```text
//!  ventcore run ──┬── --single-process ──▶ LocalCoordinator ──▶ Controller
//!                 │
//!                 └── (default) ──▶ ProcessSupervisor ──▶ RemoteCoordinator
//!                                          │ stdin/stdout
//!                                          ▼
//!                                   ventcore worker ──▶ LocalCoordinator ──▶ Controller
//! ```
//!
//! Logs go to stderr.  In a worker, stdout carries the framed message channel
//! and nothing else.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use tracing_subscriber::EnvFilter;

use ventcore::config::SystemConfig;
use ventcore::control::engine::default_band;
use ventcore::coordinator::{Coordinator, LocalCoordinator};
use ventcore::supervisor::{ProcessSupervisor, WorkerCommand};
use ventcore::values::{ControlSetting, ControlSettingName};
use ventcore::worker;

#[derive(Parser)]
#[command(name = "ventcore", version, about = "Ventilator control core")]
struct Cli {
    #[command(subcommand)]
    command: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Drive a simulated controller and log summaries once a second.
    Run(RunArgs),
    /// Host a simulated controller on stdin/stdout (spawned by `run`).
    Worker {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Run the controller in this process instead of a worker.
    #[arg(long)]
    single_process: bool,
    #[arg(long)]
    config: Option<PathBuf>,
    /// Stop after this many seconds (runs until killed when absent).
    #[arg(long)]
    seconds: Option<u64>,
    /// Peak inspiratory pressure target (cmH2O).
    #[arg(long)]
    pip: Option<f64>,
    /// PEEP target (cmH2O).
    #[arg(long)]
    peep: Option<f64>,
    /// Breaths per minute.
    #[arg(long)]
    bpm: Option<f64>,
}

impl RunArgs {
    fn overrides(&self) -> Vec<ControlSetting> {
        [
            (ControlSettingName::Pip, self.pip),
            (ControlSettingName::Peep, self.peep),
            (ControlSettingName::BreathsPerMinute, self.bpm),
        ]
        .into_iter()
        .filter_map(|(name, value)| {
            let value = value?;
            let (min, max) = default_band(name, value);
            Some(ControlSetting::new(name, value, min, max))
        })
        .collect()
    }
}

fn load_config(path: Option<&Path>) -> Result<SystemConfig> {
    match path {
        Some(path) => SystemConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display())),
        None => Ok(SystemConfig::default()),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Mode::Worker { config } => {
            let config = load_config(config.as_deref())?;
            worker::run_stdio(&config)?;
        }
        Mode::Run(args) => run(&args)?,
    }
    Ok(())
}

fn run(args: &RunArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let duration = args.seconds.map(Duration::from_secs);

    if args.single_process {
        info!("Running controller in-process");
        let coordinator = LocalCoordinator::simulated(&config)?;
        drive(&coordinator, &args.overrides(), duration)
    } else {
        let mut command = WorkerCommand::current_exe()?;
        if let Some(path) = &args.config {
            command = command.with_config(path);
        }
        let mut supervisor = ProcessSupervisor::spawn(&command, &config.coordinator)?;
        info!("Running controller in worker {}", supervisor.worker_id());
        let outcome = drive(&**supervisor.coordinator(), &args.overrides(), duration);
        supervisor.shutdown()?;
        outcome
    }
}

/// Start the coordinator, stage overrides and report until `duration` ends.
fn drive(
    coordinator: &dyn Coordinator,
    overrides: &[ControlSetting],
    duration: Option<Duration>,
) -> Result<()> {
    coordinator.start()?;
    for setting in overrides {
        coordinator.set_control(*setting)?;
        info!("Requested {} = {}", setting.name(), setting.value());
    }

    let started = Instant::now();
    let mut last_report = Instant::now();
    while duration.is_none_or(|d| started.elapsed() < d) {
        thread::sleep(Duration::from_millis(100));
        if !coordinator.is_running() {
            bail!("controller stopped unexpectedly");
        }
        if last_report.elapsed() >= Duration::from_secs(1) {
            last_report = Instant::now();
            report(coordinator);
        }
    }

    coordinator.stop()?;
    report(coordinator);
    Ok(())
}

fn report(coordinator: &dyn Coordinator) {
    let fmt = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{v:.2}"));
    if let Some(s) = coordinator.get_sensors() {
        info!(
            "breaths={} pressure={} pip={} peep={} vte={} bpm={} fio2={}",
            s.breath_count,
            fmt(s.pressure),
            fmt(s.pip),
            fmt(s.peep),
            fmt(s.vte),
            fmt(s.breaths_per_minute),
            fmt(s.fio2),
        );
    }
    let active = coordinator.get_active_alarms();
    if !active.is_empty() {
        let names: Vec<&str> = active.keys().map(|n| n.as_str()).collect();
        warn!("Active alarms: {}", names.join(", "));
    }
}
