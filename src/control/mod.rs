//! Breath-cycle control: PID error tracking, phase timing, waveform
//! analysis, the per-iteration engine and the threaded controller around it.

pub mod controller;
pub mod engine;
pub mod phase;
pub mod pid;
pub mod waveform;

pub use controller::{ControlModule, Controller};
pub use engine::ControlEngine;
