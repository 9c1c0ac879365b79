//! Ventilator control core library.
//!
//! Breath-cycle controller, alarm registry, snapshot double buffer and the
//! coordinators that expose them in-process or across a worker process.
//! The `ventcore` binary is a thin CLI over these modules.

#![deny(unused_must_use)]

pub mod alarm;
pub mod config;
pub mod control;
pub mod coordinator;
pub mod error;
pub mod hal;
pub mod ipc;
pub mod snapshot;
pub mod supervisor;
pub mod time;
pub mod values;
pub mod worker;

pub use error::{Error, Result};
