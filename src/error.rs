//! Unified error types for the ventilator control core.
//!
//! A single [`Error`] enum that every subsystem converts into, keeping the
//! caller-facing error handling uniform.  Propagation policy:
//!
//! - setting/query misuse is a caller-visible error ([`Error::InvalidSetting`]);
//! - physiological threshold breaches are **alarms**, never errors (see
//!   [`crate::alarm::AlarmRegistry`]);
//! - transport/protocol violations end the receiving loop
//!   ([`Error::Protocol`]);
//! - bad sensor samples are absorbed where they are read ([`SensorFault`]).

use core::fmt;

use crate::ipc::IpcCommand;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible operation in the crate funnels into this type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unknown setting name, or a setting whose values cannot be applied.
    #[error("invalid setting: {0}")]
    InvalidSetting(String),
    /// The message channel carried something the receiver cannot accept.
    #[error("protocol: {0}")]
    Protocol(#[from] ProtocolError),
    /// Configuration is invalid or could not be loaded.
    #[error("config: {0}")]
    Config(String),
    /// The worker process could not be spawned or wired up.
    #[error("worker: {0}")]
    Worker(String),
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Protocol errors
// ---------------------------------------------------------------------------

/// Message-channel violations.  Fatal to the loop that observes them.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// A length prefix announced a frame larger than the channel allows.
    #[error("frame of {0} bytes exceeds the maximum frame size")]
    FrameTooLarge(usize),
    /// A length prefix of zero.
    #[error("empty frame")]
    EmptyFrame,
    /// The payload did not decode into a message (includes unknown commands).
    #[error("decode failed: {0}")]
    Decode(postcard::Error),
    #[error("encode failed: {0}")]
    Encode(postcard::Error),
    /// The payload type does not match what the command carries.
    #[error("{command} does not carry {found}")]
    MismatchedArgs {
        command: IpcCommand,
        found: &'static str,
    },
    /// The command is well-formed but this endpoint never accepts it.
    #[error("{command} is not accepted by the {role}")]
    UnexpectedCommand {
        command: IpcCommand,
        role: &'static str,
    },
    /// The peer closed the channel.
    #[error("peer disconnected")]
    Disconnected,
}

// ---------------------------------------------------------------------------
// Sensor faults
// ---------------------------------------------------------------------------

/// Hardware channel a reading came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorChannel {
    Pressure,
    FlowIn,
    FlowOut,
    Oxygen,
    Temperature,
    Humidity,
}

impl fmt::Display for SensorChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pressure => write!(f, "pressure"),
            Self::FlowIn => write!(f, "flow_in"),
            Self::FlowOut => write!(f, "flow_out"),
            Self::Oxygen => write!(f, "oxygen"),
            Self::Temperature => write!(f, "temperature"),
            Self::Humidity => write!(f, "humidity"),
        }
    }
}

/// A bad sample.  Logged and absorbed where it is read; it never reaches the
/// PID state or a published snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorFault {
    /// NaN or infinite reading; the previous good value is held.
    NonFinite(SensorChannel),
    /// Reading outside the physically plausible range; clamped.
    OutOfRange(SensorChannel, f64),
}

impl fmt::Display for SensorFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonFinite(ch) => write!(f, "{ch}: non-finite reading"),
            Self::OutOfRange(ch, v) => write!(f, "{ch}: reading {v} out of range"),
        }
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
