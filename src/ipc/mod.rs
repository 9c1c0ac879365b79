//! Message protocol between a remote coordinator and a worker process.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  RemoteCoordinator                         worker::serve      │
//! │  ┌───────────┐   ┌───────┐   stdin    ┌───────┐  ┌─────────┐ │
//! │  │ send loop  │──▶│ codec │──────────▶│ codec │─▶│ receive │ │
//! │  └───────────┘   └───────┘            └───────┘  └─────────┘ │
//! │  ┌───────────┐   ┌───────┐   stdout   ┌───────┐  ┌─────────┐ │
//! │  │ recv loop  │◀──│ codec │◀──────────│ codec │◀─│  push   │ │
//! │  └───────────┘   └───────┘            └───────┘  └─────────┘ │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! There is no request id.  Replies are correlated by command and setting
//! name only, so the protocol converges rather than answering calls.
//!
//! | Command       | Args                                     | Direction        |
//! |---------------|------------------------------------------|------------------|
//! | `START`       | none                                     | remote → worker  |
//! | `STOP`        | none                                     | remote → worker  |
//! | `GET_SENSORS` | none / sensor snapshot                   | worker → remote  |
//! | `GET_CONTROL` | setting name (probe) / setting or none   | both             |
//! | `SET_CONTROL` | setting                                  | remote → worker  |
//! | `GET_ALARMS`  | none / alarm report                      | worker → remote  |

pub mod channel;
pub mod codec;

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::alarm::AlarmReport;
use crate::error::ProtocolError;
use crate::values::{ControlSetting, ControlSettingName, SensorSnapshot};

pub use channel::{MessageSink, MessageSource, StreamSink, StreamSource, memory_pair};

/// Command tag of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IpcCommand {
    Start,
    Stop,
    GetSensors,
    GetControl,
    SetControl,
    GetAlarms,
}

impl IpcCommand {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "START",
            Self::Stop => "STOP",
            Self::GetSensors => "GET_SENSORS",
            Self::GetControl => "GET_CONTROL",
            Self::SetControl => "SET_CONTROL",
            Self::GetAlarms => "GET_ALARMS",
        }
    }
}

impl fmt::Display for IpcCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IpcArgs {
    None,
    SettingName(ControlSettingName),
    Setting(ControlSetting),
    Sensors(SensorSnapshot),
    Alarms(AlarmReport),
}

impl IpcArgs {
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::None => "no payload",
            Self::SettingName(_) => "a setting name",
            Self::Setting(_) => "a setting",
            Self::Sensors(_) => "a sensor snapshot",
            Self::Alarms(_) => "an alarm report",
        }
    }
}

/// One message on the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpcMessage {
    pub command: IpcCommand,
    pub args: IpcArgs,
}

impl IpcMessage {
    pub fn start() -> Self {
        Self::bare(IpcCommand::Start)
    }

    pub fn stop() -> Self {
        Self::bare(IpcCommand::Stop)
    }

    /// Sensor push from the worker.
    pub fn sensors(snapshot: SensorSnapshot) -> Self {
        Self {
            command: IpcCommand::GetSensors,
            args: IpcArgs::Sensors(snapshot),
        }
    }

    /// Probe for the current value of `name`.
    pub fn get_control(name: ControlSettingName) -> Self {
        Self {
            command: IpcCommand::GetControl,
            args: IpcArgs::SettingName(name),
        }
    }

    /// Answer to a `GET_CONTROL` probe; `None` if the value is not known yet.
    pub fn control(setting: Option<ControlSetting>) -> Self {
        Self {
            command: IpcCommand::GetControl,
            args: setting.map_or(IpcArgs::None, IpcArgs::Setting),
        }
    }

    pub fn set_control(setting: ControlSetting) -> Self {
        Self {
            command: IpcCommand::SetControl,
            args: IpcArgs::Setting(setting),
        }
    }

    /// Alarm push from the worker.
    pub fn alarms(report: AlarmReport) -> Self {
        Self {
            command: IpcCommand::GetAlarms,
            args: IpcArgs::Alarms(report),
        }
    }

    fn bare(command: IpcCommand) -> Self {
        Self {
            command,
            args: IpcArgs::None,
        }
    }

    /// Check the payload is one the command can carry.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        let ok = match self.command {
            IpcCommand::Start | IpcCommand::Stop => matches!(self.args, IpcArgs::None),
            IpcCommand::GetSensors => matches!(self.args, IpcArgs::None | IpcArgs::Sensors(_)),
            IpcCommand::GetControl => matches!(
                self.args,
                IpcArgs::None | IpcArgs::SettingName(_) | IpcArgs::Setting(_)
            ),
            IpcCommand::SetControl => matches!(self.args, IpcArgs::Setting(_)),
            IpcCommand::GetAlarms => matches!(self.args, IpcArgs::None | IpcArgs::Alarms(_)),
        };
        if ok {
            Ok(())
        } else {
            Err(ProtocolError::MismatchedArgs {
                command: self.command,
                found: self.args.kind(),
            })
        }
    }
}
