//! Serial command channel.
//!
//! Frames a newline-delimited JSON protocol over a byte-stream serial link.
//! Each channel owns one connection and runs its own read/write loop; callers
//! enqueue [`Command`]s without blocking and observe [`ChannelEvent`]s on a
//! stream.
//!
//! # Wire format
//!
//! Outbound: `{"cmd": "<NAME>", "params": {...}}\n`
//!
//! Inbound: any JSON object followed by `\n`, forwarded verbatim as a
//! [`Response`].

pub mod codec;
pub mod serial;

pub use codec::{Inbound, JsonLineCodec};
pub use serial::{ChannelConfig, SerialChannel};

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Default baud rate for microcontroller links.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Time to wait after opening a port before the link is treated as ready.
///
/// Many bootloaders reset when the port opens and drop bytes sent during
/// boot.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Longest inbound line accepted before it is discarded as malformed.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;

/// Parameters attached to a [`Command`].
pub type Params = Map<String, Value>;

/// A structured record received from the device.
///
/// Opaque to the orchestrator apart from logging and propagation.
pub type Response = Map<String, Value>;

/// A named command sent to the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Command name, e.g. `SET_GROUP`.
    pub cmd: String,
    /// Command parameters; serialized as `{}` when empty.
    #[serde(default)]
    pub params: Params,
}

impl Command {
    /// Asks the device to report its identity and platform.
    pub const IDENTIFY: &'static str = "IDENTIFY";
    /// Drives one actuator group at an intensity.
    pub const SET_GROUP: &'static str = "SET_GROUP";
    /// Immediate safe-state request.
    pub const DISARM: &'static str = "DISARM";
    /// Deactivates every group.
    pub const ALL_OFF: &'static str = "ALL_OFF";

    /// Creates a command with no parameters.
    #[must_use]
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            params: Params::new(),
        }
    }

    /// Creates a command with the given parameters.
    #[must_use]
    pub fn with_params(cmd: impl Into<String>, params: Params) -> Self {
        Self {
            cmd: cmd.into(),
            params,
        }
    }

    /// Builds `SET_GROUP {group, intensity}`.
    #[must_use]
    pub fn set_group(group: u8, intensity: u8) -> Self {
        let mut params = Params::new();
        params.insert("group".to_owned(), Value::from(group));
        params.insert("intensity".to_owned(), Value::from(intensity));
        Self::with_params(Self::SET_GROUP, params)
    }

    /// Returns this command as a JSON value, for logging.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.params.is_empty() {
            write!(f, "{}", self.cmd)
        } else {
            write!(f, "{} {}", self.cmd, Value::Object(self.params.clone()))
        }
    }
}

/// Events produced by a running channel.
///
/// The stream ends after `LinkError` or `Disconnected`, or when the channel
/// is closed.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// A well-formed JSON object arrived.
    Received(Response),
    /// An inbound line was not valid UTF-8, not valid JSON, not an object,
    /// or too long. The channel stays open.
    DecodeError(String),
    /// The underlying link failed. The channel has stopped.
    LinkError(String),
    /// The device side closed the link. The channel has stopped.
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_without_params_serializes_empty_object() {
        let json = serde_json::to_string(&Command::new(Command::IDENTIFY)).unwrap();
        assert_eq!(json, r#"{"cmd":"IDENTIFY","params":{}}"#);
    }

    #[test]
    fn set_group_carries_group_and_intensity() {
        let cmd = Command::set_group(4, 255);
        assert_eq!(cmd.cmd, "SET_GROUP");
        assert_eq!(cmd.params["group"], 4);
        assert_eq!(cmd.params["intensity"], 255);
    }

    #[test]
    fn command_params_default_when_missing() {
        let cmd: Command = serde_json::from_str(r#"{"cmd":"ALL_OFF"}"#).unwrap();
        assert_eq!(cmd, Command::new(Command::ALL_OFF));
    }

    #[test]
    fn command_display() {
        assert_eq!(Command::new(Command::DISARM).to_string(), "DISARM");
        assert_eq!(
            Command::set_group(1, 2).to_string(),
            r#"SET_GROUP {"group":1,"intensity":2}"#
        );
    }
}
