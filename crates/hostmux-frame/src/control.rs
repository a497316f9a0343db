use std::fmt;

use serde::de::Error as _;
use serde::ser::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{FrameError, Result};

/// CONTROL command: session handshake.
pub const COMMAND_INIT: &str = "init";
/// CONTROL command: open a channel.
pub const COMMAND_OPEN: &str = "open";
/// CONTROL command: close a channel, or every channel when no id is given.
pub const COMMAND_CLOSE: &str = "close";
/// CONTROL command: liveness probe from the backend.
pub const COMMAND_PING: &str = "ping";
/// CONTROL command: end the session or drop privileges.
pub const COMMAND_LOGOUT: &str = "logout";

/// The only protocol version this crate speaks.
pub const PROTOCOL_VERSION: u32 = 0;

/// Well-known close reasons.
pub mod reasons {
    /// Malformed or out-of-order control traffic.
    pub const PROTOCOL_ERROR: &str = "protocol-error";
    /// No frame received within the health-check window.
    pub const TIMEOUT: &str = "timeout";
    /// The socket went away.
    pub const DISCONNECTED: &str = "disconnected";
    /// The backend refused the session's credentials.
    pub const NOT_AUTHORIZED: &str = "not-authorized";
}

/// `init` message, sent by both sides once per connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Init {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    /// Suffix the backend wants appended to every channel id.
    #[serde(rename = "channel-seed", skip_serializing_if = "Option::is_none")]
    pub channel_seed: Option<Value>,
    /// Logged-in user details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<Map<String, Value>>,
    /// Host system details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Init {
    /// The handshake request sent right after the socket opens.
    pub fn request(version: u32) -> Self {
        Self {
            version: Some(version),
            ..Self::default()
        }
    }

    /// Channel seed as text. Empty, `null` and `false` seeds count as absent.
    pub fn seed(&self) -> Option<String> {
        match self.channel_seed.as_ref()? {
            Value::Null | Value::Bool(false) => None,
            Value::String(seed) if seed.is_empty() => None,
            Value::String(seed) => Some(seed.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// `open` message: asks the backend to create a channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Open {
    pub channel: String,
    /// Machine the channel should reach; the backend's own host when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Channel-type specific options (`payload`, `spawn`, ...).
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

/// `close` message, in either direction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawClose")]
pub struct Close {
    /// Target channel. `None` addresses every channel.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Further details such as `exit-status`, `exit-signal` or `problem`.
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

/// Wire shape of [`Close`]. Only a string `reason` is lifted out; any other
/// value stays in `details` as received.
#[derive(Deserialize)]
struct RawClose {
    #[serde(default)]
    channel: Option<String>,
    #[serde(flatten)]
    details: Map<String, Value>,
}

impl From<RawClose> for Close {
    fn from(raw: RawClose) -> Self {
        let mut details = raw.details;
        let reason = match details.remove("reason") {
            Some(Value::String(reason)) => Some(reason),
            Some(Value::Null) | None => None,
            Some(other) => {
                details.insert("reason".to_string(), other);
                None
            }
        };
        Self {
            channel: raw.channel,
            reason,
            details,
        }
    }
}

impl Close {
    /// A close carrying only a reason.
    pub fn with_reason(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Close reason, or `""` when none was given.
    pub fn reason_str(&self) -> &str {
        self.reason.as_deref().unwrap_or_default()
    }

    /// Process exit status reported by the backend, if any.
    pub fn exit_status(&self) -> Option<i64> {
        self.details.get("exit-status").and_then(Value::as_i64)
    }

    /// Signal that terminated the backend process, if any.
    pub fn exit_signal(&self) -> Option<&str> {
        self.details.get("exit-signal").and_then(Value::as_str)
    }
}

impl From<&str> for Close {
    fn from(reason: &str) -> Self {
        Self::with_reason(reason)
    }
}

impl From<String> for Close {
    fn from(reason: String) -> Self {
        Self::with_reason(reason)
    }
}

impl fmt::Display for Close {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.reason, self.exit_status(), self.exit_signal()) {
            (Some(reason), _, _) if !reason.is_empty() => f.write_str(reason),
            (_, _, Some(signal)) => write!(f, "killed by signal {signal}"),
            (_, Some(status), _) => write!(f, "exited with status {status}"),
            _ => f.write_str("closed"),
        }
    }
}

/// `logout` message: ends the session, or only drops privileges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Logout {
    #[serde(default)]
    pub disconnect: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A CONTROL channel message, tagged by its `command` field.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    Init(Init),
    Open(Open),
    Close(Close),
    Ping(Map<String, Value>),
    Logout(Logout),
    /// A command this crate does not know. Kept verbatim.
    Other {
        command: String,
        fields: Map<String, Value>,
    },
}

impl ControlMessage {
    /// The `command` tag.
    pub fn command(&self) -> &str {
        match self {
            ControlMessage::Init(_) => COMMAND_INIT,
            ControlMessage::Open(_) => COMMAND_OPEN,
            ControlMessage::Close(_) => COMMAND_CLOSE,
            ControlMessage::Ping(_) => COMMAND_PING,
            ControlMessage::Logout(_) => COMMAND_LOGOUT,
            ControlMessage::Other { command, .. } => command,
        }
    }

    /// Target channel id. `None` for connection-wide messages.
    pub fn channel(&self) -> Option<&str> {
        match self {
            ControlMessage::Open(open) => Some(&open.channel),
            ControlMessage::Close(close) => close.channel.as_deref(),
            ControlMessage::Init(Init { extra: fields, .. })
            | ControlMessage::Logout(Logout { extra: fields, .. })
            | ControlMessage::Ping(fields)
            | ControlMessage::Other { fields, .. } => {
                fields.get("channel").and_then(Value::as_str)
            }
        }
    }

    /// Parse a control message from a JSON value.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut fields) = value else {
            return Err(FrameError::NotAnObject);
        };
        let command = match fields.remove("command") {
            Some(Value::String(command)) => command,
            _ => return Err(FrameError::MissingCommand),
        };

        let message = match command.as_str() {
            COMMAND_INIT => ControlMessage::Init(serde_json::from_value(Value::Object(fields))?),
            COMMAND_OPEN => ControlMessage::Open(serde_json::from_value(Value::Object(fields))?),
            COMMAND_CLOSE => ControlMessage::Close(serde_json::from_value(Value::Object(fields))?),
            COMMAND_LOGOUT => {
                ControlMessage::Logout(serde_json::from_value(Value::Object(fields))?)
            }
            COMMAND_PING => ControlMessage::Ping(fields),
            _ => ControlMessage::Other {
                command: command.clone(),
                fields,
            },
        };
        Ok(message)
    }

    /// Render as a JSON object with `command` as the first key.
    pub fn to_value(&self) -> Result<Value> {
        let body = match self {
            ControlMessage::Init(init) => serde_json::to_value(init)?,
            ControlMessage::Open(open) => serde_json::to_value(open)?,
            ControlMessage::Close(close) => serde_json::to_value(close)?,
            ControlMessage::Logout(logout) => serde_json::to_value(logout)?,
            ControlMessage::Ping(fields) | ControlMessage::Other { fields, .. } => {
                Value::Object(fields.clone())
            }
        };

        let mut out = Map::new();
        out.insert("command".to_string(), Value::String(self.command().to_string()));
        if let Value::Object(fields) = body {
            for (key, value) in fields {
                if key != "command" {
                    out.insert(key, value);
                }
            }
        }
        Ok(Value::Object(out))
    }
}

impl From<Close> for ControlMessage {
    fn from(close: Close) -> Self {
        ControlMessage::Close(close)
    }
}

impl Serialize for ControlMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_value()
            .map_err(S::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ControlMessage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        ControlMessage::from_value(value).map_err(D::Error::custom)
    }
}
