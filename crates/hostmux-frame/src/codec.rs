use serde_json::Value;

use crate::channel::{is_control, CONTROL};
use crate::control::ControlMessage;
use crate::error::{FrameError, Result};

/// Separator between channel id and payload.
pub const SEPARATOR: char = '\n';

/// A decoded frame with channel routing.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A message on the control channel.
    Control(ControlMessage),
    /// An opaque payload for one channel.
    Data { channel: String, payload: String },
}

impl Frame {
    /// Create a data frame.
    pub fn data(channel: impl Into<String>, payload: impl Into<String>) -> Self {
        Frame::Data {
            channel: channel.into(),
            payload: payload.into(),
        }
    }

    /// The channel this frame belongs to (`""` for control frames).
    pub fn channel(&self) -> &str {
        match self {
            Frame::Control(_) => CONTROL,
            Frame::Data { channel, .. } => channel,
        }
    }

    /// Encode into the wire format.
    pub fn encode(&self) -> Result<String> {
        match self {
            Frame::Control(message) => encode_control(message),
            Frame::Data { channel, payload } => Ok(encode_frame(channel, payload)),
        }
    }
}

/// Encode a payload for a channel into the wire format.
///
/// Wire format:
/// ```text
/// <channel-id>\n<payload>
/// ```
pub fn encode_frame(channel: &str, payload: &str) -> String {
    let mut out = String::with_capacity(channel.len() + 1 + payload.len());
    out.push_str(channel);
    out.push(SEPARATOR);
    out.push_str(payload);
    out
}

/// Encode a control message as a control frame.
pub fn encode_control(message: &ControlMessage) -> Result<String> {
    let payload = serde_json::to_string(message)?;
    Ok(encode_frame(CONTROL, &payload))
}

/// Decode one frame.
///
/// Only the first newline separates; the payload may contain further ones.
pub fn decode_frame(raw: &str) -> Result<Frame> {
    let (channel, payload) = raw
        .split_once(SEPARATOR)
        .ok_or(FrameError::MissingSeparator)?;

    if is_control(channel) {
        let value: Value = serde_json::from_str(payload)?;
        return Ok(Frame::Control(ControlMessage::from_value(value)?));
    }

    Ok(Frame::data(channel, payload))
}
