//! Line-prefixed message framing with channel multiplexing.
//!
//! Every socket message is one frame:
//! - the channel id, terminated by the first `\n`
//! - the payload, everything after that newline
//!
//! The empty channel id is reserved for control frames, whose payload is a
//! JSON object tagged by its `command` field.

pub mod channel;
pub mod codec;
pub mod control;
pub mod error;

pub use channel::{is_control, CONTROL};
pub use codec::{decode_frame, encode_control, encode_frame, Frame};
pub use control::{
    reasons, Close, ControlMessage, Init, Logout, Open, COMMAND_CLOSE, COMMAND_INIT,
    COMMAND_LOGOUT, COMMAND_OPEN, COMMAND_PING, PROTOCOL_VERSION,
};
pub use error::{FrameError, Result};
