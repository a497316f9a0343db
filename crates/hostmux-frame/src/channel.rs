//! Built-in channel ids.
//!
//! The empty id carries control messages. Every other id is assigned by the
//! transport when a channel opens and carries that channel's data.

/// Connection management (init, open, close, ping, logout).
pub const CONTROL: &str = "";

/// Returns true if the channel id designates the control channel.
pub fn is_control(channel: &str) -> bool {
    channel == CONTROL
}
