//! Multiplexed channels to a host administration backend.
//!
//! A console page talks to its privileged backend agent over a single
//! WebSocket. hostmux multiplexes any number of logical channels over that
//! socket, performs the `init` handshake and keeps the connection healthy.
//!
//! # Crate Structure
//!
//! - [`transport`]: Socket abstraction (WebSocket, in-memory pairs)
//! - [`frame`]: `<channel>\n<payload>` framing and control messages
//! - [`channel`]: Transport, channels and the transport manager

/// Re-export transport types.
pub mod transport {
    pub use hostmux_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use hostmux_frame::*;
}

/// Re-export channel types.
pub mod channel {
    pub use hostmux_channel::*;
}
