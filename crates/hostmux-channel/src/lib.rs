//! Transport and channel multiplexing for a console session.
//!
//! One [`Transport`] owns the socket to the backend agent, performs the
//! `init` handshake and routes incoming frames by channel id. [`Channel`]s
//! are the logical streams page code works with. A [`TransportManager`]
//! holds the live transport and reconnects on demand.

pub mod channel;
pub mod config;
pub mod error;
pub mod handshake;
pub mod manager;
pub mod page;
pub mod session;
pub mod transport;

pub use channel::{Channel, ChannelEvent, ChannelOptions};
pub use config::{TransportConfig, DEFAULT_HEALTH_INTERVAL};
pub use error::{ChannelError, Result};
pub use handshake::{accept_init, init_request, InitAccepted};
pub use manager::TransportManager;
pub use page::{HostResolver, PageLocation, PageParams, PageSignals};
pub use session::SessionInfo;
pub use transport::{ChannelHandler, Phase, Transport};
