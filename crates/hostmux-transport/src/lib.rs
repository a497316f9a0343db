//! Message-oriented socket abstraction.
//!
//! Provides a unified interface over the sockets a console session can run on:
//! - WebSocket connections to the backend agent (`ws://` / `wss://`)
//! - In-memory socket pairs for tests and embedding
//!
//! This is the lowest layer of hostmux. Everything else builds on top of
//! the [`Socket`] and [`Connector`] traits provided here.

pub mod error;
pub mod memory;
pub mod traits;
pub mod url;
pub mod websocket;

pub use error::{Result, TransportError};
pub use memory::{MemoryAcceptor, MemoryConnector, MemorySocket};
pub use traits::{Connector, Socket};
pub use url::{socket_url, SOCKET_PATH};
pub use websocket::{WebSocket, WebSocketConfig, WebSocketConnector, DEFAULT_SUBPROTOCOL};
