use std::future::Future;

use crate::error::Result;

/// A connected, message-oriented socket carrying text messages.
///
/// One message on the socket is one frame; implementations never split or
/// coalesce messages.
pub trait Socket: Send + 'static {
    /// Write one text message.
    fn send(&mut self, text: String) -> impl Future<Output = Result<()>> + Send;

    /// Read the next text message.
    ///
    /// Returns `None` once the peer has closed the socket. Must be cancel-safe:
    /// dropping the future before completion loses no message.
    fn recv(&mut self) -> impl Future<Output = Option<Result<String>>> + Send;

    /// Close the socket. Closing an already-closed socket succeeds.
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// Opens new sockets to a single endpoint.
pub trait Connector: Send + Sync + 'static {
    type Socket: Socket;

    /// Open a new connection.
    fn connect(&self) -> impl Future<Output = Result<Self::Socket>> + Send;

    /// Human-readable endpoint description for diagnostics.
    fn endpoint(&self) -> &str;
}
