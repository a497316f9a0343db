use tokio::sync::mpsc;

use crate::error::{Result, TransportError};
use crate::traits::{Connector, Socket};

/// One end of an in-process socket pair.
///
/// Messages written on one end are read, in order, on the other. Closing (or
/// dropping) one end makes `recv` on the other end return `None`.
#[derive(Debug)]
pub struct MemorySocket {
    tx: Option<mpsc::UnboundedSender<String>>,
    rx: mpsc::UnboundedReceiver<String>,
}

impl MemorySocket {
    /// Create a connected pair of sockets.
    pub fn pair() -> (Self, Self) {
        let (left_tx, right_rx) = mpsc::unbounded_channel();
        let (right_tx, left_rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: Some(left_tx),
                rx: left_rx,
            },
            Self {
                tx: Some(right_tx),
                rx: right_rx,
            },
        )
    }

    /// Whether this end can still write.
    pub fn is_open(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}

impl Socket for MemorySocket {
    async fn send(&mut self, text: String) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(TransportError::Shutdown)?;
        tx.send(text).map_err(|_| TransportError::Shutdown)
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<()> {
        self.tx = None;
        Ok(())
    }
}

/// Connector whose every `connect()` produces a fresh [`MemorySocket`] pair.
///
/// The far end of each pair is handed to the matching [`MemoryAcceptor`],
/// which plays the role of the backend.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    accepted: mpsc::UnboundedSender<MemorySocket>,
}

/// Receives the backend ends of sockets opened through a [`MemoryConnector`].
#[derive(Debug)]
pub struct MemoryAcceptor {
    incoming: mpsc::UnboundedReceiver<MemorySocket>,
}

impl MemoryConnector {
    pub fn new() -> (Self, MemoryAcceptor) {
        let (accepted, incoming) = mpsc::unbounded_channel();
        (Self { accepted }, MemoryAcceptor { incoming })
    }
}

impl Connector for MemoryConnector {
    type Socket = MemorySocket;

    async fn connect(&self) -> Result<MemorySocket> {
        let (local, remote) = MemorySocket::pair();
        self.accepted
            .send(remote)
            .map_err(|_| TransportError::Shutdown)?;
        Ok(local)
    }

    fn endpoint(&self) -> &str {
        "memory"
    }
}

impl MemoryAcceptor {
    /// Wait for the next connection. Returns `None` once every connector is gone.
    pub async fn accept(&mut self) -> Option<MemorySocket> {
        self.incoming.recv().await
    }
}
