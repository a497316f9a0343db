use hostmux_frame::Close;

/// Errors that can occur in transport and channel operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Socket-level error.
    #[error("transport error: {0}")]
    Transport(#[from] hostmux_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] hostmux_frame::FrameError),

    /// The backend violated the protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The transport or channel closed before the operation completed.
    #[error("closed: {0}")]
    Closed(Close),
}

impl ChannelError {
    /// The close that ended the operation, if this error carries one.
    pub fn close(&self) -> Option<&Close> {
        match self {
            ChannelError::Closed(close) => Some(close),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ChannelError>;
