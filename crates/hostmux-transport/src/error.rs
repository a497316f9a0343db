use std::time::Duration;

use tokio_tungstenite::tungstenite;

/// Errors that can occur in socket transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The page URL could not be parsed.
    #[error("invalid page url '{url}': {reason}")]
    InvalidUrl { url: String, reason: &'static str },

    /// The page URL does not use `http:` or `https:`.
    #[error("page url '{url}' must use http or https")]
    UnsupportedScheme { url: String },

    /// An extra request header is not a valid HTTP header.
    #[error("invalid request header '{name}'")]
    InvalidHeader { name: String },

    /// Failed to connect to the specified address.
    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        source: Box<tungstenite::Error>,
    },

    /// The connection attempt did not finish in time.
    #[error("connect to {url} timed out after {timeout:?}")]
    ConnectTimeout { url: String, timeout: Duration },

    /// An error occurred on an established WebSocket.
    #[error("websocket error: {0}")]
    WebSocket(Box<tungstenite::Error>),

    /// A binary message arrived that is not valid UTF-8 text.
    #[error("received binary message that is not valid UTF-8")]
    InvalidUtf8,

    /// The transport has been shut down.
    #[error("transport shut down")]
    Shutdown,
}

impl From<tungstenite::Error> for TransportError {
    fn from(err: tungstenite::Error) -> Self {
        TransportError::WebSocket(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
