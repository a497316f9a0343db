use std::fmt;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::{Connector, Socket};
use crate::url::socket_url;

/// WebSocket sub-protocol spoken by the backend agent.
pub const DEFAULT_SUBPROTOCOL: &str = "cockpit1";

/// Default upper bound for establishing the connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for WebSocket connections.
#[derive(Clone)]
pub struct WebSocketConfig {
    /// Full socket URL (`ws://host/socket`).
    pub url: String,
    /// Sub-protocol requested during the upgrade. `None` requests none.
    pub subprotocol: Option<String>,
    /// Extra request headers, forwarded untouched.
    /// Usually carries session credentials and should not be logged.
    pub headers: Vec<(String, String)>,
    /// Timeout for the TCP/TLS connect and upgrade.
    pub connect_timeout: Duration,
}

impl WebSocketConfig {
    /// Configuration for an explicit socket URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            subprotocol: Some(DEFAULT_SUBPROTOCOL.to_string()),
            headers: Vec::new(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Configuration derived from the URL of the page hosting the console.
    pub fn from_page_url(page_url: &str) -> Result<Self> {
        Ok(Self::new(socket_url(page_url)?))
    }

    /// Add an opaque request header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

impl fmt::Debug for WebSocketConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers: Vec<_> = self
            .headers
            .iter()
            .map(|(name, value)| format!("{name}: <redacted:{} bytes>", value.len()))
            .collect();
        f.debug_struct("WebSocketConfig")
            .field("url", &self.url)
            .field("subprotocol", &self.subprotocol)
            .field("headers", &headers)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// Connects to the backend over WebSocket.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    config: WebSocketConfig,
}

impl WebSocketConnector {
    pub fn new(config: WebSocketConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WebSocketConfig {
        &self.config
    }

    fn connect_error(&self, err: tungstenite::Error) -> TransportError {
        TransportError::Connect {
            url: self.config.url.clone(),
            source: Box::new(err),
        }
    }
}

impl Connector for WebSocketConnector {
    type Socket = WebSocket;

    async fn connect(&self) -> Result<WebSocket> {
        let mut request = self
            .config
            .url
            .as_str()
            .into_client_request()
            .map_err(|err| self.connect_error(err))?;

        if let Some(protocol) = &self.config.subprotocol {
            let value = HeaderValue::from_str(protocol).map_err(|_| {
                TransportError::InvalidHeader {
                    name: "Sec-WebSocket-Protocol".to_string(),
                }
            })?;
            request.headers_mut().insert("Sec-WebSocket-Protocol", value);
        }

        for (name, value) in &self.config.headers {
            let invalid = || TransportError::InvalidHeader { name: name.clone() };
            let header = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
            let value = HeaderValue::from_str(value).map_err(|_| invalid())?;
            request.headers_mut().insert(header, value);
        }

        debug!(url = %self.config.url, "connecting websocket");
        let (stream, response) =
            tokio::time::timeout(self.config.connect_timeout, connect_async(request))
                .await
                .map_err(|_| TransportError::ConnectTimeout {
                    url: self.config.url.clone(),
                    timeout: self.config.connect_timeout,
                })?
                .map_err(|err| self.connect_error(err))?;
        debug!(url = %self.config.url, status = %response.status(), "websocket connected");

        Ok(WebSocket { stream })
    }

    fn endpoint(&self) -> &str {
        &self.config.url
    }
}

/// An established WebSocket connection.
pub struct WebSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Socket for WebSocket {
    async fn send(&mut self, text: String) -> Result<()> {
        self.stream.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(data)) => {
                    return Some(String::from_utf8(data).map_err(|_| TransportError::InvalidUtf8))
                }
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "websocket closed by peer");
                    return None;
                }
                // Protocol-level ping/pong is answered by tungstenite.
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
                Err(tungstenite::Error::ConnectionClosed) => return None,
                Err(err) => return Some(Err(err.into())),
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self.stream.close(None).await {
            Ok(())
            | Err(tungstenite::Error::ConnectionClosed)
            | Err(tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

impl fmt::Debug for WebSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocket").finish_non_exhaustive()
    }
}
