use url::Url;

use crate::error::{Result, TransportError};

/// Path of the backend's multiplexed socket endpoint.
pub const SOCKET_PATH: &str = "/socket";

/// Derive the backend socket URL from the URL of the page hosting the console.
///
/// `http:` pages connect to `ws://<host>/socket`, `https:` pages to
/// `wss://<host>/socket`. Any other scheme (`file:`, `about:`, ...) is a
/// configuration error.
pub fn socket_url(page_url: &str) -> Result<String> {
    let page = Url::parse(page_url).map_err(|_| TransportError::InvalidUrl {
        url: page_url.to_string(),
        reason: "not an absolute url",
    })?;

    let scheme = match page.scheme() {
        "http" => "ws",
        "https" => "wss",
        _ => {
            return Err(TransportError::UnsupportedScheme {
                url: page_url.to_string(),
            })
        }
    };

    let host = page.host_str().ok_or_else(|| TransportError::InvalidUrl {
        url: page_url.to_string(),
        reason: "missing host",
    })?;

    Ok(match page.port() {
        Some(port) => format!("{scheme}://{host}:{port}{SOCKET_PATH}"),
        None => format!("{scheme}://{host}{SOCKET_PATH}"),
    })
}
