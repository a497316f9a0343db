use std::fmt;
use std::io;

use hostmux_channel::ChannelError;
use hostmux_frame::{reasons, Close, FrameError};
use hostmux_transport::TransportError;

// Exit code constants aligned with rsfulmen/DDR-0002 semantics.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::InvalidData => DATA_INVALID,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    let code = match &err {
        TransportError::InvalidUrl { .. }
        | TransportError::UnsupportedScheme { .. }
        | TransportError::InvalidHeader { .. } => USAGE,
        TransportError::ConnectTimeout { .. } => TIMEOUT,
        TransportError::InvalidUtf8 => DATA_INVALID,
        TransportError::Connect { .. } | TransportError::WebSocket(_) | TransportError::Shutdown => {
            TRANSPORT_ERROR
        }
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    CliError::new(DATA_INVALID, format!("{context}: {err}"))
}

/// Exit code for a channel or transport close.
///
/// Well-known reasons map onto the shared codes; a reason-less close
/// carries the backend process's exit status, if any.
pub fn close_code(close: &Close) -> i32 {
    match close.reason_str() {
        "" => match (close.exit_status(), close.exit_signal()) {
            (_, Some(_)) => FAILURE,
            (Some(status), None) => i32::try_from(status).unwrap_or(FAILURE),
            (None, None) => SUCCESS,
        },
        reasons::TIMEOUT => TIMEOUT,
        reasons::NOT_AUTHORIZED => PERMISSION_DENIED,
        reasons::PROTOCOL_ERROR => DATA_INVALID,
        reasons::DISCONNECTED => TRANSPORT_ERROR,
        _ => FAILURE,
    }
}

pub fn close_error(context: &str, close: &Close) -> CliError {
    CliError::new(close_code(close), format!("{context}: {close}"))
}

pub fn channel_error(context: &str, err: ChannelError) -> CliError {
    match err {
        ChannelError::Transport(err) => transport_error(context, err),
        ChannelError::Frame(err) => frame_error(context, err),
        ChannelError::Protocol(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        ChannelError::Closed(close) => close_error(context, &close),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn close(value: serde_json::Value) -> Close {
        serde_json::from_value(value).expect("close should deserialize")
    }

    #[test]
    fn well_known_reasons() {
        assert_eq!(close_code(&Close::from("timeout")), TIMEOUT);
        assert_eq!(close_code(&Close::from("not-authorized")), PERMISSION_DENIED);
        assert_eq!(close_code(&Close::from("protocol-error")), DATA_INVALID);
        assert_eq!(close_code(&Close::from("disconnected")), TRANSPORT_ERROR);
        assert_eq!(close_code(&Close::from("not-found")), FAILURE);
    }

    #[test]
    fn exit_status_passes_through() {
        assert_eq!(close_code(&Close::default()), SUCCESS);
        assert_eq!(close_code(&close(json!({ "exit-status": 7 }))), 7);
        assert_eq!(close_code(&close(json!({ "exit-signal": "KILL" }))), FAILURE);
        assert_eq!(close_code(&close(json!({ "exit-status": 1_i64 << 40 }))), FAILURE);
    }

    #[test]
    fn transport_errors() {
        let err = transport_error(
            "connect failed",
            TransportError::UnsupportedScheme {
                url: "file:///x".to_string(),
            },
        );
        assert_eq!(err.code, USAGE);
        assert!(err.message.starts_with("connect failed: "));

        let err = channel_error(
            "handshake failed",
            ChannelError::Closed(Close::from("not-authorized")),
        );
        assert_eq!(err.code, PERMISSION_DENIED);
        assert_eq!(err.message, "handshake failed: not-authorized");
    }
}
