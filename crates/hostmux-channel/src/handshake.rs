use hostmux_frame::{encode_control, ControlMessage, Init};
use serde_json::{Map, Value};

use crate::error::{ChannelError, Result};

/// What a valid `init` from the backend establishes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InitAccepted {
    /// Channel seed, when the backend assigned a non-empty one.
    pub seed: Option<String>,
    pub user: Option<Map<String, Value>>,
    pub system: Option<Map<String, Value>>,
}

/// The `init` control frame sent as soon as the socket opens.
pub fn init_request(version: u32) -> Result<String> {
    Ok(encode_control(&ControlMessage::Init(Init::request(version)))?)
}

/// Validate an `init` received from the backend.
pub fn accept_init(init: &Init, expected_version: u32) -> Result<InitAccepted> {
    match init.version {
        Some(version) if version == expected_version => {}
        Some(version) => {
            return Err(ChannelError::Protocol(format!(
                "unsupported protocol version {version} (expected {expected_version})"
            )))
        }
        None => {
            return Err(ChannelError::Protocol(
                "init message without version".to_string(),
            ))
        }
    }

    Ok(InitAccepted {
        seed: init.seed(),
        user: init.user.clone(),
        system: init.system.clone(),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn init(value: Value) -> Init {
        serde_json::from_value(value).expect("init should deserialize")
    }

    #[test]
    fn request_frame() {
        assert_eq!(
            init_request(0).unwrap(),
            "\n{\"command\":\"init\",\"version\":0}"
        );
    }

    #[test]
    fn accepts_seed_and_session() {
        let accepted = accept_init(
            &init(json!({
                "version": 0,
                "channel-seed": "X1",
                "user": { "user": "admin" }
            })),
            0,
        )
        .unwrap();

        assert_eq!(accepted.seed.as_deref(), Some("X1"));
        assert_eq!(accepted.user.unwrap()["user"], "admin");
        assert_eq!(accepted.system, None);
    }

    #[test]
    fn missing_seed_is_none() {
        let accepted = accept_init(&init(json!({ "version": 0 })), 0).unwrap();
        assert_eq!(accepted.seed, None);
    }

    #[test]
    fn rejects_other_versions() {
        let err = accept_init(&init(json!({ "version": 1 })), 0).unwrap_err();
        assert!(matches!(err, ChannelError::Protocol(ref msg) if msg.contains("version 1")));

        let err = accept_init(&init(json!({ "channel-seed": "X" })), 0).unwrap_err();
        assert!(matches!(err, ChannelError::Protocol(_)));
    }
}
