/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame has no newline separating channel id and payload.
    #[error("frame has no channel separator")]
    MissingSeparator,

    /// A control payload is not a JSON object.
    #[error("control payload is not a JSON object")]
    NotAnObject,

    /// A control payload has no string `command` field.
    #[error("control message has no command")]
    MissingCommand,

    /// A control payload could not be parsed or serialized.
    #[error("invalid control message: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FrameError>;
