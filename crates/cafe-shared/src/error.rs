use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Unexpected payload type: expected {expected:?}, got {actual:?}")]
    UnexpectedPayload {
        expected: crate::protocol::MessageType,
        actual: crate::protocol::MessageType,
    },

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Malformed node: {0}")]
    MalformedNode(String),

    #[error("Invalid content id: {0}")]
    InvalidContentId(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Truncated frame: need {needed} bytes, have {available}")]
    TruncatedFrame { needed: usize, available: usize },
}
