//! Errors raised while reading or writing session messages.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Inbound text was not a JSON command envelope
    #[error("invalid command: {0}")]
    Json(#[from] serde_json::Error),

    /// The `raw` field was not valid base64
    #[error("raw decode: {0}")]
    RawDecode(#[from] base64::DecodeError),

    /// A payload was present but cannot be turned into a command
    #[error("{0}")]
    InvalidPayload(String),
}
