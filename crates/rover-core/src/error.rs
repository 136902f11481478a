//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur while encoding chassis commands or decoding telemetry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Argument outside the range the chassis accepts
    #[error("Invalid {field}: {reason}")]
    InvalidArgument { field: &'static str, reason: String },

    /// Frame bytes do not sum to zero modulo 256
    #[error("Checksum mismatch: frame sums to {sum:#04x}")]
    Checksum { sum: u8 },

    /// Frame structure does not match the packet table
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),
}

impl DomainError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedFrame(reason.into())
    }
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
