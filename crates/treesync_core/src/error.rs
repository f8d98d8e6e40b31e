//! Error types for the sync engine.

use thiserror::Error;
use treesync_codec::CodecError;

/// Result type for engine operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors surfaced by the engine's public entry points.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A durable record failed to encode or decode.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The persistence layer failed.
    #[error("persistence error: {message}")]
    Persistence {
        /// Description of the failure.
        message: String,
    },

    /// A write id was not found where one was required.
    #[error("unknown write id: {write_id}")]
    UnknownWrite {
        /// The id that was not found.
        write_id: i64,
    },

    /// A value containing NaN reached a public entry point.
    #[error("NaN values cannot be written")]
    NaNValue,
}

impl CoreError {
    /// Create a persistence error.
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }
}

/// Reasons a listener can be cancelled, delivered through cancel events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenError {
    /// The server rejected the listen for permission reasons.
    PermissionDenied,
    /// The listen was cancelled because the client is shutting down.
    Cancelled,
    /// The server reported an unspecified failure for this query.
    Unavailable,
}

impl std::fmt::Display for ListenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PermissionDenied => write!(f, "permission denied"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = CoreError::persistence("disk full");
        assert_eq!(err.to_string(), "persistence error: disk full");
        let err = CoreError::UnknownWrite { write_id: 4 };
        assert_eq!(err.to_string(), "unknown write id: 4");
    }

    #[test]
    fn codec_errors_convert() {
        let codec = CodecError::decoding_failed("bad byte");
        let err: CoreError = codec.into();
        assert!(matches!(err, CoreError::Codec(_)));
    }
}
