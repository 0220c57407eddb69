//! HTTP response errors.

use crate::common::ErrorSeverity;

/// Malformed, unexpected or oversize HTTP responses.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The status line or headers could not be parsed
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The server answered with a status the client cannot use
    #[error("unexpected HTTP status {0}")]
    UnexpectedStatus(u16),

    /// A required header is absent
    #[error("missing {0} header")]
    MissingHeader(&'static str),

    /// A redirect carried no usable Location
    #[error("redirect without a usable Location header")]
    MissingLocation,

    /// Response head did not fit in the header buffer
    #[error("response headers exceed {limit} bytes")]
    HeaderTooLarge {
        /// Header buffer size
        limit: usize,
    },

    /// The server delivered a different amount than announced
    #[error("expected {expected} bytes, got {actual}")]
    UnexpectedSize {
        /// Announced size
        expected: u64,
        /// Delivered size
        actual: u64,
    },

    /// An in-memory body exceeded its allowance
    #[error("body of {size} bytes exceeds limit of {limit}")]
    BodyTooLarge {
        /// Announced or received size
        size: u64,
        /// Allowed size
        limit: usize,
    },

    /// The server announced an image with no bytes
    #[error("server announced an empty image")]
    EmptyImage,

    /// The announced image does not fit in the staging slot
    #[error("image of {size} bytes does not fit in slot of {max} bytes")]
    ImageTooLarge {
        /// Announced image size
        size: u64,
        /// Slot capacity
        max: u64,
    },
}

impl ProtocolError {
    /// Create a malformed response error.
    pub fn malformed(msg: impl Into<String>) -> Self {
        ProtocolError::MalformedResponse(msg.into())
    }

    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        if self.is_transient() {
            ErrorSeverity::Warning
        } else {
            ErrorSeverity::Error
        }
    }

    /// Server-side and truncation failures are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            ProtocolError::UnexpectedStatus(status) => (500..600).contains(status),
            ProtocolError::MalformedResponse(_) | ProtocolError::UnexpectedSize { .. } => true,
            ProtocolError::MissingHeader(_)
            | ProtocolError::MissingLocation
            | ProtocolError::HeaderTooLarge { .. }
            | ProtocolError::BodyTooLarge { .. }
            | ProtocolError::EmptyImage
            | ProtocolError::ImageTooLarge { .. } => false,
        }
    }
}
