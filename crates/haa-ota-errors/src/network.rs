//! Transport level errors raised by the fetch client.

use crate::common::ErrorSeverity;

/// Connection, TLS and stream failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
    /// Could not open a connection to the repository
    #[error("failed to connect to {host}:{port}: {reason}")]
    Connect {
        /// Remote host
        host: String,
        /// Remote port
        port: u16,
        /// Failure reason
        reason: String,
    },

    /// TLS handshake or session failure
    #[error("TLS failure with {host}: {reason}")]
    Tls {
        /// Remote host
        host: String,
        /// Failure reason
        reason: String,
    },

    /// Writing the request failed
    #[error("failed to send request: {0}")]
    Send(String),

    /// Reading from the connection failed
    #[error("failed to receive data: {0}")]
    Receive(String),

    /// A network operation did not complete in time
    #[error("{operation} timed out after {after_ms}ms")]
    Timeout {
        /// The operation that stalled
        operation: String,
        /// Elapsed time in milliseconds
        after_ms: u64,
    },

    /// The peer closed the connection before the body was complete
    #[error("connection closed after {received} body bytes")]
    ConnectionClosed {
        /// Body bytes received on this connection before the close
        received: u64,
    },

    /// More redirects than the configured maximum
    #[error("redirect limit of {max_hops} hops exceeded")]
    RedirectLimit {
        /// Hop limit that was exceeded
        max_hops: u8,
    },
}

impl NetworkError {
    /// Create a connect error.
    pub fn connect(host: impl Into<String>, port: u16, reason: impl Into<String>) -> Self {
        NetworkError::Connect {
            host: host.into(),
            port,
            reason: reason.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, after_ms: u64) -> Self {
        NetworkError::Timeout {
            operation: operation.into(),
            after_ms,
        }
    }

    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            NetworkError::RedirectLimit { .. } => ErrorSeverity::Error,
            _ => ErrorSeverity::Warning,
        }
    }

    /// A redirect loop will not resolve itself on retry; everything else may.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, NetworkError::RedirectLimit { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_message() {
        let err = NetworkError::connect("github.com", 443, "refused");
        assert_eq!(err.to_string(), "failed to connect to github.com:443: refused");
    }

    #[test]
    fn test_timeout_is_retryable() {
        let err = NetworkError::timeout("recv", 5000);
        assert!(err.is_retryable());
        assert_eq!(err.severity(), ErrorSeverity::Warning);
    }

    #[test]
    fn test_redirect_limit_is_final() {
        let err = NetworkError::RedirectLimit { max_hops: 10 };
        assert!(!err.is_retryable());
        assert_eq!(err.severity(), ErrorSeverity::Error);
    }
}
