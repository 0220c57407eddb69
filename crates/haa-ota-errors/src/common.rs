//! Aggregate error type and classification shared by all update crates.

use core::fmt;

use crate::{ConfigError, FlashError, NetworkError, ProtocolError, VerificationError};

/// Top-level error wrapping every failure family of the update engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OtaError {
    /// Transport level failure
    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    /// Malformed or unexpected HTTP response
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Flash sector store failure
    #[error("flash error: {0}")]
    Flash(#[from] FlashError),

    /// Image or key rejected
    #[error("verification error: {0}")]
    Verification(#[from] VerificationError),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Session aborted through its abort handle
    #[error("update aborted: {reason}")]
    Aborted {
        /// Why the session was aborted
        reason: String,
    },
}

impl OtaError {
    /// Create an abort error.
    pub fn aborted(reason: impl Into<String>) -> Self {
        OtaError::Aborted {
            reason: reason.into(),
        }
    }

    /// Get the error category for classification.
    pub fn category(&self) -> ErrorCategory {
        match self {
            OtaError::Network(_) => ErrorCategory::Network,
            OtaError::Protocol(_) => ErrorCategory::Protocol,
            OtaError::Flash(_) => ErrorCategory::Flash,
            OtaError::Verification(_) => ErrorCategory::Verification,
            OtaError::Config(_) => ErrorCategory::Config,
            OtaError::Aborted { .. } => ErrorCategory::Aborted,
        }
    }

    /// Get the error severity level.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            OtaError::Network(e) => e.severity(),
            OtaError::Protocol(e) => e.severity(),
            OtaError::Flash(e) => e.severity(),
            OtaError::Verification(_) => ErrorSeverity::Critical,
            OtaError::Config(_) => ErrorSeverity::Error,
            OtaError::Aborted { .. } => ErrorSeverity::Info,
        }
    }

    /// Whether the failing fetch step may be retried locally.
    ///
    /// Only transport failures and transient protocol failures qualify;
    /// flash, verification and configuration errors end the session.
    pub fn is_retryable(&self) -> bool {
        match self {
            OtaError::Network(e) => e.is_retryable(),
            OtaError::Protocol(e) => e.is_transient(),
            OtaError::Flash(_)
            | OtaError::Verification(_)
            | OtaError::Config(_)
            | OtaError::Aborted { .. } => false,
        }
    }
}

/// Error category for classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorCategory {
    /// Transport errors
    Network = 0,
    /// HTTP protocol errors
    Protocol = 1,
    /// Flash storage errors
    Flash = 2,
    /// Image and key verification errors
    Verification = 3,
    /// Configuration errors
    Config = 4,
    /// Aborted sessions
    Aborted = 5,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Network => write!(f, "Network"),
            ErrorCategory::Protocol => write!(f, "Protocol"),
            ErrorCategory::Flash => write!(f, "Flash"),
            ErrorCategory::Verification => write!(f, "Verification"),
            ErrorCategory::Config => write!(f, "Config"),
            ErrorCategory::Aborted => write!(f, "Aborted"),
        }
    }
}

/// Error severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ErrorSeverity {
    /// Informational, no action required
    Info = 0,
    /// Warning, the step will usually be retried
    Warning = 1,
    /// Error, the session failed
    Error = 2,
    /// Critical, untrusted data was offered to the device
    Critical = 3,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Info => write!(f, "INFO"),
            ErrorSeverity::Warning => write!(f, "WARN"),
            ErrorSeverity::Error => write!(f, "ERROR"),
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category_display() {
        assert_eq!(ErrorCategory::Network.to_string(), "Network");
        assert_eq!(ErrorCategory::Verification.to_string(), "Verification");
        assert_eq!(ErrorCategory::Aborted.to_string(), "Aborted");
    }

    #[test]
    fn test_error_severity_ordering() {
        assert!(ErrorSeverity::Critical > ErrorSeverity::Error);
        assert!(ErrorSeverity::Error > ErrorSeverity::Warning);
        assert!(ErrorSeverity::Warning > ErrorSeverity::Info);
    }

    #[test]
    fn test_category_follows_variant() {
        let err: OtaError = NetworkError::ConnectionClosed { received: 10 }.into();
        assert_eq!(err.category(), ErrorCategory::Network);

        let err: OtaError = VerificationError::DigestMismatch.into();
        assert_eq!(err.category(), ErrorCategory::Verification);

        assert_eq!(OtaError::aborted("user").category(), ErrorCategory::Aborted);
    }

    #[test]
    fn test_retry_classification() {
        let transient: OtaError = ProtocolError::UnexpectedStatus(502).into();
        assert!(transient.is_retryable());

        let permanent: OtaError = ProtocolError::UnexpectedStatus(404).into();
        assert!(!permanent.is_retryable());

        let redirect: OtaError = NetworkError::RedirectLimit { max_hops: 10 }.into();
        assert!(!redirect.is_retryable());

        let flash: OtaError = FlashError::Misaligned {
            addr: 0x1001,
            sector_size: 4096,
        }
        .into();
        assert!(!flash.is_retryable());
    }

    #[test]
    fn test_ota_error_is_std_error() {
        let err: OtaError = VerificationError::SignatureRejected.into();
        let _: &dyn std::error::Error = &err;
    }
}
