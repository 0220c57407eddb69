//! Unit tests for all error variants.
//!
//! Tests Display implementations, From conversions and retry classification.

use haa_ota_errors::{
    Result,
    common::{ErrorCategory, ErrorSeverity, OtaError},
    config::ConfigError,
    flash::FlashError,
    network::NetworkError,
    protocol::ProtocolError,
    verification::VerificationError,
};

mod network_error_tests {
    use super::*;

    #[test]
    fn test_all_variants_display() -> Result<()> {
        let variants = vec![
            NetworkError::connect("github.com", 443, "refused"),
            NetworkError::Tls {
                host: "github.com".into(),
                reason: "bad certificate".into(),
            },
            NetworkError::Send("broken pipe".into()),
            NetworkError::Receive("reset by peer".into()),
            NetworkError::timeout("connect", 10_000),
            NetworkError::ConnectionClosed { received: 512 },
            NetworkError::RedirectLimit { max_hops: 10 },
        ];

        for variant in variants {
            assert!(!variant.to_string().is_empty());
        }
        Ok(())
    }

    #[test]
    fn test_only_redirect_limit_is_final() -> Result<()> {
        assert!(NetworkError::Send("x".into()).is_retryable());
        assert!(NetworkError::ConnectionClosed { received: 0 }.is_retryable());
        assert!(!NetworkError::RedirectLimit { max_hops: 3 }.is_retryable());
        Ok(())
    }
}

mod protocol_error_tests {
    use super::*;

    #[test]
    fn test_missing_header_names_header() -> Result<()> {
        let err = ProtocolError::MissingHeader("Content-Length");
        assert!(err.to_string().contains("Content-Length"));
        Ok(())
    }

    #[test]
    fn test_truncation_is_transient() -> Result<()> {
        let err = ProtocolError::UnexpectedSize {
            expected: 100,
            actual: 40,
        };
        assert!(err.is_transient());
        assert_eq!(err.severity(), ErrorSeverity::Warning);
        Ok(())
    }

    #[test]
    fn test_header_too_large_is_final() -> Result<()> {
        let err = ProtocolError::HeaderTooLarge { limit: 8000 };
        assert!(!err.is_transient());
        Ok(())
    }
}

mod flash_error_tests {
    use super::*;

    #[test]
    fn test_misaligned_display() -> Result<()> {
        let err = FlashError::Misaligned {
            addr: 0x2001,
            sector_size: 4096,
        };
        assert_eq!(
            err.to_string(),
            "address 0x2001 is not aligned to 4096-byte sectors"
        );
        Ok(())
    }

    #[test]
    fn test_not_erased_severity() -> Result<()> {
        assert_eq!(
            FlashError::NotErased { addr: 0 }.severity(),
            ErrorSeverity::Error
        );
        Ok(())
    }
}

mod ota_error_tests {
    use super::*;

    #[test]
    fn test_from_conversions() -> Result<()> {
        let err: OtaError = NetworkError::Receive("eof".into()).into();
        assert!(matches!(err, OtaError::Network(_)));

        let err: OtaError = ProtocolError::MissingLocation.into();
        assert!(matches!(err, OtaError::Protocol(_)));

        let err: OtaError = FlashError::NotErased { addr: 4 }.into();
        assert!(matches!(err, OtaError::Flash(_)));

        let err: OtaError = VerificationError::NoUsableKey.into();
        assert!(matches!(err, OtaError::Verification(_)));

        let err: OtaError = ConfigError::InvalidRepository(String::new()).into();
        assert!(matches!(err, OtaError::Config(_)));
        Ok(())
    }

    #[test]
    fn test_verification_is_critical_and_final() -> Result<()> {
        let err: OtaError = VerificationError::SignatureRejected.into();
        assert_eq!(err.severity(), ErrorSeverity::Critical);
        assert_eq!(err.category(), ErrorCategory::Verification);
        assert!(!err.is_retryable());
        Ok(())
    }

    #[test]
    fn test_aborted_is_informational() -> Result<()> {
        let err = OtaError::aborted("shutdown");
        assert_eq!(err.severity(), ErrorSeverity::Info);
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "update aborted: shutdown");
        Ok(())
    }

    #[test]
    fn test_question_mark_propagation() -> Result<()> {
        fn inner() -> Result<u32> {
            Err(ConfigError::invalid_value("max_redirects", "must be at least 1"))?
        }

        match inner() {
            Err(OtaError::Config(ConfigError::InvalidValue { field, .. })) => {
                assert_eq!(field, "max_redirects");
            }
            other => return Err(OtaError::aborted(format!("unexpected {other:?}"))),
        }
        Ok(())
    }
}
