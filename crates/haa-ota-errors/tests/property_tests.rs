//! Property-based tests for error classification.

use haa_ota_errors::{ErrorSeverity, NetworkError, OtaError, ProtocolError};
use proptest::prelude::*;

proptest! {
    #[test]
    fn test_status_transience_matches_class(status in 100u16..=999) {
        let err = ProtocolError::UnexpectedStatus(status);
        prop_assert_eq!(err.is_transient(), (500..600).contains(&status));
        prop_assert!(err.to_string().contains(&status.to_string()));
    }

    #[test]
    fn test_retryable_errors_are_not_critical(status in 100u16..=999, received in any::<u64>()) {
        let candidates: Vec<OtaError> = vec![
            ProtocolError::UnexpectedStatus(status).into(),
            NetworkError::ConnectionClosed { received }.into(),
        ];
        for err in candidates {
            if err.is_retryable() {
                prop_assert!(err.severity() < ErrorSeverity::Critical);
            }
        }
    }

    #[test]
    fn test_connect_message_contains_host(host in "[a-z0-9.-]{1,40}", port in any::<u16>()) {
        let err = NetworkError::connect(&host, port, "refused");
        let msg = err.to_string();
        prop_assert!(msg.contains(&host));
        prop_assert!(msg.contains(&port.to_string()));
    }
}
