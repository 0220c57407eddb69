//! Snapshot tests for error message formatting.
//!
//! Log lines and the CLI print these messages verbatim, so their wording is
//! pinned here.

use haa_ota_errors::{
    ConfigError, FlashError, NetworkError, OtaError, ProtocolError, VerificationError,
};
use insta::assert_snapshot;

#[test]
fn test_redirect_limit() {
    let err: OtaError = NetworkError::RedirectLimit { max_hops: 10 }.into();
    assert_snapshot!(err.to_string(), @"network error: redirect limit of 10 hops exceeded");
}

#[test]
fn test_timeout() {
    assert_snapshot!(
        NetworkError::timeout("recv", 5000).to_string(),
        @"recv timed out after 5000ms"
    );
}

#[test]
fn test_unexpected_status() {
    let err: OtaError = ProtocolError::UnexpectedStatus(404).into();
    assert_snapshot!(err.to_string(), @"protocol error: unexpected HTTP status 404");
}

#[test]
fn test_header_too_large() {
    assert_snapshot!(
        ProtocolError::HeaderTooLarge { limit: 8000 }.to_string(),
        @"response headers exceed 8000 bytes"
    );
}

#[test]
fn test_not_erased() {
    let err: OtaError = FlashError::NotErased { addr: 0x2000 }.into();
    assert_snapshot!(err.to_string(), @"flash error: write to 0x2000 requires an erase first");
}

#[test]
fn test_signature_rejected() {
    let err: OtaError = VerificationError::SignatureRejected.into();
    assert_snapshot!(
        err.to_string(),
        @"verification error: signature rejected by every trusted key"
    );
}

#[test]
fn test_malformed_version() {
    assert_snapshot!(
        ConfigError::malformed_version("1.x", "not numeric").to_string(),
        @"malformed version '1.x': not numeric"
    );
}
