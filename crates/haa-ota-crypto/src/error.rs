//! Error types for key and signature record decoding.

use haa_ota_errors::VerificationError;
use thiserror::Error;

/// Decoding failures for keys and signature records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Key blob length does not match its encoding
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength {
        /// Length implied by the encoding
        expected: usize,
        /// Bytes available
        actual: usize,
    },

    /// Key bytes are not a valid P-384 point or SPKI document
    #[error("key format error: {0}")]
    KeyFormatError(String),

    /// Signature file length outside the accepted range
    #[error("signature record length {actual} outside [{min}, {max}]")]
    InvalidRecordLength {
        /// Smallest accepted length
        min: usize,
        /// Largest accepted length
        max: usize,
        /// Length received
        actual: usize,
    },

    /// The embedded signature is not valid DER
    #[error("malformed DER signature: {0}")]
    MalformedDer(String),

    /// Bytes after the DER signature are not zero
    #[error("non-zero padding at offset {offset}")]
    NonZeroPadding {
        /// Offset of the first non-zero byte
        offset: usize,
    },
}

/// Result alias for decoding operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

impl From<CryptoError> for VerificationError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::InvalidKeyLength { .. } | CryptoError::KeyFormatError(_) => {
                VerificationError::InvalidKey(err.to_string())
            }
            CryptoError::InvalidRecordLength { .. }
            | CryptoError::MalformedDer(_)
            | CryptoError::NonZeroPadding { .. } => {
                VerificationError::MalformedSignature(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_maps_into_verification_taxonomy() {
        let err: VerificationError = CryptoError::NonZeroPadding { offset: 140 }.into();
        assert!(matches!(err, VerificationError::MalformedSignature(_)));

        let err: VerificationError = CryptoError::KeyFormatError("point".into()).into();
        assert!(matches!(err, VerificationError::InvalidKey(_)));
    }
}
