//! Image and key verification errors.

/// Reasons an image or key is not trusted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerificationError {
    /// Signed size differs from the number of bytes written
    #[error("signed size {declared} does not match {written} bytes written")]
    SizeMismatch {
        /// Size carried by the signature record
        declared: u64,
        /// Bytes actually staged
        written: u64,
    },

    /// The signature record covers an empty image
    #[error("signature record covers an empty image")]
    EmptyImage,

    /// The recomputed digest differs from the signed digest
    #[error("image digest does not match the signed digest")]
    DigestMismatch,

    /// No trusted key accepted the signature
    #[error("signature rejected by every trusted key")]
    SignatureRejected,

    /// Signature file is not a well formed record
    #[error("malformed signature record: {0}")]
    MalformedSignature(String),

    /// Neither key slot holds a parseable key
    #[error("no usable public key")]
    NoUsableKey,

    /// A key blob could not be decoded
    #[error("invalid public key: {0}")]
    InvalidKey(String),
}

impl VerificationError {
    /// Create a malformed signature error.
    pub fn malformed(msg: impl Into<String>) -> Self {
        VerificationError::MalformedSignature(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_mismatch_message() {
        let err = VerificationError::SizeMismatch {
            declared: 1024,
            written: 1000,
        };
        assert_eq!(
            err.to_string(),
            "signed size 1024 does not match 1000 bytes written"
        );
    }
}
