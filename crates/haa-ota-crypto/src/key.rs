//! P-384 public keys as stored in the key sectors.

use p384::ecdsa::signature::hazmat::PrehashVerifier;
use p384::ecdsa::{Signature, VerifyingKey};
use p384::pkcs8::{DecodePublicKey, EncodePublicKey};
use subtle::ConstantTimeEq;

use crate::digest::{Digest, sha384};
use crate::error::{CryptoError, CryptoResult};

/// Largest key blob a key sector holds.
pub const KEY_BLOB_MAX: usize = 128;

const SEC1_UNCOMPRESSED_TAG: u8 = 0x04;
const SEC1_UNCOMPRESSED_LEN: usize = 97;
const DER_SEQUENCE: u8 = 0x30;
const ERASED: u8 = 0xFF;

/// A trusted P-384 verification key.
#[derive(Debug, Clone)]
pub struct PublicKey {
    key: VerifyingKey,
}

impl PublicKey {
    /// Parse the contents of a key sector.
    ///
    /// Returns `Ok(None)` for an erased sector. Bytes after the encoded key
    /// are ignored, so a whole sector may be passed in.
    ///
    /// # Errors
    ///
    /// Fails when the sector holds something that is neither a DER
    /// SubjectPublicKeyInfo nor an uncompressed SEC1 point on P-384.
    pub fn from_sector(sector: &[u8]) -> CryptoResult<Option<Self>> {
        match sector.first() {
            None | Some(&ERASED) => Ok(None),
            Some(_) => Self::from_blob(sector).map(Some),
        }
    }

    /// Parse a key blob in either accepted encoding.
    ///
    /// # Errors
    ///
    /// See [`PublicKey::from_sector`].
    pub fn from_blob(blob: &[u8]) -> CryptoResult<Self> {
        match blob {
            [SEC1_UNCOMPRESSED_TAG, ..] => {
                let point = blob.get(..SEC1_UNCOMPRESSED_LEN).ok_or(
                    CryptoError::InvalidKeyLength {
                        expected: SEC1_UNCOMPRESSED_LEN,
                        actual: blob.len(),
                    },
                )?;
                let key = VerifyingKey::from_sec1_bytes(point)
                    .map_err(|e| CryptoError::KeyFormatError(format!("SEC1 point: {e}")))?;
                Ok(Self { key })
            }
            [DER_SEQUENCE, len, ..] if *len < 0x80 => {
                let expected = usize::from(*len) + 2;
                if expected > KEY_BLOB_MAX {
                    return Err(CryptoError::InvalidKeyLength {
                        expected: KEY_BLOB_MAX,
                        actual: expected,
                    });
                }
                let der = blob.get(..expected).ok_or(CryptoError::InvalidKeyLength {
                    expected,
                    actual: blob.len(),
                })?;
                let public = p384::PublicKey::from_public_key_der(der)
                    .map_err(|e| CryptoError::KeyFormatError(format!("SPKI: {e}")))?;
                Ok(Self {
                    key: VerifyingKey::from(&public),
                })
            }
            [tag, ..] => Err(CryptoError::KeyFormatError(format!(
                "unknown key encoding tag {tag:#04x}"
            ))),
            [] => Err(CryptoError::InvalidKeyLength {
                expected: SEC1_UNCOMPRESSED_LEN,
                actual: 0,
            }),
        }
    }

    /// Wrap an existing verifying key.
    pub fn from_verifying_key(key: VerifyingKey) -> Self {
        Self { key }
    }

    /// Uncompressed SEC1 encoding (97 bytes).
    pub fn to_sec1_bytes(&self) -> Vec<u8> {
        self.key.to_encoded_point(false).as_bytes().to_vec()
    }

    /// DER SubjectPublicKeyInfo encoding (120 bytes), as written to a key sector.
    ///
    /// # Errors
    ///
    /// Fails only if the DER encoder fails.
    pub fn to_der_blob(&self) -> CryptoResult<Vec<u8>> {
        let public = p384::PublicKey::from(&self.key);
        public
            .to_public_key_der()
            .map(|doc| doc.as_bytes().to_vec())
            .map_err(|e| CryptoError::KeyFormatError(e.to_string()))
    }

    /// Short hex fingerprint used in log lines.
    pub fn fingerprint(&self) -> String {
        let digest = sha384(&self.to_sec1_bytes());
        hex::encode(digest.get(..8).unwrap_or_default())
    }

    /// Check `signature` over an already computed digest.
    pub fn verify_digest(&self, digest: &Digest, signature: &Signature) -> bool {
        self.key.verify_prehash(digest, signature).is_ok()
    }

    /// Compare two keys in constant time.
    pub fn ct_eq(&self, other: &PublicKey) -> bool {
        self.to_sec1_bytes()
            .as_slice()
            .ct_eq(other.to_sec1_bytes().as_slice())
            .into()
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.ct_eq(other)
    }
}

impl Eq for PublicKey {}

#[cfg(test)]
mod tests {
    use super::*;
    use p384::ecdsa::SigningKey;
    use p384::ecdsa::signature::hazmat::PrehashSigner;

    fn signing_key(seed: u8) -> Result<SigningKey, Box<dyn std::error::Error>> {
        Ok(SigningKey::from_slice(&[seed; 48])?)
    }

    #[test]
    fn test_der_blob_shape() -> Result<(), Box<dyn std::error::Error>> {
        let key = PublicKey::from_verifying_key(VerifyingKey::from(&signing_key(3)?));
        let der = key.to_der_blob()?;
        assert_eq!(der.len(), 120);
        assert_eq!(der.get(..2), Some(&[0x30, 0x76][..]));
        Ok(())
    }

    #[test]
    fn test_both_encodings_parse_to_same_key() -> Result<(), Box<dyn std::error::Error>> {
        let key = PublicKey::from_verifying_key(VerifyingKey::from(&signing_key(3)?));

        let mut sector = key.to_der_blob()?;
        sector.resize(4096, 0xFF);
        let from_der = PublicKey::from_sector(&sector)?.ok_or("empty")?;

        let from_sec1 = PublicKey::from_blob(&key.to_sec1_bytes())?;
        assert_eq!(from_der, key);
        assert_eq!(from_sec1, key);
        Ok(())
    }

    #[test]
    fn test_erased_sector_is_empty() -> Result<(), Box<dyn std::error::Error>> {
        assert!(PublicKey::from_sector(&[0xFF; 128])?.is_none());
        assert!(PublicKey::from_sector(&[])?.is_none());
        Ok(())
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(
            PublicKey::from_blob(&[0x04; 10]),
            Err(CryptoError::InvalidKeyLength { .. })
        ));
        assert!(matches!(
            PublicKey::from_blob(&[0x04; 97]),
            Err(CryptoError::KeyFormatError(_))
        ));
        assert!(matches!(
            PublicKey::from_blob(&[0x55; 16]),
            Err(CryptoError::KeyFormatError(_))
        ));
    }

    #[test]
    fn test_verify_digest() -> Result<(), Box<dyn std::error::Error>> {
        let signer = signing_key(9)?;
        let key = PublicKey::from_verifying_key(VerifyingKey::from(&signer));
        let digest = sha384(b"otamain.bin");
        let signature: Signature = signer.sign_prehash(&digest)?;

        assert!(key.verify_digest(&digest, &signature));
        assert!(!key.verify_digest(&sha384(b"other"), &signature));
        assert_eq!(key.fingerprint().len(), 16);
        Ok(())
    }
}
