//! Detached signature file codec.
//!
//! Layout of a `.sec` file:
//!
//! | offset | length | field                                  |
//! |--------|--------|----------------------------------------|
//! | 0      | 48     | SHA-384 digest of the image            |
//! | 48     | 4      | image size, big-endian                 |
//! | 52     | ≤104   | ECDSA P-384 signature, DER `SEQUENCE`  |
//! | ...    | rest   | zero padding up to 156 bytes           |

use p384::ecdsa::Signature;

use crate::digest::{DIGEST_LEN, Digest};
use crate::error::{CryptoError, CryptoResult};

/// Length of a padded signature file.
pub const RECORD_LEN: usize = 156;

/// Largest DER encoding of a P-384 signature.
pub const MAX_DER_SIGNATURE_LEN: usize = 104;

const SIZE_OFFSET: usize = DIGEST_LEN;
const SIGNATURE_OFFSET: usize = SIZE_OFFSET + 4;
const MIN_DER_SIGNATURE_LEN: usize = 8;
const MIN_RECORD_LEN: usize = SIGNATURE_OFFSET + MIN_DER_SIGNATURE_LEN;
const DER_SEQUENCE: u8 = 0x30;

/// A decoded signature file. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureRecord {
    /// Signed SHA-384 digest of the image
    pub hash: Digest,
    /// Signed image size in bytes
    pub size: u32,
    /// Signature over `hash`
    pub signature: Signature,
}

impl SignatureRecord {
    /// Decode a signature file.
    ///
    /// # Errors
    ///
    /// Fails when the blob is shorter than the smallest possible record or
    /// longer than [`RECORD_LEN`], when the DER header announces more bytes
    /// than present, when the signature is not a valid P-384 encoding, or
    /// when bytes after the signature are not zero.
    pub fn decode(blob: &[u8]) -> CryptoResult<Self> {
        if !(MIN_RECORD_LEN..=RECORD_LEN).contains(&blob.len()) {
            return Err(CryptoError::InvalidRecordLength {
                min: MIN_RECORD_LEN,
                max: RECORD_LEN,
                actual: blob.len(),
            });
        }

        let (hash_bytes, rest) = blob.split_at(DIGEST_LEN);
        let (size_bytes, der_area) = rest.split_at(4);

        let mut hash = [0u8; DIGEST_LEN];
        hash.copy_from_slice(hash_bytes);
        let size = <[u8; 4]>::try_from(size_bytes)
            .map(u32::from_be_bytes)
            .map_err(|e| CryptoError::MalformedDer(e.to_string()))?;

        let der_len = der_length(der_area)?;
        let (der, padding) = der_area
            .split_at_checked(der_len)
            .ok_or_else(|| CryptoError::MalformedDer(format!(
                "header announces {der_len} bytes, {} available",
                der_area.len()
            )))?;

        if let Some(pos) = padding.iter().position(|b| *b != 0) {
            return Err(CryptoError::NonZeroPadding {
                offset: SIGNATURE_OFFSET + der_len + pos,
            });
        }

        let signature =
            Signature::from_der(der).map_err(|e| CryptoError::MalformedDer(e.to_string()))?;

        Ok(Self {
            hash,
            size,
            signature,
        })
    }

    /// Encode into the padded [`RECORD_LEN`]-byte file layout.
    pub fn encode(&self) -> Vec<u8> {
        let der = self.signature.to_der();
        let mut out = Vec::with_capacity(RECORD_LEN);
        out.extend_from_slice(&self.hash);
        out.extend_from_slice(&self.size.to_be_bytes());
        out.extend_from_slice(der.as_bytes());
        out.resize(RECORD_LEN, 0);
        out
    }
}

/// Total length of the DER `SEQUENCE` at the start of `area`.
fn der_length(area: &[u8]) -> CryptoResult<usize> {
    match area {
        [DER_SEQUENCE, len, ..] if *len < 0x80 => {
            let total = usize::from(*len) + 2;
            if total > MAX_DER_SIGNATURE_LEN {
                return Err(CryptoError::MalformedDer(format!(
                    "signature of {total} bytes exceeds {MAX_DER_SIGNATURE_LEN}"
                )));
            }
            Ok(total)
        }
        [DER_SEQUENCE, len, ..] => Err(CryptoError::MalformedDer(format!(
            "long-form length {len:#04x} not valid for P-384"
        ))),
        [tag, ..] => Err(CryptoError::MalformedDer(format!(
            "expected SEQUENCE tag, found {tag:#04x}"
        ))),
        [] => Err(CryptoError::MalformedDer("empty signature".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p384::ecdsa::SigningKey;
    use p384::ecdsa::signature::hazmat::PrehashSigner;

    fn sample_record() -> Result<SignatureRecord, Box<dyn std::error::Error>> {
        let key = SigningKey::from_slice(&[7u8; 48])?;
        let hash = crate::sha384(b"haamain");
        let signature: Signature = key.sign_prehash(&hash)?;
        Ok(SignatureRecord {
            hash,
            size: 0x0004_1a2b,
            signature,
        })
    }

    #[test]
    fn test_encode_layout() -> Result<(), Box<dyn std::error::Error>> {
        let record = sample_record()?;
        let blob = record.encode();
        assert_eq!(blob.len(), RECORD_LEN);
        assert_eq!(blob.get(48..52), Some(&[0x00, 0x04, 0x1a, 0x2b][..]));
        assert_eq!(blob.get(52), Some(&DER_SEQUENCE));
        Ok(())
    }

    #[test]
    fn test_decode_padded_and_unpadded() -> Result<(), Box<dyn std::error::Error>> {
        let record = sample_record()?;
        let blob = record.encode();
        assert_eq!(SignatureRecord::decode(&blob)?, record);

        let der_len = record.signature.to_der().as_bytes().len();
        let trimmed = blob.get(..SIGNATURE_OFFSET + der_len).ok_or("short blob")?;
        assert_eq!(SignatureRecord::decode(trimmed)?, record);
        Ok(())
    }

    #[test]
    fn test_rejects_short_and_long_blobs() {
        assert!(matches!(
            SignatureRecord::decode(&[0u8; MIN_RECORD_LEN - 1]),
            Err(CryptoError::InvalidRecordLength { .. })
        ));
        assert!(matches!(
            SignatureRecord::decode(&[0u8; RECORD_LEN + 1]),
            Err(CryptoError::InvalidRecordLength { .. })
        ));
    }

    #[test]
    fn test_rejects_dirty_padding() -> Result<(), Box<dyn std::error::Error>> {
        let key = SigningKey::from_slice(&[7u8; 48])?;
        // A signature with both integers below 2^383 leaves padding behind it.
        let mut padded = None;
        for nonce in 0u8..32 {
            let hash = crate::sha384(&[nonce]);
            let signature: Signature = key.sign_prehash(&hash)?;
            if signature.to_der().as_bytes().len() < MAX_DER_SIGNATURE_LEN {
                padded = Some(SignatureRecord {
                    hash,
                    size: 1,
                    signature,
                });
                break;
            }
        }
        let mut blob = padded.ok_or("no short signature found")?.encode();
        if let Some(last) = blob.last_mut() {
            *last = 0xAA;
        }
        assert!(matches!(
            SignatureRecord::decode(&blob),
            Err(CryptoError::NonZeroPadding { offset: 155 })
        ));
        Ok(())
    }

    #[test]
    fn test_rejects_wrong_tag() -> Result<(), Box<dyn std::error::Error>> {
        let mut blob = sample_record()?.encode();
        if let Some(tag) = blob.get_mut(SIGNATURE_OFFSET) {
            *tag = 0x31;
        }
        assert!(matches!(
            SignatureRecord::decode(&blob),
            Err(CryptoError::MalformedDer(_))
        ));
        Ok(())
    }

    #[test]
    fn test_rejects_truncated_der() -> Result<(), Box<dyn std::error::Error>> {
        let blob = sample_record()?.encode();
        let cut = blob.get(..SIGNATURE_OFFSET + 20).ok_or("short blob")?;
        assert!(matches!(
            SignatureRecord::decode(cut),
            Err(CryptoError::MalformedDer(_))
        ));
        Ok(())
    }
}
