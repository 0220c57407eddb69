//! Signing keys, signature files, firmware images and provisioned devices.

use std::sync::Arc;

use haa_ota_crypto::{PublicKey, SignatureRecord, sha384};
use haa_ota_update::{FirmwareVersion, FlashStore, MemFlash, OtaConfig, VersionTrustStore};
use p384::ecdsa::signature::hazmat::PrehashSigner;
use p384::ecdsa::{Signature, SigningKey, VerifyingKey};

use crate::must::must;

/// A deterministic P-384 signing key.
#[derive(Debug, Clone)]
pub struct SigningFixture {
    key: SigningKey,
}

impl SigningFixture {
    /// Key whose scalar is `seed` repeated 48 times.
    ///
    /// # Panics
    ///
    /// Panics for `seed == 0` and for seeds whose scalar exceeds the curve
    /// order; any seed below `0x80` is valid.
    pub fn new(seed: u8) -> Self {
        Self {
            key: must(SigningKey::from_slice(&[seed; 48])),
        }
    }

    /// The matching public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_verifying_key(VerifyingKey::from(&self.key))
    }

    /// Public key as a DER SubjectPublicKeyInfo key-sector blob.
    pub fn der_blob(&self) -> Vec<u8> {
        must(self.public_key().to_der_blob())
    }

    /// Public key as an uncompressed SEC1 key-sector blob.
    pub fn sec1_blob(&self) -> Vec<u8> {
        self.public_key().to_sec1_bytes()
    }

    /// Signature record over `data`.
    pub fn record_for(&self, data: &[u8]) -> SignatureRecord {
        let hash = sha384(data);
        let signature: Signature = must(self.key.sign_prehash(&hash));
        SignatureRecord {
            hash,
            size: must(u32::try_from(data.len())),
            signature,
        }
    }

    /// Encoded `.sec` file for `data`.
    pub fn sign_file(&self, data: &[u8]) -> Vec<u8> {
        self.record_for(data).encode()
    }
}

/// Deterministic pseudo-random image of `len` bytes whose first byte is
/// never `0xFF`.
pub fn firmware_image(len: usize, seed: u8) -> Vec<u8> {
    let mut state = u32::from(seed).wrapping_mul(0x9E37_79B9) | 1;
    let mut image: Vec<u8> = (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state.to_le_bytes()[0]
        })
        .collect();
    if let Some(first) = image.first_mut() {
        *first = 0xE9;
    }
    image
}

/// Fresh in-memory flash sized for `config`.
pub fn blank_flash(config: &OtaConfig) -> Arc<MemFlash> {
    Arc::new(MemFlash::new(config.regions.sector_size, config.regions.capacity))
}

/// Flash provisioned with `active` (and optionally `backup`) keys and
/// `installed` as the running version in slot 0.
pub async fn provisioned_flash(
    config: &OtaConfig,
    active: &SigningFixture,
    backup: Option<&SigningFixture>,
    installed: &str,
) -> Arc<MemFlash> {
    let flash = blank_flash(config);
    let store = must(FlashStore::new(flash.clone(), config.regions.clone()));
    let mut trust = must(VersionTrustStore::open(store).await);
    let backup_blob = backup.map(SigningFixture::der_blob);
    must(
        trust
            .provision(
                &active.der_blob(),
                backup_blob.as_deref(),
                Some(must(FirmwareVersion::parse(installed))),
            )
            .await,
    );
    flash
}

#[cfg(test)]
mod tests {
    use super::*;
    use haa_ota_crypto::TrustedKeys;

    #[test]
    fn test_signature_file_verifies() {
        let signer = SigningFixture::new(3);
        let image = firmware_image(5000, 1);
        let record = must(SignatureRecord::decode(&signer.sign_file(&image)));
        assert_eq!(record.size, 5000);
        let keys = TrustedKeys::new(Some(signer.public_key()), None);
        assert!(keys.verify(&record.hash, &record.signature).is_ok());
    }

    #[test]
    fn test_images_are_deterministic() {
        assert_eq!(firmware_image(64, 7), firmware_image(64, 7));
        assert_ne!(firmware_image(64, 7), firmware_image(64, 8));
        assert_eq!(firmware_image(1, 0), vec![0xE9]);
    }

    #[tokio::test]
    async fn test_provisioned_flash_reports_version() {
        let config = OtaConfig::default();
        let flash = provisioned_flash(&config, &SigningFixture::new(1), None, "1.2.3").await;
        let store = must(FlashStore::new(flash, config.regions.clone()));
        let trust = must(VersionTrustStore::open(store).await);
        assert_eq!(
            trust.installed_version().map(ToString::to_string).as_deref(),
            Some("1.2.3")
        );
    }
}
