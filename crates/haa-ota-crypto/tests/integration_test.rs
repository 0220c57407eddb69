//! End-to-end checks of record decoding and key fallback.

use haa_ota_crypto::prelude::*;
use haa_ota_crypto::{RECORD_LEN, record::MAX_DER_SIGNATURE_LEN};
use haa_ota_errors::VerificationError;
use p384::ecdsa::signature::hazmat::PrehashSigner;
use p384::ecdsa::{Signature, SigningKey, VerifyingKey};
use proptest::prelude::*;

fn signing_key(seed: u8) -> Result<SigningKey, Box<dyn std::error::Error>> {
    Ok(SigningKey::from_slice(&[seed; 48])?)
}

fn signed_file(
    key: &SigningKey,
    image: &[u8],
) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let hash = sha384(image);
    let signature: Signature = key.sign_prehash(&hash)?;
    let record = SignatureRecord {
        hash,
        size: u32::try_from(image.len())?,
        signature,
    };
    Ok(record.encode())
}

#[test]
fn test_signature_file_verifies_with_sector_keys() -> Result<(), Box<dyn std::error::Error>> {
    let image = vec![0xE9u8; 3000];
    let signer = signing_key(11)?;
    let file = signed_file(&signer, &image)?;
    assert_eq!(file.len(), RECORD_LEN);

    let record = SignatureRecord::decode(&file)?;
    assert_eq!(record.size, 3000);

    let mut hasher = ImageHasher::new();
    for chunk in image.chunks(1024) {
        hasher.update(chunk);
    }
    assert!(digest_eq(&hasher.finalize(), &record.hash));

    let mut active = PublicKey::from_verifying_key(VerifyingKey::from(&signer)).to_der_blob()?;
    active.resize(4096, 0xFF);
    let keys = TrustedKeys::from_sectors(&active, &[0xFF; 4096]);
    assert_eq!(keys.verify(&record.hash, &record.signature)?, KeySlot::Active);
    Ok(())
}

#[test]
fn test_tampered_hash_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let signer = signing_key(12)?;
    let mut file = signed_file(&signer, b"image")?;
    if let Some(byte) = file.first_mut() {
        *byte ^= 0x80;
    }
    let record = SignatureRecord::decode(&file)?;
    let keys = TrustedKeys::new(
        Some(PublicKey::from_verifying_key(VerifyingKey::from(&signer))),
        None,
    );
    assert_eq!(
        keys.verify(&record.hash, &record.signature),
        Err(VerificationError::SignatureRejected)
    );
    Ok(())
}

#[test]
fn test_decode_error_maps_to_malformed_signature() {
    let err: VerificationError = match SignatureRecord::decode(&[0u8; 10]) {
        Err(e) => e.into(),
        Ok(_) => VerificationError::DigestMismatch,
    };
    assert!(matches!(err, VerificationError::MalformedSignature(_)));
}

proptest! {
    #[test]
    fn test_decode_never_panics(blob in proptest::collection::vec(any::<u8>(), 0..200)) {
        if SignatureRecord::decode(&blob).is_ok() {
            prop_assert!((60..=RECORD_LEN).contains(&blob.len()));
        }
    }

    #[test]
    fn test_record_fields_survive_encoding(
        size in any::<u32>(),
        message in proptest::collection::vec(any::<u8>(), 1..64),
    ) {
        let key = SigningKey::from_slice(&[5u8; 48])
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        let hash = sha384(&message);
        let signature: Signature = key
            .sign_prehash(&hash)
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert!(signature.to_der().as_bytes().len() <= MAX_DER_SIGNATURE_LEN);
        let record = SignatureRecord { hash, size, signature };
        let blob = record.encode();

        prop_assert_eq!(blob.len(), RECORD_LEN);
        let decoded = SignatureRecord::decode(&blob)
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(decoded, record);
    }
}
