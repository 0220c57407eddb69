//! Convenient imports for signature handling.

pub use crate::{
    CryptoError, CryptoResult, DIGEST_LEN, Digest, ImageHasher, KeySlot, PublicKey,
    SignatureRecord, TrustedKeys, digest_eq, sha384,
};
