//! Signature handling for HAA firmware images.
//!
//! Firmware images are published next to a detached `.sec` file holding the
//! SHA-384 digest of the image, its size and an ECDSA P-384 signature over the
//! digest. This crate decodes that record, parses the public keys stored in
//! the device's key sectors and checks signatures against the active key with
//! a fallback to the backup key.
//!
//! # Architecture
//!
//! - [`digest`]: streaming SHA-384 and constant-time digest comparison
//! - [`record`]: fixed-layout decoding of the signature file
//! - [`key`]: P-384 public keys stored as DER SPKI or SEC1 blobs
//! - [`trusted`]: the active/backup key pair and verification with fallback
//! - [`error`]: error types for key and record decoding
//!
//! # Security Considerations
//!
//! - Digest and key comparisons use constant-time operations via `subtle`
//! - The signature is checked over the prehashed digest; the image itself is
//!   never held in memory
//!
//! # Example
//!
//! ```
//! use haa_ota_crypto::prelude::*;
//!
//! let mut hasher = ImageHasher::new();
//! hasher.update(b"firmware");
//! let digest = hasher.finalize();
//! assert!(digest_eq(&digest, &sha384(b"firmware")));
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod digest;
pub mod error;
pub mod key;
pub mod prelude;
pub mod record;
pub mod trusted;

pub use digest::{DIGEST_LEN, Digest, ImageHasher, digest_eq, sha384};
pub use error::{CryptoError, CryptoResult};
pub use key::{KEY_BLOB_MAX, PublicKey};
pub use record::{MAX_DER_SIGNATURE_LEN, RECORD_LEN, SignatureRecord};
pub use trusted::{KeySlot, TrustedKeys};
