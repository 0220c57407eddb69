//! SHA-384 helpers.

use sha2::{Digest as _, Sha384};
use subtle::ConstantTimeEq;

/// Length of a SHA-384 digest.
pub const DIGEST_LEN: usize = 48;

/// A SHA-384 digest.
pub type Digest = [u8; DIGEST_LEN];

/// Incremental SHA-384 over an image read back in chunks.
#[derive(Clone, Default)]
pub struct ImageHasher {
    inner: Sha384,
    consumed: u64,
}

impl ImageHasher {
    /// Start a new digest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk.
    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
        self.consumed = self.consumed.saturating_add(chunk.len() as u64);
    }

    /// Bytes consumed so far.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Finish and return the digest.
    pub fn finalize(self) -> Digest {
        let mut out = [0u8; DIGEST_LEN];
        out.copy_from_slice(&self.inner.finalize());
        out
    }
}

impl core::fmt::Debug for ImageHasher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ImageHasher")
            .field("consumed", &self.consumed)
            .finish_non_exhaustive()
    }
}

/// One-shot SHA-384.
pub fn sha384(data: &[u8]) -> Digest {
    let mut out = [0u8; DIGEST_LEN];
    out.copy_from_slice(&Sha384::digest(data));
    out
}

/// Compare two digests in constant time.
pub fn digest_eq(a: &Digest, b: &Digest) -> bool {
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incremental_matches_one_shot() {
        let data: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let mut hasher = ImageHasher::new();
        for chunk in data.chunks(1024) {
            hasher.update(chunk);
        }
        assert_eq!(hasher.consumed(), 5000);
        assert!(digest_eq(&hasher.finalize(), &sha384(&data)));
    }

    #[test]
    fn test_known_vector() {
        let digest = sha384(b"abc");
        assert_eq!(
            hex::encode(digest),
            "cb00753f45a35e8bb5a03d699ac65007272c32ab0eded1631a8b605a43ff5bed\
             8086072ba1e7cc2358baeca134c825a7"
        );
    }

    #[test]
    fn test_digest_eq_detects_single_bit() {
        let a = sha384(b"image");
        let mut b = a;
        b[47] ^= 1;
        assert!(!digest_eq(&a, &b));
    }
}
