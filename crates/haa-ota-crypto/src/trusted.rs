//! Active and backup trusted keys.

use haa_ota_errors::VerificationError;
use p384::ecdsa::Signature;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::digest::Digest;
use crate::key::PublicKey;

/// Which key sector accepted a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySlot {
    /// The currently active key
    Active,
    /// The backup key
    Backup,
}

impl core::fmt::Display for KeySlot {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            KeySlot::Active => write!(f, "active"),
            KeySlot::Backup => write!(f, "backup"),
        }
    }
}

/// The pair of keys a device trusts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustedKeys {
    /// Active key, `None` when its sector is empty or unparseable
    pub active: Option<PublicKey>,
    /// Backup key, `None` when its sector is empty or unparseable
    pub backup: Option<PublicKey>,
}

impl TrustedKeys {
    /// Build from two already parsed slots.
    pub fn new(active: Option<PublicKey>, backup: Option<PublicKey>) -> Self {
        Self { active, backup }
    }

    /// Parse both key sectors, tolerating a damaged sector.
    ///
    /// A sector that fails to parse is treated as empty and logged, so a
    /// corrupted active key still leaves the backup usable.
    pub fn from_sectors(active: &[u8], backup: &[u8]) -> Self {
        Self {
            active: parse_slot(active, KeySlot::Active),
            backup: parse_slot(backup, KeySlot::Backup),
        }
    }

    /// Whether at least one key is present.
    pub fn has_any(&self) -> bool {
        self.active.is_some() || self.backup.is_some()
    }

    /// Verify `signature` over `digest`, active key first.
    ///
    /// # Errors
    ///
    /// [`VerificationError::NoUsableKey`] when both slots are empty,
    /// [`VerificationError::SignatureRejected`] when every present key rejects.
    pub fn verify(
        &self,
        digest: &Digest,
        signature: &Signature,
    ) -> Result<KeySlot, VerificationError> {
        if !self.has_any() {
            return Err(VerificationError::NoUsableKey);
        }

        for (slot, key) in [(KeySlot::Active, &self.active), (KeySlot::Backup, &self.backup)] {
            let Some(key) = key else {
                debug!(%slot, "key slot empty");
                continue;
            };
            if key.verify_digest(digest, signature) {
                if slot == KeySlot::Backup {
                    warn!(fingerprint = %key.fingerprint(), "signature accepted by backup key");
                }
                return Ok(slot);
            }
            debug!(%slot, fingerprint = %key.fingerprint(), "key rejected signature");
        }

        Err(VerificationError::SignatureRejected)
    }
}

fn parse_slot(sector: &[u8], slot: KeySlot) -> Option<PublicKey> {
    match PublicKey::from_sector(sector) {
        Ok(key) => key,
        Err(e) => {
            warn!(%slot, error = %e, "ignoring unparseable key sector");
            None
        }
    }
}
