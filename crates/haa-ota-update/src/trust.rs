//! Version & trust store.
//!
//! Owns the persisted parameter record and the two key sectors. Every change
//! to what the device trusts or boots goes through a single
//! [`ParamStore::commit`], so the installed version can never point at an
//! image that was not verified.

use haa_ota_crypto::{KEY_BLOB_MAX, PublicKey, SignatureRecord, TrustedKeys, digest_eq, sha384};
use haa_ota_errors::{FlashError, OtaError, VerificationError};
use tracing::{debug, info};

use crate::boot::{BootSelector, CommitMode, Slot};
use crate::flash::FlashStore;
use crate::params::{ParamStore, SysParams};
use crate::version::FirmwareVersion;

/// Persisted version, key and boot state.
#[derive(Debug)]
pub struct VersionTrustStore {
    flash: FlashStore,
    params: ParamStore,
}

impl VersionTrustStore {
    /// Load the newest parameter record.
    ///
    /// # Errors
    ///
    /// Flash read failures.
    pub async fn open(flash: FlashStore) -> Result<Self, FlashError> {
        let params = ParamStore::load(flash.clone()).await?;
        Ok(Self { flash, params })
    }

    /// The committed parameter record.
    pub fn params(&self) -> &SysParams {
        self.params.current()
    }

    /// Version of the permanently selected image, if any.
    pub fn installed_version(&self) -> Option<&FirmwareVersion> {
        self.params.current().installed.as_ref()
    }

    /// Slot the device runs from.
    pub fn running_slot(&self) -> Slot {
        self.params.current().booted_slot()
    }

    /// Boot selection over the same record.
    pub fn boot(&mut self) -> BootSelector<'_> {
        BootSelector::new(&mut self.params)
    }

    /// Key sector addresses as `(active, spare)`.
    fn key_sectors(&self) -> (u32, u32) {
        let [first, second] = self.flash.map().key_sectors;
        if self.params.current().active_key == 0 {
            (first, second)
        } else {
            (second, first)
        }
    }

    async fn read_key_sector(&self, addr: u32) -> Result<Vec<u8>, FlashError> {
        let region = self.flash.map().sector(addr);
        self.flash.read(&region, addr, KEY_BLOB_MAX).await
    }

    /// Read both key sectors, active first.
    ///
    /// # Errors
    ///
    /// Flash read failures. Unparseable sectors are treated as empty.
    pub async fn trusted_keys(&self) -> Result<TrustedKeys, FlashError> {
        let (active, backup) = self.key_sectors();
        let active = self.read_key_sector(active).await?;
        let backup = self.read_key_sector(backup).await?;
        Ok(TrustedKeys::from_sectors(&active, &backup))
    }

    /// Record a verified, finalized image in `slot` as installed.
    ///
    /// The decision is handed to the [`BootSelector`]. With
    /// [`CommitMode::Permanent`] the version and permanent slot change
    /// together; with [`CommitMode::Temporary`] the slot is booted once and
    /// `version` only becomes installed on confirmation. Either way this is a
    /// single parameter record write.
    ///
    /// # Errors
    ///
    /// Flash failures; the previous record then stays in force.
    pub async fn commit_image(
        &mut self,
        slot: Slot,
        version: FirmwareVersion,
        mode: CommitMode,
    ) -> Result<(), FlashError> {
        match mode {
            CommitMode::Permanent => self.boot().select_permanent(slot, version.clone()).await?,
            CommitMode::Temporary => self.boot().select_temporary(slot, version.clone()).await?,
        }
        info!(%slot, %version, ?mode, "image committed");
        Ok(())
    }

    /// Accept a new public key signed by a currently trusted key.
    ///
    /// `record.hash` must be the SHA-384 of `blob` and `record.size` its
    /// length. The key is written into the spare sector and made active in
    /// one record commit; the previous active key becomes the backup.
    ///
    /// # Errors
    ///
    /// [`VerificationError`] when the blob does not match the record, is not
    /// a valid key, or the signature is not trusted. Flash failures otherwise.
    pub async fn install_rotated_key(
        &mut self,
        blob: &[u8],
        record: &SignatureRecord,
    ) -> Result<(), OtaError> {
        let written = u64::try_from(blob.len()).unwrap_or(u64::MAX);
        if u64::from(record.size) != written || blob.len() > KEY_BLOB_MAX {
            return Err(VerificationError::SizeMismatch {
                declared: u64::from(record.size),
                written,
            }
            .into());
        }
        if !digest_eq(&sha384(blob), &record.hash) {
            return Err(VerificationError::DigestMismatch.into());
        }
        let key = PublicKey::from_blob(blob).map_err(VerificationError::from)?;
        let accepted_by = self.trusted_keys().await?.verify(&record.hash, &record.signature)?;

        let (_, spare) = self.key_sectors();
        self.write_key_sector(spare, blob).await?;

        let mut next = self.params.current().clone();
        next.active_key = if next.active_key == 0 { 1 } else { 0 };
        self.params.commit(next).await?;
        info!(fingerprint = %key.fingerprint(), %accepted_by, "public key rotated");
        Ok(())
    }

    async fn write_key_sector(&self, addr: u32, blob: &[u8]) -> Result<(), FlashError> {
        let region = self.flash.map().sector(addr);
        self.flash.erase(&region, addr).await?;
        self.flash.write(&region, addr, blob).await?;
        debug!(addr = format_args!("{addr:#x}"), len = blob.len(), "key sector written");
        Ok(())
    }

    /// Factory provisioning: write both key sectors and an initial record.
    ///
    /// `backup` may be omitted, leaving the second sector erased.
    ///
    /// # Errors
    ///
    /// [`VerificationError::InvalidKey`] for a blob that does not parse,
    /// flash failures otherwise.
    pub async fn provision(
        &mut self,
        active: &[u8],
        backup: Option<&[u8]>,
        installed: Option<FirmwareVersion>,
    ) -> Result<(), OtaError> {
        PublicKey::from_blob(active).map_err(VerificationError::from)?;
        if let Some(backup) = backup {
            PublicKey::from_blob(backup).map_err(VerificationError::from)?;
        }
        for blob in std::iter::once(active).chain(backup) {
            if blob.len() > KEY_BLOB_MAX {
                return Err(VerificationError::InvalidKey(format!(
                    "key blob of {} bytes exceeds {KEY_BLOB_MAX}",
                    blob.len()
                ))
                .into());
            }
        }

        let [first, second] = self.flash.map().key_sectors;
        self.write_key_sector(first, active).await?;
        match backup {
            Some(blob) => self.write_key_sector(second, blob).await?,
            None => {
                let region = self.flash.map().sector(second);
                self.flash.erase(&region, second).await?;
            }
        }

        let next = SysParams {
            installed,
            active_key: 0,
            temporary: None,
            ..self.params.current().clone()
        };
        self.params.commit(next).await?;
        info!("device provisioned");
        Ok(())
    }
}
