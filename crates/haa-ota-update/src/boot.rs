//! Boot slot selection.
//!
//! Models the contract with the bootloader: a permanent slot that is booted
//! on every reset, and an optional temporary slot that is tried exactly once.
//! If the temporary image is not confirmed before the next reset the device
//! falls back to the permanent slot.

use haa_ota_errors::FlashError;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{Region, RegionMap};
use crate::params::{ParamStore, SysParams, TemporaryBoot};
use crate::version::FirmwareVersion;

/// One of the two image slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Slot {
    /// Slot 0
    #[default]
    Zero,
    /// Slot 1
    One,
}

impl Slot {
    /// Get the other slot
    pub fn other(self) -> Self {
        match self {
            Slot::Zero => Slot::One,
            Slot::One => Slot::Zero,
        }
    }

    /// Index into the region map.
    pub fn index(self) -> usize {
        match self {
            Slot::Zero => 0,
            Slot::One => 1,
        }
    }

    /// Flash region of this slot in `map`.
    pub fn region(self, map: &RegionMap) -> Region {
        let [zero, one] = map.slots;
        match self {
            Slot::Zero => zero,
            Slot::One => one,
        }
    }

    /// Decode a persisted slot byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Slot::Zero),
            1 => Some(Slot::One),
            _ => None,
        }
    }

    /// Persisted slot byte.
    pub fn to_byte(self) -> u8 {
        match self {
            Slot::Zero => 0,
            Slot::One => 1,
        }
    }
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Slot::Zero => write!(f, "slot0"),
            Slot::One => write!(f, "slot1"),
        }
    }
}

/// How a verified image is handed to the bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CommitMode {
    /// Switch the permanent slot and installed version at once
    #[default]
    Permanent,
    /// Boot the new slot once; it must be confirmed to become permanent
    Temporary,
}

/// Boot decisions over the persisted parameter record.
#[derive(Debug)]
pub struct BootSelector<'a> {
    params: &'a mut ParamStore,
}

impl<'a> BootSelector<'a> {
    /// Operate on `params`.
    pub fn new(params: &'a mut ParamStore) -> Self {
        Self { params }
    }

    /// Current record.
    pub fn current(&self) -> &SysParams {
        self.params.current()
    }

    /// Make `slot` the permanent boot target holding `version`.
    ///
    /// The slot and installed version change in the same record, and any
    /// temporary selection is dropped.
    ///
    /// # Errors
    ///
    /// Flash failures while writing the record.
    pub async fn select_permanent(
        &mut self,
        slot: Slot,
        version: FirmwareVersion,
    ) -> Result<(), FlashError> {
        let next = SysParams {
            permanent_slot: slot,
            installed: Some(version),
            temporary: None,
            ..self.params.current().clone()
        };
        self.params.commit(next).await?;
        info!(%slot, "permanent boot slot selected");
        Ok(())
    }

    /// Boot `slot` once on the next reset.
    ///
    /// # Errors
    ///
    /// Flash failures while writing the record.
    pub async fn select_temporary(
        &mut self,
        slot: Slot,
        version: FirmwareVersion,
    ) -> Result<(), FlashError> {
        let mut next = self.params.current().clone();
        next.temporary = Some(TemporaryBoot {
            slot,
            version,
            tried: false,
        });
        self.params.commit(next).await?;
        info!(%slot, "temporary boot slot selected");
        Ok(())
    }

    /// Promote a temporary selection to permanent, installing its version.
    ///
    /// Returns the promoted version, or `None` when nothing was pending.
    ///
    /// # Errors
    ///
    /// Flash failures while writing the record.
    pub async fn confirm_temporary_as_permanent(
        &mut self,
    ) -> Result<Option<FirmwareVersion>, FlashError> {
        let current = self.params.current().clone();
        let Some(temporary) = current.temporary.clone() else {
            return Ok(None);
        };
        let next = SysParams {
            permanent_slot: temporary.slot,
            installed: Some(temporary.version.clone()),
            temporary: None,
            ..current
        };
        self.params.commit(next).await?;
        info!(slot = %temporary.slot, version = %temporary.version, "temporary image confirmed");
        Ok(Some(temporary.version))
    }

    /// Decide which slot a reset boots, as the bootloader does.
    ///
    /// A pending temporary slot is booted once and marked as tried. A tried
    /// temporary slot that is still unconfirmed is dropped and the permanent
    /// slot booted.
    ///
    /// # Errors
    ///
    /// Flash failures while writing the record.
    pub async fn resolve_boot(&mut self) -> Result<Slot, FlashError> {
        let current = self.params.current().clone();
        match current.temporary.clone() {
            None => Ok(current.permanent_slot),
            Some(temporary) if !temporary.tried => {
                let next = SysParams {
                    temporary: Some(TemporaryBoot {
                        tried: true,
                        ..temporary.clone()
                    }),
                    ..current
                };
                self.params.commit(next).await?;
                info!(slot = %temporary.slot, "booting temporary slot once");
                Ok(temporary.slot)
            }
            Some(temporary) => {
                let permanent = current.permanent_slot;
                let next = SysParams {
                    temporary: None,
                    ..current
                };
                self.params.commit(next).await?;
                warn!(
                    slot = %temporary.slot,
                    version = %temporary.version,
                    "temporary image not confirmed, reverting"
                );
                Ok(permanent)
            }
        }
    }
}
