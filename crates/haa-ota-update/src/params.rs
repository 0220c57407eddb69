//! Persisted system parameter record.
//!
//! Two sectors are used ping-pong: a commit erases the sector not holding the
//! current record, writes the new record there and programs the commit
//! marker last. A power cut at any point leaves at least one valid record,
//! and loading picks the valid record with the highest sequence number.
//!
//! Record layout (big-endian integers):
//!
//! | offset | len | field                                   |
//! |--------|-----|-----------------------------------------|
//! | 0      | 4   | magic `HOTA`                            |
//! | 4      | 4   | sequence number                         |
//! | 8      | 1   | installed version length, 0 when none   |
//! | 9      | 16  | installed version                       |
//! | 25     | 1   | permanent slot                          |
//! | 26     | 1   | temporary slot, `0xFF` when none        |
//! | 27     | 1   | pending version length                  |
//! | 28     | 16  | pending version                         |
//! | 44     | 1   | active key sector index                 |
//! | 45     | 1   | flags, bit 0 set once temporary tried   |
//! | 46     | 2   | reserved                                |
//! | 48     | 4   | CRC-32 of bytes 0..48                   |
//! | 52     | 1   | commit marker `0x5A`                    |

use haa_ota_errors::FlashError;
use tracing::{debug, trace, warn};

use crate::boot::Slot;
use crate::flash::FlashStore;
use crate::version::{FirmwareVersion, MAX_VERSION_LEN};

const MAGIC: [u8; 4] = *b"HOTA";
const BODY_LEN: usize = 48;
const CRC_END: usize = BODY_LEN + 4;
const MARKER_OFFSET: usize = CRC_END;
const RECORD_LEN: usize = MARKER_OFFSET + 1;
const COMMIT_MARKER: u8 = 0x5A;
const NO_SLOT: u8 = 0xFF;
const FLAG_TRIED: u8 = 0x01;

/// A temporary boot selection awaiting confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemporaryBoot {
    /// Slot to try
    pub slot: Slot,
    /// Version that becomes installed on confirmation
    pub version: FirmwareVersion,
    /// Set once the bootloader has started the slot
    pub tried: bool,
}

/// Contents of the parameter record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SysParams {
    /// Monotonic record counter
    pub seq: u32,
    /// Version of the image in the permanent slot
    pub installed: Option<FirmwareVersion>,
    /// Slot booted on every reset
    pub permanent_slot: Slot,
    /// Pending try-once selection
    pub temporary: Option<TemporaryBoot>,
    /// Index of the key sector holding the active key
    pub active_key: u8,
}

impl SysParams {
    /// Slot the device is running now, given that the bootloader has
    /// already resolved the last reset.
    pub fn booted_slot(&self) -> Slot {
        match &self.temporary {
            Some(temporary) if temporary.tried => temporary.slot,
            _ => self.permanent_slot,
        }
    }

    fn encode(&self) -> [u8; RECORD_LEN] {
        let mut out = [0u8; RECORD_LEN];
        let (body, tail) = out.split_at_mut(BODY_LEN);

        put(body, 0, &MAGIC);
        put(body, 4, &self.seq.to_be_bytes());
        put_version(body, 8, self.installed.as_ref());
        put(body, 25, &[self.permanent_slot.to_byte()]);
        match &self.temporary {
            Some(temporary) => {
                put(body, 26, &[temporary.slot.to_byte()]);
                put_version(body, 27, Some(&temporary.version));
                if temporary.tried {
                    put(body, 45, &[FLAG_TRIED]);
                }
            }
            None => put(body, 26, &[NO_SLOT]),
        }
        put(body, 44, &[self.active_key]);

        let crc = crc32fast::hash(body);
        put(tail, 0, &crc.to_be_bytes());
        put(tail, 4, &[COMMIT_MARKER]);
        out
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        let record = bytes.get(..RECORD_LEN)?;
        let body = record.get(..BODY_LEN)?;
        if body.get(..4)? != MAGIC.as_slice() {
            trace!("no parameter magic");
            return None;
        }
        if record.get(MARKER_OFFSET).copied()? != COMMIT_MARKER {
            debug!("parameter record without commit marker");
            return None;
        }
        let stored_crc = u32::from_be_bytes(record.get(BODY_LEN..CRC_END)?.try_into().ok()?);
        if stored_crc != crc32fast::hash(body) {
            warn!("parameter record CRC mismatch");
            return None;
        }

        let seq = u32::from_be_bytes(body.get(4..8)?.try_into().ok()?);
        let installed = get_version(body, 8)?;
        let permanent_slot = Slot::from_byte(*body.get(25)?)?;
        let flags = *body.get(45)?;
        let temporary = match *body.get(26)? {
            NO_SLOT => None,
            byte => Some(TemporaryBoot {
                slot: Slot::from_byte(byte)?,
                version: get_version(body, 27)??,
                tried: flags & FLAG_TRIED != 0,
            }),
        };
        let active_key = *body.get(44)?;
        if active_key > 1 {
            return None;
        }

        Some(Self {
            seq,
            installed,
            permanent_slot,
            temporary,
            active_key,
        })
    }
}

fn put(buf: &mut [u8], offset: usize, bytes: &[u8]) {
    if let Some(dst) = offset
        .checked_add(bytes.len())
        .and_then(|end| buf.get_mut(offset..end))
    {
        dst.copy_from_slice(bytes);
    }
}

fn put_version(buf: &mut [u8], offset: usize, version: Option<&FirmwareVersion>) {
    let text = version.map(ToString::to_string).unwrap_or_default();
    let bytes = text.as_bytes();
    let len = bytes.len().min(MAX_VERSION_LEN);
    put(buf, offset, &[u8::try_from(len).unwrap_or(0)]);
    put(buf, offset.saturating_add(1), bytes.get(..len).unwrap_or_default());
}

/// `Some(None)` for an absent version, `None` for a corrupt one.
fn get_version(buf: &[u8], offset: usize) -> Option<Option<FirmwareVersion>> {
    let len = usize::from(*buf.get(offset)?);
    if len == 0 {
        return Some(None);
    }
    if len > MAX_VERSION_LEN {
        return None;
    }
    let start = offset.checked_add(1)?;
    let text = buf.get(start..start.checked_add(len)?)?;
    FirmwareVersion::from_bytes(text).ok().map(Some)
}

/// Ping-pong store for [`SysParams`].
#[derive(Debug)]
pub struct ParamStore {
    flash: FlashStore,
    current: SysParams,
    current_sector: Option<usize>,
}

impl ParamStore {
    /// Read both parameter sectors and keep the newest valid record.
    ///
    /// A device with no valid record starts from defaults: nothing installed,
    /// slot 0 permanent, key sector 0 active.
    ///
    /// # Errors
    ///
    /// Flash read failures.
    pub async fn load(flash: FlashStore) -> Result<Self, FlashError> {
        let mut best: Option<(usize, SysParams)> = None;
        for (index, addr) in flash.map().param_sectors.iter().copied().enumerate() {
            let region = flash.map().sector(addr);
            let bytes = flash.read(&region, addr, RECORD_LEN).await?;
            let Some(params) = SysParams::decode(&bytes) else {
                continue;
            };
            if best.as_ref().is_none_or(|(_, b)| params.seq > b.seq) {
                best = Some((index, params));
            }
        }

        let (current_sector, current) = match best {
            Some((index, params)) => {
                debug!(sector = index, seq = params.seq, "parameter record loaded");
                (Some(index), params)
            }
            None => {
                debug!("no parameter record, using defaults");
                (None, SysParams::default())
            }
        };
        Ok(Self {
            flash,
            current,
            current_sector,
        })
    }

    /// The newest committed record.
    pub fn current(&self) -> &SysParams {
        &self.current
    }

    /// Persist `next` as the new record.
    ///
    /// The sequence number is assigned here. On error the previous record
    /// stays current, both in memory and on flash.
    ///
    /// # Errors
    ///
    /// Flash failures.
    pub async fn commit(&mut self, mut next: SysParams) -> Result<(), FlashError> {
        next.seq = self.current.seq.wrapping_add(1);
        let [first, second] = self.flash.map().param_sectors;
        let (target, addr) = match self.current_sector {
            Some(0) => (1, second),
            _ => (0, first),
        };
        let region = self.flash.map().sector(addr);
        let bytes = next.encode();
        let (record, marker) = bytes.split_at(MARKER_OFFSET);

        self.flash.erase(&region, addr).await?;
        self.flash.write(&region, addr, record).await?;
        let marker_addr = addr.saturating_add(u32::try_from(MARKER_OFFSET).unwrap_or(u32::MAX));
        self.flash.write(&region, marker_addr, marker).await?;

        debug!(sector = target, seq = next.seq, "parameter record committed");
        self.current = next;
        self.current_sector = Some(target);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegionMap;
    use crate::memory::MemFlash;
    use std::sync::Arc;

    fn flash() -> Result<(Arc<MemFlash>, FlashStore), FlashError> {
        let map = RegionMap::default();
        let mem = Arc::new(MemFlash::new(map.sector_size, map.capacity));
        Ok((mem.clone(), FlashStore::new(mem, map)?))
    }

    fn sample() -> Result<SysParams, haa_ota_errors::ConfigError> {
        Ok(SysParams {
            seq: 0,
            installed: Some(FirmwareVersion::parse("12.3.4")?),
            permanent_slot: Slot::One,
            temporary: Some(TemporaryBoot {
                slot: Slot::Zero,
                version: FirmwareVersion::parse("12.4.0")?,
                tried: true,
            }),
            active_key: 1,
        })
    }

    #[test]
    fn test_encode_decode() -> Result<(), Box<dyn std::error::Error>> {
        let params = sample()?;
        let bytes = params.encode();
        assert_eq!(bytes.get(..4), Some(&b"HOTA"[..]));
        assert_eq!(SysParams::decode(&bytes), Some(params));
        Ok(())
    }

    #[test]
    fn test_corruption_is_detected() -> Result<(), Box<dyn std::error::Error>> {
        let mut bytes = sample()?.encode();
        if let Some(b) = bytes.get_mut(10) {
            *b ^= 0x01;
        }
        assert_eq!(SysParams::decode(&bytes), None);
        Ok(())
    }

    #[test]
    fn test_missing_marker_is_invalid() -> Result<(), Box<dyn std::error::Error>> {
        let mut bytes = sample()?.encode();
        if let Some(b) = bytes.get_mut(MARKER_OFFSET) {
            *b = 0xFF;
        }
        assert_eq!(SysParams::decode(&bytes), None);
        Ok(())
    }

    #[tokio::test]
    async fn test_commits_alternate_sectors() -> Result<(), Box<dyn std::error::Error>> {
        let (mem, store) = flash()?;
        let map = store.map().clone();
        let mut params = ParamStore::load(store.clone()).await?;
        assert_eq!(params.current(), &SysParams::default());

        params.commit(sample()?).await?;
        params.commit(sample()?).await?;
        assert_eq!(params.current().seq, 2);

        assert_eq!(mem.snapshot(map.param_sectors[0], 4), b"HOTA".to_vec());
        assert_eq!(mem.snapshot(map.param_sectors[1], 4), b"HOTA".to_vec());

        let reloaded = ParamStore::load(store).await?;
        assert_eq!(reloaded.current().seq, 2);
        assert_eq!(reloaded.current().installed, sample()?.installed);
        Ok(())
    }

    #[tokio::test]
    async fn test_power_loss_mid_commit_keeps_previous() -> Result<(), Box<dyn std::error::Error>> {
        let (mem, store) = flash()?;
        let mut params = ParamStore::load(store.clone()).await?;
        params.commit(sample()?).await?;

        for budget in 0..3 {
            mem.fail_after(budget);
            let mut next = sample()?;
            next.installed = Some(FirmwareVersion::parse("99.0.0")?);
            let mut attempt = ParamStore::load(store.clone()).await?;
            assert!(attempt.commit(next).await.is_err());
            mem.restore_power();

            let reloaded = ParamStore::load(store.clone()).await?;
            assert_eq!(reloaded.current().seq, 1);
            assert_eq!(reloaded.current().installed, sample()?.installed);
        }
        Ok(())
    }
}
