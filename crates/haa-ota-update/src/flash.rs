//! Flash sector store.
//!
//! [`FlashDevice`] is the hardware seam: a raw NOR device with sector erase,
//! program and read. [`FlashStore`] wraps a device with the region map and
//! rejects any access that is misaligned or crosses the region it targets.
//! [`StagingWriter`] streams an image into the staging slot.

use std::sync::Arc;

use haa_ota_crypto::{Digest, ImageHasher};
use haa_ota_errors::FlashError;
use tracing::{debug, trace};

use crate::config::{Region, RegionMap};

/// Value of an erased flash byte.
pub const ERASED_BYTE: u8 = 0xFF;

/// Raw sector storage with NOR semantics: a write may only clear bits.
#[async_trait::async_trait]
pub trait FlashDevice: Send + Sync {
    /// Erase granularity in bytes
    fn sector_size(&self) -> u32;

    /// Device size in bytes
    fn capacity(&self) -> u32;

    /// Set every byte of the sector starting at `addr` to `0xFF`
    async fn erase_sector(&self, addr: u32) -> Result<(), FlashError>;

    /// Program `data` at `addr`
    async fn write(&self, addr: u32, data: &[u8]) -> Result<(), FlashError>;

    /// Fill `buf` from `addr`
    async fn read(&self, addr: u32, buf: &mut [u8]) -> Result<(), FlashError>;
}

/// Region-checked access to a [`FlashDevice`].
#[derive(Clone)]
pub struct FlashStore {
    device: Arc<dyn FlashDevice>,
    map: RegionMap,
}

impl std::fmt::Debug for FlashStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlashStore")
            .field("sector_size", &self.map.sector_size)
            .field("capacity", &self.map.capacity)
            .finish_non_exhaustive()
    }
}

impl FlashStore {
    /// Wrap a device.
    ///
    /// # Errors
    ///
    /// [`FlashError::OutOfBounds`] when the map does not fit the device, and
    /// [`FlashError::Misaligned`] when the sector sizes disagree.
    pub fn new(device: Arc<dyn FlashDevice>, map: RegionMap) -> Result<Self, FlashError> {
        if device.sector_size() != map.sector_size {
            return Err(FlashError::Misaligned {
                addr: 0,
                sector_size: device.sector_size(),
            });
        }
        if map.capacity > device.capacity() {
            return Err(FlashError::OutOfBounds {
                addr: 0,
                len: usize::try_from(map.capacity).unwrap_or(usize::MAX),
                start: 0,
                end: device.capacity(),
            });
        }
        Ok(Self { device, map })
    }

    /// The region map in use.
    pub fn map(&self) -> &RegionMap {
        &self.map
    }

    /// Erase the sector at `addr`, which must be aligned and lie in `region`.
    ///
    /// # Errors
    ///
    /// Alignment, bounds or device failures.
    pub async fn erase(&self, region: &Region, addr: u32) -> Result<(), FlashError> {
        if !addr.is_multiple_of(self.map.sector_size) {
            return Err(FlashError::Misaligned {
                addr,
                sector_size: self.map.sector_size,
            });
        }
        let len = usize::try_from(self.map.sector_size).unwrap_or(usize::MAX);
        check_bounds(region, addr, len)?;
        trace!(addr = format_args!("{addr:#x}"), "erase sector");
        self.device.erase_sector(addr).await
    }

    /// Program `data` at `addr` inside `region`.
    ///
    /// # Errors
    ///
    /// Bounds or device failures.
    pub async fn write(&self, region: &Region, addr: u32, data: &[u8]) -> Result<(), FlashError> {
        check_bounds(region, addr, data.len())?;
        self.device.write(addr, data).await
    }

    /// Read `len` bytes at `addr` inside `region`.
    ///
    /// # Errors
    ///
    /// Bounds or device failures.
    pub async fn read(
        &self,
        region: &Region,
        addr: u32,
        len: usize,
    ) -> Result<Vec<u8>, FlashError> {
        check_bounds(region, addr, len)?;
        let mut buf = vec![0u8; len];
        self.device.read(addr, &mut buf).await?;
        Ok(buf)
    }
}

fn check_bounds(region: &Region, addr: u32, len: usize) -> Result<(), FlashError> {
    if region.contains(addr, len) {
        Ok(())
    } else {
        Err(FlashError::OutOfBounds {
            addr,
            len,
            start: region.start,
            end: region.end(),
        })
    }
}

/// Streams an image into a staging slot.
///
/// The first byte is held back and programmed by [`StagingWriter::finalize`],
/// so the slot stays unbootable until the image is verified. Sectors are
/// erased the first time the stream reaches them.
#[derive(Debug)]
pub struct StagingWriter {
    store: FlashStore,
    region: Region,
    written: u64,
    erased: u32,
    first_byte: Option<u8>,
}

impl StagingWriter {
    /// Start writing at the beginning of `region`.
    pub fn new(store: FlashStore, region: Region) -> Self {
        Self {
            store,
            region,
            written: 0,
            erased: 0,
            first_byte: None,
        }
    }

    /// Bytes accepted so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// The slot being written.
    pub fn region(&self) -> Region {
        self.region
    }

    /// Slot capacity in bytes.
    pub fn capacity(&self) -> u64 {
        u64::from(self.region.len)
    }

    /// Append the next chunk of the image.
    ///
    /// # Errors
    ///
    /// [`FlashError::OutOfBounds`] when the chunk would run past the slot;
    /// device failures otherwise. Nothing is written on a bounds error.
    pub async fn append(&mut self, chunk: &[u8]) -> Result<(), FlashError> {
        if chunk.is_empty() {
            return Ok(());
        }
        let (offset, end) = u32::try_from(self.written)
            .ok()
            .zip(u32::try_from(chunk.len()).ok())
            .and_then(|(offset, len)| offset.checked_add(len).map(|end| (offset, end)))
            .filter(|(_, end)| *end <= self.region.len)
            .ok_or_else(|| self.overflow(chunk.len()))?;

        while self.erased < end {
            let sector = self.region.start.saturating_add(self.erased);
            self.store.erase(&self.region, sector).await?;
            self.erased = self.erased.saturating_add(self.store.map().sector_size);
        }

        let addr = self.region.start.saturating_add(offset);
        match (offset, chunk.split_first()) {
            (0, Some((first, rest))) => {
                self.first_byte = Some(*first);
                if !rest.is_empty() {
                    self.store.write(&self.region, addr.saturating_add(1), rest).await?;
                }
            }
            _ => self.store.write(&self.region, addr, chunk).await?,
        }

        self.written = u64::from(end);
        Ok(())
    }

    /// SHA-384 over the first `len` staged bytes, read back from flash with
    /// the withheld first byte substituted.
    ///
    /// # Errors
    ///
    /// Device failures, or out of bounds when `len` exceeds what was written.
    pub async fn digest(&self, len: u64, chunk_len: usize) -> Result<Digest, FlashError> {
        if len > self.written {
            return Err(FlashError::OutOfBounds {
                addr: self.region.start,
                len: usize::try_from(len).unwrap_or(usize::MAX),
                start: self.region.start,
                end: self
                    .region
                    .start
                    .saturating_add(u32::try_from(self.written).unwrap_or(u32::MAX)),
            });
        }

        let mut hasher = ImageHasher::new();
        let chunk_len = chunk_len.max(1);
        let mut pos: u64 = 0;
        while pos < len {
            let remaining = usize::try_from(len.saturating_sub(pos)).unwrap_or(usize::MAX);
            let take = remaining.min(chunk_len);
            let offset = u32::try_from(pos).unwrap_or(u32::MAX);
            let mut buf = self
                .store
                .read(&self.region, self.region.start.saturating_add(offset), take)
                .await?;
            if pos == 0 {
                if let (Some(slot), Some(first)) = (buf.first_mut(), self.first_byte) {
                    *slot = first;
                }
            }
            hasher.update(&buf);
            pos = pos.saturating_add(take as u64);
        }
        debug!(bytes = len, "staged image digest computed");
        Ok(hasher.finalize())
    }

    /// Program the withheld first byte, making the image bootable.
    ///
    /// # Errors
    ///
    /// Device failures. Finalizing an empty writer is a no-op.
    pub async fn finalize(&mut self) -> Result<(), FlashError> {
        if let Some(first) = self.first_byte.take() {
            self.store
                .write(&self.region, self.region.start, &[first])
                .await?;
            debug!(slot_start = format_args!("{:#x}", self.region.start), "image finalized");
        }
        Ok(())
    }

    fn overflow(&self, len: usize) -> FlashError {
        FlashError::OutOfBounds {
            addr: self
                .region
                .start
                .saturating_add(u32::try_from(self.written).unwrap_or(u32::MAX)),
            len,
            start: self.region.start,
            end: self.region.end(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemFlash;
    use haa_ota_crypto::sha384;

    fn store() -> Result<(Arc<MemFlash>, FlashStore), FlashError> {
        let map = RegionMap::default();
        let flash = Arc::new(MemFlash::new(map.sector_size, map.capacity));
        let store = FlashStore::new(flash.clone(), map)?;
        Ok((flash, store))
    }

    #[tokio::test]
    async fn test_write_outside_region_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let (_, store) = store()?;
        let slot = store.map().slots[0];
        let result = store.write(&slot, slot.end() - 2, &[1, 2, 3]).await;
        assert!(matches!(result, Err(FlashError::OutOfBounds { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_misaligned_erase_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let (_, store) = store()?;
        let slot = store.map().slots[0];
        let result = store.erase(&slot, slot.start + 1).await;
        assert!(matches!(result, Err(FlashError::Misaligned { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_first_byte_withheld_until_finalize() -> Result<(), Box<dyn std::error::Error>> {
        let (flash, store) = store()?;
        let slot = store.map().slots[1];
        let image: Vec<u8> = (0..10_000u32).map(|i| (i % 253) as u8 ^ 0x5A).collect();

        let mut writer = StagingWriter::new(store, slot);
        for chunk in image.chunks(1024) {
            writer.append(chunk).await?;
        }
        assert_eq!(writer.written(), 10_000);
        assert_eq!(flash.snapshot(slot.start, 1), vec![ERASED_BYTE]);

        let digest = writer.digest(10_000, 1024).await?;
        assert_eq!(digest, sha384(&image));

        writer.finalize().await?;
        assert_eq!(flash.snapshot(slot.start, 10_000), image);
        Ok(())
    }

    #[tokio::test]
    async fn test_sectors_erased_once() -> Result<(), Box<dyn std::error::Error>> {
        let (flash, store) = store()?;
        let slot = store.map().slots[0];
        let mut writer = StagingWriter::new(store, slot);
        for _ in 0..9 {
            writer.append(&[0u8; 1000]).await?;
        }
        // 9000 bytes span three 4 KiB sectors.
        assert_eq!(flash.erase_count(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_overflowing_slot_writes_nothing() -> Result<(), Box<dyn std::error::Error>> {
        let (flash, store) = store()?;
        let slot = Region::new(0x2000, 0x1000);
        let mut writer = StagingWriter::new(store, slot);
        writer.append(&[0u8; 4000]).await?;
        let writes_before = flash.write_count();
        let result = writer.append(&[0u8; 200]).await;
        assert!(matches!(result, Err(FlashError::OutOfBounds { .. })));
        assert_eq!(flash.write_count(), writes_before);
        assert_eq!(writer.written(), 4000);
        Ok(())
    }

    #[tokio::test]
    async fn test_digest_beyond_written_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let (_, store) = store()?;
        let slot = store.map().slots[0];
        let mut writer = StagingWriter::new(store, slot);
        writer.append(b"abc").await?;
        assert!(writer.digest(4, 1024).await.is_err());
        Ok(())
    }
}
