//! Flash image file used as the device behind every command.
//!
//! The file holds the whole flash, byte for byte. Writes keep NOR semantics so
//! the engine sees the same failures it would on hardware.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use haa_ota_errors::FlashError;
use haa_ota_update::{ERASED_BYTE, FlashDevice};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::debug;

/// A [`FlashDevice`] backed by a file.
#[derive(Debug)]
pub struct FileFlash {
    path: PathBuf,
    sector_size: u32,
    capacity: u32,
    file: Mutex<File>,
}

impl FileFlash {
    /// Create a fully erased image of `capacity` bytes, replacing any file at `path`.
    pub async fn create(path: &Path, sector_size: u32, capacity: u32) -> std::io::Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .await?;
        let sector = vec![ERASED_BYTE; usize::try_from(sector_size).unwrap_or(4096)];
        let mut left = u64::from(capacity);
        while left > 0 {
            let n = usize::try_from(left.min(sector.len() as u64)).unwrap_or(sector.len());
            file.write_all(sector.get(..n).unwrap_or_default()).await?;
            left = left.saturating_sub(n as u64);
        }
        file.flush().await?;
        debug!(path = %path.display(), capacity, "flash image created");
        Ok(Self {
            path: path.to_path_buf(),
            sector_size,
            capacity,
            file: Mutex::new(file),
        })
    }

    /// Open an existing image.
    pub async fn open(path: &Path, sector_size: u32) -> std::io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path).await?;
        let len = file.metadata().await?.len();
        let capacity = u32::try_from(len).map_err(|_overflow| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("{} is larger than 4 GiB", path.display()),
            )
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            sector_size,
            capacity,
            file: Mutex::new(file),
        })
    }

    /// Path of the image file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check(&self, addr: u32, len: usize) -> Option<u64> {
        let end = u64::from(addr).checked_add(len as u64)?;
        (end <= u64::from(self.capacity)).then_some(u64::from(addr))
    }

    async fn read_at(file: &mut File, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
        file.seek(SeekFrom::Start(offset)).await?;
        file.read_exact(buf).await.map(|_| ())
    }

    async fn write_at(file: &mut File, offset: u64, data: &[u8]) -> std::io::Result<()> {
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        file.flush().await
    }
}

#[async_trait]
impl FlashDevice for FileFlash {
    fn sector_size(&self) -> u32 {
        self.sector_size
    }

    fn capacity(&self) -> u32 {
        self.capacity
    }

    async fn erase_sector(&self, addr: u32) -> Result<(), FlashError> {
        let len = usize::try_from(self.sector_size).unwrap_or(usize::MAX);
        let offset = self.check(addr, len).ok_or_else(|| FlashError::Erase {
            addr,
            reason: "outside image".to_string(),
        })?;
        let mut file = self.file.lock().await;
        Self::write_at(&mut file, offset, &vec![ERASED_BYTE; len])
            .await
            .map_err(|e| FlashError::Erase {
                addr,
                reason: e.to_string(),
            })
    }

    async fn write(&self, addr: u32, data: &[u8]) -> Result<(), FlashError> {
        let write_err = |reason: String| FlashError::Write { addr, reason };
        let offset = self
            .check(addr, data.len())
            .ok_or_else(|| write_err("outside image".to_string()))?;

        let mut file = self.file.lock().await;
        let mut current = vec![0u8; data.len()];
        Self::read_at(&mut file, offset, &mut current)
            .await
            .map_err(|e| write_err(e.to_string()))?;
        if let Some(pos) = current
            .iter()
            .zip(data)
            .position(|(old, new)| old & new != *new)
        {
            return Err(FlashError::NotErased {
                addr: addr.saturating_add(u32::try_from(pos).unwrap_or(u32::MAX)),
            });
        }
        for (old, new) in current.iter_mut().zip(data) {
            *old &= *new;
        }
        Self::write_at(&mut file, offset, &current)
            .await
            .map_err(|e| write_err(e.to_string()))
    }

    async fn read(&self, addr: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        let read_err = |reason: String| FlashError::Read { addr, reason };
        let offset = self
            .check(addr, buf.len())
            .ok_or_else(|| read_err("outside image".to_string()))?;
        let mut file = self.file.lock().await;
        Self::read_at(&mut file, offset, buf)
            .await
            .map_err(|e| read_err(e.to_string()))
    }
}
