//! In-memory NOR flash.
//!
//! Behaves like the real part: erase sets a sector to `0xFF`, a write can only
//! clear bits. A write budget simulates power loss: once it is spent every
//! further erase or write fails and leaves the contents untouched.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use haa_ota_errors::FlashError;

use crate::flash::{ERASED_BYTE, FlashDevice};

/// RAM-backed [`FlashDevice`].
#[derive(Debug)]
pub struct MemFlash {
    sector_size: u32,
    data: Mutex<Vec<u8>>,
    writes: AtomicU64,
    erases: AtomicU64,
    budget: Mutex<Option<u64>>,
}

impl MemFlash {
    /// A fully erased device.
    pub fn new(sector_size: u32, capacity: u32) -> Self {
        let len = usize::try_from(capacity).unwrap_or(0);
        Self {
            sector_size,
            data: Mutex::new(vec![ERASED_BYTE; len]),
            writes: AtomicU64::new(0),
            erases: AtomicU64::new(0),
            budget: Mutex::new(None),
        }
    }

    /// Copy of `len` bytes at `addr`; out-of-range bytes read as erased.
    pub fn snapshot(&self, addr: u32, len: usize) -> Vec<u8> {
        let start = usize::try_from(addr).unwrap_or(usize::MAX);
        let data = self.lock_data();
        (0..len)
            .map(|i| {
                start
                    .checked_add(i)
                    .and_then(|pos| data.get(pos).copied())
                    .unwrap_or(ERASED_BYTE)
            })
            .collect()
    }

    /// Successful writes so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Successful erases so far.
    pub fn erase_count(&self) -> u64 {
        self.erases.load(Ordering::SeqCst)
    }

    /// Allow `ops` more erases or writes, then fail like a device losing power.
    pub fn fail_after(&self, ops: u64) {
        *self.lock_budget() = Some(ops);
    }

    /// Remove the power-loss budget.
    pub fn restore_power(&self) {
        *self.lock_budget() = None;
    }

    fn lock_data(&self) -> std::sync::MutexGuard<'_, Vec<u8>> {
        self.data.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_budget(&self) -> std::sync::MutexGuard<'_, Option<u64>> {
        self.budget.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn spend(&self, addr: u32, erase: bool) -> Result<(), FlashError> {
        let mut budget = self.lock_budget();
        match budget.as_mut() {
            Some(0) => {
                let reason = "power lost".to_string();
                Err(if erase {
                    FlashError::Erase { addr, reason }
                } else {
                    FlashError::Write { addr, reason }
                })
            }
            Some(left) => {
                *left = left.saturating_sub(1);
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn range(&self, addr: u32, len: usize, data_len: usize) -> Option<std::ops::Range<usize>> {
        let start = usize::try_from(addr).ok()?;
        let end = start.checked_add(len)?;
        (end <= data_len).then_some(start..end)
    }
}

#[async_trait::async_trait]
impl FlashDevice for MemFlash {
    fn sector_size(&self) -> u32 {
        self.sector_size
    }

    fn capacity(&self) -> u32 {
        u32::try_from(self.lock_data().len()).unwrap_or(u32::MAX)
    }

    async fn erase_sector(&self, addr: u32) -> Result<(), FlashError> {
        self.spend(addr, true)?;
        let mut data = self.lock_data();
        let len = usize::try_from(self.sector_size).unwrap_or(usize::MAX);
        let range = self
            .range(addr, len, data.len())
            .ok_or_else(|| FlashError::Erase {
                addr,
                reason: "outside device".to_string(),
            })?;
        if let Some(sector) = data.get_mut(range) {
            sector.fill(ERASED_BYTE);
        }
        self.erases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn write(&self, addr: u32, bytes: &[u8]) -> Result<(), FlashError> {
        self.spend(addr, false)?;
        let mut data = self.lock_data();
        let range = self
            .range(addr, bytes.len(), data.len())
            .ok_or_else(|| FlashError::Write {
                addr,
                reason: "outside device".to_string(),
            })?;
        let target = data.get_mut(range).ok_or_else(|| FlashError::Write {
            addr,
            reason: "outside device".to_string(),
        })?;

        if let Some(pos) = target
            .iter()
            .zip(bytes)
            .position(|(old, new)| old & new != *new)
        {
            let offset = u32::try_from(pos).unwrap_or(u32::MAX);
            return Err(FlashError::NotErased {
                addr: addr.saturating_add(offset),
            });
        }
        for (old, new) in target.iter_mut().zip(bytes) {
            *old &= *new;
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn read(&self, addr: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        let data = self.lock_data();
        let range = self
            .range(addr, buf.len(), data.len())
            .ok_or_else(|| FlashError::Read {
                addr,
                reason: "outside device".to_string(),
            })?;
        let source = data.get(range).ok_or_else(|| FlashError::Read {
            addr,
            reason: "outside device".to_string(),
        })?;
        buf.copy_from_slice(source);
        Ok(())
    }
}
