//! Flash sector store errors.

use crate::common::ErrorSeverity;

/// Bounds, alignment and device failures of the flash store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlashError {
    /// Access crosses the boundary of its target region
    #[error("access {addr:#x}+{len} outside region [{start:#x}, {end:#x})")]
    OutOfBounds {
        /// Start address of the access
        addr: u32,
        /// Length of the access
        len: usize,
        /// Region start
        start: u32,
        /// Region end (exclusive)
        end: u32,
    },

    /// Erase address not on a sector boundary
    #[error("address {addr:#x} is not aligned to {sector_size}-byte sectors")]
    Misaligned {
        /// Offending address
        addr: u32,
        /// Sector size
        sector_size: u32,
    },

    /// A write tried to set bits that are already cleared
    #[error("write to {addr:#x} requires an erase first")]
    NotErased {
        /// First offending address
        addr: u32,
    },

    /// Device failed to erase a sector
    #[error("erase of sector {addr:#x} failed: {reason}")]
    Erase {
        /// Sector address
        addr: u32,
        /// Failure reason
        reason: String,
    },

    /// Device failed to program
    #[error("write at {addr:#x} failed: {reason}")]
    Write {
        /// Write address
        addr: u32,
        /// Failure reason
        reason: String,
    },

    /// Device failed to read
    #[error("read at {addr:#x} failed: {reason}")]
    Read {
        /// Read address
        addr: u32,
        /// Failure reason
        reason: String,
    },
}

impl FlashError {
    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            FlashError::OutOfBounds { .. }
            | FlashError::Misaligned { .. }
            | FlashError::NotErased { .. } => ErrorSeverity::Error,
            FlashError::Erase { .. } | FlashError::Write { .. } | FlashError::Read { .. } => {
                ErrorSeverity::Critical
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_bounds_message() {
        let err = FlashError::OutOfBounds {
            addr: 0x8d000,
            len: 16,
            start: 0x2000,
            end: 0x8d000,
        };
        assert_eq!(
            err.to_string(),
            "access 0x8d000+16 outside region [0x2000, 0x8d000)"
        );
    }

    #[test]
    fn test_device_failures_are_critical() {
        let err = FlashError::Write {
            addr: 0,
            reason: "timeout".into(),
        };
        assert_eq!(err.severity(), ErrorSeverity::Critical);
    }
}
