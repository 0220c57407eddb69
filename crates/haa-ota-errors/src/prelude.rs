//! Commonly used error types in one import.
//!
//! ```
//! use haa_ota_errors::prelude::*;
//!
//! fn expect_range(status: u16) -> Result<()> {
//!     match status {
//!         206 => Ok(()),
//!         other => Err(ProtocolError::UnexpectedStatus(other).into()),
//!     }
//! }
//!
//! assert!(expect_range(206).is_ok());
//! ```

pub use crate::{
    Result,
    common::{ErrorCategory, ErrorSeverity, OtaError},
    config::ConfigError,
    flash::FlashError,
    network::NetworkError,
    protocol::ProtocolError,
    verification::VerificationError,
};
