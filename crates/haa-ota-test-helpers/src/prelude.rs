//! Convenience re-exports for common test utilities.
//!
//! ```rust,ignore
//! use haa_ota_test_helpers::prelude::*;
//! ```

pub use crate::MemFlash;
pub use crate::must::must;

#[cfg(feature = "mock")]
pub use crate::clock::ManualClock;

#[cfg(feature = "mock")]
pub use crate::repository::{RecordedRequest, Reply, ScriptedRepository};

#[cfg(feature = "fixtures")]
pub use crate::fixtures::{SigningFixture, blank_flash, firmware_image, provisioned_flash};

/// Result type for tests that use `?`.
pub type TestResult = Result<(), Box<dyn std::error::Error>>;
