//! Test doubles and fixtures for the HAA update engine.
//!
//! # Modules
//!
//! - [`mod@must`] - Unwrap helper with `#[track_caller]` panic locations
//! - [`repository`] - Scripted HTTP repository implementing `Transport`
//! - [`clock`] - Manually advanced `Clock`
//! - [`fixtures`] - Signing keys, signature files, images and provisioned flash
//! - [`prelude`] - Convenience re-exports
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! haa-ota-test-helpers = { workspace = true }
//! ```
//!
//! ```rust,ignore
//! use haa_ota_test_helpers::prelude::*;
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![allow(clippy::unwrap_used, clippy::panic)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod must;
pub mod prelude;

#[cfg(feature = "mock")]
#[cfg_attr(docsrs, doc(cfg(feature = "mock")))]
pub mod clock;

#[cfg(feature = "mock")]
#[cfg_attr(docsrs, doc(cfg(feature = "mock")))]
pub mod repository;

#[cfg(feature = "fixtures")]
#[cfg_attr(docsrs, doc(cfg(feature = "fixtures")))]
pub mod fixtures;

pub use haa_ota_update::MemFlash;
pub use must::*;
