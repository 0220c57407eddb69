//! Error taxonomy for the HAA over-the-air update engine.
//!
//! Every fallible operation of the update engine returns one of the error
//! families defined here. The families map one-to-one onto the stages of an
//! update session so the orchestrator can decide, from the error alone,
//! whether a step is worth retrying locally or the whole session must fail.
//!
//! # Architecture
//!
//! - [`network`]: connection, TLS, send/receive and redirect failures
//! - [`protocol`]: malformed or unexpected HTTP responses
//! - [`flash`]: sector store bounds, alignment and device failures
//! - [`verification`]: size, digest and signature rejections
//! - [`config`]: invalid configuration, region maps and version strings
//! - [`common`]: the aggregate [`OtaError`] with category and retry classification
//!
//! # Retry classification
//!
//! Network errors and transient protocol errors (5xx statuses, truncated
//! responses) are retried inside the fetch step that produced them. Anything
//! else ends the session in the failed state.
//!
//! # Example
//!
//! ```
//! use haa_ota_errors::prelude::*;
//!
//! fn check_status(status: u16) -> Result<()> {
//!     if !(200..300).contains(&status) {
//!         return Err(ProtocolError::UnexpectedStatus(status).into());
//!     }
//!     Ok(())
//! }
//!
//! let err = check_status(503).unwrap_err();
//! assert!(err.is_retryable());
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod common;
pub mod config;
pub mod flash;
pub mod network;
pub mod prelude;
pub mod protocol;
pub mod verification;

pub use common::{ErrorCategory, ErrorSeverity, OtaError};
pub use config::ConfigError;
pub use flash::FlashError;
pub use network::NetworkError;
pub use protocol::ProtocolError;
pub use verification::VerificationError;

/// A specialized `Result` type for update engine operations.
pub type Result<T> = std::result::Result<T, OtaError>;
