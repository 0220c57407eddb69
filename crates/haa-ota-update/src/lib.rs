//! Fail-safe over-the-air update engine for HAA devices.
//!
//! The engine checks a remote repository for a newer firmware version,
//! streams the image into the flash slot that is not running, verifies its
//! detached ECDSA P-384 signature and only then switches the boot selection.
//! A power cut, network failure or bad signature at any point leaves the
//! running image and its persisted record untouched.
//!
//! # Architecture
//!
//! - [`flash`]: region-checked sector store and the staging writer
//! - [`params`]: ping-pong persisted parameter record
//! - [`trust`]: installed version, trusted keys and atomic commits
//! - [`boot`]: permanent and try-once boot selection
//! - [`http`], [`transport`], [`fetch`]: HTTP(S) GETs with redirects and resume
//! - [`holdoff`]: failure backoff and check scheduling
//! - [`orchestrator`]: the update state machine
//! - [`config`]: JSON configuration with defaults for the stock layout
//!
//! # Collaborators
//!
//! The engine touches the outside world only through three traits:
//! [`FlashDevice`] for sector storage, [`Transport`] for byte streams and
//! [`Clock`] for time. [`MemFlash`] and [`TcpTransport`] are the bundled
//! implementations.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use haa_ota_update::prelude::*;
//!
//! # async fn run() -> std::result::Result<(), Box<dyn std::error::Error>> {
//! let config = OtaConfig::default();
//! let flash = Arc::new(MemFlash::new(config.regions.sector_size, config.regions.capacity));
//! let transport = Arc::new(TcpTransport::new()?);
//! let mut engine = Orchestrator::new(config, flash, transport, Arc::new(TokioClock)).await?;
//!
//! match engine.run_cycle().await {
//!     CycleOutcome::Updated(version) => println!("installed {version}, reboot to apply"),
//!     other => println!("{other:?}"),
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod abort;
pub mod boot;
pub mod clock;
pub mod config;
pub mod fetch;
pub mod flash;
pub mod holdoff;
pub mod http;
pub mod memory;
pub mod orchestrator;
pub mod params;
pub mod prelude;
pub mod transport;
pub mod trust;
pub mod version;

pub use abort::{AbortHandle, AbortSignal, abort_channel};
pub use boot::{BootSelector, CommitMode, Slot};
pub use clock::{Clock, TokioClock};
pub use config::{
    ArtifactNames, BootPolicy, FetchPolicy, HoldoffPolicy, OtaConfig, Region, RegionMap,
    RepositoryConfig,
};
pub use fetch::{FetchClient, ResumePoint};
pub use flash::{ERASED_BYTE, FlashDevice, FlashStore, StagingWriter};
pub use holdoff::CheckSchedule;
pub use http::{ContentRange, Endpoint, Location, ResponseHead};
pub use memory::MemFlash;
pub use orchestrator::{CycleOutcome, Orchestrator, TriggerOutcome, UpdateState};
pub use params::{ParamStore, SysParams, TemporaryBoot};
pub use transport::{Connection, TcpTransport, Transport};
pub use trust::VersionTrustStore;
pub use version::{FirmwareVersion, MAX_VERSION_LEN};
