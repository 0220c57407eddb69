//! Common imports for driving the update engine.

pub use crate::{
    AbortHandle, Clock, CommitMode, CycleOutcome, FirmwareVersion, FlashDevice, MemFlash,
    Orchestrator, OtaConfig, RegionMap, Slot, TcpTransport, TokioClock, Transport,
    TriggerOutcome, UpdateState, VersionTrustStore,
};
pub use haa_ota_errors::{OtaError, Result};
