//! Update orchestrator.
//!
//! Drives one update session through
//! `Idle → CheckingVersion → FetchingImage → FetchingSignature → Verifying →
//! Committing → Success | Failed`. Each [`Orchestrator::step`] performs the
//! work of the current state and moves to the next one, so a caller can run
//! a whole cycle with [`Orchestrator::run_cycle`] or single-step it in tests.
//!
//! Nothing persisted changes before `Committing`, and `Committing` changes
//! the installed version and boot selection in one parameter record write.
//! A failure at any point leaves the running image and its record in force.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use haa_ota_crypto::{RECORD_LEN, SignatureRecord, digest_eq};
use haa_ota_errors::{OtaError, VerificationError};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::abort::{AbortHandle, AbortSignal, abort_channel};
use crate::boot::Slot;
use crate::clock::Clock;
use crate::config::OtaConfig;
use crate::fetch::{FetchClient, ResumePoint};
use crate::flash::{FlashDevice, FlashStore, StagingWriter};
use crate::holdoff::CheckSchedule;
use crate::http::Location;
use crate::transport::Transport;
use crate::trust::VersionTrustStore;
use crate::version::FirmwareVersion;

const EVENT_CAPACITY: usize = 64;

/// Observable engine state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum UpdateState {
    /// No session running
    #[default]
    Idle,
    /// Fetching the remote version file
    CheckingVersion,
    /// Streaming the image into the staging slot
    FetchingImage {
        /// Bytes staged so far
        written: u64,
        /// Declared image size once known
        total: Option<u64>,
    },
    /// Fetching the detached signature
    FetchingSignature,
    /// Checking size, digest and signature
    Verifying,
    /// Finalizing the image and writing the parameter record
    Committing,
    /// A new image is committed and takes effect on reboot
    Success {
        /// Committed version
        version: FirmwareVersion,
    },
    /// The session ended without changing anything persisted
    Failed {
        /// What went wrong
        error: OtaError,
    },
}

impl UpdateState {
    /// Whether a session is between start and a terminal state.
    pub fn is_in_progress(&self) -> bool {
        !matches!(
            self,
            UpdateState::Idle | UpdateState::Success { .. } | UpdateState::Failed { .. }
        )
    }

    /// Short machine-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            UpdateState::Idle => "idle",
            UpdateState::CheckingVersion => "checking_version",
            UpdateState::FetchingImage { .. } => "fetching_image",
            UpdateState::FetchingSignature => "fetching_signature",
            UpdateState::Verifying => "verifying",
            UpdateState::Committing => "committing",
            UpdateState::Success { .. } => "success",
            UpdateState::Failed { .. } => "failed",
        }
    }
}

impl fmt::Display for UpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateState::FetchingImage {
                written,
                total: Some(total),
            } => write!(f, "fetching_image ({written}/{total})"),
            UpdateState::Success { version } => write!(f, "success ({version})"),
            UpdateState::Failed { error } => write!(f, "failed ({error})"),
            other => f.write_str(other.name()),
        }
    }
}

/// Answer to a request to start a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// A session was started
    Started,
    /// A session is already running; nothing changed
    AlreadyRunning,
    /// The failure holdoff has not expired
    HeldOff {
        /// Time until the next attempt is allowed
        remaining: Duration,
    },
    /// An image is committed and waits for a reboot
    RebootPending,
    /// Running a temporary image that has not been confirmed
    AwaitingConfirmation,
}

/// How a full cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No session was started
    NotStarted(TriggerOutcome),
    /// The remote version is not newer than the installed one
    UpToDate,
    /// A new image was committed
    Updated(FirmwareVersion),
    /// The session failed
    Failed(OtaError),
}

/// RAM-only state of one session.
#[derive(Debug)]
struct Session {
    staging: Slot,
    remote: Option<FirmwareVersion>,
    writer: StagingWriter,
    resume: ResumePoint,
    record: Option<SignatureRecord>,
}

/// The update engine.
pub struct Orchestrator {
    config: OtaConfig,
    store: VersionTrustStore,
    flash: FlashStore,
    fetch: FetchClient,
    clock: Arc<dyn Clock>,
    schedule: CheckSchedule,
    state: UpdateState,
    session: Option<Session>,
    reboot_pending: bool,
    abort_handle: AbortHandle,
    abort: AbortSignal,
    events: broadcast::Sender<UpdateState>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("state", &self.state)
            .field("running_slot", &self.store.running_slot())
            .field("reboot_pending", &self.reboot_pending)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Validate `config`, open the persisted record and start idle.
    ///
    /// # Errors
    ///
    /// Configuration errors, a region map that does not fit `device`, or
    /// flash read failures.
    pub async fn new(
        config: OtaConfig,
        device: Arc<dyn FlashDevice>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, OtaError> {
        config.validate()?;
        let flash = FlashStore::new(device, config.regions.clone())?;
        let store = VersionTrustStore::open(flash.clone()).await?;
        let reboot_pending = store
            .params()
            .temporary
            .as_ref()
            .is_some_and(|temporary| !temporary.tried);
        let (abort_handle, abort) = abort_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        info!(
            running = %store.running_slot(),
            installed = ?store.installed_version().map(ToString::to_string),
            "update engine ready"
        );
        Ok(Self {
            fetch: FetchClient::new(transport, config.fetch.clone()),
            schedule: CheckSchedule::new(config.holdoff.clone()),
            config,
            store,
            flash,
            clock,
            state: UpdateState::Idle,
            session: None,
            reboot_pending,
            abort_handle,
            abort,
            events,
        })
    }

    /// Current state.
    pub fn get_update_state(&self) -> &UpdateState {
        &self.state
    }

    /// Version of the permanently installed image.
    pub fn get_installed_version(&self) -> Option<&FirmwareVersion> {
        self.store.installed_version()
    }

    /// Persisted version, key and boot state.
    pub fn store(&self) -> &VersionTrustStore {
        &self.store
    }

    /// Handle that aborts the running session from another task.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort_handle.clone()
    }

    /// Receive every state change.
    pub fn subscribe(&self) -> broadcast::Receiver<UpdateState> {
        self.events.subscribe()
    }

    /// Time left on the failure holdoff.
    pub fn holdoff_remaining(&self) -> Option<Duration> {
        self.schedule.holdoff_remaining(self.clock.now())
    }

    /// Confirm a temporarily booted image, making it permanent.
    ///
    /// Returns the confirmed version, or `None` when nothing was pending.
    ///
    /// # Errors
    ///
    /// Flash failures while writing the record.
    pub async fn confirm_boot(&mut self) -> Result<Option<FirmwareVersion>, OtaError> {
        if self.reboot_pending {
            debug!("temporary image not booted yet, nothing to confirm");
            return Ok(None);
        }
        Ok(self.store.boot().confirm_temporary_as_permanent().await?)
    }

    /// Start a check unless one is running or not allowed yet.
    pub fn trigger_check_for_update(&mut self) -> TriggerOutcome {
        let outcome = self.admit();
        if outcome == TriggerOutcome::Started {
            let staging = self.store.running_slot().other();
            let region = staging.region(self.flash.map());
            let image_location = match self
                .config
                .repository
                .location_of(&self.config.artifacts.image_file)
            {
                Ok(location) => location,
                Err(e) => {
                    self.fail(e.into());
                    return outcome;
                }
            };
            self.abort.clear();
            self.session = Some(Session {
                staging,
                remote: None,
                writer: StagingWriter::new(self.flash.clone(), region),
                resume: ResumePoint::new(image_location),
                record: None,
            });
            info!(%staging, "update check started");
            self.transition(UpdateState::CheckingVersion);
        } else {
            debug!(?outcome, "update check not started");
        }
        outcome
    }

    fn admit(&self) -> TriggerOutcome {
        if self.state.is_in_progress() {
            return TriggerOutcome::AlreadyRunning;
        }
        if self.reboot_pending {
            return TriggerOutcome::RebootPending;
        }
        if self
            .store
            .params()
            .temporary
            .as_ref()
            .is_some_and(|temporary| temporary.tried)
        {
            return TriggerOutcome::AwaitingConfirmation;
        }
        match self.schedule.holdoff_remaining(self.clock.now()) {
            Some(remaining) => TriggerOutcome::HeldOff { remaining },
            None => TriggerOutcome::Started,
        }
    }

    /// Start a check if the schedule says one is due, and run it.
    ///
    /// Returns `None` when nothing was due.
    pub async fn poll_schedule(&mut self) -> Option<CycleOutcome> {
        if self.state.is_in_progress() || !self.schedule.is_due(self.clock.now()) {
            return None;
        }
        Some(self.run_cycle().await)
    }

    /// Trigger a check and step until the session ends.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let outcome = self.trigger_check_for_update();
        if outcome != TriggerOutcome::Started {
            return CycleOutcome::NotStarted(outcome);
        }
        loop {
            match &self.state {
                UpdateState::Idle => return CycleOutcome::UpToDate,
                UpdateState::Success { version } => return CycleOutcome::Updated(version.clone()),
                UpdateState::Failed { error } => return CycleOutcome::Failed(error.clone()),
                _ => {
                    self.step().await;
                }
            }
        }
    }

    /// Do the work of the current state and move on.
    ///
    /// `Success` and `Failed` step to `Idle`; `Idle` stays put.
    pub async fn step(&mut self) -> UpdateState {
        let result = match self.state {
            UpdateState::Idle => return UpdateState::Idle,
            UpdateState::Success { .. } | UpdateState::Failed { .. } => {
                self.session = None;
                self.transition(UpdateState::Idle);
                return UpdateState::Idle;
            }
            UpdateState::CheckingVersion => self.check_version().await,
            UpdateState::FetchingImage { .. } => self.fetch_image().await,
            UpdateState::FetchingSignature => self.fetch_signature().await,
            UpdateState::Verifying => self.verify().await,
            UpdateState::Committing => self.commit().await,
        };
        match result {
            Ok(next) => self.transition(next),
            Err(e) => self.fail(e),
        }
        self.state.clone()
    }

    async fn check_version(&mut self) -> Result<UpdateState, OtaError> {
        self.abort.check()?;
        let location = self
            .config
            .repository
            .location_of(&self.config.artifacts.version_file)?;
        let body = self
            .fetch_small_retrying(&location, self.config.fetch.max_version_len, "version")
            .await?;
        let remote = FirmwareVersion::from_bytes(&body)?;
        let installed = self
            .store
            .installed_version()
            .cloned()
            .unwrap_or_else(FirmwareVersion::zero);

        if !remote.is_newer_than(&installed) {
            info!(%remote, %installed, "firmware up to date");
            self.schedule.record_success(self.clock.now());
            self.session = None;
            return Ok(UpdateState::Idle);
        }

        info!(%remote, %installed, "newer firmware available");
        let session = self.session_mut()?;
        session.remote = Some(remote);
        Ok(UpdateState::FetchingImage {
            written: 0,
            total: None,
        })
    }

    async fn fetch_image(&mut self) -> Result<UpdateState, OtaError> {
        let attempts = self.config.fetch.image_attempts;
        let retry_delay = self.config.fetch.retry_delay;
        let events = self.events.clone();
        let mut on_progress = move |written: u64, total: u64| {
            publish(
                &events,
                UpdateState::FetchingImage {
                    written,
                    total: Some(total),
                },
            );
        };

        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            self.abort.check()?;
            let session = self
                .session
                .as_mut()
                .ok_or_else(|| OtaError::aborted("session lost"))?;
            let result = self
                .fetch
                .download(
                    &mut session.resume,
                    &mut session.writer,
                    &mut self.abort,
                    &mut on_progress,
                )
                .await;

            match result {
                Ok(total) => {
                    info!(bytes = total, from = %session.resume.location, "image staged");
                    return Ok(UpdateState::FetchingSignature);
                }
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!(
                        attempt,
                        attempts,
                        written = session.writer.written(),
                        error = %e,
                        "image transfer interrupted, resuming"
                    );
                    self.state = UpdateState::FetchingImage {
                        written: session.writer.written(),
                        total: session.resume.total,
                    };
                    self.pause(retry_delay).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_signature(&mut self) -> Result<UpdateState, OtaError> {
        self.abort.check()?;
        let location = self
            .config
            .repository
            .location_of(&self.config.artifacts.signature_file())?;
        let blob = self
            .fetch_small_retrying(&location, RECORD_LEN, "signature")
            .await?;
        let record = SignatureRecord::decode(&blob).map_err(VerificationError::from)?;
        debug!(declared = record.size, "signature record decoded");
        self.session_mut()?.record = Some(record);
        Ok(UpdateState::Verifying)
    }

    async fn verify(&mut self) -> Result<UpdateState, OtaError> {
        self.abort.check()?;
        let chunk_len = self.config.fetch.recv_buffer_len;
        let session = self.session_mut()?;
        let record = session
            .record
            .clone()
            .ok_or_else(|| VerificationError::malformed("no signature record"))?;

        if record.size == 0 {
            return Err(VerificationError::EmptyImage.into());
        }
        let written = session.writer.written();
        if u64::from(record.size) != written {
            return Err(VerificationError::SizeMismatch {
                declared: u64::from(record.size),
                written,
            }
            .into());
        }
        let digest = session.writer.digest(written, chunk_len).await?;
        if !digest_eq(&digest, &record.hash) {
            return Err(VerificationError::DigestMismatch.into());
        }

        let keys = self.store.trusted_keys().await?;
        let slot = keys.verify(&record.hash, &record.signature)?;
        info!(key = %slot, "image signature accepted");
        Ok(UpdateState::Committing)
    }

    async fn commit(&mut self) -> Result<UpdateState, OtaError> {
        self.abort.check()?;
        let mode = self.config.boot.commit_mode;
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| OtaError::aborted("session lost"))?;
        let version = session
            .remote
            .clone()
            .ok_or_else(|| VerificationError::malformed("no remote version"))?;
        let staging = session.staging;

        session.writer.finalize().await?;
        self.store.commit_image(staging, version.clone(), mode).await?;
        self.reboot_pending = true;
        self.schedule.record_success(self.clock.now());
        self.session = None;
        info!(%version, %staging, ?mode, "update committed, reboot to apply");
        Ok(UpdateState::Success { version })
    }

    async fn fetch_small_retrying(
        &mut self,
        location: &Location,
        max_len: usize,
        what: &'static str,
    ) -> Result<Vec<u8>, OtaError> {
        let attempts = self.config.fetch.small_file_attempts;
        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            self.abort.check()?;
            let result = tokio::select! {
                biased;
                err = self.abort.aborted() => return Err(err),
                result = self.fetch.fetch_small(location, max_len) => result,
            };
            match result {
                Ok(body) => return Ok(body),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!(what, attempt, attempts, error = %e, "fetch failed, retrying");
                    self.pause(self.config.fetch.retry_delay).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn pause(&mut self, delay: Duration) -> Result<(), OtaError> {
        let clock = Arc::clone(&self.clock);
        tokio::select! {
            biased;
            err = self.abort.aborted() => Err(err),
            () = clock.sleep(delay) => Ok(()),
        }
    }

    fn session_mut(&mut self) -> Result<&mut Session, OtaError> {
        self.session
            .as_mut()
            .ok_or_else(|| OtaError::aborted("session lost"))
    }

    fn fail(&mut self, error: OtaError) {
        self.session = None;
        let holdoff = self.schedule.record_failure(self.clock.now());
        error!(
            error = %error,
            category = %error.category(),
            severity = %error.severity(),
            holdoff_secs = holdoff.as_secs(),
            "update failed"
        );
        self.transition(UpdateState::Failed { error });
    }

    fn transition(&mut self, next: UpdateState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "update state changed");
        }
        self.state = next;
        publish(&self.events, self.state.clone());
    }
}

fn publish(events: &broadcast::Sender<UpdateState>, state: UpdateState) {
    if let Err(e) = events.send(state) {
        debug!(state = %e.0, "no state subscribers");
    }
}
