//! Session abort channel.

use haa_ota_errors::OtaError;
use tokio::sync::mpsc;

/// Requests that the running update session stop.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    tx: mpsc::Sender<String>,
}

impl AbortHandle {
    /// Ask the session to abort. Returns `false` when the engine is gone.
    ///
    /// An abort sent while no session runs is discarded when the next one
    /// starts.
    pub fn abort(&self, reason: impl Into<String>) -> bool {
        match self.tx.try_send(reason.into()) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Receiving side, polled by the engine between and during operations.
#[derive(Debug)]
pub struct AbortSignal {
    rx: mpsc::Receiver<String>,
}

impl AbortSignal {
    /// Fail with [`OtaError::Aborted`] if an abort is pending.
    ///
    /// # Errors
    ///
    /// [`OtaError::Aborted`] carrying the requested reason.
    pub fn check(&mut self) -> Result<(), OtaError> {
        match self.rx.try_recv() {
            Ok(reason) => Err(OtaError::aborted(reason)),
            Err(_) => Ok(()),
        }
    }

    /// Resolve once an abort arrives.
    pub async fn aborted(&mut self) -> OtaError {
        match self.rx.recv().await {
            Some(reason) => OtaError::aborted(reason),
            None => std::future::pending().await,
        }
    }

    /// Drop aborts that arrived while no session was running.
    pub fn clear(&mut self) {
        while self.rx.try_recv().is_ok() {}
    }
}

/// Create a connected handle and signal.
pub fn abort_channel() -> (AbortHandle, AbortSignal) {
    let (tx, rx) = mpsc::channel(1);
    (AbortHandle { tx }, AbortSignal { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_abort_is_observed_once() {
        let (handle, mut signal) = abort_channel();
        assert!(signal.check().is_ok());
        assert!(handle.abort("user"));
        assert!(handle.abort("again"));
        assert!(matches!(
            signal.check(),
            Err(OtaError::Aborted { reason }) if reason == "user"
        ));
        assert!(signal.check().is_ok());
    }

    #[tokio::test]
    async fn test_clear_discards_stale_abort() {
        let (handle, mut signal) = abort_channel();
        handle.abort("stale");
        signal.clear();
        assert!(signal.check().is_ok());
    }

    #[tokio::test]
    async fn test_closed_engine() {
        let (handle, signal) = abort_channel();
        drop(signal);
        assert!(!handle.abort("late"));
    }
}
