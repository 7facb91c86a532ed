//! Cooperative cancellation tokens
//!
//! Every public SDK operation accepts an [`AbortSignal`]. Aborting propagates
//! to in-flight HTTP through the fetcher and cancels retries between
//! attempts.

use crate::error::DriveError;
use std::sync::Arc;
use tokio::sync::watch;

/// Owner side of an abort token.
#[derive(Debug, Clone)]
pub struct AbortController {
    tx: Arc<watch::Sender<bool>>,
}

impl AbortController {
    /// Create a controller in the non-aborted state.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Get a signal observing this controller.
    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            rx: self.tx.subscribe(),
            _keepalive: Some(Arc::clone(&self.tx)),
        }
    }

    /// Abort every operation holding a signal from this controller.
    pub fn abort(&self) {
        // Send only fails when no receiver exists, which is fine.
        let _ = self.tx.send(true);
    }
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side of an abort token.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
    _keepalive: Option<Arc<watch::Sender<bool>>>,
}

impl AbortSignal {
    /// A signal that never aborts.
    pub fn none() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            rx,
            _keepalive: Some(Arc::new(tx)),
        }
    }

    /// Whether the controller has aborted.
    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Fail fast when already aborted.
    pub fn check(&self) -> Result<(), DriveError> {
        if self.is_aborted() {
            Err(DriveError::Aborted)
        } else {
            Ok(())
        }
    }

    /// Resolve once the controller aborts. Never resolves for signals whose
    /// controller is gone without aborting.
    pub async fn aborted(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Controller dropped without aborting; this signal can never
                // fire.
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn signal_observes_abort() {
        let controller = AbortController::new();
        let signal = controller.signal();
        assert!(!signal.is_aborted());
        assert!(signal.check().is_ok());

        controller.abort();
        assert!(signal.is_aborted());
        assert_eq!(signal.check(), Err(DriveError::Aborted));
        signal.aborted().await;
    }

    #[tokio::test]
    async fn none_signal_never_aborts() {
        let signal = AbortSignal::none();
        assert!(!signal.is_aborted());
        let wait = signal.aborted();
        tokio::select! {
            () = wait => panic!("none() signal must not fire"),
            () = tokio::task::yield_now() => {}
        }
    }
}
