//! Transfer controllers
//!
//! A transfer runs as a spawned task; its controller exposes pause, resume,
//! abort, and a one-shot `completion()`. Pausing halts new block transfers
//! while in-flight ones finish; aborting cancels everything in flight.

use drive_core::{AbortController, AbortSignal, DriveError};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Caller abort token merged with the controller's own.
#[derive(Clone)]
pub(crate) struct MergedAbort {
    caller: AbortSignal,
    own: AbortSignal,
}

impl MergedAbort {
    pub(crate) fn new(caller: AbortSignal, own: AbortSignal) -> Self {
        Self { caller, own }
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.caller.is_aborted() || self.own.is_aborted()
    }

    pub(crate) fn check(&self) -> Result<(), DriveError> {
        if self.is_aborted() {
            Err(DriveError::Aborted)
        } else {
            Ok(())
        }
    }

    pub(crate) async fn aborted(&self) {
        tokio::select! {
            () = self.caller.aborted() => {}
            () = self.own.aborted() => {}
        }
    }

    /// The signal handed to HTTP calls. Cancelling either side cancels the
    /// fetch, so propagating the caller side alone is not enough.
    pub(crate) fn signal(&self) -> AbortSignal {
        // The own signal fires on controller abort; the caller signal is
        // checked at suspension points. For in-flight HTTP both must
        // propagate, so the own controller is also tripped by the caller
        // (see TransferController::spawn).
        self.own.clone()
    }
}

/// Wait while paused, failing fast on abort.
pub(crate) async fn wait_unpaused(
    paused: &mut watch::Receiver<bool>,
    abort: &MergedAbort,
) -> Result<(), DriveError> {
    loop {
        abort.check()?;
        if !*paused.borrow_and_update() {
            return Ok(());
        }
        tokio::select! {
            _ = paused.changed() => {}
            () = abort.aborted() => {}
        }
    }
}

/// Single-shot handle over a running transfer.
pub struct TransferController<T> {
    paused: watch::Sender<bool>,
    own_abort: AbortController,
    handle: Mutex<Option<JoinHandle<Result<T, DriveError>>>>,
}

impl<T: Send + 'static> TransferController<T> {
    /// Spawn the transfer task and wire its pause/abort plumbing.
    pub(crate) fn spawn<F, Fut>(caller_abort: &AbortSignal, task: F) -> Self
    where
        F: FnOnce(watch::Receiver<bool>, MergedAbort) -> Fut,
        Fut: std::future::Future<Output = Result<T, DriveError>> + Send + 'static,
    {
        let (paused_tx, paused_rx) = watch::channel(false);
        let own_abort = AbortController::new();
        let merged = MergedAbort::new(caller_abort.clone(), own_abort.signal());

        // Trip the internal controller when the caller aborts, so in-flight
        // HTTP sees one signal. The bridge ends with the transfer.
        let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
        {
            let caller = caller_abort.clone();
            let own = own_abort.clone();
            tokio::spawn(async move {
                tokio::select! {
                    () = caller.aborted() => own.abort(),
                    _ = done_rx => {}
                }
            });
        }

        let transfer = task(paused_rx, merged);
        let handle = tokio::spawn(async move {
            let result = transfer.await;
            drop(done_tx);
            result
        });
        Self {
            paused: paused_tx,
            own_abort,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Halt new block transfers. In-flight ones complete.
    pub fn pause(&self) {
        let _ = self.paused.send(true);
    }

    /// Resume after a pause.
    pub fn resume(&self) {
        let _ = self.paused.send(false);
    }

    /// Abort the transfer. `completion()` rejects with an abort error.
    pub fn abort(&self) {
        self.own_abort.abort();
    }

    /// Await the final outcome. Single-shot.
    pub async fn completion(&self) -> Result<T, DriveError> {
        let handle = self
            .handle
            .lock()
            .take()
            .ok_or_else(|| DriveError::validation("completion() already awaited"))?;
        match handle.await {
            Ok(result) => result,
            Err(err) => Err(DriveError::server(format!("transfer task failed: {err}"))),
        }
    }
}

/// Controller of a running download; `completion()` yields the byte count
/// delivered to the sink.
pub type DownloadController = TransferController<u64>;

/// Controller of a running upload; `completion()` yields the committed
/// node's UID.
pub type UploadController = TransferController<drive_core::NodeUid>;
