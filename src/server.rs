//! Downstream server seam
//!
//! Both servers fed by the multiplexer implement [`Serve`]. [`Drain`] holds
//! the shared graceful-stop bookkeeping: a stop token the serve loop watches,
//! and a done token it releases when the loop exits.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::sync::{CancellationToken, DropGuard, WaitForCancellationFutureOwned};

use crate::error::{BootstrapError, BootstrapResult};
use crate::mux::MuxListener;

/// A server that runs on a virtual listener until told to stop
#[async_trait]
pub trait Serve: Send + Sync + 'static {
    /// Short label used in logs and errors
    fn name(&self) -> &'static str;

    /// Serve connections from `listener` until stopped or failed
    async fn serve(&self, listener: MuxListener) -> BootstrapResult<()>;

    /// Stop accepting, let in-flight work finish, and wait for `serve` to
    /// return
    async fn graceful_stop(&self) -> BootstrapResult<()>;
}

/// Stop/done token pair shared by a serve loop and its graceful stop
#[derive(Debug)]
pub struct Drain {
    name: &'static str,
    stop: CancellationToken,
    done: CancellationToken,
    started: AtomicBool,
    grace: Duration,
}

impl Drain {
    pub fn new(name: &'static str, grace: Duration) -> Self {
        Self {
            name,
            stop: CancellationToken::new(),
            done: CancellationToken::new(),
            started: AtomicBool::new(false),
            grace,
        }
    }

    /// Mark the serve loop as running. Hold the guard for the lifetime of the
    /// loop; dropping it reports the loop as finished.
    pub fn begin(&self) -> DropGuard {
        self.started.store(true, Ordering::SeqCst);
        self.done.clone().drop_guard()
    }

    /// Future the serve loop hands to its server as the shutdown signal
    pub fn signal(&self) -> WaitForCancellationFutureOwned {
        self.stop.clone().cancelled_owned()
    }

    pub fn is_stopping(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Signal the loop and wait for it to finish, bounded by the grace period.
    ///
    /// A loop that has not called [`begin`](Self::begin) yet is not waited
    /// for. The stop token is already cancelled when it does start, so its
    /// [`signal`](Self::signal) resolves at once and the loop exits on its
    /// first poll; the coordinator's final join collects it.
    pub async fn stop(&self) -> BootstrapResult<()> {
        self.stop.cancel();

        if !self.started.load(Ordering::SeqCst) {
            tracing::debug!(server = self.name, "Server never started, nothing to drain");
            return Ok(());
        }

        tokio::time::timeout(self.grace, self.done.cancelled())
            .await
            .map_err(|_| BootstrapError::DrainTimeout {
                server: self.name,
                grace: self.grace,
            })?;

        tracing::info!(server = self.name, "Server drained");
        Ok(())
    }
}
