//! Run-wide cancellation.
//!
//! A reconciliation run checks its token between actions. Cancelling lets
//! in-flight actions finish, flushes the audit log, and leaves the rest of the
//! plan for the next run.

use crate::error::{Result, SyncError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Cooperative cancellation token shared by every task of a run.
///
/// Clones share state: cancelling any clone cancels all of them.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Return `Err(SyncError::Cancelled)` once cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Cancel this token on Ctrl-C / SIGTERM.
    ///
    /// A second signal after cancellation exits the process immediately.
    /// Only one handler can be installed per process.
    pub fn install_signal_handler(&self) -> Result<()> {
        let token = self.clone();
        ctrlc::set_handler(move || {
            if token.is_cancelled() {
                std::process::exit(130);
            }
            warn!("Cancellation requested; finishing in-flight actions");
            token.cancel();
        })
        .map_err(|e| SyncError::config(format!("Failed to install signal handler: {}", e)))
    }
}
