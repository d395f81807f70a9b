use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation shared between the engine and a signal listener.
///
/// While blocked, an incoming signal is only recorded as pending and the
/// engine observes it through [`CancelGuard::poll`] at its next safe point.
/// While unblocked, [`CancelGuard::signal`] reports that the caller should
/// terminate right away.
#[derive(Debug, Clone)]
pub struct CancelGuard {
    blocked: Arc<AtomicBool>,
    pending: Arc<AtomicBool>,
}

impl Default for CancelGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelGuard {
    /// A fresh guard starts blocked with nothing pending.
    pub fn new() -> Self {
        Self {
            blocked: Arc::new(AtomicBool::new(true)),
            pending: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn block(&self) {
        self.blocked.store(true, Ordering::SeqCst);
    }

    pub fn unblock(&self) {
        self.blocked.store(false, Ordering::SeqCst);
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::SeqCst)
    }

    /// True iff a signal arrived while blocked.
    pub fn poll(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    /// Re-enter the blocked state and drop any pending signal.
    pub fn reset(&self) {
        self.pending.store(false, Ordering::SeqCst);
        self.blocked.store(true, Ordering::SeqCst);
    }

    /// Deliver a termination signal. Returns `true` when it was deferred.
    pub fn signal(&self) -> bool {
        if self.is_blocked() {
            self.pending.store(true, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    /// Return `Err(Cancelled)` when a signal is pending.
    pub fn checkpoint(&self) -> crate::Result<()> {
        if self.poll() {
            Err(crate::Error::Cancelled)
        } else {
            Ok(())
        }
    }
}
