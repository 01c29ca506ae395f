//! State shared between the control thread and outside observers.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// Cancellation flag plus the published progress of the current run.
///
/// Everything here can be read without waiting for the run loop.
#[derive(Debug, Default)]
pub struct RunControl {
    cancel: AtomicBool,
    active: AtomicBool,
    position: AtomicI64,
    holes_done: AtomicUsize,
    holes_total: AtomicUsize,
    error: Mutex<Option<String>>,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the run loop to stop after the current hole.
    pub fn request_stop(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Forget a stop request, e.g. once the run it was meant for has ended.
    pub fn clear_stop(&self) {
        self.cancel.store(false, Ordering::SeqCst);
    }

    /// Claim the machine for a new run. Returns false if one is in progress.
    ///
    /// A successful claim clears the stop request and the previous error.
    pub fn try_begin(&self) -> bool {
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        self.clear_stop();
        self.set_progress(0, 0);
        self.set_error(None);
        true
    }

    /// Release the machine, recording why the run failed if it did.
    pub fn finish(&self, error: Option<String>) {
        self.set_error(error);
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn set_position(&self, position: i64) {
        self.position.store(position, Ordering::Relaxed);
    }

    /// Last published tone-axis position.
    pub fn position(&self) -> i64 {
        self.position.load(Ordering::Relaxed)
    }

    pub fn set_progress(&self, done: usize, total: usize) {
        self.holes_total.store(total, Ordering::Relaxed);
        self.holes_done.store(done, Ordering::Relaxed);
    }

    /// Fraction of the current run's holes already punched, from 0 to 1.
    pub fn progress(&self) -> f64 {
        let total = self.holes_total.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        let done = self.holes_done.load(Ordering::Relaxed).min(total);
        done as f64 / total as f64
    }

    pub fn error(&self) -> Option<String> {
        self.error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_error(&self, error: Option<String>) {
        *self.error.lock().unwrap_or_else(PoisonError::into_inner) = error;
    }
}
