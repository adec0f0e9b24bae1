//! [`SafetyState`] – the control state shared by the execute, telemetry and
//! monitor tasks.
//!
//! | Field | Written by | Read by |
//! |---|---|---|
//! | `paused` | obstacle monitor | motion executor, manual commands |
//! | progress | pattern runner | telemetry |
//!
//! The pause flag is an atomic so the executor can poll it every control
//! tick without locking.  Resuming also signals a condition variable, so a
//! paused executor wakes as soon as the path is clear instead of spinning.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use fieldbot_types::Progress;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Process-wide pause flag and run progress.
///
/// Create one per process, wrap it in an [`Arc`][std::sync::Arc] and hand a
/// clone to every task.
///
/// # Example
///
/// ```
/// use fieldbot_kernel::SafetyState;
///
/// let state = SafetyState::new();
/// assert!(state.pause());
/// assert!(!state.pause()); // already paused
/// assert!(state.resume());
/// ```
#[derive(Debug, Default)]
pub struct SafetyState {
    paused: AtomicBool,
    gate: Mutex<()>,
    resumed: Condvar,
    progress: Mutex<Progress>,
}

impl SafetyState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Raise the pause flag.  Returns `true` only on the running → paused
    /// edge.
    pub fn pause(&self) -> bool {
        let _gate = lock(&self.gate);
        !self.paused.swap(true, Ordering::SeqCst)
    }

    /// Clear the pause flag and wake every waiter.  Returns `true` only on
    /// the paused → running edge.
    pub fn resume(&self) -> bool {
        let was_paused = {
            let _gate = lock(&self.gate);
            self.paused.swap(false, Ordering::SeqCst)
        };
        if was_paused {
            self.resumed.notify_all();
        }
        was_paused
    }

    /// Block while paused, for at most `timeout`.
    ///
    /// Returns `true` if the flag is clear on return.  Callers loop on this
    /// with a short timeout so they can also notice cancellation.
    pub fn wait_for_resume(&self, timeout: Duration) -> bool {
        let gate = lock(&self.gate);
        let _ = self
            .resumed
            .wait_timeout_while(gate, timeout, |_| self.paused.load(Ordering::SeqCst))
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        !self.is_paused()
    }

    /// Consistent snapshot of the progress pair.
    pub fn progress(&self) -> Progress {
        *lock(&self.progress)
    }

    /// Reset progress to `(0, total)` at the start of a run.
    pub fn begin_run(&self, total: u32) {
        *lock(&self.progress) = Progress { current: 0, total };
    }

    /// Record the 1-based index of the step about to run.  Never exceeds
    /// the run's total.
    pub fn set_current(&self, current: u32) {
        let mut progress = lock(&self.progress);
        progress.current = current.min(progress.total);
    }
}
